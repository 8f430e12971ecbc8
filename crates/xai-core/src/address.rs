//! Address encoding for the XAI network.
//!
//! Addresses are plain hex, not Bech32: a network prefix followed by 40
//! lowercase hex characters encoding `SHA256(pubkey)[..20]`.
//!
//! - Mainnet: `XAI` + 40 hex chars (e.g. `XAIaf2c...`)
//! - Testnet: `TXAI` + 40 hex chars
//!
//! There is no checksum or version byte: the format intentionally mirrors
//! the wire-level address representation in the external interface spec.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::crypto::PublicKey;
use crate::error::AddressError;
use crate::types::{Hash160, Hash256};

/// Network identifier determining the address prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    /// Mainnet (addresses start with `XAI`).
    Mainnet,
    /// Testnet (addresses start with `TXAI`).
    Testnet,
}

impl Network {
    /// Human-readable prefix for this network.
    pub fn prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => crate::constants::MAINNET_ADDRESS_PREFIX,
            Network::Testnet => crate::constants::TESTNET_ADDRESS_PREFIX,
        }
    }

    /// Look up network from an address prefix.
    pub fn from_prefix(prefix: &str) -> Result<Self, AddressError> {
        match prefix {
            "TXAI" => Ok(Network::Testnet),
            "XAI" => Ok(Network::Mainnet),
            _ => Err(AddressError::UnknownNetwork(prefix.to_string())),
        }
    }
}

/// An XAI network address: a network prefix plus a 20-byte pubkey hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    hash: Hash160,
}

impl Address {
    /// Create an address from a pubkey hash and network.
    pub fn from_pubkey_hash(pubkey_hash: Hash256, network: Network) -> Self {
        Self {
            network,
            hash: Hash160::truncate(pubkey_hash),
        }
    }

    /// Create an address directly from a 20-byte hash and network.
    pub fn from_hash160(hash: Hash160, network: Network) -> Self {
        Self { network, hash }
    }

    /// Create an address from a public key and network.
    pub fn from_public_key(public_key: &PublicKey, network: Network) -> Self {
        Self {
            network,
            hash: public_key.pubkey_hash(),
        }
    }

    /// Sentinel zero-hash address used as the `sender` of coinbase transactions.
    pub fn coinbase_sentinel(network: Network) -> Self {
        Self {
            network,
            hash: Hash160::ZERO,
        }
    }

    /// The 20-byte pubkey hash encoded in this address.
    pub fn pubkey_hash(&self) -> Hash160 {
        self.hash
    }

    /// The network this address belongs to.
    pub fn network(&self) -> Network {
        self.network
    }

    /// Encode this address as `<prefix><40 lowercase hex chars>`.
    pub fn encode(&self) -> String {
        format!("{}{}", self.network.prefix(), hex::encode(self.hash.as_bytes()))
    }

    /// Decode an address string.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let (prefix, rest) = if let Some(rest) = s.strip_prefix(crate::constants::TESTNET_ADDRESS_PREFIX) {
            (crate::constants::TESTNET_ADDRESS_PREFIX, rest)
        } else if let Some(rest) = s.strip_prefix(crate::constants::MAINNET_ADDRESS_PREFIX) {
            (crate::constants::MAINNET_ADDRESS_PREFIX, rest)
        } else {
            return Err(AddressError::UnknownNetwork(s.to_string()));
        };

        if rest.len() != 40 {
            return Err(AddressError::InvalidLength);
        }
        if rest.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(AddressError::MixedCase);
        }
        if !rest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidCharacter(
                rest.chars().find(|c| !c.is_ascii_hexdigit()).unwrap_or('?'),
            ));
        }

        let bytes = hex::decode(rest).map_err(|_| AddressError::InvalidLength)?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes);

        Ok(Self {
            network: Network::from_prefix(prefix)?,
            hash: Hash160(hash),
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

impl bincode::Encode for Address {
    fn encode<E: bincode::enc::Encoder>(&self, encoder: &mut E) -> Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&(self.network == Network::Testnet), encoder)?;
        bincode::Encode::encode(&self.hash.0, encoder)
    }
}

impl<Context> bincode::Decode<Context> for Address {
    fn decode<D: bincode::de::Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let is_testnet: bool = bincode::Decode::decode(decoder)?;
        let bytes: [u8; 20] = bincode::Decode::decode(decoder)?;
        Ok(Self {
            network: if is_testnet { Network::Testnet } else { Network::Mainnet },
            hash: Hash160(bytes),
        })
    }
}
impl<'de, Context> bincode::BorrowDecode<'de, Context> for Address {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(decoder: &mut D) -> Result<Self, bincode::error::DecodeError> {
        let is_testnet: bool = bincode::BorrowDecode::borrow_decode(decoder)?;
        let bytes: [u8; 20] = bincode::BorrowDecode::borrow_decode(decoder)?;
        Ok(Self {
            network: if is_testnet { Network::Testnet } else { Network::Mainnet },
            hash: Hash160(bytes),
        })
    }
}
