//! secp256k1 cryptographic operations for the XAI protocol.
//!
//! Provides key generation, transaction signing, and signature verification.
//! Uses the `secp256k1` crate (libsecp256k1 bindings) for ECDSA and SHA-256
//! for pubkey hashing and signing hashes.
//!
//! # Signing scheme
//!
//! A transaction's signature commits to its full account-style envelope and
//! UTXO body:
//! - version, tx_type
//! - sender, recipient, amount, fee, nonce
//! - all input outpoints (txid + index)
//! - all outputs (amount + recipient)
//! - lock_time
//!
//! The signature and public key fields themselves are excluded from the
//! signing hash to avoid circularity.
//!
//! ECDSA signatures are produced and verified in low-s form (the default for
//! `secp256k1::ecdsa::Signature::sign`), eliminating signature malleability
//! via s-negation.

use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{Message, PublicKey as SecpPublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CryptoError;
use crate::types::{Hash160, Hash256, Transaction};

/// secp256k1 keypair for signing transactions.
///
/// Wraps a [`secp256k1::SecretKey`]. Use [`KeyPair::generate`] for random
/// keys or [`KeyPair::from_secret_bytes`] for deterministic derivation from
/// a 32-byte seed.
pub struct KeyPair {
    secret_key: SecretKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        let (secret_key, _) = SECP256K1.generate_keypair(&mut rng);
        Self { secret_key }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret_key: SecretKey::from_slice(&bytes).expect("valid secp256k1 scalar"),
        }
    }

    /// Derive the public key from this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: SecpPublicKey::from_secret_key(SECP256K1, &self.secret_key),
        }
    }

    /// Get the raw secret key bytes (32 bytes). Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Sign a 32-byte message hash, returning a low-s DER-encoded signature.
    pub fn sign(&self, message: &[u8; 32]) -> Vec<u8> {
        let msg = Message::from_digest(*message);
        let sig = SECP256K1.sign_ecdsa(&msg, &self.secret_key);
        sig.serialize_der().to_vec()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// secp256k1 public key for verifying signatures and deriving addresses.
///
/// The pubkey hash (SHA-256 of the 33-byte compressed key) is what
/// [`crate::address::Address`] encodes.
#[derive(Clone)]
pub struct PublicKey {
    inner: SecpPublicKey,
}

impl PublicKey {
    /// Create a public key from compressed (33-byte) SEC1 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let inner = SecpPublicKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Get the compressed (33-byte) SEC1 public key bytes.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.inner.serialize()
    }

    /// Compute the SHA-256 pubkey hash (truncated to 20 bytes) used in addresses.
    pub fn pubkey_hash(&self) -> Hash160 {
        pubkey_hash(&self.to_bytes())
    }

    /// Verify an ECDSA signature (DER-encoded) over a 32-byte message hash.
    pub fn verify(&self, message: &[u8; 32], signature: &[u8]) -> Result<(), CryptoError> {
        let sig = EcdsaSignature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;
        let msg = Message::from_digest(*message);
        sig.verify(&msg, &self.inner)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <[u8; 33]>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Compute the SHA-256 pubkey hash (truncated to 20 bytes) from compressed
/// public key bytes.
pub fn pubkey_hash(pubkey_bytes: &[u8; 33]) -> Hash160 {
    Hash160::truncate(Hash256::sha256(pubkey_bytes))
}

/// Compute the signing hash (sighash) for a transaction's account envelope
/// plus its UTXO body.
pub fn signing_hash(tx: &Transaction) -> Hash256 {
    let mut data = Vec::new();

    data.extend_from_slice(&tx.version.to_le_bytes());
    data.push(match tx.tx_type {
        crate::types::TxType::Transfer => 0,
        crate::types::TxType::Coinbase => 1,
        crate::types::TxType::Governance => 2,
    });
    data.extend_from_slice(tx.sender.pubkey_hash().as_bytes());
    data.extend_from_slice(tx.recipient.pubkey_hash().as_bytes());
    data.extend_from_slice(&tx.amount.to_le_bytes());
    data.extend_from_slice(&tx.fee.to_le_bytes());
    data.extend_from_slice(&tx.nonce.to_le_bytes());

    data.extend_from_slice(&(tx.inputs.len() as u64).to_le_bytes());
    for input in &tx.inputs {
        data.extend_from_slice(input.previous_output.txid.as_bytes());
        data.extend_from_slice(&input.previous_output.index.to_le_bytes());
    }

    data.extend_from_slice(&(tx.outputs.len() as u64).to_le_bytes());
    for output in &tx.outputs {
        data.extend_from_slice(&output.amount.to_le_bytes());
        data.extend_from_slice(output.recipient.pubkey_hash().as_bytes());
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());

    Hash256::sha256(&data)
}

/// Sign a transaction in place with the sender's keypair.
///
/// Populates `tx.signature` and `tx.public_key`. The caller is responsible
/// for ensuring `keypair.public_key()` hashes to `tx.sender`.
pub fn sign_transaction(tx: &mut Transaction, keypair: &KeyPair) {
    let sighash = signing_hash(tx);
    tx.signature = keypair.sign(sighash.as_bytes());
    tx.public_key = keypair.public_key().to_bytes().to_vec();
}

/// Verify a transaction's signature against its declared sender.
///
/// Checks that:
/// 1. `tx.public_key` hashes to `tx.sender`'s pubkey hash
/// 2. The ECDSA signature verifies against the signing hash
pub fn verify_transaction(tx: &Transaction) -> Result<(), CryptoError> {
    let pk = PublicKey::from_bytes(&tx.public_key)?;

    if pk.pubkey_hash() != tx.sender.pubkey_hash() {
        return Err(CryptoError::PubkeyHashMismatch);
    }

    let sighash = signing_hash(tx);
    pk.verify(sighash.as_bytes(), &tx.signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, Network};
    use crate::constants::COIN;
    use crate::types::{OutPoint, TxInput, TxOutput, TxType};

    fn unsigned_tx(kp: &KeyPair, recipient: Address) -> Transaction {
        Transaction {
            version: 1,
            tx_type: TxType::Transfer,
            sender: Address::from_public_key(&kp.public_key(), Network::Mainnet),
            recipient: recipient.clone(),
            amount: 50 * COIN,
            fee: 1000,
            nonce: 0,
            timestamp: 1_700_000_000,
            inputs: vec![TxInput::spending(OutPoint { txid: Hash256([0x11; 32]), index: 0 })],
            outputs: vec![TxOutput { amount: 50 * COIN, recipient }],
            lock_time: 0,
            signature: vec![],
            public_key: vec![],
        }
    }

    #[test]
    fn keypair_generate_unique() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        assert_ne!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn keypair_from_secret_deterministic() {
        let seed = [42u8; 32];
        let kp1 = KeyPair::from_secret_bytes(seed);
        let kp2 = KeyPair::from_secret_bytes(seed);
        assert_eq!(kp1.public_key(), kp2.public_key());
    }

    #[test]
    fn keypair_debug_hides_secret() {
        let kp = KeyPair::generate();
        let debug = format!("{kp:?}");
        assert!(debug.contains("KeyPair"));
        let secret_hex = hex::encode(kp.secret_bytes());
        assert!(!debug.contains(&secret_hex));
    }

    #[test]
    fn pubkey_from_bytes_roundtrip() {
        let kp = KeyPair::generate();
        let pk = kp.public_key();
        let pk2 = PublicKey::from_bytes(&pk.to_bytes()).unwrap();
        assert_eq!(pk, pk2);
    }

    #[test]
    fn pubkey_hash_differs_for_different_keys() {
        let pk1 = KeyPair::from_secret_bytes([1u8; 32]).public_key();
        let pk2 = KeyPair::from_secret_bytes([2u8; 32]).public_key();
        assert_ne!(pk1.pubkey_hash(), pk2.pubkey_hash());
    }

    #[test]
    fn sign_verify_message() {
        let kp = KeyPair::generate();
        let msg = Hash256::sha256(b"hello xai");
        let sig = kp.sign(msg.as_bytes());
        assert!(kp.public_key().verify(msg.as_bytes(), &sig).is_ok());
    }

    #[test]
    fn verify_wrong_key_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let msg = Hash256::sha256(b"hello xai");
        let sig = kp1.sign(msg.as_bytes());
        assert_eq!(
            kp2.public_key().verify(msg.as_bytes(), &sig).unwrap_err(),
            CryptoError::VerificationFailed
        );
    }

    #[test]
    fn signing_hash_deterministic() {
        let kp = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let tx = unsigned_tx(&kp, recipient);
        assert_eq!(signing_hash(&tx), signing_hash(&tx));
    }

    #[test]
    fn signing_hash_changes_with_amount() {
        let kp = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let tx1 = unsigned_tx(&kp, recipient);
        let mut tx2 = tx1.clone();
        tx2.amount -= 1;
        assert_ne!(signing_hash(&tx1), signing_hash(&tx2));
    }

    #[test]
    fn signing_hash_changes_with_nonce() {
        let kp = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let tx1 = unsigned_tx(&kp, recipient);
        let mut tx2 = tx1.clone();
        tx2.nonce = 7;
        assert_ne!(signing_hash(&tx1), signing_hash(&tx2));
    }

    #[test]
    fn signing_hash_excludes_signature_fields() {
        let kp = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let tx1 = unsigned_tx(&kp, recipient);
        let mut tx2 = tx1.clone();
        tx2.signature = vec![0xAA; 70];
        tx2.public_key = vec![0xBB; 33];
        assert_eq!(signing_hash(&tx1), signing_hash(&tx2));
    }

    #[test]
    fn sign_verify_transaction_roundtrip() {
        let kp = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let mut tx = unsigned_tx(&kp, recipient);
        sign_transaction(&mut tx, &kp);
        assert!(verify_transaction(&tx).is_ok());
    }

    #[test]
    fn verify_tx_tampered_amount_fails() {
        let kp = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let mut tx = unsigned_tx(&kp, recipient);
        sign_transaction(&mut tx, &kp);
        tx.amount += 1;
        assert_eq!(verify_transaction(&tx).unwrap_err(), CryptoError::VerificationFailed);
    }

    #[test]
    fn verify_tx_wrong_signer_fails() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
        let mut tx = unsigned_tx(&kp1, recipient);
        sign_transaction(&mut tx, &kp2);
        assert_eq!(verify_transaction(&tx).unwrap_err(), CryptoError::PubkeyHashMismatch);
    }
}
