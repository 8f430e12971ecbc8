//! Core protocol types: transactions, blocks, UTXOs.
//!
//! Transactions carry both an account-style envelope (sender, recipient,
//! amount, fee, a per-sender monotonic nonce) and a UTXO-style body
//! (ordered input references, ordered output pairs). The envelope is what
//! gets signed and is what mempool/nonce ordering keys off of; the UTXO
//! body is what the ledger actually spends and creates. All numeric
//! fields use u64 per protocol convention.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::address::Address;
use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs, block header hashes, merkle roots, and
/// pubkey hashes -- all SHA-256 in this protocol.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Compute SHA-256 over arbitrary bytes.
    pub fn sha256(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 20-byte truncated hash, used for address pubkey-hashes.
///
/// XAI addresses encode `SHA256(pubkey)[..20]` rather than the full 32-byte
/// digest, matching the wire-level address format (prefix + 40 hex chars).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Truncate a full SHA-256 digest to its first 20 bytes.
    pub fn truncate(full: Hash256) -> Self {
        let mut out = [0u8; 20];
        out.copy_from_slice(&full.as_bytes()[..20]);
        Self(out)
    }
}

impl fmt::Display for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u64::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u64::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input: an ordered reference to a previous output being spent.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
}

impl TxInput {
    pub fn spending(previous_output: OutPoint) -> Self {
        Self { previous_output }
    }
}

/// A transaction output: an ordered (recipient, amount) pair creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in coin-units (1 XAI = 10^8 units).
    pub amount: u64,
    /// The output's owner.
    pub recipient: Address,
}

/// Distinguishes a transaction's role in the ledger.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub enum TxType {
    /// An ordinary value transfer between accounts.
    #[default]
    Transfer,
    /// The block-reward-minting transaction, exactly one per block.
    Coinbase,
    /// A governance-hook transaction (parameter proposal / vote); carries no value.
    Governance,
}

/// A transaction transferring value between addresses.
///
/// `sender`/`recipient`/`amount`/`fee`/`nonce` form the signed account-style
/// envelope; `inputs`/`outputs` form the UTXO body the ledger actually applies.
/// For a simple transfer, `outputs` typically contains a payment output to
/// `recipient` for `amount` plus a change output back to `sender`.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Role of this transaction.
    pub tx_type: TxType,
    /// The paying account. A sentinel zero address for coinbase.
    pub sender: Address,
    /// The primary recipient of `amount`.
    pub recipient: Address,
    /// Value moving from sender to recipient, in coin-units.
    pub amount: u64,
    /// Fee paid to the miner, in coin-units.
    pub fee: u64,
    /// Per-sender monotonic sequence number. Must equal the sender's next
    /// expected nonce at application time; prevents replay and enforces
    /// ordering among a sender's own pending transactions.
    pub nonce: u64,
    /// Unix timestamp in seconds at which the sender created this transaction.
    /// Part of the txid commitment; also checked against the local clock
    /// (see `validation::validate_transaction_structure`).
    pub timestamp: u64,
    /// Inputs consuming previous outputs. Empty for coinbase.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
    /// secp256k1 signature (DER, low-s) over the signing hash. Empty for coinbase.
    pub signature: Vec<u8>,
    /// secp256k1 compressed public key (33 bytes) of `sender`. Empty for coinbase.
    pub public_key: Vec<u8>,
}

impl Transaction {
    /// Compute the transaction ID.
    ///
    /// The txid commits to exactly `{sender, recipient, amount, fee,
    /// timestamp, nonce}` -- it deliberately excludes `signature`,
    /// `public_key`, `inputs`, `outputs`, `lock_time`, `version`, and
    /// `tx_type`. Excluding the signature keeps the txid stable across
    /// re-signing and avoids third-party signature malleability; excluding
    /// inputs/outputs keeps the identity tied to the transaction's account-level
    /// intent rather than its UTXO wiring. Fields are hashed via a fixed
    /// byte layout rather than `bincode::encode_to_vec(self, ..)`, mirroring
    /// `BlockHeader::hash`.
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        let mut data = Vec::new();
        data.extend_from_slice(self.sender.pubkey_hash().as_bytes());
        data.extend_from_slice(self.recipient.pubkey_hash().as_bytes());
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.extend_from_slice(&self.fee.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        Ok(Hash256::sha256(&data))
    }

    /// Check if this is the coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Sum of all output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }
}

/// Block header containing the proof-of-work puzzle.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// SHA-256 merkle root of the block's transactions.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Difficulty target: the high 64 bits of `2^256 / difficulty`, used as
    /// a little-endian-prefix comparison against the header hash (see
    /// `block_validation::check_pow`).
    pub difficulty_target: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing (4 u64 fields + 2 * 32-byte hashes).
    const HASH_SIZE: usize = 4 * 8 + 2 * 32;

    /// Compute the block header hash (double SHA-256).
    ///
    /// Uses an explicit fixed byte layout: version || prev_hash || merkle_root ||
    /// timestamp || difficulty_target || nonce, all little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.difficulty_target.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header with proof-of-work.
    pub header: BlockHeader,
    /// Ordered list of transactions. First transaction must be coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}

/// An entry in the unspent transaction output set.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block containing this UTXO.
    pub block_height: u64,
    /// Whether this output is from a coinbase transaction.
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Check if this UTXO has matured and can be spent.
    ///
    /// Coinbase outputs require [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY)
    /// confirmations. Non-coinbase outputs are always mature.
    pub fn is_mature(&self, current_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        current_height.saturating_sub(self.block_height) >= crate::constants::COINBASE_MATURITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Network;
    use crate::constants::COIN;

    fn addr(seed: u8) -> Address {
        Address::from_pubkey_hash(Hash256([seed; 32]), Network::Mainnet)
    }

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            tx_type: TxType::Transfer,
            sender: addr(1),
            recipient: addr(2),
            amount: 50 * COIN,
            fee: 1000,
            nonce: 0,
            timestamp: 1_700_000_000,
            inputs: vec![TxInput::spending(OutPoint { txid: Hash256([0x11; 32]), index: 0 })],
            outputs: vec![TxOutput { amount: 50 * COIN, recipient: addr(2) }],
            lock_time: 0,
            signature: vec![0u8; 64],
            public_key: vec![0u8; 33],
        }
    }

    fn sample_coinbase() -> Transaction {
        Transaction {
            version: 1,
            tx_type: TxType::Coinbase,
            sender: Address::coinbase_sentinel(Network::Mainnet),
            recipient: addr(9),
            amount: 12 * COIN,
            fee: 0,
            nonce: 0,
            timestamp: 1_700_000_000,
            inputs: vec![],
            outputs: vec![TxOutput { amount: 12 * COIN, recipient: addr(9) }],
            lock_time: 0,
            signature: vec![],
            public_key: vec![],
        }
    }

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            timestamp: 1_700_000_000,
            difficulty_target: u64::MAX,
            nonce: 0,
        }
    }

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let h = Hash256([0xAB; 32]);
        let s = format!("{h}");
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
    }

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase().is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn total_output_value_sums_correctly() {
        let tx = Transaction {
            outputs: vec![
                TxOutput { amount: 100, recipient: addr(1) },
                TxOutput { amount: 200, recipient: addr(2) },
            ],
            ..sample_tx()
        };
        assert_eq!(tx.total_output_value(), Some(300));
    }

    #[test]
    fn total_output_value_overflow_returns_none() {
        let tx = Transaction {
            outputs: vec![
                TxOutput { amount: u64::MAX, recipient: addr(1) },
                TxOutput { amount: 1, recipient: addr(2) },
            ],
            ..sample_tx()
        };
        assert_eq!(tx.total_output_value(), None);
    }

    #[test]
    fn txid_deterministic() {
        let tx = sample_tx();
        assert_eq!(tx.txid().unwrap(), tx.txid().unwrap());
    }

    #[test]
    fn txid_changes_with_nonce() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.nonce = 1;
        assert_ne!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn txid_changes_with_timestamp() {
        let tx1 = sample_tx();
        let mut tx2 = sample_tx();
        tx2.timestamp += 1;
        assert_ne!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn txid_ignores_signature_and_public_key() {
        let mut tx1 = sample_tx();
        tx1.signature = vec![1u8; 64];
        tx1.public_key = vec![2u8; 33];
        let mut tx2 = sample_tx();
        tx2.signature = vec![9u8; 64];
        tx2.public_key = vec![8u8; 33];
        assert_eq!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn txid_ignores_inputs_outputs_and_lock_time() {
        let mut tx1 = sample_tx();
        tx1.inputs = vec![];
        tx1.outputs = vec![];
        tx1.lock_time = 0;
        let tx2 = sample_tx();
        assert_eq!(tx1.txid().unwrap(), tx2.txid().unwrap());
    }

    #[test]
    fn block_header_hash_deterministic() {
        let h = sample_header();
        assert_eq!(h.hash(), h.hash());
    }

    #[test]
    fn block_header_hash_changes_with_nonce() {
        let h1 = sample_header();
        let mut h2 = h1.clone();
        h2.nonce = 1;
        assert_ne!(h1.hash(), h2.hash());
    }

    #[test]
    fn block_coinbase_accessor() {
        let block = Block { header: sample_header(), transactions: vec![sample_coinbase()] };
        assert!(block.coinbase().unwrap().is_coinbase());
    }

    #[test]
    fn utxo_coinbase_not_mature_early() {
        let entry = UtxoEntry {
            output: TxOutput { amount: 12 * COIN, recipient: addr(1) },
            block_height: 100,
            is_coinbase: true,
        };
        assert!(!entry.is_mature(150));
        assert!(entry.is_mature(200));
    }

    #[test]
    fn utxo_non_coinbase_always_mature() {
        let entry = UtxoEntry {
            output: TxOutput { amount: 100, recipient: addr(1) },
            block_height: 100,
            is_coinbase: false,
        };
        assert!(entry.is_mature(0));
    }

    #[test]
    fn bincode_round_trip_transaction() {
        let tx = sample_tx();
        let encoded = bincode::encode_to_vec(&tx, bincode::config::standard()).unwrap();
        let (decoded, _): (Transaction, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn bincode_round_trip_block() {
        let block = Block { header: sample_header(), transactions: vec![sample_coinbase(), sample_tx()] };
        let encoded = bincode::encode_to_vec(&block, bincode::config::standard()).unwrap();
        let (decoded, _): (Block, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(block, decoded);
    }
}
