//! Trait interfaces for the XAI protocol.
//!
//! These traits define the contracts between crates:
//! - [`ChainState`] — read-only blockchain state (xai-node implements)
//! - [`BlockProducer`] — block creation and validation (xai-consensus implements)
//! - [`NetworkService`] — P2P networking (xai-network implements)

use crate::address::Address;
use crate::error::{BlockError, NetworkError, TransactionError, XaiError};
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};

/// Read-only view of the blockchain state.
///
/// Provides access to the UTXO set, block headers, chain tip, and
/// per-sender nonce tracking needed for validation. Implemented by the
/// full node (xai-node) backed by RocksDB.
pub trait ChainState: Send + Sync {
    /// Look up a UTXO by outpoint. Returns `None` if spent or unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError>;

    /// Check whether a UTXO exists and is unspent.
    ///
    /// Default implementation delegates to [`get_utxo`](Self::get_utxo).
    fn contains_utxo(&self, outpoint: &OutPoint) -> Result<bool, XaiError> {
        Ok(self.get_utxo(outpoint)?.is_some())
    }

    /// Current chain tip as `(height, block_hash)`.
    fn chain_tip(&self) -> Result<(u64, Hash256), XaiError>;

    /// Get a block header by its hash. Returns `None` if not found.
    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError>;

    /// Get a full block by its hash. Returns `None` if not found.
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError>;

    /// Get the block hash at a given height. Returns `None` if height exceeds tip.
    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError>;

    /// Total circulating supply in coin-units (sum of all coinbase outputs minted so far).
    fn circulating_supply(&self) -> Result<u64, XaiError>;

    /// The next expected nonce for a sender, i.e. one past the highest nonce
    /// confirmed on-chain for that address (0 if the address has never sent).
    fn next_nonce(&self, sender: &Address) -> Result<u64, XaiError>;

    /// Validate a transaction against the current UTXO set and consensus rules.
    fn validate_transaction(&self, tx: &Transaction) -> Result<(), TransactionError>;

    /// Iterate over all UTXOs. Used for balance queries and UTXO scanning.
    /// Default implementation returns empty vec (override for production).
    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        Ok(Vec::new())
    }
}

/// Block creation, validation, and reward computation.
///
/// Used by the miner to create block templates and by the node
/// to validate incoming blocks. Implemented by the consensus engine (xai-consensus).
pub trait BlockProducer: Send + Sync {
    /// Create a block template with selected mempool transactions and coinbase.
    ///
    /// The coinbase output pays to `coinbase_recipient` with the appropriate reward.
    /// `timestamp` is the proposed block timestamp (Unix seconds).
    fn create_block_template(
        &self,
        coinbase_recipient: &Address,
        timestamp: u64,
    ) -> Result<Block, BlockError>;

    /// Validate a complete block: header PoW, merkle root, all transactions, reward, supply cap.
    fn validate_block(&self, block: &Block) -> Result<(), BlockError>;

    /// Compute the base mining reward for a given block height.
    ///
    /// Follows the halving schedule: `INITIAL_REWARD >> (height / HALVING_INTERVAL)`.
    fn block_reward(&self, height: u64) -> u64;

    /// Compute the difficulty target for a given block height.
    fn difficulty_target(&self, height: u64) -> Result<u64, BlockError>;

    /// Validate proof-of-work: block header hash must be numerically below the difficulty target.
    fn validate_pow(&self, header: &BlockHeader) -> Result<(), BlockError>;
}

/// P2P network operations.
///
/// Abstracts block and transaction propagation over libp2p.
/// Implementations handle the actual transport, peer management,
/// and Gossipsub protocol. Implemented by xai-network.
pub trait NetworkService: Send + Sync {
    /// Broadcast a validated block to all connected peers.
    fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError>;

    /// Broadcast a validated transaction to all connected peers.
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError>;

    /// Number of currently connected peers.
    fn peer_count(&self) -> usize;

    /// Whether the node has at least one connected peer.
    ///
    /// Default implementation: `peer_count() > 0`.
    fn is_connected(&self) -> bool {
        self.peer_count() > 0
    }

    /// Request a specific block from peers by hash.
    fn request_block(&self, hash: &Hash256) -> Result<(), NetworkError>;

    /// Request block headers starting from the given locator hashes.
    ///
    /// Locator hashes are ordered newest-first, allowing peers to find
    /// the common ancestor and send headers from there.
    fn request_headers(&self, locator: &[Hash256]) -> Result<(), NetworkError>;
}
