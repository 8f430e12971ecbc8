//! Chain state storage interface and in-memory implementation.
//!
//! Provides the [`ChainStore`] trait for UTXO set management, block storage,
//! and chain tip tracking. The [`MemoryChainStore`] is suitable for testing;
//! the production node uses RocksDB (xai-node).
//!
//! Blocks passed to [`ChainStore::connect_block`] must already be validated.
//! The store only performs minimal sanity checks (height consistency, no
//! duplicate blocks).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::address::Address;
use crate::constants::PENDING_UTXO_TIMEOUT_SECS;
use crate::error::{ChainStateError, TransactionError, XaiError};
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A point-in-time copy of an entire UTXO set, used for checkpoint
/// rollback and `restore`.
#[derive(Clone, Debug, Default)]
pub struct UtxoSnapshot {
    pub utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// Result of [`ChainStore::verify_consistency`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoConsistencyReport {
    pub is_consistent: bool,
    /// UTXOs actually found while scanning the set.
    pub utxo_count_actual: usize,
    /// UTXOs reported by [`ChainStore::utxo_count`].
    pub utxo_count_stored: usize,
    pub total_value: u64,
    pub duplicate_count: usize,
}

fn utxo_leaf_hash(outpoint: &OutPoint, entry: &UtxoEntry) -> Hash256 {
    let mut data = Vec::with_capacity(32 + 8 + 8 + 20 + 1);
    data.extend_from_slice(outpoint.txid.as_bytes());
    data.extend_from_slice(&outpoint.index.to_le_bytes());
    data.extend_from_slice(&entry.output.amount.to_le_bytes());
    data.extend_from_slice(entry.output.recipient.pubkey_hash().as_bytes());
    data.push(entry.is_coinbase as u8);
    Hash256::sha256(&data)
}

/// Result of connecting a block to the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectBlockResult {
    /// Number of new UTXOs created by this block's transactions.
    pub utxos_created: usize,
    /// Number of UTXOs spent by this block's non-coinbase inputs.
    pub utxos_spent: usize,
}

/// Result of disconnecting the tip block from the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectBlockResult {
    /// Number of UTXOs restored (previously spent, now unspent again).
    pub utxos_restored: usize,
    /// Number of UTXOs removed (created by the disconnected block).
    pub utxos_removed: usize,
}

/// Undo data for reverting a connected block.
///
/// Stores the UTXOs consumed by the block's transactions so they can be
/// restored during chain reorganization.
#[derive(Clone, Debug)]
struct BlockUndo {
    /// Spent UTXOs in the order they were consumed.
    spent_utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// Mutable chain state storage interface.
///
/// Provides UTXO set management, block storage, and chain tip tracking.
/// Assumes all blocks passed to [`connect_block`](ChainStore::connect_block)
/// have already been validated by the consensus layer.
///
/// Not thread-safe — callers should wrap in a `Mutex` or `RwLock` if
/// concurrent access is needed.
pub trait ChainStore: Send + Sync {
    /// Connect a validated block at the given height.
    ///
    /// Updates the UTXO set (spends inputs, creates outputs), stores the
    /// block and header, and advances the chain tip. Stores undo data
    /// for later disconnection.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::HeightMismatch`] if `height` is not the expected next height
    /// - [`ChainStateError::DuplicateBlock`] if the block hash already exists
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, XaiError>;

    /// Disconnect the current tip block, reverting UTXO changes.
    ///
    /// Uses stored undo data to restore spent UTXOs and remove created
    /// UTXOs. The chain tip moves to the previous block.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::EmptyChain`] if no blocks are connected
    /// - [`ChainStateError::BlockNotFound`] if the tip block is missing
    /// - [`ChainStateError::UndoDataMissing`] if undo data was not stored
    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, XaiError>;

    /// Look up a UTXO by outpoint. Returns `None` if spent or unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError>;

    /// Check whether a UTXO exists and is unspent.
    ///
    /// Default implementation delegates to [`get_utxo`](Self::get_utxo).
    fn contains_utxo(&self, outpoint: &OutPoint) -> Result<bool, XaiError> {
        Ok(self.get_utxo(outpoint)?.is_some())
    }

    /// Current chain tip as `(height, block_hash)`.
    ///
    /// Returns `(0, Hash256::ZERO)` if no blocks have been connected.
    fn chain_tip(&self) -> Result<(u64, Hash256), XaiError>;

    /// Get a block header by its hash. Returns `None` if not found.
    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError>;

    /// Get a full block by its hash. Returns `None` if not found.
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError>;

    /// Get the block hash at a given height. Returns `None` if height exceeds tip.
    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError>;

    /// Total circulating supply in coin-units: sum of every coinbase output
    /// value minted by connected blocks.
    fn circulating_supply(&self) -> u64;

    /// Number of unspent transaction outputs in the set.
    fn utxo_count(&self) -> usize;

    /// Whether no blocks have been connected.
    fn is_empty(&self) -> bool;

    /// Iterate over all UTXOs. Used for balance queries and UTXO scanning.
    /// Default implementation returns empty vec (override for production).
    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        Ok(Vec::new())
    }

    /// Idempotently insert a UTXO outside of normal block connection (used by
    /// [`restore`](Self::restore) and external tooling). Returns `true` if
    /// this created a new entry, `false` if `outpoint` already existed.
    fn add(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<bool, XaiError>;

    /// Alias for [`get_utxo`](Self::get_utxo).
    fn get(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError> {
        self.get_utxo(outpoint)
    }

    /// Remove a UTXO, but only if `spender` owns it.
    ///
    /// Returns `Ok(true)` if `outpoint` existed, was owned by `spender`, and
    /// was removed. Returns `Ok(false)` if missing or owned by someone else —
    /// callers should treat `false` the same as a missing UTXO, not retry.
    fn mark_spent(&mut self, outpoint: &OutPoint, spender: &Address) -> Result<bool, XaiError>;

    /// Reserve `outpoint` for a pending, not-yet-connected transaction so a
    /// second caller can't also select it while the first transaction is
    /// still being built and broadcast.
    ///
    /// Returns `false` if already locked by an unexpired reservation. A lock
    /// older than [`PENDING_UTXO_TIMEOUT_SECS`] is treated as expired and may
    /// be re-acquired.
    fn lock_pending(&self, outpoint: &OutPoint) -> bool;

    /// Release a pending lock acquired via [`lock_pending`](Self::lock_pending).
    /// No-op if `outpoint` isn't locked.
    fn unlock(&self, outpoint: &OutPoint);

    /// Snapshot the full UTXO set, for checkpoint rollback.
    ///
    /// Default implementation delegates to [`iter_utxos`](Self::iter_utxos).
    fn snapshot(&self) -> Result<UtxoSnapshot, XaiError> {
        Ok(UtxoSnapshot { utxos: self.iter_utxos()? })
    }

    /// Replace the entire UTXO set with `snapshot`'s contents.
    fn restore(&mut self, snapshot: UtxoSnapshot) -> Result<(), XaiError>;

    /// Deterministic merkle root over the full UTXO set (sorted by outpoint
    /// so independent nodes compute the same root from the same set).
    ///
    /// Default implementation is generic over [`iter_utxos`](Self::iter_utxos);
    /// backed entirely by [`crate::merkle::merkle_root`].
    fn merkle_root(&self) -> Result<Hash256, XaiError> {
        let mut entries = self.iter_utxos()?;
        entries.sort_by(|a, b| a.0.txid.cmp(&b.0.txid).then(a.0.index.cmp(&b.0.index)));
        let leaves: Vec<Hash256> =
            entries.iter().map(|(op, entry)| utxo_leaf_hash(op, entry)).collect();
        Ok(crate::merkle::merkle_root(&leaves))
    }

    /// Recompute UTXO count and total value from a live scan and compare
    /// against the store's own running counters, surfacing drift or
    /// duplicate entries.
    fn verify_consistency(&self) -> Result<UtxoConsistencyReport, XaiError> {
        let entries = self.iter_utxos()?;
        let mut seen = std::collections::HashSet::with_capacity(entries.len());
        let mut duplicate_count = 0usize;
        let mut total_value: u64 = 0;
        for (outpoint, entry) in &entries {
            if !seen.insert(outpoint.clone()) {
                duplicate_count += 1;
            }
            total_value = total_value.saturating_add(entry.output.amount);
        }
        let utxo_count_actual = entries.len();
        let utxo_count_stored = self.utxo_count();
        Ok(UtxoConsistencyReport {
            is_consistent: duplicate_count == 0 && utxo_count_actual == utxo_count_stored,
            utxo_count_actual,
            utxo_count_stored,
            total_value,
            duplicate_count,
        })
    }
}

/// In-memory chain state storage for testing.
///
/// Stores everything in `HashMap`s with no persistence. Not suitable for
/// production use (no crash recovery, unbounded memory growth).
pub struct MemoryChainStore {
    /// UTXO set: outpoint → entry.
    utxos: HashMap<OutPoint, UtxoEntry>,
    /// Full blocks by hash.
    blocks: HashMap<Hash256, Block>,
    /// Block headers by hash.
    headers: HashMap<Hash256, BlockHeader>,
    /// Height → block hash mapping.
    height_to_hash: HashMap<u64, Hash256>,
    /// Undo data by block hash (for disconnect_tip).
    undo_data: HashMap<Hash256, BlockUndo>,
    /// Current tip height.
    tip_height: u64,
    /// Current tip block hash. `Hash256::ZERO` means empty chain.
    tip_hash: Hash256,
    /// Running total of every coinbase output ever connected.
    circulating_supply: u64,
    /// Outpoints reserved for pending transactions: outpoint → lock expiry (unix secs).
    pending_locks: Mutex<HashMap<OutPoint, u64>>,
}

impl MemoryChainStore {
    /// Create a new empty chain store.
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
            blocks: HashMap::new(),
            headers: HashMap::new(),
            height_to_hash: HashMap::new(),
            undo_data: HashMap::new(),
            tip_height: 0,
            tip_hash: Hash256::ZERO,
            circulating_supply: 0,
            pending_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of full blocks stored.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of undo records stored.
    pub fn undo_count(&self) -> usize {
        self.undo_data.len()
    }

    /// Process a transaction's inputs: remove spent UTXOs, record undo data.
    ///
    /// Coinbase transactions are skipped (no real inputs to spend).
    /// Returns the number of UTXOs spent, or an error if a UTXO is missing.
    fn spend_inputs(&mut self, tx: &Transaction, undo: &mut BlockUndo) -> Result<usize, XaiError> {
        if tx.is_coinbase() {
            return Ok(0);
        }
        let mut spent = 0;
        for input in &tx.inputs {
            let entry = self.utxos.remove(&input.previous_output).ok_or_else(|| {
                XaiError::from(TransactionError::UnknownUtxo(
                    input.previous_output.to_string(),
                ))
            })?;
            undo.spent_utxos.push((input.previous_output.clone(), entry));
            spent += 1;
        }
        Ok(spent)
    }

    /// Process a transaction's outputs: create new UTXOs.
    ///
    /// Returns the number of UTXOs created, or an error if txid
    /// computation fails.
    fn create_outputs(&mut self, tx: &Transaction, height: u64) -> Result<usize, XaiError> {
        let txid = tx
            .txid()
            .map_err(|e| XaiError::Storage(e.to_string()))?;
        let is_coinbase = tx.is_coinbase();
        let mut created = 0;
        for (index, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint {
                txid,
                index: index as u64,
            };
            if is_coinbase {
                self.circulating_supply += output.amount;
            }
            let entry = UtxoEntry {
                output: output.clone(),
                block_height: height,
                is_coinbase,
            };
            self.utxos.insert(outpoint, entry);
            created += 1;
        }
        Ok(created)
    }
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore for MemoryChainStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, XaiError> {
        // Validate height consistency.
        if self.tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(ChainStateError::HeightMismatch {
                    expected: 0,
                    got: height,
                }
                .into());
            }
        } else if height != self.tip_height + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: self.tip_height + 1,
                got: height,
            }
            .into());
        }

        let block_hash = block.header.hash();

        // Reject duplicate blocks.
        if self.blocks.contains_key(&block_hash) {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }

        let mut undo = BlockUndo { spent_utxos: Vec::new() };
        let mut total_spent = 0;
        let mut total_created = 0;

        // Process transactions: spend inputs, then create outputs.
        for tx in &block.transactions {
            total_spent += self.spend_inputs(tx, &mut undo)?;
            total_created += self.create_outputs(tx, height)?;
        }

        // Store block, header, height mapping, undo data.
        self.headers.insert(block_hash, block.header.clone());
        self.blocks.insert(block_hash, block.clone());
        self.height_to_hash.insert(height, block_hash);
        self.undo_data.insert(block_hash, undo);

        // Update tip.
        self.tip_height = height;
        self.tip_hash = block_hash;

        Ok(ConnectBlockResult {
            utxos_created: total_created,
            utxos_spent: total_spent,
        })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, XaiError> {
        if self.tip_hash == Hash256::ZERO {
            return Err(ChainStateError::EmptyChain.into());
        }

        let tip_hash = self.tip_hash;
        let tip_height = self.tip_height;

        // Get the tip block.
        let block = self
            .blocks
            .get(&tip_hash)
            .cloned()
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        // Get undo data.
        let undo = self
            .undo_data
            .remove(&tip_hash)
            .ok_or_else(|| ChainStateError::UndoDataMissing(tip_hash.to_string()))?;

        // Remove UTXOs created by this block (reverse transaction order).
        let mut total_removed = 0;
        for tx in block.transactions.iter().rev() {
            let txid = tx
                .txid()
                .map_err(|e| XaiError::Storage(e.to_string()))?;
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid,
                    index: index as u64,
                };
                if self.utxos.remove(&outpoint).is_some() {
                    total_removed += 1;
                    if tx.is_coinbase() {
                        self.circulating_supply -= output.amount;
                    }
                }
            }
        }

        // Restore spent UTXOs from undo data.
        let total_restored = undo.spent_utxos.len();
        for (outpoint, entry) in undo.spent_utxos {
            self.utxos.insert(outpoint, entry);
        }

        // Remove block from height index.
        self.height_to_hash.remove(&tip_height);

        // Update tip.
        if tip_height == 0 {
            // Disconnected genesis — back to empty chain.
            self.tip_height = 0;
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height = tip_height - 1;
            self.tip_hash = block.header.prev_hash;
        }

        Ok(DisconnectBlockResult {
            utxos_restored: total_restored,
            utxos_removed: total_removed,
        })
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), XaiError> {
        Ok((self.tip_height, self.tip_hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError> {
        Ok(self.headers.get(hash).cloned())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError> {
        Ok(self.height_to_hash.get(&height).copied())
    }

    fn circulating_supply(&self) -> u64 {
        self.circulating_supply
    }

    fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    fn is_empty(&self) -> bool {
        self.tip_hash == Hash256::ZERO
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        Ok(self
            .utxos
            .iter()
            .map(|(op, entry)| (op.clone(), entry.clone()))
            .collect())
    }

    fn add(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<bool, XaiError> {
        use std::collections::hash_map::Entry;
        match self.utxos.entry(outpoint) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }

    fn mark_spent(&mut self, outpoint: &OutPoint, spender: &Address) -> Result<bool, XaiError> {
        use std::collections::hash_map::Entry;
        match self.utxos.entry(outpoint.clone()) {
            Entry::Occupied(slot) => {
                if slot.get().output.recipient != *spender {
                    return Ok(false);
                }
                slot.remove();
                Ok(true)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    fn lock_pending(&self, outpoint: &OutPoint) -> bool {
        let now = now_secs();
        let mut locks = self.pending_locks.lock();
        locks.retain(|_, expiry| *expiry > now);
        if locks.contains_key(outpoint) {
            return false;
        }
        locks.insert(outpoint.clone(), now + PENDING_UTXO_TIMEOUT_SECS);
        true
    }

    fn unlock(&self, outpoint: &OutPoint) {
        self.pending_locks.lock().remove(outpoint);
    }

    fn restore(&mut self, snapshot: UtxoSnapshot) -> Result<(), XaiError> {
        self.utxos.clear();
        self.circulating_supply = 0;
        for (outpoint, entry) in snapshot.utxos {
            if entry.is_coinbase {
                self.circulating_supply += entry.output.amount;
            }
            self.utxos.insert(outpoint, entry);
        }
        Ok(())
    }
}
