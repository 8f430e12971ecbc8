//! Full node composition and event loop.
//!
//! The [`Node`] struct wires together storage, mempool, consensus, and
//! networking into a running full node. The [`NodeChainState`] adapter
//! bridges the mutable [`ChainStore`] (behind a `RwLock`) to the read-only
//! [`ChainState`] trait required by the consensus engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Maximum number of orphan blocks held in memory at once.
const MAX_ORPHAN_BLOCKS: usize = 100;
/// Seconds after which an orphan block is considered stale and evicted.
const ORPHAN_BLOCK_EXPIRY_SECS: u64 = 600;
/// Number of blocks a peer must be ahead of us to trigger IBD mode (~1 day at 1min/block).
const IBD_THRESHOLD_BLOCKS: u64 = 144;

/// Maximum number of orphan transactions held in memory at once.
const MAX_ORPHAN_TXS: usize = 1000;
/// Seconds after which an orphan transaction is considered stale and evicted.
const ORPHAN_TX_EXPIRY_SECS: u64 = 300;

/// Maximum depth (in blocks) that a chain reorganization may unwind.
///
/// Reorgs deeper than this are rejected as a node-level policy to guard
/// against very deep history rewrites. Consensus rules live in xai-consensus;
/// this is an operational limit only.
pub const MAX_REORG_DEPTH: u64 = 100;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, info_span, warn};

use xai_consensus::engine::ConsensusEngine;
use xai_core::address::Address;
use xai_core::chain_state::ChainStore;
use xai_core::error::{TransactionError, XaiError};
use xai_core::mempool::Mempool;
use xai_core::traits::{BlockProducer, ChainState, NetworkService};
use xai_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};
use xai_network::{
    NetworkEvent, NetworkNode, StorageQuery, SyncAction, SyncManager, SyncState, XaiRequest,
    XaiResponse,
};

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// Adapter bridging `RocksStore` (behind `RwLock`) to the read-only `ChainState` trait.
///
/// Takes a read lock on each call. This allows the consensus engine and other
/// readers to access chain state concurrently with block processing.
pub struct NodeChainState {
    storage: Arc<RwLock<RocksStore>>,
}

impl NodeChainState {
    /// Create a new adapter wrapping the given storage.
    pub fn new(storage: Arc<RwLock<RocksStore>>) -> Self {
        Self { storage }
    }
}

impl ChainState for NodeChainState {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError> {
        self.storage.read().get_utxo(outpoint)
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), XaiError> {
        self.storage.read().chain_tip()
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError> {
        self.storage.read().get_block_header(hash)
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError> {
        self.storage.read().get_block(hash)
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError> {
        self.storage.read().get_block_hash(height)
    }

    fn circulating_supply(&self) -> Result<u64, XaiError> {
        Ok(self.storage.read().circulating_supply())
    }

    fn next_nonce(&self, sender: &Address) -> Result<u64, XaiError> {
        self.storage.read().next_nonce(sender)
    }

    fn validate_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        // Basic structural validation: non-empty inputs/outputs.
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(TransactionError::EmptyInputsOrOutputs);
        }

        // Check that all inputs reference existing UTXOs.
        let store = self.storage.read();
        for input in &tx.inputs {
            if !input.previous_output.is_null() {
                match store.get_utxo(&input.previous_output) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        return Err(TransactionError::UnknownUtxo(
                            input.previous_output.to_string(),
                        ));
                    }
                    Err(_) => {
                        return Err(TransactionError::UnknownUtxo(
                            input.previous_output.to_string(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        self.storage.read().iter_utxos()
    }
}

/// Runtime metrics for the node.
///
/// All fields use [`AtomicU64`] with [`Ordering::Relaxed`] — these are
/// approximate counters, not used for consensus or consistency guarantees.
pub struct NodeMetrics {
    /// Total blocks connected since startup.
    pub blocks_connected: AtomicU64,
    /// Total chain reorganizations since startup.
    pub reorgs: AtomicU64,
    /// Current mempool size (updated on each insert/eviction).
    pub mempool_size: AtomicU64,
    /// Current peer count.
    pub peer_count: AtomicU64,
}

impl NodeMetrics {
    /// Create a new [`NodeMetrics`] with all counters zeroed.
    pub fn new() -> Self {
        Self {
            blocks_connected: AtomicU64::new(0),
            reorgs: AtomicU64::new(0),
            mempool_size: AtomicU64::new(0),
            peer_count: AtomicU64::new(0),
        }
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// The full node, composing storage, mempool, consensus, and network.
pub struct Node {
    /// RocksDB storage behind a read-write lock.
    storage: Arc<RwLock<RocksStore>>,
    /// In-memory transaction pool.
    mempool: Mutex<Mempool>,
    /// Consensus engine for block validation and creation.
    consensus: ConsensusEngine,
    /// Chain synchronization state machine.
    sync_manager: Mutex<SyncManager>,
    /// P2P network node (optional — None if network disabled).
    network: Option<NetworkNode>,
    /// Receiver for network events (behind tokio Mutex for async recv).
    event_rx: Option<tokio::sync::Mutex<broadcast::Receiver<NetworkEvent>>>,
    /// Receiver for storage queries from peers (behind tokio Mutex for async recv).
    query_rx: Option<tokio::sync::Mutex<mpsc::UnboundedReceiver<StorageQuery>>>,
    /// Node configuration.
    config: NodeConfig,
    /// Runtime metrics counters.
    metrics: NodeMetrics,
    /// Orphan blocks waiting for their parent to arrive.
    ///
    /// Key is the block's `prev_hash` (the missing parent hash). Value is the
    /// orphan block paired with the instant it was stored. Bounded at
    /// [`MAX_ORPHAN_BLOCKS`] entries; stale entries expire after
    /// [`ORPHAN_BLOCK_EXPIRY_SECS`] seconds.
    orphan_blocks: Mutex<HashMap<Hash256, (Block, Instant)>>,
    /// Orphan transactions waiting for their inputs to become available.
    ///
    /// Key is the transaction's txid. Value is the transaction paired with
    /// the instant it was stored. Bounded at [`MAX_ORPHAN_TXS`] entries;
    /// stale entries expire after [`ORPHAN_TX_EXPIRY_SECS`] seconds.
    orphan_txs: Mutex<HashMap<Hash256, (Transaction, Instant)>>,
    /// Whether we are in Initial Block Download mode.
    ///
    /// Set to `true` when a peer tip is [`IBD_THRESHOLD_BLOCKS`] or more ahead
    /// of our current height. Cleared once we catch up within that threshold.
    is_ibd: AtomicBool,
    /// The best peer height seen since the last IBD-activation check.
    ///
    /// Updated whenever we receive a peer's `Hello` handshake; used to detect
    /// when we have caught up and can exit IBD mode.
    best_peer_height: AtomicU64,
}

impl Node {
    /// Create a new node with the given configuration.
    ///
    /// Opens storage (auto-connects genesis if empty), creates the consensus
    /// engine, mempool, and starts the P2P network.
    pub async fn new(config: NodeConfig) -> Result<Arc<Self>, XaiError> {
        // Open storage.
        let store = RocksStore::open(config.db_path())?;
        let report = crate::startup::validate_chain_on_startup(&store)?;
        if !report.success() {
            for issue in report.critical_issues() {
                error!(height = ?issue.height, "{}", issue.description);
            }
            return Err(XaiError::Storage(format!(
                "startup chain validation failed with {} critical issue(s)",
                report.critical_issues().count()
            )));
        }
        let storage = Arc::new(RwLock::new(store));

        // Create chain state adapter for consensus engine.
        let chain_state: Arc<dyn ChainState> =
            Arc::new(NodeChainState::new(Arc::clone(&storage)));

        let consensus = ConsensusEngine::new(Arc::clone(&chain_state));

        // Create mempool.
        let mempool = Mutex::new(Mempool::with_defaults());

        // Start network.
        let (network, event_rx, query_rx) = match NetworkNode::start(config.network.clone()).await {
            Ok((net, rx, qrx)) => (
                Some(net),
                Some(tokio::sync::Mutex::new(rx)),
                Some(tokio::sync::Mutex::new(qrx)),
            ),
            Err(e) => {
                warn!("failed to start network: {e}; running without P2P");
                (None, None, None)
            }
        };

        let node = Arc::new(Self {
            storage,
            mempool,
            consensus,
            sync_manager: Mutex::new(SyncManager::new()),
            network,
            event_rx,
            query_rx,
            config,
            metrics: NodeMetrics::new(),
            orphan_blocks: Mutex::new(HashMap::new()),
            orphan_txs: Mutex::new(HashMap::new()),
            is_ibd: AtomicBool::new(false),
            best_peer_height: AtomicU64::new(0),
        });

        Ok(node)
    }

    /// Create a node without networking (for testing).
    pub fn without_network(config: NodeConfig) -> Result<Arc<Self>, XaiError> {
        let store = RocksStore::open(config.db_path())?;
        let report = crate::startup::validate_chain_on_startup(&store)?;
        if !report.success() {
            for issue in report.critical_issues() {
                error!(height = ?issue.height, "{}", issue.description);
            }
            return Err(XaiError::Storage(format!(
                "startup chain validation failed with {} critical issue(s)",
                report.critical_issues().count()
            )));
        }
        let storage = Arc::new(RwLock::new(store));

        let chain_state: Arc<dyn ChainState> =
            Arc::new(NodeChainState::new(Arc::clone(&storage)));
        let consensus = ConsensusEngine::new(Arc::clone(&chain_state));
        let mempool = Mutex::new(Mempool::with_defaults());

        let node = Arc::new(Self {
            storage,
            mempool,
            consensus,
            sync_manager: Mutex::new(SyncManager::new()),
            network: None,
            event_rx: None,
            query_rx: None,
            config,
            metrics: NodeMetrics::new(),
            orphan_blocks: Mutex::new(HashMap::new()),
            orphan_txs: Mutex::new(HashMap::new()),
            is_ibd: AtomicBool::new(false),
            best_peer_height: AtomicU64::new(0),
        });

        Ok(node)
    }

    /// Create a node without networking for use in tests.
    ///
    /// Identical to [`without_network`] except the consensus engine uses
    /// `u64::MAX` as its initial difficulty target, which lets tests build
    /// mock blocks without having to mine against a real PoW threshold.
    #[cfg(test)]
    pub fn without_network_for_test(config: NodeConfig) -> Result<Arc<Self>, XaiError> {
        let store = RocksStore::open(config.db_path())?;
        let storage = Arc::new(RwLock::new(store));

        let chain_state: Arc<dyn ChainState> =
            Arc::new(NodeChainState::new(Arc::clone(&storage)));
        let consensus =
            ConsensusEngine::new(Arc::clone(&chain_state)).with_initial_target(u64::MAX);
        let mempool = Mutex::new(Mempool::with_defaults());

        let node = Arc::new(Self {
            storage,
            mempool,
            consensus,
            sync_manager: Mutex::new(SyncManager::new()),
            network: None,
            event_rx: None,
            query_rx: None,
            config,
            metrics: NodeMetrics::new(),
            orphan_blocks: Mutex::new(HashMap::new()),
            orphan_txs: Mutex::new(HashMap::new()),
            is_ibd: AtomicBool::new(false),
            best_peer_height: AtomicU64::new(0),
        });

        Ok(node)
    }

    /// Returns `true` if the node is currently in Initial Block Download mode.
    ///
    /// During IBD incoming transactions from peers are ignored and transaction
    /// relay is suppressed to reduce overhead while catching up.
    pub fn is_ibd(&self) -> bool {
        self.is_ibd.load(Ordering::Relaxed)
    }

    /// Process and connect a new block.
    ///
    /// Validates the block via the consensus engine, connects it to storage,
    /// evicts conflicting mempool transactions, and broadcasts to peers.
    ///
    /// If the block's parent is not yet known, it is stored as an orphan and
    /// `Ok(())` is returned. When a block is successfully connected, any
    /// orphans whose parent is this block are tried recursively.
    pub fn process_block(&self, block: &Block) -> Result<(), XaiError> {
        let block_hash = block.header.hash();
        let _span = info_span!(
            "process_block",
            %block_hash,
            txs = block.transactions.len()
        )
        .entered();

        // --- Orphan / reorg routing ---------------------------------------
        // Determine whether the block's parent is:
        //   (a) the current tip  → validate and connect normally
        //   (b) a known ancestor → potential chain reorg
        //   (c) unknown          → store as orphan for later
        let (tip_height, tip_hash) = self.storage.read().chain_tip()?;

        if block.header.prev_hash != tip_hash {
            let parent_known = self
                .storage
                .read()
                .get_block_header(&block.header.prev_hash)?
                .is_some();

            if !parent_known {
                // (c) Parent unknown — store as orphan.
                let mut orphans = self.orphan_blocks.lock();
                if orphans.len() >= MAX_ORPHAN_BLOCKS {
                    let oldest_key = orphans
                        .iter()
                        .min_by_key(|(_, (_, ts))| *ts)
                        .map(|(k, _)| *k);
                    if let Some(key) = oldest_key {
                        orphans.remove(&key);
                    }
                }
                debug!(
                    %block_hash,
                    prev_hash = %block.header.prev_hash,
                    "storing block as orphan (parent unknown)"
                );
                orphans.insert(block.header.prev_hash, (block.clone(), Instant::now()));
                return Ok(());
            }

            // (b) Parent is known but is not the current tip.
            // Check whether the fork chain would be longer than our tip.
            let fork_point_height =
                self.find_fork_point_height(&block.header.prev_hash)?;
            // If we connect this block the fork tip would be at fork_point_height + 1.
            let fork_tip_height = fork_point_height + 1;

            if fork_tip_height <= tip_height {
                // Fork chain is not strictly longer — reject.
                debug!(
                    fork_tip_height,
                    tip_height,
                    "rejecting block from shorter or equal-length fork chain"
                );
                return Err(XaiError::BlockValidation(
                    xai_core::error::BlockError::InvalidPrevHash,
                ));
            }

            // Fork chain is longer — collect blocks and reorganize.
            let fork_blocks = self.collect_fork_chain(block)?;
            info!(
                reorg_depth = tip_height.saturating_sub(fork_point_height),
                new_tip = fork_point_height + fork_blocks.len() as u64,
                "triggering chain reorganization via process_block"
            );
            return self.reorganize(fork_point_height, fork_blocks);
        }
        // ------------------------------------------------------------------

        // (a) Block extends the current tip — validate via consensus engine.
        self.consensus
            .validate_block(block)
            .map_err(XaiError::from)?;

        // Connect the block (tip_height captured above before the branch).
        let next_height = tip_height + 1;

        {
            let mut store = self.storage.write();
            store.connect_block(block, next_height)?;
        }

        info!(height = next_height, "connected block");

        // Evict confirmed/conflicting transactions from mempool.
        {
            let mut pool = self.mempool.lock();
            pool.remove_confirmed_block(block);
            self.metrics
                .mempool_size
                .store(pool.len() as u64, Ordering::Relaxed);
        }

        // Release any pending-UTXO reservations this block's inputs held —
        // they're spent now, not merely reserved.
        {
            let store = self.storage.read();
            for tx in &block.transactions {
                for input in &tx.inputs {
                    store.unlock(&input.previous_output);
                }
            }
        }

        // Broadcast to peers (best-effort).
        if let Some(ref net) = self.network {
            if let Err(e) = NetworkService::broadcast_block(net, block) {
                debug!("failed to broadcast block: {e}");
            }
        }

        // Increment blocks_connected counter.
        self.metrics
            .blocks_connected
            .fetch_add(1, Ordering::Relaxed);

        // IBD progress tracking.
        if self.is_ibd() {
            let current_height = next_height;
            // Log progress every 1000 blocks.
            if current_height % 1000 == 0 {
                info!(height = current_height, "IBD progress");
            }
            // Exit IBD if we have caught up within threshold of the best peer.
            let best_peer = self.best_peer_height.load(Ordering::Relaxed);
            if best_peer == 0
                || best_peer.saturating_sub(current_height) < IBD_THRESHOLD_BLOCKS
            {
                self.is_ibd.store(false, Ordering::Relaxed);
                info!(height = current_height, "exiting IBD mode");
            }
        }

        // Attempt to connect any orphans whose parent is this block.
        self.try_connect_orphans(&block_hash);

        // Retry any orphan transactions now that new UTXOs may be available.
        self.retry_orphan_transactions();

        Ok(())
    }

    /// Check the orphan pool for blocks whose parent is `connected_hash`.
    ///
    /// If found, removes the orphan and processes it recursively, which may
    /// in turn connect further orphans that were waiting on it.
    fn try_connect_orphans(&self, connected_hash: &Hash256) {
        // Take the orphan out of the map while we still hold no other locks.
        let orphan = {
            let mut orphans = self.orphan_blocks.lock();
            orphans.remove(connected_hash)
        };

        if let Some((block, _ts)) = orphan {
            debug!(
                block_hash = %block.header.hash(),
                "reconnecting orphan block now that parent is available"
            );
            // Recurse: process_block will call try_connect_orphans again if
            // this block connects successfully.
            if let Err(e) = self.process_block(&block) {
                debug!("failed to connect previously-orphaned block: {e}");
            }
        }
    }

    /// Remove orphan blocks that have been waiting longer than
    /// [`ORPHAN_BLOCK_EXPIRY_SECS`] seconds.
    ///
    /// Called periodically from the event loop timeout tick.
    pub fn prune_stale_orphans(&self) {
        let expiry = std::time::Duration::from_secs(ORPHAN_BLOCK_EXPIRY_SECS);
        let mut orphans = self.orphan_blocks.lock();
        let before = orphans.len();
        orphans.retain(|_, (_, ts)| ts.elapsed() < expiry);
        let pruned = before - orphans.len();
        if pruned > 0 {
            debug!(pruned, "pruned stale orphan blocks");
        }
    }

    /// Remove orphan transactions that have been waiting longer than
    /// [`ORPHAN_TX_EXPIRY_SECS`] seconds.
    ///
    /// Called periodically from the event loop timeout tick alongside
    /// `prune_stale_orphans`.
    pub fn prune_stale_orphan_txs(&self) {
        let expiry = std::time::Duration::from_secs(ORPHAN_TX_EXPIRY_SECS);
        let mut orphans = self.orphan_txs.lock();
        let before = orphans.len();
        orphans.retain(|_, (_, ts)| ts.elapsed() < expiry);
        let pruned = before - orphans.len();
        if pruned > 0 {
            debug!(pruned, "pruned stale orphan transactions");
        }
    }

    /// Evict mempool entries older than [`xai_core::constants::DEFAULT_MEMPOOL_TTL_SECS`].
    ///
    /// Called periodically from the event loop timeout tick alongside
    /// `prune_stale_orphans` and `prune_stale_orphan_txs`.
    pub fn prune_expired_mempool_entries(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let mut pool = self.mempool.lock();
        let pruned = pool.prune_expired_default(now);
        if !pruned.is_empty() {
            debug!(pruned = pruned.len(), "pruned expired mempool transactions");
        }
    }

    /// Try to process all orphan transactions now that a new block has been
    /// connected and new UTXOs may be available.
    ///
    /// Orphans that succeed or fail with a non-`UnknownUtxo` error are removed
    /// from the pool. Orphans that still have unknown UTXOs remain.
    ///
    /// Care is taken not to hold the `orphan_txs` lock while calling
    /// `process_transaction`, which itself may re-acquire the lock when
    /// storing new orphans.
    fn retry_orphan_transactions(&self) {
        // Snapshot the current orphan set without holding the lock during retry.
        let candidates: Vec<(Hash256, Transaction)> = {
            let orphans = self.orphan_txs.lock();
            orphans
                .iter()
                .map(|(txid, (tx, _))| (*txid, tx.clone()))
                .collect()
        };

        for (txid, tx) in candidates {
            match self.process_transaction(&tx) {
                Ok(_) => {
                    // Successfully promoted to the mempool (or stored as orphan
                    // again if still unresolvable — but in that case it stays).
                    // Remove from orphan pool only on genuine success.
                    let mut orphans = self.orphan_txs.lock();
                    orphans.remove(&txid);
                    debug!(%txid, "orphan transaction resolved after block");
                }
                Err(XaiError::Validation(TransactionError::UnknownUtxo(_))) => {
                    // Still unresolvable — leave it in the orphan pool.
                }
                Err(e) => {
                    // Permanently invalid — evict from orphan pool.
                    let mut orphans = self.orphan_txs.lock();
                    orphans.remove(&txid);
                    debug!(%txid, error = %e, "evicting invalid orphan transaction");
                }
            }
        }
    }

    /// Number of orphan transactions currently held in the orphan pool.
    ///
    /// Exposed primarily for monitoring and testing.
    pub fn orphan_tx_count(&self) -> usize {
        self.orphan_txs.lock().len()
    }

    /// Process and add a new transaction to the mempool.
    ///
    /// Validates structure and UTXO references, inserts into the mempool,
    /// broadcasts to peers, and returns the transaction ID.
    pub fn process_transaction(&self, tx: &Transaction) -> Result<Hash256, XaiError> {
        let _span = info_span!(
            "process_transaction",
            inputs = tx.inputs.len(),
            outputs = tx.outputs.len()
        )
        .entered();

        // Basic structural check.
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(TransactionError::EmptyInputsOrOutputs.into());
        }

        // Validate against UTXO set.
        let chain_state = NodeChainState::new(Arc::clone(&self.storage));
        match chain_state.validate_transaction(tx) {
            Ok(()) => {}
            Err(TransactionError::UnknownUtxo(_)) => {
                // One or more input UTXOs are not yet available — store as orphan.
                let txid = tx
                    .txid()
                    .map_err(|e| XaiError::Storage(e.to_string()))?;
                let mut orphans = self.orphan_txs.lock();
                if orphans.len() >= MAX_ORPHAN_TXS {
                    // Evict the oldest entry to make room.
                    let oldest_key = orphans
                        .iter()
                        .min_by_key(|(_, (_, ts))| *ts)
                        .map(|(k, _)| *k);
                    if let Some(key) = oldest_key {
                        orphans.remove(&key);
                    }
                }
                debug!(%txid, "storing transaction as orphan (unknown UTXO)");
                orphans.insert(txid, (tx.clone(), Instant::now()));
                return Ok(txid);
            }
            Err(e) => return Err(e.into()),
        }

        // Compute fee: sum of input UTXO amounts minus sum of output amounts.
        let mut input_sum: u64 = 0;
        for input in &tx.inputs {
            if let Some(utxo) = chain_state.get_utxo(&input.previous_output)? {
                input_sum = input_sum
                    .checked_add(utxo.output.amount)
                    .ok_or_else(|| XaiError::Storage("input sum overflow".into()))?;
            }
        }
        let output_sum = tx
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow)?;
        let fee = input_sum
            .checked_sub(output_sum)
            .ok_or(TransactionError::InsufficientFunds {
                have: input_sum,
                need: output_sum,
            })?;

        // Reserve every spent input so a second, concurrently-processed
        // transaction can't also select them before this one is mined.
        // Reservations expire after `PENDING_UTXO_TIMEOUT_SECS` if never
        // released, so a rejected or lost transaction doesn't lock its
        // inputs forever.
        {
            let store = self.storage.read();
            let mut locked = Vec::with_capacity(tx.inputs.len());
            for input in &tx.inputs {
                if store.lock_pending(&input.previous_output) {
                    locked.push(&input.previous_output);
                } else {
                    for outpoint in &locked {
                        store.unlock(outpoint);
                    }
                    return Err(TransactionError::UtxoLocked(input.previous_output.to_string()).into());
                }
            }
        }

        // Insert into mempool with the computed fee, then update the metric.
        let txid = {
            let mut pool = self.mempool.lock();
            let id = pool
                .insert(tx.clone(), fee)
                .map_err(|e| XaiError::Storage(e.to_string()))?;
            self.metrics
                .mempool_size
                .store(pool.len() as u64, Ordering::Relaxed);
            id
        };

        debug!(%txid, "added transaction to mempool");

        // Broadcast to peers (best-effort); suppressed during IBD.
        if !self.is_ibd() {
            if let Some(ref net) = self.network {
                if let Err(e) = NetworkService::broadcast_transaction(net, tx) {
                    debug!("failed to broadcast transaction: {e}");
                }
            }
        }

        Ok(txid)
    }

    /// Run the main event loop, processing network events and storage queries.
    ///
    /// This method runs indefinitely, dispatching incoming blocks and
    /// transactions from the P2P network and answering peer storage queries.
    /// Two interval tickers drive the sync state machine: a 5-second tick
    /// to advance sync and a 30-second tick to check for request timeouts.
    pub async fn run(self: &Arc<Self>) {
        let event_rx = match &self.event_rx {
            Some(rx) => rx,
            None => {
                warn!("no network event receiver; event loop idle");
                loop {
                    tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
                }
            }
        };

        // Spawn storage query processing task if we have a query receiver.
        if self.query_rx.is_some() {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                let mut rx = node.query_rx.as_ref().unwrap().lock().await;
                while let Some(query) = rx.recv().await {
                    let response = node.handle_storage_query(&query.request);
                    if let Some(ref net) = node.network {
                        if let Err(e) = net.send_response(query.response_channel, response) {
                            debug!("failed to send response to peer: {e}");
                        }
                    }
                }
            });
        }

        // Interval timers for sync state machine.
        let mut sync_tick = tokio::time::interval(tokio::time::Duration::from_secs(5));
        let mut timeout_tick = tokio::time::interval(tokio::time::Duration::from_secs(30));

        loop {
            // Hold the lock only long enough to receive an event, then release
            // before doing any further work to avoid holding it across awaits.
            let maybe_event = {
                let mut rx = event_rx.lock().await;
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => Some(Ok(event)),
                            Err(e) => Some(Err(e)),
                        }
                    }
                    _ = sync_tick.tick() => None,
                    _ = timeout_tick.tick() => {
                        self.sync_manager.lock().check_timeouts();
                        self.prune_stale_orphans();
                        self.prune_stale_orphan_txs();
                        self.prune_expired_mempool_entries();
                        None
                    }
                }
            };

            match maybe_event {
                // A network event arrived.
                Some(Ok(event)) => match event {
                    NetworkEvent::HelloReceived {
                        peer,
                        chain_height,
                        ..
                    } => {
                        debug!(%peer, chain_height, "received hello from peer");
                        self.sync_manager.lock().on_peer_tip(
                            peer,
                            chain_height,
                            Hash256::ZERO,
                        );

                        // Update best peer height and check the IBD threshold.
                        let prev_best = self.best_peer_height.load(Ordering::Relaxed);
                        if chain_height > prev_best {
                            self.best_peer_height.store(chain_height, Ordering::Relaxed);
                        }
                        let our_height = self.chain_tip().map(|(h, _)| h).unwrap_or(0);
                        if chain_height.saturating_sub(our_height) >= IBD_THRESHOLD_BLOCKS {
                            self.is_ibd.store(true, Ordering::Relaxed);
                            info!(our_height, peer_height = chain_height, "entering IBD mode");
                        }
                    }
                    NetworkEvent::InvReceived { peer, transactions, blocks } => {
                        debug!(
                            %peer,
                            txs = transactions.len(),
                            blocks = blocks.len(),
                            "peer announced inventory"
                        );
                    }
                    NetworkEvent::GetDataReceived { peer, transactions, blocks } => {
                        debug!(
                            %peer,
                            txs = transactions.len(),
                            blocks = blocks.len(),
                            "peer requested inventory items"
                        );
                    }
                    NetworkEvent::BlockReceived(block) => {
                        if let Err(e) = self.process_block(&block) {
                            debug!("rejected block from peer: {e}");
                        }
                    }
                    NetworkEvent::TransactionReceived(tx) => {
                        if self.is_ibd() {
                            debug!("skipping transaction during IBD");
                        } else if let Err(e) = self.process_transaction(&tx) {
                            debug!("rejected transaction from peer: {e}");
                        }
                    }
                    NetworkEvent::BlockRequested(hash) => {
                        debug!(%hash, "peer requested block via gossipsub");
                    }
                    NetworkEvent::HeadersRequested(locator) => {
                        debug!(count = locator.len(), "peer requested headers via gossipsub");
                    }
                    NetworkEvent::PeersRequested(peer) => {
                        debug!(%peer, "peer requested known peer addresses");
                    }
                    NetworkEvent::PeersReceived(addrs) => {
                        debug!(count = addrs.len(), "received peer address list");
                    }
                    NetworkEvent::CheckpointRequested { peer, height } => {
                        debug!(%peer, height, "peer requested checkpoint summary");
                    }
                    NetworkEvent::CheckpointAnnounced { peer, height, .. } => {
                        debug!(%peer, height, "peer announced a checkpoint");
                    }
                    NetworkEvent::PeerConnected(peer_id) => {
                        info!(%peer_id, "peer connected");
                        self.sync_manager.lock().on_peer_connected(peer_id);
                    }
                    NetworkEvent::PeerDisconnected(peer_id) => {
                        info!(%peer_id, "peer disconnected");
                        self.sync_manager.lock().on_peer_disconnected(peer_id);
                    }
                    NetworkEvent::EnvelopeRejected { peer, reason } => {
                        debug!(%peer, %reason, "rejected envelope from peer");
                    }
                    NetworkEvent::RequestResponse { peer, response } => {
                        debug!(%peer, "received response from peer");
                        match response {
                            XaiResponse::Headers(headers) => {
                                debug!(%peer, count = headers.len(), "received headers from peer");
                                self.sync_manager.lock().on_headers_received(headers);
                            }
                            XaiResponse::Block(Some(block)) => {
                                debug!(%peer, "received block from peer via request-response");
                                self.sync_manager.lock().on_block_received(block.clone());
                                if let Err(e) = self.process_block(&block) {
                                    debug!("failed to connect synced block: {e}");
                                }
                            }
                            XaiResponse::Block(None) => {
                                debug!(%peer, "peer returned no block for request");
                            }
                            XaiResponse::Checkpoint(summary) => {
                                debug!(%peer, has_summary = summary.is_some(), "received checkpoint response");
                            }
                        }
                    }
                },
                // Broadcast channel error.
                Some(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(skipped = n, "lagged behind on network events");
                }
                Some(Err(broadcast::error::RecvError::Closed)) => {
                    info!("network event channel closed, shutting down");
                    break;
                }
                // A ticker fired (sync_tick or already-handled timeout_tick).
                None => {
                    // Advance the sync state machine.
                    let our_height = self.chain_tip().map(|(h, _)| h).unwrap_or(0);
                    let actions = {
                        let locator = self.get_block_locator().unwrap_or_default();
                        self.sync_manager
                            .lock()
                            .next_actions(our_height, || locator.clone())
                    };
                    for action in actions {
                        match action {
                            SyncAction::RequestChainTip(_peer) => {
                                // No wire-level chain-tip request exists; peer
                                // heights arrive passively via `HelloReceived`.
                            }
                            SyncAction::RequestHeaders { peer, locator } => {
                                if let Some(ref net) = self.network {
                                    if let Err(e) =
                                        net.send_request(peer, XaiRequest::GetHeaders(locator))
                                    {
                                        debug!("failed to send GetHeaders: {e}");
                                    }
                                }
                            }
                            SyncAction::RequestBlock { peer, hash } => {
                                if let Some(ref net) = self.network {
                                    if let Err(e) =
                                        net.send_request(peer, XaiRequest::GetBlock(hash))
                                    {
                                        debug!("failed to send GetBlock: {e}");
                                    }
                                }
                            }
                            SyncAction::ConnectBlock(block) => {
                                if let Err(e) = self.process_block(&block) {
                                    debug!("failed to connect block from sync: {e}");
                                }
                            }
                            SyncAction::SyncComplete => {
                                info!("sync complete");
                            }
                            SyncAction::Wait => {}
                        }
                    }
                }
            }
        }
    }

    /// Handle a storage query from a peer, returning the appropriate response.
    fn handle_storage_query(&self, request: &XaiRequest) -> XaiResponse {
        match request {
            XaiRequest::GetHeaders(locator) => {
                let store = self.storage.read();
                let ancestor = store.find_common_ancestor(locator).unwrap_or(None);
                match ancestor {
                    Some((_height, hash)) => {
                        let headers = store.get_headers_after(&hash, 2000).unwrap_or_default();
                        XaiResponse::Headers(headers)
                    }
                    None => XaiResponse::Headers(vec![]),
                }
            }
            XaiRequest::GetBlock(hash) => {
                let block = self.get_block(hash).unwrap_or(None);
                XaiResponse::Block(block)
            }
            XaiRequest::CheckpointQuery(_height) => {
                // No checkpoint manager is wired into the node yet; answer
                // with "no checkpoint available" rather than refusing the
                // request outright.
                XaiResponse::Checkpoint(None)
            }
        }
    }

    // --- Query methods for RPC ---

    /// Current chain tip as `(height, block_hash)`.
    pub fn chain_tip(&self) -> Result<(u64, Hash256), XaiError> {
        self.storage.read().chain_tip()
    }

    /// Get a full block by hash.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError> {
        self.storage.read().get_block(hash)
    }

    /// Get a block header by hash.
    pub fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError> {
        self.storage.read().get_block_header(hash)
    }

    /// Get the block hash at a given height.
    pub fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError> {
        self.storage.read().get_block_hash(height)
    }

    /// Mempool info: transaction count, total bytes, total fees.
    pub fn mempool_info(&self) -> (usize, usize, u64) {
        let pool = self.mempool.lock();
        (pool.len(), pool.total_bytes(), pool.total_fees())
    }

    /// Get a mempool transaction by txid.
    pub fn get_mempool_tx(&self, txid: &Hash256) -> Option<Transaction> {
        let pool = self.mempool.lock();
        pool.get(txid).map(|entry| entry.tx.clone())
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.network
            .as_ref()
            .map(NetworkService::peer_count)
            .unwrap_or(0)
    }

    /// Current circulating supply in coin-units.
    pub fn circulating_supply(&self) -> Result<u64, XaiError> {
        Ok(self.storage.read().circulating_supply())
    }

    /// Node configuration reference.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current synchronization state.
    pub fn sync_state(&self) -> SyncState {
        self.sync_manager.lock().state().clone()
    }

    /// Runtime metrics for this node instance.
    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    /// Create a block template for mining.
    ///
    /// Selects pending transactions from the mempool (ordered by fee rate,
    /// highest first) and passes them to the consensus engine which validates
    /// each transaction (UTXO existence, coinbase maturity, double-spend
    /// prevention) before including it in the template.
    pub fn create_block_template(
        &self,
        coinbase_recipient: &Address,
        timestamp: u64,
    ) -> Result<Block, XaiError> {
        // Select mempool transactions within the block size budget.
        // The mempool's select_transactions handles fee-rate ordering and
        // size budgeting. We pass MAX_BLOCK_SIZE as the budget; the consensus
        // engine will do the final validation filtering.
        let pending_txs: Vec<Transaction> = {
            let pool = self.mempool.lock();
            pool.select_transactions(xai_core::constants::MAX_BLOCK_SIZE)
                .into_iter()
                .map(|entry| entry.tx.clone())
                .collect()
        };

        self.consensus
            .create_block_template_with_txs(coinbase_recipient, timestamp, &pending_txs)
            .map_err(XaiError::from)
    }

    /// Iterate over all UTXOs (for address-based queries).
    pub fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        self.storage.read().iter_utxos()
    }

    /// Get UTXOs for an address using the indexed lookup.
    pub fn get_utxos_by_address(
        &self,
        pubkey_hash: &xai_core::types::Hash160,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        self.storage.read().get_utxos_by_address(pubkey_hash)
    }

    /// Get a geometric block locator for chain sync.
    pub fn get_block_locator(&self) -> Result<Vec<Hash256>, XaiError> {
        self.storage.read().get_block_locator()
    }

    /// Find the common ancestor from a peer's block locator.
    pub fn find_common_ancestor(
        &self,
        locator: &[Hash256],
    ) -> Result<Option<(u64, Hash256)>, XaiError> {
        self.storage.read().find_common_ancestor(locator)
    }

    /// Get headers after a given hash (up to max_count, capped at 2000).
    pub fn get_headers_after(
        &self,
        hash: &Hash256,
        max_count: usize,
    ) -> Result<Vec<BlockHeader>, XaiError> {
        self.storage.read().get_headers_after(hash, max_count)
    }

    /// Find the main-chain height of `start_hash` (or the deepest main-chain
    /// ancestor reachable by following `prev_hash` links).
    ///
    /// Walks back through stored headers until a hash that appears in the
    /// height index is found.
    fn find_fork_point_height(&self, start_hash: &Hash256) -> Result<u64, XaiError> {
        let store = self.storage.read();
        let (tip_height, _) = store.chain_tip()?;
        let mut current = *start_hash;

        loop {
            // Check whether `current` is mapped in the height index.
            for h in (0..=tip_height).rev() {
                if let Some(mh) = store.get_block_hash(h)? {
                    if mh == current {
                        return Ok(h);
                    }
                }
            }

            // Not on main chain — follow prev_hash.
            let hdr = store
                .get_block_header(&current)?
                .ok_or(XaiError::BlockValidation(xai_core::error::BlockError::InvalidPrevHash))?;

            if hdr.prev_hash == Hash256::ZERO {
                return Ok(0);
            }
            current = hdr.prev_hash;
        }
    }

    /// Collect the ordered (oldest-first) list of fork blocks ending at
    /// `new_block`, by walking `prev_hash` links until a main-chain block is
    /// reached.
    fn collect_fork_chain(&self, new_block: &Block) -> Result<Vec<Block>, XaiError> {
        let store = self.storage.read();
        let (tip_height, _) = store.chain_tip()?;
        let mut chain = vec![new_block.clone()];
        let mut current = new_block.header.prev_hash;

        loop {
            // Stop when current is on the main chain.
            let mut on_main = false;
            for h in 0..=tip_height {
                if let Some(mh) = store.get_block_hash(h)? {
                    if mh == current {
                        on_main = true;
                        break;
                    }
                }
            }
            if on_main {
                break;
            }

            let blk = store
                .get_block(&current)?
                .ok_or(XaiError::BlockValidation(xai_core::error::BlockError::InvalidPrevHash))?;
            chain.push(blk.clone());
            current = blk.header.prev_hash;
        }

        chain.reverse();
        Ok(chain)
    }

    /// Execute a chain reorganization.
    ///
    /// Disconnects the main chain back to `fork_point_height`, then validates
    /// and connects each block in `fork_chain` (oldest-first). Returns an
    /// error if the reorg depth exceeds [`MAX_REORG_DEPTH`] or any fork block
    /// fails consensus validation.
    ///
    /// Non-coinbase transactions from disconnected blocks are re-offered to
    /// the mempool (best-effort, fee = 0). The [`NodeMetrics::reorgs`] counter
    /// is incremented on success.
    pub fn reorganize(
        &self,
        fork_point_height: u64,
        fork_chain: Vec<Block>,
    ) -> Result<(), XaiError> {
        let (tip_height, _) = self.storage.read().chain_tip()?;

        let reorg_depth = tip_height.saturating_sub(fork_point_height);
        if reorg_depth > MAX_REORG_DEPTH {
            return Err(XaiError::Storage(format!(
                "reorg depth {reorg_depth} exceeds maximum {MAX_REORG_DEPTH}"
            )));
        }

        // Collect non-coinbase transactions from blocks we are about to remove
        // so we can try to re-add them to the mempool afterwards.
        let mut orphaned_txs: Vec<Transaction> = Vec::new();
        {
            let store = self.storage.read();
            let mut h = tip_height;
            while h > fork_point_height {
                if let Some(hash) = store.get_block_hash(h)? {
                    if let Some(blk) = store.get_block(&hash)? {
                        for tx in &blk.transactions {
                            if !tx.is_coinbase() {
                                orphaned_txs.push(tx.clone());
                            }
                        }
                    }
                }
                if h == 0 {
                    break;
                }
                h -= 1;
            }
        }

        // Disconnect the main chain back to fork_point_height.
        {
            let mut store = self.storage.write();
            let (mut cur, _) = store.chain_tip()?;
            while cur > fork_point_height {
                store.disconnect_tip()?;
                let (new_cur, _) = store.chain_tip()?;
                if new_cur >= cur {
                    break; // Safety guard against infinite loop.
                }
                cur = new_cur;
            }
        }

        // Validate and connect each block in the fork chain.
        for block in &fork_chain {
            self.consensus
                .validate_block(block)
                .map_err(XaiError::from)?;

            let (cur_height, _) = self.storage.read().chain_tip()?;
            let next_height = cur_height + 1;

            {
                let mut store = self.storage.write();
                store.connect_block(block, next_height)?;
            }

            info!(height = next_height, "connected fork block during reorg");

            {
                let mut pool = self.mempool.lock();
                pool.remove_confirmed_block(block);
            }

            self.metrics
                .blocks_connected
                .fetch_add(1, Ordering::Relaxed);
        }

        // Re-offer orphaned transactions to the mempool (fee = 0, best-effort).
        {
            let mut pool = self.mempool.lock();
            for tx in &orphaned_txs {
                let _ = pool.insert(tx.clone(), 0);
            }
            self.metrics
                .mempool_size
                .store(pool.len() as u64, Ordering::Relaxed);
        }

        self.metrics.reorgs.fetch_add(1, Ordering::Relaxed);

        let (new_height, new_hash) = self.storage.read().chain_tip()?;
        info!(
            height = new_height,
            hash = %new_hash,
            reorg_depth,
            "chain reorganization complete"
        );

        Ok(())
    }

    /// Number of orphan blocks currently held in the orphan pool.
    ///
    /// Exposed primarily for monitoring and testing.
    pub fn orphan_count(&self) -> usize {
        self.orphan_blocks.lock().len()
    }

    /// Number of UTXOs currently in the UTXO set.
    ///
    /// Uses a full scan — for RPC informational use only.
    pub fn utxo_count(&self) -> usize {
        self.storage
            .read()
            .iter_utxos()
            .map(|v| v.len())
            .unwrap_or(0)
    }
}
