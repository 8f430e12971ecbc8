//! Chain synchronization state machine.
//!
//! Implements header-first sync protocol with multi-peer parallel block download.

use libp2p::PeerId;
use xai_core::types::{Block, BlockHeader, Hash256};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Default timeout for a block request (seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Maximum failures before banning a peer.
pub const DEFAULT_MAX_FAILURES: u32 = 3;
/// Maximum concurrent in-flight requests per peer.
pub const DEFAULT_MAX_IN_FLIGHT_PER_PEER: u32 = 8;

/// The current state of the chain synchronization process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing — we're caught up.
    Idle,
    /// Querying peers to find their chain tips.
    DiscoveringPeers,
    /// Downloading headers from the best peer to the target height.
    DownloadingHeaders { target_height: u64 },
    /// Downloading blocks from the header chain.
    DownloadingBlocks { remaining: Vec<Hash256> },
    /// Synchronization complete.
    Done,
}

/// Actions to take as a result of sync state machine progression.
#[derive(Debug, Clone)]
pub enum SyncAction {
    /// Request the chain tip from a peer.
    RequestChainTip(PeerId),
    /// Request headers from a peer using the given locator.
    RequestHeaders {
        peer: PeerId,
        locator: Vec<Hash256>,
    },
    /// Request a specific block by hash from a peer.
    RequestBlock { peer: PeerId, hash: Hash256 },
    /// Connect a downloaded block to the chain.
    ConnectBlock(Block),
    /// Synchronization is complete.
    SyncComplete,
    /// No action to take right now.
    Wait,
}

/// Metadata about a peer's chain tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTip {
    /// The height of the peer's chain tip.
    pub height: u64,
    /// The block hash at the tip.
    pub hash: Hash256,
}

/// Per-peer synchronization metadata.
#[derive(Debug, Clone)]
pub struct PeerState {
    /// The peer's chain tip.
    pub tip: PeerTip,
    /// Number of outstanding block requests to this peer.
    pub in_flight: u32,
    /// Number of failed/timed-out requests from this peer.
    pub failures: u32,
    /// Timestamp of last request sent (for timeout detection).
    pub last_request_at: Option<std::time::Instant>,
    /// Whether this peer is banned (too many failures).
    pub banned: bool,
}

impl PeerState {
    /// Compute a score for peer selection. Higher is better.
    ///
    /// Peers with more failures are penalised heavily.
    fn score(&self) -> i64 {
        self.tip.height as i64 - self.failures as i64 * 1000
    }
}

/// Chain synchronization manager.
///
/// Uses a state machine to coordinate header-first sync with multi-peer
/// parallel block download.
pub struct SyncManager {
    /// Current synchronization state.
    state: SyncState,
    /// The best peer we've found and their chain tip (backward-compat field).
    best_peer: Option<(PeerId, PeerTip)>,
    /// Headers we've downloaded but not yet processed into blocks.
    pending_headers: Vec<BlockHeader>,
    /// Block hashes we need to download.
    blocks_to_download: VecDeque<Hash256>,
    /// All known peers and their per-peer state.
    peers: HashMap<PeerId, PeerState>,
    /// Cached ID of the current best peer.
    best_peer_id: Option<PeerId>,
    /// Map from in-flight block hash to the peer it was assigned to.
    in_flight: HashMap<Hash256, PeerId>,
}

impl SyncManager {
    /// Create a new sync manager in the Idle state.
    pub fn new() -> Self {
        Self {
            state: SyncState::Idle,
            best_peer: None,
            pending_headers: Vec::new(),
            blocks_to_download: VecDeque::new(),
            peers: HashMap::new(),
            best_peer_id: None,
            in_flight: HashMap::new(),
        }
    }

    /// Recompute `best_peer_id` and keep `best_peer` in sync.
    fn refresh_best_peer(&mut self) {
        let best = self
            .peers
            .iter()
            .filter(|(_, ps)| !ps.banned)
            .max_by_key(|(_, ps)| ps.tip.height)
            .map(|(id, ps)| (*id, ps.tip.clone()));

        match best {
            Some((id, tip)) => {
                self.best_peer_id = Some(id);
                self.best_peer = Some((id, tip));
            }
            None => {
                self.best_peer_id = None;
                self.best_peer = None;
            }
        }
    }

    /// A peer has connected — register them and optionally begin peer discovery.
    pub fn on_peer_connected(&mut self, peer: PeerId) {
        debug!(%peer, "sync: peer connected");

        // Register with a zero tip until we hear from them.
        self.peers.entry(peer).or_insert_with(|| PeerState {
            tip: PeerTip {
                height: 0,
                hash: Hash256::ZERO,
            },
            in_flight: 0,
            failures: 0,
            last_request_at: None,
            banned: false,
        });

        // If we're idle, start discovering peers.
        if matches!(self.state, SyncState::Idle) {
            self.state = SyncState::DiscoveringPeers;
        }
    }

    /// We received a peer's chain tip response.
    pub fn on_peer_tip(&mut self, peer: PeerId, height: u64, hash: Hash256) {
        debug!(%peer, height, %hash, "sync: received peer tip");
        let tip = PeerTip { height, hash };

        // Update (or insert) the peer's tip in the peers map.
        self.peers
            .entry(peer)
            .and_modify(|ps| ps.tip = tip.clone())
            .or_insert_with(|| PeerState {
                tip: tip.clone(),
                in_flight: 0,
                failures: 0,
                last_request_at: None,
                banned: false,
            });

        // Refresh the cached best peer.
        let should_update = match &self.best_peer {
            None => true,
            Some((_, current_best)) => height > current_best.height,
        };

        if should_update {
            debug!(%peer, height, "sync: new best peer");
            self.best_peer_id = Some(peer);
            self.best_peer = Some((peer, tip));
        }
    }

    /// A peer has disconnected.
    ///
    /// Removes it from the peers map and reassigns any in-flight blocks for
    /// that peer back to the front of the download queue.
    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        info!(%peer, "sync: peer disconnected");

        // Collect all blocks assigned to this peer.
        let mut reassign: Vec<Hash256> = self
            .in_flight
            .iter()
            .filter_map(|(hash, &assigned)| {
                if assigned == peer {
                    Some(*hash)
                } else {
                    None
                }
            })
            .collect();

        // Remove them from in-flight.
        for hash in &reassign {
            self.in_flight.remove(hash);
        }

        // Push reassigned blocks to the front of the queue (preserve order).
        reassign.reverse();
        for hash in reassign {
            self.blocks_to_download.push_front(hash);
        }

        self.peers.remove(&peer);

        // Refresh best peer now that this peer is gone.
        let was_best = self.best_peer_id == Some(peer);
        if was_best {
            self.refresh_best_peer();
        }
    }

    /// Check all in-flight requests for timeouts.
    ///
    /// Timed-out requests are reassigned to the front of the download queue.
    /// Peers that exceed `DEFAULT_MAX_FAILURES` are banned.
    pub fn check_timeouts(&mut self) {
        let timeout = std::time::Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);
        let now = std::time::Instant::now();

        let timed_out: Vec<Hash256> = self
            .in_flight
            .iter()
            .filter_map(|(hash, peer_id)| {
                if let Some(ps) = self.peers.get(peer_id) {
                    if let Some(last) = ps.last_request_at {
                        if now.duration_since(last) >= timeout {
                            return Some(*hash);
                        }
                    }
                }
                None
            })
            .collect();

        for hash in timed_out {
            if let Some(peer_id) = self.in_flight.remove(&hash) {
                self.blocks_to_download.push_front(hash);

                if let Some(ps) = self.peers.get_mut(&peer_id) {
                    ps.in_flight = ps.in_flight.saturating_sub(1);
                    ps.failures += 1;
                    if ps.failures >= DEFAULT_MAX_FAILURES {
                        warn!(%peer_id, failures = ps.failures, "sync: banning peer after max failures");
                        ps.banned = true;
                    }
                }
            }
        }

        // If best peer got banned, refresh.
        if let Some(best_id) = self.best_peer_id {
            if self.peers.get(&best_id).map(|ps| ps.banned).unwrap_or(false) {
                self.refresh_best_peer();
            }
        }
    }

    /// We received a batch of headers from a peer.
    ///
    /// Validates header linkage and transitions to downloading blocks.
    pub fn on_headers_received(&mut self, headers: Vec<BlockHeader>) {
        if headers.is_empty() {
            debug!("sync: received empty headers response");
            return;
        }

        debug!(count = headers.len(), "sync: received headers");

        // Validate header chain linkage.
        for i in 1..headers.len() {
            if headers[i].prev_hash != headers[i - 1].hash() {
                debug!("sync: invalid header chain linkage, resetting");
                self.state = SyncState::Idle;
                self.pending_headers.clear();
                return;
            }
        }

        // Store headers and build download queue.
        self.pending_headers.extend(headers.clone());
        let hashes: Vec<Hash256> = headers.iter().map(|h| h.hash()).collect();
        self.blocks_to_download.extend(hashes.clone());

        info!(
            count = hashes.len(),
            total_pending = self.blocks_to_download.len(),
            "sync: queued blocks for download"
        );

        // Transition to downloading blocks.
        self.state = SyncState::DownloadingBlocks {
            remaining: hashes,
        };
    }

    /// We received a block from a peer.
    ///
    /// Removes it from the download queue and from the in-flight map.
    pub fn on_block_received(&mut self, block: Block) {
        let block_hash = block.header.hash();
        debug!(%block_hash, "sync: received block");

        // Remove from in-flight map and decrement peer's counter.
        if let Some(peer_id) = self.in_flight.remove(&block_hash) {
            if let Some(ps) = self.peers.get_mut(&peer_id) {
                ps.in_flight = ps.in_flight.saturating_sub(1);
            }
        }

        // Remove from download queue if present.
        if let Some(pos) = self.blocks_to_download.iter().position(|h| *h == block_hash) {
            self.blocks_to_download.remove(pos);
            debug!(
                remaining = self.blocks_to_download.len(),
                "sync: block download progress"
            );
        }

        // If download queue is empty, we're done.
        if self.blocks_to_download.is_empty()
            && self.in_flight.is_empty()
            && !matches!(self.state, SyncState::Idle)
        {
            info!("sync: all blocks downloaded, transitioning to Done");
            self.state = SyncState::Done;
        }
    }

    /// Check if we should sync based on our current height vs best peer.
    pub fn should_sync(&self, our_height: u64) -> bool {
        if let Some((_, peer_tip)) = &self.best_peer {
            peer_tip.height > our_height
        } else {
            false
        }
    }

    /// Get the next actions to take given our current height and chain state.
    ///
    /// In the `DownloadingBlocks` state this will distribute work across all
    /// available (non-banned, not-at-capacity) peers. In all other states it
    /// returns at most one action, matching the behaviour of the original
    /// `next_action`.
    pub fn next_actions<F>(&mut self, our_height: u64, get_locator: F) -> Vec<SyncAction>
    where
        F: Fn() -> Vec<Hash256>,
    {
        match &self.state.clone() {
            SyncState::Idle => {
                if self.should_sync(our_height) {
                    if let Some((peer, peer_tip)) = &self.best_peer.clone() {
                        info!(
                            %peer,
                            our_height,
                            peer_height = peer_tip.height,
                            "sync: starting header download"
                        );
                        let locator = get_locator();
                        self.state = SyncState::DownloadingHeaders {
                            target_height: peer_tip.height,
                        };
                        return vec![SyncAction::RequestHeaders {
                            peer: *peer,
                            locator,
                        }];
                    }
                }
                vec![SyncAction::Wait]
            }
            SyncState::DiscoveringPeers => {
                if let Some((peer, _)) = &self.best_peer {
                    vec![SyncAction::RequestChainTip(*peer)]
                } else {
                    vec![SyncAction::Wait]
                }
            }
            SyncState::DownloadingHeaders { .. } => {
                vec![SyncAction::Wait]
            }
            SyncState::DownloadingBlocks { .. } => {
                // Build a sorted list of available peers (not banned, under capacity).
                let mut available: Vec<(PeerId, i64)> = self
                    .peers
                    .iter()
                    .filter(|(_, ps)| !ps.banned && ps.in_flight < DEFAULT_MAX_IN_FLIGHT_PER_PEER)
                    .map(|(id, ps)| (*id, ps.score()))
                    .collect();

                // Sort descending by score so we prefer higher-scoring peers.
                available.sort_by(|a, b| b.1.cmp(&a.1));

                if available.is_empty() {
                    return vec![SyncAction::Wait];
                }

                let mut actions = Vec::new();
                let mut peer_cursor = 0usize;

                // Walk the queue and assign hashes that are not already in-flight.
                let hashes_to_assign: Vec<Hash256> = self
                    .blocks_to_download
                    .iter()
                    .filter(|h| !self.in_flight.contains_key(*h))
                    .copied()
                    .collect();

                for hash in hashes_to_assign {
                    // Re-check capacity for the current cursor peer.
                    // We may have filled it up in this loop iteration.
                    let initial_cursor = peer_cursor;
                    loop {
                        let (peer_id, _) = available[peer_cursor % available.len()];
                        let ps = self.peers.get(&peer_id);
                        let current_in_flight = ps.map(|p| p.in_flight).unwrap_or(u32::MAX);

                        if current_in_flight < DEFAULT_MAX_IN_FLIGHT_PER_PEER {
                            // Assign this hash to this peer.
                            self.in_flight.insert(hash, peer_id);
                            if let Some(ps) = self.peers.get_mut(&peer_id) {
                                ps.in_flight += 1;
                                ps.last_request_at = Some(std::time::Instant::now());
                            }
                            actions.push(SyncAction::RequestBlock {
                                peer: peer_id,
                                hash,
                            });
                            peer_cursor += 1;
                            break;
                        }

                        peer_cursor += 1;

                        // If we've cycled through all peers and none can take more, stop.
                        if peer_cursor - initial_cursor >= available.len() {
                            return if actions.is_empty() {
                                vec![SyncAction::Wait]
                            } else {
                                actions
                            };
                        }
                    }
                }

                if actions.is_empty() {
                    vec![SyncAction::Wait]
                } else {
                    actions
                }
            }
            SyncState::Done => {
                info!("sync: complete, returning to idle");
                self.state = SyncState::Idle;
                self.best_peer = None;
                self.best_peer_id = None;
                self.pending_headers.clear();
                vec![SyncAction::SyncComplete]
            }
        }
    }

    /// Get the next action to take given our current height and chain state.
    ///
    /// This is a backward-compatibility shim that delegates to `next_actions`
    /// and returns the first element, or `Wait` if the list is empty.
    pub fn next_action<F>(&mut self, our_height: u64, get_locator: F) -> SyncAction
    where
        F: Fn() -> Vec<Hash256>,
    {
        self.next_actions(our_height, get_locator)
            .into_iter()
            .next()
            .unwrap_or(SyncAction::Wait)
    }

    /// Get the current sync state.
    pub fn state(&self) -> &SyncState {
        &self.state
    }
}

impl Default for SyncManager {
    fn default() -> Self {
        Self::new()
    }
}
