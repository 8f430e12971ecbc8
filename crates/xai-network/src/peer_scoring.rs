//! Peer scoring, banning, and message-replay/deduplication.
//!
//! Tracks per-peer reputation based on observed behaviour. Peers start at
//! [`INITIAL_SCORE`] and are clamped to `[`[`MIN_SCORE`]`, `[`MAX_SCORE`]`]`.
//! A peer whose score drops below [`DISCONNECT_THRESHOLD`] should be
//! disconnected by the caller; a peer whose score reaches [`MIN_SCORE`] is
//! blacklisted outright. This module also owns the bounded, TTL'd message
//! dedup cache and the per-sender envelope replay guard described alongside
//! the gossip protocol.

use dashmap::DashMap;
use libp2p::PeerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Score assigned to a peer the first time it is seen.
pub const INITIAL_SCORE: i64 = 50;
/// Minimum possible score; reaching this triggers a blacklist.
pub const MIN_SCORE: i64 = 0;
/// Maximum possible score.
pub const MAX_SCORE: i64 = 100;

/// Bonus applied per valid message received from a peer.
pub const BONUS_VALID_MESSAGE: i64 = 2;
/// Penalty applied per invalid message received from a peer.
pub const PENALTY_INVALID_MESSAGE: i64 = -5;
/// Penalty applied when a peer times out on a request.
pub const PENALTY_TIMEOUT: i64 = -1;

/// Peers with a score strictly below this threshold should be disconnected.
pub const DISCONNECT_THRESHOLD: i64 = 10;

/// How long a blacklist (score reached [`MIN_SCORE`]) is enforced before the
/// peer is eligible for reconsideration.
pub const BAN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Capacity of the bounded message-dedup cache.
pub const DEFAULT_DEDUP_CAPACITY: usize = 10_000;
/// How long a `(kind, id)` pair is remembered in the dedup cache.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(600);

/// Per-peer score record.
#[derive(Debug, Clone)]
pub struct PeerScore {
    /// Current score, in `[`[`MIN_SCORE`]`, `[`MAX_SCORE`]`]`.
    pub score: i64,
    /// When this peer was blacklisted (`None` if not currently blacklisted).
    pub banned_at: Option<Instant>,
    /// Total penalty points received over the lifetime of this record.
    pub total_penalties: u64,
    /// Total bonus points received over the lifetime of this record.
    pub total_bonuses: u64,
}

impl PeerScore {
    fn new() -> Self {
        Self {
            score: INITIAL_SCORE,
            banned_at: None,
            total_penalties: 0,
            total_bonuses: 0,
        }
    }
}

/// Manages reputation scores for all known peers.
///
/// # Usage
///
/// Call [`PeerScoreBoard::penalize`] when a peer misbehaves and
/// [`PeerScoreBoard::reward`] when a peer sends a valid message. Poll
/// [`PeerScoreBoard::should_disconnect`]/[`PeerScoreBoard::is_banned`] before
/// continuing to serve a peer, and call [`PeerScoreBoard::unban_expired`]
/// periodically to lift expired blacklists.
pub struct PeerScoreBoard {
    scores: HashMap<PeerId, PeerScore>,
}

impl PeerScoreBoard {
    /// Create an empty score board.
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
        }
    }

    /// Apply a penalty (negative value) to a peer, clamped at [`MIN_SCORE`].
    ///
    /// Returns `true` if this penalty caused the peer to be blacklisted
    /// (i.e. the peer reached [`MIN_SCORE`] with this call and was not
    /// already banned).
    pub fn penalize(&mut self, peer: &PeerId, penalty: i64) -> bool {
        let entry = self.scores.entry(*peer).or_insert_with(PeerScore::new);

        if entry.banned_at.is_some() {
            debug!(%peer, "peer_score: skipping penalty for already-banned peer");
            return false;
        }

        entry.score = (entry.score + penalty).clamp(MIN_SCORE, MAX_SCORE);
        entry.total_penalties = entry.total_penalties.saturating_add(penalty.unsigned_abs());

        debug!(%peer, score = entry.score, penalty, "peer_score: penalty applied");

        if entry.score <= MIN_SCORE {
            entry.banned_at = Some(Instant::now());
            warn!(%peer, "peer_score: peer blacklisted at persistent minimum score");
            return true;
        }

        false
    }

    /// Apply a bonus (positive value) to a peer's score, clamped at [`MAX_SCORE`].
    pub fn reward(&mut self, peer: &PeerId, bonus: i64) {
        let entry = self.scores.entry(*peer).or_insert_with(PeerScore::new);

        entry.score = (entry.score + bonus).clamp(MIN_SCORE, MAX_SCORE);
        entry.total_bonuses = entry.total_bonuses.saturating_add(bonus.unsigned_abs());

        debug!(%peer, score = entry.score, bonus, "peer_score: bonus applied");
    }

    /// Returns `true` if the peer's score is low enough that it should be
    /// disconnected (but not necessarily blacklisted).
    pub fn should_disconnect(&self, peer: &PeerId) -> bool {
        self.score(peer) < DISCONNECT_THRESHOLD
    }

    /// Returns `true` if the peer is currently blacklisted (and the
    /// blacklist has not yet expired).
    pub fn is_banned(&self, peer: &PeerId) -> bool {
        match self.scores.get(peer) {
            Some(ps) => match ps.banned_at {
                Some(banned_at) => banned_at.elapsed() < BAN_DURATION,
                None => false,
            },
            None => false,
        }
    }

    /// Returns the peer's current score, or [`INITIAL_SCORE`] if the peer is
    /// unknown (matching the score a never-before-seen peer would receive on
    /// first contact).
    pub fn score(&self, peer: &PeerId) -> i64 {
        self.scores.get(peer).map(|ps| ps.score).unwrap_or(INITIAL_SCORE)
    }

    /// Lift all blacklists whose [`BAN_DURATION`] has elapsed.
    ///
    /// Resets the score of each unbanned peer to [`INITIAL_SCORE`] and
    /// returns the list of peers whose bans were lifted so callers can
    /// reconnect them if desired.
    pub fn unban_expired(&mut self) -> Vec<PeerId> {
        let mut unbanned = Vec::new();

        for (peer, ps) in self.scores.iter_mut() {
            if let Some(banned_at) = ps.banned_at {
                if banned_at.elapsed() >= BAN_DURATION {
                    ps.banned_at = None;
                    ps.score = INITIAL_SCORE;
                    unbanned.push(*peer);
                    info!(%peer, "peer_score: blacklist expired, peer reinstated");
                }
            }
        }

        unbanned
    }

    /// Remove all tracking data for a peer (call on disconnect).
    pub fn remove_peer(&mut self, peer: &PeerId) {
        if self.scores.remove(peer).is_some() {
            debug!(%peer, "peer_score: peer removed from score board");
        }
    }

    /// Returns the [`PeerId`]s of all currently blacklisted peers.
    pub fn banned_peers(&self) -> Vec<PeerId> {
        self.scores
            .iter()
            .filter(|(_, ps)| {
                ps.banned_at
                    .map(|t| t.elapsed() < BAN_DURATION)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns a snapshot of the score record for a peer, or `None` if the
    /// peer is unknown.
    pub fn peer_info(&self, peer: &PeerId) -> Option<PeerScore> {
        self.scores.get(peer).cloned()
    }
}

impl Default for PeerScoreBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded, TTL'd cache of recently-seen `(kind, id)` pairs, used to avoid
/// re-validating the same inventory item (transaction id or block hash)
/// gossiped by multiple peers within a short window.
pub struct DedupCache {
    seen: DashMap<(String, String), Instant>,
    capacity: usize,
    ttl: Duration,
}

impl DedupCache {
    /// Create a dedup cache with the default capacity and TTL.
    pub fn new() -> Self {
        Self::with_params(DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL)
    }

    /// Create a dedup cache with explicit capacity and TTL.
    pub fn with_params(capacity: usize, ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Record `(kind, id)` as seen. Returns `true` if this is the first time
    /// it has been seen within the TTL window (i.e. the caller should
    /// proceed to validate it), `false` if it is a duplicate.
    pub fn insert_if_new(&self, kind: &str, id: &str) -> bool {
        let key = (kind.to_string(), id.to_string());
        let now = Instant::now();

        if let Some(seen_at) = self.seen.get(&key) {
            if now.duration_since(*seen_at) < self.ttl {
                return false;
            }
        }

        self.seen.insert(key, now);
        self.evict_if_over_capacity();
        true
    }

    fn evict_if_over_capacity(&self) {
        if self.seen.len() <= self.capacity {
            return;
        }
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);

        if self.seen.len() > self.capacity {
            let mut entries: Vec<_> = self.seen.iter().map(|e| (e.key().clone(), *e.value())).collect();
            entries.sort_by_key(|(_, t)| *t);
            let excess = self.seen.len() - self.capacity;
            for (key, _) in entries.into_iter().take(excess) {
                self.seen.remove(&key);
            }
        }
    }

    /// Number of entries currently tracked.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the last-accepted envelope nonce per sender to reject replayed
/// messages. Nonces must be strictly increasing per sender, mirroring the
/// transaction nonce model.
pub struct ReplayGuard {
    last_nonce: HashMap<Vec<u8>, u64>,
}

impl ReplayGuard {
    /// Create an empty replay guard.
    pub fn new() -> Self {
        Self {
            last_nonce: HashMap::new(),
        }
    }

    /// Check and record an envelope nonce from `sender_pubkey`.
    ///
    /// Returns `true` if this nonce is strictly greater than the last one
    /// seen from this sender (and is therefore accepted), `false` if it is
    /// a replay (equal or lower).
    pub fn check_and_update(&mut self, sender_pubkey: &[u8], nonce: u64) -> bool {
        match self.last_nonce.get(sender_pubkey) {
            Some(&last) if nonce <= last => false,
            _ => {
                self.last_nonce.insert(sender_pubkey.to_vec(), nonce);
                true
            }
        }
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}
