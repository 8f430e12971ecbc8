//! Per-peer request rate limiting and global bandwidth limiting.
//!
//! Every peer gets a sliding-window token bucket per request kind (default
//! 30 requests / 60 s, as described for the gossip layer); in addition a
//! single global bandwidth token bucket throttles total inbound bytes before
//! any message is even deserialized, so a flood of oversized messages cannot
//! be used to exhaust memory ahead of validation.
//!
//! # Design
//!
//! Each peer has a [`PeerRateLimits`] record mapping a request kind (e.g.
//! `"block"`, `"transaction"`, `"headers"`) to a
//! [`VecDeque`](std::collections::VecDeque) of [`Instant`](std::time::Instant)
//! timestamps. On every check the deque is first pruned to remove entries
//! older than the window, then the remaining length is compared against the
//! configured limit. Recording a message appends the current timestamp.

use libp2p::PeerId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// The sliding window duration used for per-peer request limits.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Default requests-per-window allowed for any single request kind.
pub const DEFAULT_REQUESTS_PER_WINDOW: usize = 30;

/// Default global bandwidth budget, in bytes, refilled once per [`WINDOW`].
pub const DEFAULT_BANDWIDTH_PER_WINDOW: u64 = 50 * 1024 * 1024; // 50 MiB/min

/// Per-peer timestamp queues, one per request kind.
#[derive(Debug, Clone, Default)]
pub struct PeerRateLimits {
    kinds: HashMap<String, VecDeque<Instant>>,
}

impl PeerRateLimits {
    fn prune(queue: &mut VecDeque<Instant>) {
        let cutoff = Instant::now() - WINDOW;
        while queue.front().is_some_and(|t| *t <= cutoff) {
            queue.pop_front();
        }
    }
}

/// Manages sliding-window rate limits for all connected peers.
///
/// # Usage
///
/// Before processing a message, call [`RateLimiter::check`]. If it returns
/// `false` the peer has exceeded its rate limit for that request kind and
/// the message should be discarded (and the peer possibly penalized via
/// `peer_scoring`). After deciding to process the message call
/// [`RateLimiter::record`] to register the event.
///
/// Combining check + record in one step would couple rate limiting to
/// processing outcomes; keeping them separate gives callers the flexibility
/// to record only messages that pass validation.
pub struct RateLimiter {
    peers: HashMap<PeerId, PeerRateLimits>,
    limit_per_window: usize,
}

impl RateLimiter {
    /// Create a rate limiter using [`DEFAULT_REQUESTS_PER_WINDOW`].
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_REQUESTS_PER_WINDOW)
    }

    /// Create a rate limiter with an explicit per-kind limit.
    pub fn with_limit(limit_per_window: usize) -> Self {
        Self {
            peers: HashMap::new(),
            limit_per_window,
        }
    }

    /// Returns `true` if the peer has not exceeded its limit for `kind`.
    ///
    /// Prunes stale entries before checking so the window always reflects
    /// the last 60 seconds.
    pub fn check(&mut self, peer: &PeerId, kind: &str) -> bool {
        let entry = self.peers.entry(*peer).or_default();
        let queue = entry.kinds.entry(kind.to_string()).or_default();
        PeerRateLimits::prune(queue);
        let ok = queue.len() < self.limit_per_window;
        if !ok {
            debug!(%peer, kind, count = queue.len(), limit = self.limit_per_window,
                "rate_limiter: limit exceeded");
        }
        ok
    }

    /// Record a request of `kind` from this peer.
    pub fn record(&mut self, peer: &PeerId, kind: &str) {
        self.peers
            .entry(*peer)
            .or_default()
            .kinds
            .entry(kind.to_string())
            .or_default()
            .push_back(Instant::now());
        debug!(%peer, kind, "rate_limiter: request recorded");
    }

    /// Remove all rate-limit state for a peer.
    ///
    /// Call this when a peer disconnects to free memory.
    pub fn remove_peer(&mut self, peer: &PeerId) {
        if self.peers.remove(peer).is_some() {
            debug!(%peer, "rate_limiter: peer removed");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Global token bucket limiting total inbound bandwidth across all peers.
///
/// Unlike [`RateLimiter`] (per-peer, per-kind request counts), this is a
/// single shared budget measured in bytes, refilled continuously at
/// `capacity / WINDOW`. Message-size and per-peer checks both run before
/// deserialization; this one specifically protects against aggregate
/// many-small-peers floods that individual per-peer limits wouldn't catch.
pub struct BandwidthLimiter {
    capacity: u64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl BandwidthLimiter {
    /// Create a bandwidth limiter with [`DEFAULT_BANDWIDTH_PER_WINDOW`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BANDWIDTH_PER_WINDOW)
    }

    /// Create a bandwidth limiter with an explicit per-window byte budget.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_per_sec: capacity as f64 / WINDOW.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Attempt to consume `bytes` tokens. Returns `true` if there was enough
    /// budget (and consumes it), `false` if the bucket is empty (budget is
    /// not consumed in that case).
    pub fn try_consume(&mut self, bytes: u64) -> bool {
        self.refill();
        if self.tokens >= bytes as f64 {
            self.tokens -= bytes as f64;
            true
        } else {
            false
        }
    }

    /// Current remaining budget, in bytes.
    pub fn remaining(&mut self) -> u64 {
        self.refill();
        self.tokens as u64
    }
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::new()
    }
}
