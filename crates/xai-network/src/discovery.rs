//! Bootstrap seeds and eclipse-resistant peer selection.
//!
//! Complements libp2p's own Kademlia/mDNS discovery with the higher-level
//! policy the spec requires: per-network hardcoded seeds, a peer-quality
//! score independent of [`crate::peer_scoring::PeerScoreBoard`]'s
//! message-reputation score, and diversity-aware peer selection so a
//! handful of /16 prefixes or ASNs can't monopolize a node's connection
//! slots (eclipse attack resistance).
//!
//! This module holds pure bookkeeping — no sockets are opened here.
//! [`crate::service::NetworkNode`] consults [`PeerDiversityManager`] when
//! deciding which known peers to dial next and [`BootstrapSeeds`] on startup.

use libp2p::Multiaddr;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::config::{MIN_HEALTHY_ASNS, MIN_HEALTHY_PREFIXES};
use xai_core::address::Network;

/// Starting quality score for a newly discovered peer.
pub const INITIAL_QUALITY: i64 = 50;
/// Quality score ceiling.
pub const MAX_QUALITY: i64 = 100;
/// Quality score floor.
pub const MIN_QUALITY: i64 = 0;
/// Quality awarded on a successful interaction.
pub const QUALITY_SUCCESS_BONUS: i64 = 2;
/// Quality deducted on a failed interaction.
pub const QUALITY_FAILURE_PENALTY: i64 = 5;
/// A peer with quality below this is dropped from the connected set.
pub const QUALITY_DISCONNECT_THRESHOLD: i64 = 10;
/// A peer unseen for longer than this is considered dead and pruned.
pub const DEFAULT_DEAD_PEER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Hardcoded bootstrap seed multiaddrs, one list per network.
///
/// Mainnet/testnet entries are illustrative DNS names resolved at dial
/// time; devnet has none since local clusters are expected to be wired
/// together via `--bootstrap-peers` instead.
pub struct BootstrapSeeds;

impl BootstrapSeeds {
    const MAINNET: &'static [&'static str] = &[
        "/dns4/seed1.xai.network/tcp/8733",
        "/dns4/seed2.xai.network/tcp/8733",
        "/dns4/seed3.xai.network/tcp/8733",
    ];

    const TESTNET: &'static [&'static str] = &[
        "/dns4/testnet-seed1.xai.network/tcp/18733",
        "/dns4/testnet-seed2.xai.network/tcp/18733",
    ];

    /// Seed addresses for `network`, parsed as [`Multiaddr`]s.
    ///
    /// Malformed entries are skipped rather than failing the whole list —
    /// a single bad hardcoded seed shouldn't prevent bootstrap using the
    /// rest.
    pub fn for_network(network: Network) -> Vec<Multiaddr> {
        let raw: &[&str] = match network {
            Network::Mainnet => Self::MAINNET,
            Network::Testnet => Self::TESTNET,
        };
        raw.iter().filter_map(|s| s.parse().ok()).collect()
    }
}

/// Discovery/quality metadata about a peer, keyed externally by [`libp2p::PeerId`].
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Best-known IP address for this peer, if resolved (used for diversity only).
    pub ip_address: Option<std::net::IpAddr>,
    /// Autonomous system number, if known (used for diversity only).
    pub asn: Option<u32>,
    /// When this peer was first observed.
    pub first_seen: Instant,
    /// When this peer was last seen alive.
    pub last_seen: Instant,
    /// Quality score in `[MIN_QUALITY, MAX_QUALITY]`.
    pub quality: i64,
    /// Whether this peer came from the hardcoded bootstrap list.
    pub is_bootstrap: bool,
}

impl PeerRecord {
    /// Create a fresh record for a newly discovered peer.
    pub fn new(ip_address: Option<std::net::IpAddr>, asn: Option<u32>) -> Self {
        let now = Instant::now();
        Self {
            ip_address,
            asn,
            first_seen: now,
            last_seen: now,
            quality: INITIAL_QUALITY,
            is_bootstrap: false,
        }
    }

    /// Record a successful interaction: bump quality and refresh `last_seen`.
    pub fn record_success(&mut self) {
        self.last_seen = Instant::now();
        self.quality = (self.quality + QUALITY_SUCCESS_BONUS).min(MAX_QUALITY);
    }

    /// Record a failed interaction: penalize quality.
    pub fn record_failure(&mut self) {
        self.quality = (self.quality - QUALITY_FAILURE_PENALTY).max(MIN_QUALITY);
    }

    /// The /16 IPv4 prefix for this peer, if its address is known and IPv4.
    fn prefix_16(&self) -> Option<String> {
        match self.ip_address {
            Some(std::net::IpAddr::V4(v4)) => {
                let o = v4.octets();
                Some(format!("{}.{}", o[0], o[1]))
            }
            _ => None,
        }
    }

    /// Whether this peer hasn't been seen in longer than `timeout`.
    pub fn is_dead(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks known peers and enforces eclipse-resistant diversity limits.
pub struct PeerDiversityManager {
    max_per_prefix: usize,
    max_per_asn: usize,
}

impl PeerDiversityManager {
    /// Create a manager with the given per-prefix and per-ASN caps.
    pub fn new(max_per_prefix: usize, max_per_asn: usize) -> Self {
        Self {
            max_per_prefix,
            max_per_asn,
        }
    }

    /// A diversity score in `[0, 100]` measuring how spread out `peers` are
    /// across distinct /16 prefixes, weighted toward prefix diversity.
    pub fn diversity_score(peers: &[&PeerRecord]) -> f64 {
        if peers.is_empty() {
            return 0.0;
        }
        let total = peers.len() as f64;
        let unique_prefixes: HashSet<_> = peers.iter().filter_map(|p| p.prefix_16()).collect();
        let unique_asns: HashSet<_> = peers.iter().filter_map(|p| p.asn).collect();

        let prefix_ratio = unique_prefixes.len() as f64 / total;
        let asn_ratio = unique_asns.len() as f64 / total;
        ((prefix_ratio * 0.7 + asn_ratio * 0.3) * 100.0).min(100.0)
    }

    /// Whether the connected set has enough unique prefixes/ASNs to be
    /// considered resistant to an eclipse attempt.
    pub fn is_healthy(peers: &[&PeerRecord]) -> bool {
        let unique_prefixes: HashSet<_> = peers.iter().filter_map(|p| p.prefix_16()).collect();
        let unique_asns: HashSet<_> = peers.iter().filter_map(|p| p.asn).collect();
        unique_prefixes.len() >= MIN_HEALTHY_PREFIXES && unique_asns.len() >= MIN_HEALTHY_ASNS
    }

    /// Whether accepting a peer with this prefix/ASN would exceed the
    /// configured per-prefix / per-ASN caps given the current connected set.
    pub fn would_exceed_limits(
        &self,
        peer: &PeerRecord,
        connected: &[&PeerRecord],
    ) -> bool {
        if let Some(prefix) = peer.prefix_16() {
            let count = connected
                .iter()
                .filter(|p| p.prefix_16().as_deref() == Some(prefix.as_str()))
                .count();
            if count >= self.max_per_prefix {
                return true;
            }
        }
        if let Some(asn) = peer.asn {
            let count = connected.iter().filter(|p| p.asn == Some(asn)).count();
            if count >= self.max_per_asn {
                return true;
            }
        }
        false
    }

    /// Greedily select up to `count` peers from `candidates`, preferring
    /// peers with unused /16 prefixes, then falling back to the
    /// highest-quality remaining peer once every prefix has one pick.
    ///
    /// `candidates` is keyed by an opaque id (the caller's `PeerId`) so the
    /// selection can be applied back against the caller's peer table.
    pub fn select_diverse<'a>(
        &self,
        candidates: &'a HashMap<String, PeerRecord>,
        count: usize,
    ) -> Vec<&'a str> {
        if candidates.len() <= count {
            return candidates.keys().map(String::as_str).collect();
        }

        let mut ranked: Vec<(&str, &PeerRecord)> =
            candidates.iter().map(|(id, rec)| (id.as_str(), rec)).collect();
        ranked.sort_by(|a, b| b.1.quality.cmp(&a.1.quality));

        let mut selected = Vec::with_capacity(count);
        let mut used_prefixes: HashSet<String> = HashSet::new();
        let mut remaining = ranked;

        while selected.len() < count && !remaining.is_empty() {
            let pick_idx = remaining.iter().position(|(_, rec)| {
                rec.prefix_16()
                    .map(|p| !used_prefixes.contains(&p))
                    .unwrap_or(true)
            });

            let idx = pick_idx.unwrap_or(0);
            let (id, rec) = remaining.remove(idx);
            if let Some(prefix) = rec.prefix_16() {
                used_prefixes.insert(prefix);
            }
            selected.push(id);
        }

        selected
    }
}
