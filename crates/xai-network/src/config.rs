//! Network configuration for the XAI P2P layer.

use xai_core::address::Network;
use xai_core::constants::{
    DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_MAX_CHECKPOINTS, DEFAULT_MEMPOOL_TTL_SECS,
    DEFAULT_P2P_PORT,
};
use std::path::PathBuf;
use std::time::Duration;

/// Default maximum peers accepted per /16 IP prefix (eclipse resistance).
pub const DEFAULT_MAX_PEERS_PER_PREFIX: usize = 8;
/// Default maximum peers accepted per ASN (eclipse resistance).
pub const DEFAULT_MAX_PEERS_PER_ASN: usize = 16;
/// Minimum unique /16 prefixes required among connected peers to be "healthy".
pub const MIN_HEALTHY_PREFIXES: usize = 5;
/// Minimum unique ASNs required among connected peers to be "healthy".
pub const MIN_HEALTHY_ASNS: usize = 5;
/// Default requests-per-minute rate limit per peer, per request kind.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: usize = 30;
/// How often the node samples peers for peer exchange (PEX).
pub const PEER_EXCHANGE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Number of peers sampled per peer-exchange round.
pub const PEER_EXCHANGE_SAMPLE_SIZE: usize = 5;
/// Peers unresponsive for longer than this are dropped.
pub const PEER_UNRESPONSIVE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Idle connections are closed after this much inactivity.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Configuration for the P2P network node.
///
/// Loaded via the `config` crate (defaults → TOML file → environment
/// overrides) with `clap` CLI overrides layered on top in the `xai-node`
/// binary; this struct is the in-process `Default`-backed settings object
/// those layers populate.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Which network this node participates in (selects prefix, seeds, genesis).
    pub network: Network,
    /// IP address to listen on.
    pub listen_addr: String,
    /// TCP port to listen on.
    pub listen_port: u16,
    /// Bootstrap peer multiaddresses to connect on startup.
    pub bootstrap_peers: Vec<String>,
    /// Enable mDNS peer discovery (useful for local/testnet).
    pub enable_mdns: bool,
    /// Gossipsub heartbeat interval.
    pub gossipsub_heartbeat: Duration,
    /// Maximum number of connected peers.
    pub max_peers: usize,
    /// Maximum peers accepted per /16 IP prefix.
    pub max_peers_per_prefix: usize,
    /// Maximum peers accepted per ASN.
    pub max_peers_per_asn: usize,
    /// Timeout for outbound dial attempts.
    pub dial_timeout: Duration,
    /// Idle connections are closed after this much inactivity.
    pub idle_timeout: Duration,
    /// Checkpoint creation interval, in blocks.
    pub checkpoint_interval: u64,
    /// Maximum retained checkpoints before the oldest is pruned.
    pub max_checkpoints: usize,
    /// Mempool entry time-to-live, in seconds.
    pub mempool_ttl_seconds: u64,
    /// Per-peer, per-request-kind rate limit (requests per minute).
    pub p2p_rate_limit_per_minute: usize,
    /// Optional shared secret appended to outbound peer requests.
    pub peer_api_key: Option<String>,
    /// Path to the libp2p transport identity key file (Ed25519, used for
    /// connection authentication and the peer ID). `None` generates an
    /// ephemeral identity that changes every restart.
    pub node_key_path: Option<PathBuf>,
    /// Path to the long-lived secp256k1 gossip-envelope signing key file.
    /// Distinct from `node_key_path`: this key signs application-layer
    /// envelopes, not the transport connection. `None` generates an
    /// ephemeral identity.
    pub identity_key_path: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            listen_addr: "0.0.0.0".to_string(),
            listen_port: DEFAULT_P2P_PORT,
            bootstrap_peers: Vec::new(),
            enable_mdns: true,
            gossipsub_heartbeat: Duration::from_secs(1),
            max_peers: 50,
            max_peers_per_prefix: DEFAULT_MAX_PEERS_PER_PREFIX,
            max_peers_per_asn: DEFAULT_MAX_PEERS_PER_ASN,
            dial_timeout: Duration::from_secs(10),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
            mempool_ttl_seconds: DEFAULT_MEMPOOL_TTL_SECS,
            p2p_rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            peer_api_key: None,
            node_key_path: None,
            identity_key_path: None,
        }
    }
}

impl NetworkConfig {
    /// Configuration preset for testnet: mDNS enabled, no bootstrap peers.
    pub fn testnet() -> Self {
        Self {
            network: Network::Testnet,
            enable_mdns: true,
            ..Self::default()
        }
    }

    /// Configuration preset for devnet: mDNS enabled, relaxed peer limits for
    /// local multi-node development clusters.
    pub fn devnet() -> Self {
        Self {
            network: Network::Testnet,
            enable_mdns: true,
            max_peers: 10,
            ..Self::default()
        }
    }

    /// Configuration preset for mainnet: mDNS disabled, well-known bootstrap peers.
    pub fn mainnet() -> Self {
        Self {
            network: Network::Mainnet,
            enable_mdns: false,
            ..Self::default()
        }
    }

    /// Build the libp2p multiaddr string for the configured listen address and port.
    pub fn listen_multiaddr(&self) -> String {
        format!("/ip4/{}/tcp/{}", self.listen_addr, self.listen_port)
    }
}
