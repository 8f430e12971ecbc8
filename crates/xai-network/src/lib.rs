//! # xai-network — P2P layer using libp2p.
//!
//! Provides Gossipsub-based block and transaction propagation, Kademlia DHT
//! peer routing, Noise encryption over TCP/Yamux, optional mDNS for local
//! peer discovery, and eclipse-resistant bootstrap/peer-selection policy on
//! top of it.
//!
//! Every gossip message travels inside a signed [`protocol::Envelope`]:
//! the sender's long-lived secp256k1 identity signs a digest of the
//! payload, and receivers reject anything with a stale timestamp, wrong
//! protocol version, or bad signature before the payload is ever
//! interpreted.
//!
//! The main entry point is [`NetworkNode::start`], which spawns a background
//! swarm task and returns a handle implementing [`xai_core::traits::NetworkService`].

pub mod behaviour;
pub mod config;
pub mod discovery;
pub mod peer_scoring;
pub mod protocol;
pub mod rate_limiter;
pub mod service;
pub mod sync;

pub use config::NetworkConfig;
pub use discovery::{BootstrapSeeds, PeerDiversityManager, PeerRecord};
pub use peer_scoring::{
    BAN_DURATION, DedupCache, DISCONNECT_THRESHOLD, INITIAL_SCORE, PeerScore, PeerScoreBoard,
    ReplayGuard,
};
pub use protocol::{
    BLOCKS_TOPIC, CHECKPOINTS_TOPIC, CheckpointSummary, Envelope, NetworkMessage,
    REQ_RESP_PROTOCOL, TXS_TOPIC, XaiCodec, XaiRequest, XaiResponse,
};
pub use rate_limiter::{BandwidthLimiter, PeerRateLimits, RateLimiter};
pub use service::{NetworkEvent, NetworkNode, StorageQuery};
pub use sync::{SyncAction, SyncManager, SyncState};
