//! Network node implementing the [`NetworkService`] trait.
//!
//! Uses a command-channel architecture: the [`NetworkNode`] sends commands
//! over an mpsc channel to a background swarm task running on tokio.
//! This bridges the synchronous [`NetworkService`] trait with async libp2p.
//!
//! Two distinct identities are in play: the libp2p transport identity
//! (Ed25519, authenticates the Noise connection and derives the `PeerId`)
//! and the node's long-lived secp256k1 gossip identity (signs every
//! application-layer [`Envelope`]). They are deliberately not the same key —
//! swapping transport implementations should never invalidate gossip
//! history signed by the node.

use crate::behaviour::{self, XaiBehaviour, PROTOCOL_VERSION};
use crate::config::NetworkConfig;
use crate::peer_scoring::{DedupCache, ReplayGuard};
use crate::protocol::{
    Envelope, NetworkMessage, XaiCodec, XaiRequest, XaiResponse, BLOCKS_TOPIC,
    CHECKPOINTS_TOPIC, REQ_RESP_PROTOCOL, TXS_TOPIC,
};
use libp2p::gossipsub::{self, IdentTopic};
use libp2p::identity::Keypair;
use libp2p::kad;
use libp2p::multiaddr::Protocol;
use libp2p::request_response;
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, mdns, Multiaddr, PeerId, StreamProtocol, SwarmBuilder};
use xai_core::crypto::KeyPair as IdentityKeyPair;
use xai_core::error::NetworkError;
use xai_core::traits::NetworkService;
use xai_core::types::{Block, Hash256, Transaction};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// A storage query forwarded from a peer's request-response request.
///
/// The node processes this query against its storage and sends the response
/// back via [`Command::SendResponse`].
pub struct StorageQuery {
    /// The request from the peer.
    pub request: XaiRequest,
    /// The peer that sent the request.
    pub peer: PeerId,
    /// The libp2p response channel to send the response back.
    pub response_channel: request_response::ResponseChannel<XaiResponse>,
}

/// Commands sent from [`NetworkNode`] to the background swarm task.
#[derive(Debug)]
enum Command {
    /// Publish a message to a gossipsub topic.
    Publish { topic: String, data: Vec<u8> },
    /// Dial a remote peer address (used by connect_peer).
    Dial(Multiaddr),
    /// Send a request-response request to a specific peer.
    SendRequest { peer: PeerId, request: XaiRequest },
    /// Send a response back to a peer via their response channel.
    SendResponse {
        channel: request_response::ResponseChannel<XaiResponse>,
        response: XaiResponse,
    },
    /// Shut down the swarm event loop.
    Shutdown,
}

/// Events emitted by the network layer for consumption by higher layers.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A peer's handshake, announcing its chain height and genesis hash.
    HelloReceived {
        peer: PeerId,
        chain_height: u64,
        genesis_hash: Hash256,
        network: String,
    },
    /// A peer announced known inventory (transaction/block ids).
    InvReceived {
        peer: PeerId,
        transactions: Vec<Hash256>,
        blocks: Vec<Hash256>,
    },
    /// A peer requested specific inventory items by id.
    GetDataReceived {
        peer: PeerId,
        transactions: Vec<Hash256>,
        blocks: Vec<Hash256>,
    },
    /// A new block was received from a peer.
    BlockReceived(Block),
    /// A new transaction was received from a peer.
    TransactionReceived(Transaction),
    /// A peer requested a block by hash.
    BlockRequested(Hash256),
    /// A peer requested headers from locator hashes.
    HeadersRequested(Vec<Hash256>),
    /// A peer asked for our known peer addresses.
    PeersRequested(PeerId),
    /// A peer sent us a list of peer addresses.
    PeersReceived(Vec<String>),
    /// A peer requested our checkpoint summary at a height.
    CheckpointRequested { peer: PeerId, height: u64 },
    /// A peer sent us a checkpoint summary.
    CheckpointAnnounced {
        peer: PeerId,
        height: u64,
        block_hash: Hash256,
        checkpoint_hash: Hash256,
        merkle_root: Hash256,
        total_supply: u64,
    },
    /// A new peer connected.
    PeerConnected(PeerId),
    /// A peer disconnected.
    PeerDisconnected(PeerId),
    /// A gossip envelope from a peer failed verification (bad signature,
    /// version mismatch, or excess clock skew) and was dropped.
    EnvelopeRejected { peer: PeerId, reason: String },
    /// A response was received to one of our requests.
    RequestResponse {
        /// The peer that sent the response.
        peer: PeerId,
        /// The response payload.
        response: XaiResponse,
    },
}

/// Shared atomic state between the [`NetworkNode`] handle and the swarm task.
struct SharedState {
    /// Number of currently connected peers (approximate).
    peer_count: AtomicUsize,
    /// Whether the swarm event loop is still running.
    running: AtomicBool,
    /// Monotonic counter used to assign outbound envelope nonces.
    next_nonce: AtomicU64,
    /// Per-sender envelope nonce tracking, rejects replayed gossip.
    replay_guard: Mutex<ReplayGuard>,
    /// Recently-seen inventory ids, to avoid re-dispatching the same
    /// transaction/block gossiped by multiple peers within the TTL window.
    dedup: DedupCache,
}

/// P2P network node providing the [`NetworkService`] interface.
///
/// Created via [`NetworkNode::start`], which spawns a background tokio task
/// running the libp2p swarm event loop. Methods on this struct send commands
/// to that task over an unbounded mpsc channel.
pub struct NetworkNode {
    command_tx: mpsc::UnboundedSender<Command>,
    state: Arc<SharedState>,
    local_peer_id: PeerId,
    identity: IdentityKeyPair,
}

impl std::fmt::Debug for NetworkNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkNode")
            .field("peer_id", &self.local_peer_id)
            .field("peer_count", &self.state.peer_count.load(Ordering::Relaxed))
            .field("running", &self.state.running.load(Ordering::Relaxed))
            .finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Load an Ed25519 transport keypair from a file, or generate and save a new one.
///
/// The file stores the raw 32-byte Ed25519 secret key (seed). On load, the
/// keypair is reconstructed deterministically from that seed, so the peer ID
/// remains stable across node restarts. If the file does not exist, a fresh
/// keypair is generated and saved with mode `0o600` on Unix.
fn load_or_generate_keypair(path: &std::path::Path) -> Result<Keypair, String> {
    use std::io::{Read, Write};

    if path.exists() {
        let mut file = std::fs::File::open(path)
            .map_err(|e| format!("failed to open node key file '{}': {e}", path.display()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| format!("failed to read node key file '{}': {e}", path.display()))?;
        let keypair = Keypair::ed25519_from_bytes(bytes)
            .map_err(|e| format!("invalid node key in '{}': {e}", path.display()))?;
        info!(path = %path.display(), "loaded existing transport identity key");
        Ok(keypair)
    } else {
        let keypair = Keypair::generate_ed25519();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create directory '{}': {e}", parent.display()))?;
        }

        let ed_keypair = keypair
            .clone()
            .try_into_ed25519()
            .map_err(|e| format!("keypair is not Ed25519: {e}"))?;
        let secret_bytes: Vec<u8> = ed_keypair.secret().as_ref().to_vec();

        let mut file = std::fs::File::create(path)
            .map_err(|e| format!("failed to create node key file '{}': {e}", path.display()))?;
        file.write_all(&secret_bytes)
            .map_err(|e| format!("failed to write node key file '{}': {e}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| format!("failed to set permissions on '{}': {e}", path.display()))?;
        }

        info!(path = %path.display(), "generated new transport identity key");
        Ok(keypair)
    }
}

/// Load the node's secp256k1 gossip-signing identity from a file, or
/// generate and save a new one. Mirrors [`load_or_generate_keypair`]'s
/// file format and permission handling, but for the application-layer key.
fn load_or_generate_identity(path: &std::path::Path) -> Result<IdentityKeyPair, String> {
    use std::io::{Read, Write};

    if path.exists() {
        let mut file = std::fs::File::open(path)
            .map_err(|e| format!("failed to open identity key file '{}': {e}", path.display()))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| format!("failed to read identity key file '{}': {e}", path.display()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| format!("invalid identity key length in '{}'", path.display()))?;
        info!(path = %path.display(), "loaded existing gossip identity key");
        Ok(IdentityKeyPair::from_secret_bytes(secret))
    } else {
        let keypair = IdentityKeyPair::generate();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create directory '{}': {e}", parent.display()))?;
        }

        let mut file = std::fs::File::create(path)
            .map_err(|e| format!("failed to create identity key file '{}': {e}", path.display()))?;
        file.write_all(&keypair.secret_bytes())
            .map_err(|e| format!("failed to write identity key file '{}': {e}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| format!("failed to set permissions on '{}': {e}", path.display()))?;
        }

        info!(path = %path.display(), "generated new gossip identity key");
        Ok(keypair)
    }
}

impl NetworkNode {
    /// Start the network node, returning a handle, event receiver, and query receiver.
    ///
    /// Spawns a background tokio task that runs the libp2p swarm event loop.
    /// The returned [`broadcast::Receiver`] receives [`NetworkEvent`]s from peers.
    /// The returned [`mpsc::UnboundedReceiver<StorageQuery>`] receives requests
    /// from peers that need to be answered from storage.
    pub async fn start(
        config: NetworkConfig,
    ) -> Result<(Self, broadcast::Receiver<NetworkEvent>, mpsc::UnboundedReceiver<StorageQuery>), String> {
        let keypair = match &config.node_key_path {
            Some(path) => load_or_generate_keypair(path)?,
            None => Keypair::generate_ed25519(),
        };
        let identity = match &config.identity_key_path {
            Some(path) => load_or_generate_identity(path)?,
            None => IdentityKeyPair::generate(),
        };
        let local_peer_id = PeerId::from(keypair.public());
        info!(%local_peer_id, "starting network node");

        let gossipsub = behaviour::build_gossipsub(config.gossipsub_heartbeat)?;

        let kad_config = kad::Config::new(
            StreamProtocol::try_from_owned(
                String::from_utf8_lossy(behaviour::KAD_PROTOCOL).into_owned(),
            )
            .map_err(|e| format!("invalid kad protocol: {e}"))?,
        );
        let store = kad::store::MemoryStore::new(local_peer_id);
        let kademlia = kad::Behaviour::with_config(local_peer_id, store, kad_config);

        let identify = identify::Behaviour::new(identify::Config::new(
            PROTOCOL_VERSION.to_string(),
            keypair.public(),
        ));

        let mdns = if config.enable_mdns {
            Some(
                mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)
                    .map_err(|e| format!("mDNS error: {e}"))?,
            )
        } else {
            None
        };

        let req_resp_config = request_response::Config::default()
            .with_request_timeout(Duration::from_secs(30));
        let req_resp = request_response::Behaviour::with_codec(
            XaiCodec,
            [(StreamProtocol::new(REQ_RESP_PROTOCOL), request_response::ProtocolSupport::Full)],
            req_resp_config,
        );

        let behaviour = XaiBehaviour {
            gossipsub,
            kademlia,
            identify,
            mdns: mdns.into(),
            request_response: req_resp,
        };

        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                libp2p::tcp::Config::default(),
                libp2p::noise::Config::new,
                libp2p::yamux::Config::default,
            )
            .map_err(|e| format!("TCP transport error: {e}"))?
            .with_behaviour(|_| Ok(behaviour))
            .map_err(|e| format!("behaviour error: {e}"))?
            .build();

        let blocks_topic = IdentTopic::new(BLOCKS_TOPIC);
        let txs_topic = IdentTopic::new(TXS_TOPIC);
        let checkpoints_topic = IdentTopic::new(CHECKPOINTS_TOPIC);
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&blocks_topic)
            .map_err(|e| format!("subscribe blocks: {e}"))?;
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&txs_topic)
            .map_err(|e| format!("subscribe txs: {e}"))?;
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&checkpoints_topic)
            .map_err(|e| format!("subscribe checkpoints: {e}"))?;

        let listen_addr: Multiaddr = config
            .listen_multiaddr()
            .parse()
            .map_err(|e| format!("invalid listen addr: {e}"))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| format!("listen error: {e}"))?;

        for peer_addr in &config.bootstrap_peers {
            if let Ok(addr) = peer_addr.parse::<Multiaddr>() {
                if let Some(Protocol::P2p(peer_id)) = addr.iter().last() {
                    swarm
                        .behaviour_mut()
                        .kademlia
                        .add_address(&peer_id, addr.clone());
                }
                let _ = swarm.dial(addr);
            }
        }

        if !config.bootstrap_peers.is_empty() {
            let _ = swarm.behaviour_mut().kademlia.bootstrap();
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = broadcast::channel(256);
        let (query_tx, query_rx) = mpsc::unbounded_channel();

        let state = Arc::new(SharedState {
            peer_count: AtomicUsize::new(0),
            running: AtomicBool::new(true),
            next_nonce: AtomicU64::new(1),
            replay_guard: Mutex::new(ReplayGuard::new()),
            dedup: DedupCache::new(),
        });

        let state_clone = Arc::clone(&state);
        tokio::spawn(async move {
            swarm_event_loop(swarm, command_rx, event_tx, query_tx, state_clone).await;
        });

        let node = NetworkNode {
            command_tx,
            state,
            local_peer_id,
            identity,
        };

        Ok((node, event_rx, query_rx))
    }

    /// The local peer ID assigned to this node.
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    /// Whether the background swarm event loop is still running.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Relaxed)
    }

    /// Whether this node has any connected peers.
    pub fn is_connected(&self) -> bool {
        self.state.peer_count.load(Ordering::Relaxed) > 0
    }

    /// Request the swarm to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    /// Dial a remote peer by multiaddr.
    pub fn connect_peer(&self, addr: Multiaddr) -> Result<(), NetworkError> {
        self.command_tx
            .send(Command::Dial(addr))
            .map_err(|_| NetworkError::PeerDisconnected("swarm task stopped".into()))
    }

    /// Send a request-response request to a specific peer.
    pub fn send_request(&self, peer: PeerId, request: XaiRequest) -> Result<(), NetworkError> {
        self.command_tx
            .send(Command::SendRequest { peer, request })
            .map_err(|_| NetworkError::PeerDisconnected("swarm task stopped".into()))
    }

    /// Send a response back to a peer via their response channel.
    pub fn send_response(
        &self,
        channel: request_response::ResponseChannel<XaiResponse>,
        response: XaiResponse,
    ) -> Result<(), NetworkError> {
        self.command_tx
            .send(Command::SendResponse { channel, response })
            .map_err(|_| NetworkError::PeerDisconnected("swarm task stopped".into()))
    }

    /// Sign `payload` into an envelope and publish it to `topic`.
    fn publish_envelope(&self, topic: &str, payload: NetworkMessage) -> Result<(), NetworkError> {
        let nonce = self.state.next_nonce.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::sign(&self.identity, nonce, now_secs(), payload)?;
        let data = envelope.encode()?;
        self.command_tx
            .send(Command::Publish {
                topic: topic.to_string(),
                data,
            })
            .map_err(|_| NetworkError::PeerDisconnected("swarm task stopped".into()))
    }
}

impl NetworkService for NetworkNode {
    /// Broadcast a validated block to all connected peers.
    fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError> {
        self.publish_envelope(BLOCKS_TOPIC, NetworkMessage::NewBlock(block.clone()))
    }

    /// Broadcast a validated transaction to all connected peers.
    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError> {
        self.publish_envelope(TXS_TOPIC, NetworkMessage::NewTransaction(tx.clone()))
    }

    /// Number of currently connected peers.
    fn peer_count(&self) -> usize {
        self.state.peer_count.load(Ordering::Relaxed)
    }

    /// Request a specific block from peers by hash.
    fn request_block(&self, hash: &Hash256) -> Result<(), NetworkError> {
        self.publish_envelope(BLOCKS_TOPIC, NetworkMessage::GetBlock(*hash))
    }

    /// Request block headers starting from the given locator hashes.
    fn request_headers(&self, locator: &[Hash256]) -> Result<(), NetworkError> {
        self.publish_envelope(TXS_TOPIC, NetworkMessage::GetHeaders(locator.to_vec()))
    }
}

/// Background task running the libp2p swarm event loop.
///
/// Receives commands from [`NetworkNode`] and emits [`NetworkEvent`]s
/// to subscribers via the broadcast channel. Forwards request-response
/// requests to the node via the query channel for processing.
async fn swarm_event_loop(
    mut swarm: libp2p::Swarm<XaiBehaviour>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: broadcast::Sender<NetworkEvent>,
    query_tx: mpsc::UnboundedSender<StorageQuery>,
    state: Arc<SharedState>,
) {
    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Publish { topic, data }) => {
                        let topic = IdentTopic::new(topic);
                        if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic, data) {
                            debug!("gossipsub publish error: {e}");
                        }
                    }
                    Some(Command::Dial(addr)) => {
                        if let Err(e) = swarm.dial(addr) {
                            debug!("dial error: {e}");
                        }
                    }
                    Some(Command::SendRequest { peer, request }) => {
                        let _ = swarm.behaviour_mut().request_response.send_request(&peer, request);
                    }
                    Some(Command::SendResponse { channel, response }) => {
                        let _ = swarm.behaviour_mut().request_response.send_response(channel, response);
                    }
                    Some(Command::Shutdown) | None => {
                        info!("shutting down swarm event loop");
                        state.running.store(false, Ordering::Relaxed);
                        break;
                    }
                }
            }
            event = swarm.next() => {
                let Some(event) = event else {
                    state.running.store(false, Ordering::Relaxed);
                    break;
                };

                match event {
                    SwarmEvent::Behaviour(behaviour::XaiBehaviourEvent::Gossipsub(
                        gossipsub::Event::Message { message, propagation_source, .. },
                    )) => {
                        let Some(envelope) = Envelope::decode(&message.data) else {
                            debug!(peer = %propagation_source, "failed to decode gossip envelope");
                            continue;
                        };
                        match envelope.verify(now_secs()) {
                            Ok(_) => {
                                let accepted = state
                                    .replay_guard
                                    .lock()
                                    .unwrap()
                                    .check_and_update(&envelope.sender_pubkey, envelope.nonce);
                                if !accepted {
                                    debug!(peer = %propagation_source, "dropping replayed envelope");
                                    continue;
                                }

                                let inventory_id = match &envelope.payload {
                                    NetworkMessage::NewTransaction(tx) => {
                                        tx.txid().ok().map(|id| ("tx", id.to_string()))
                                    }
                                    NetworkMessage::NewBlock(block) => {
                                        Some(("block", block.header.hash().to_string()))
                                    }
                                    _ => None,
                                };
                                if let Some((kind, id)) = inventory_id {
                                    if !state.dedup.insert_if_new(kind, &id) {
                                        debug!(peer = %propagation_source, kind, "dropping duplicate gossip inventory");
                                        continue;
                                    }
                                }

                                let event = match envelope.payload {
                                    NetworkMessage::Hello { chain_height, genesis_hash, network, version: _ } => {
                                        NetworkEvent::HelloReceived { peer: propagation_source, chain_height, genesis_hash, network }
                                    }
                                    NetworkMessage::Inv { transactions, blocks } => {
                                        NetworkEvent::InvReceived { peer: propagation_source, transactions, blocks }
                                    }
                                    NetworkMessage::GetData { transactions, blocks } => {
                                        NetworkEvent::GetDataReceived { peer: propagation_source, transactions, blocks }
                                    }
                                    NetworkMessage::NewBlock(block) => NetworkEvent::BlockReceived(block),
                                    NetworkMessage::NewTransaction(tx) => NetworkEvent::TransactionReceived(tx),
                                    NetworkMessage::GetBlock(hash) => NetworkEvent::BlockRequested(hash),
                                    NetworkMessage::GetHeaders(locator) => NetworkEvent::HeadersRequested(locator),
                                    NetworkMessage::GetPeers => NetworkEvent::PeersRequested(propagation_source),
                                    NetworkMessage::Peers(peers) => NetworkEvent::PeersReceived(peers),
                                    NetworkMessage::CheckpointRequest { height } => {
                                        NetworkEvent::CheckpointRequested { peer: propagation_source, height }
                                    }
                                    NetworkMessage::CheckpointResponse { height, block_hash, checkpoint_hash, merkle_root, total_supply } => {
                                        NetworkEvent::CheckpointAnnounced { peer: propagation_source, height, block_hash, checkpoint_hash, merkle_root, total_supply }
                                    }
                                };
                                let _ = event_tx.send(event);
                            }
                            Err(e) => {
                                warn!(peer = %propagation_source, error = %e, "gossip envelope rejected");
                                let _ = event_tx.send(NetworkEvent::EnvelopeRejected {
                                    peer: propagation_source,
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }

                    SwarmEvent::Behaviour(behaviour::XaiBehaviourEvent::RequestResponse(event)) => {
                        match event {
                            request_response::Event::Message { peer, message } => {
                                match message {
                                    request_response::Message::Request { request, channel, .. } => {
                                        debug!(%peer, "received request-response request");
                                        let query = StorageQuery {
                                            request,
                                            peer,
                                            response_channel: channel,
                                        };
                                        if let Err(e) = query_tx.send(query) {
                                            debug!("failed to send storage query: {e}");
                                        }
                                    }
                                    request_response::Message::Response { response, .. } => {
                                        debug!(%peer, "received request-response response");
                                        let _ = event_tx.send(NetworkEvent::RequestResponse {
                                            peer,
                                            response,
                                        });
                                    }
                                }
                            }
                            request_response::Event::OutboundFailure { peer, error, .. } => {
                                warn!(%peer, %error, "outbound request failed");
                            }
                            request_response::Event::InboundFailure { peer, error, .. } => {
                                warn!(%peer, %error, "inbound request failed");
                            }
                            request_response::Event::ResponseSent { .. } => {}
                        }
                    }

                    SwarmEvent::Behaviour(behaviour::XaiBehaviourEvent::Mdns(
                        mdns::Event::Discovered(peers),
                    )) => {
                        for (peer_id, addr) in peers {
                            debug!(%peer_id, %addr, "mDNS discovered peer");
                            swarm
                                .behaviour_mut()
                                .kademlia
                                .add_address(&peer_id, addr);
                        }
                    }

                    SwarmEvent::Behaviour(behaviour::XaiBehaviourEvent::Mdns(
                        mdns::Event::Expired(peers),
                    )) => {
                        for (peer_id, addr) in peers {
                            debug!(%peer_id, %addr, "mDNS peer expired");
                        }
                    }

                    SwarmEvent::Behaviour(behaviour::XaiBehaviourEvent::Identify(
                        identify::Event::Received { peer_id, info, .. },
                    )) => {
                        debug!(%peer_id, "identify received");
                        for addr in info.listen_addrs {
                            swarm
                                .behaviour_mut()
                                .kademlia
                                .add_address(&peer_id, addr);
                        }
                    }

                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        let count = state.peer_count.fetch_add(1, Ordering::Relaxed) + 1;
                        info!(%peer_id, count, "peer connected");
                        let _ = event_tx.send(NetworkEvent::PeerConnected(peer_id));
                    }

                    SwarmEvent::ConnectionClosed { peer_id, .. } => {
                        let prev = state.peer_count.load(Ordering::Relaxed);
                        if prev > 0 {
                            state.peer_count.fetch_sub(1, Ordering::Relaxed);
                        }
                        let count = state.peer_count.load(Ordering::Relaxed);
                        info!(%peer_id, count, "peer disconnected");
                        let _ = event_tx.send(NetworkEvent::PeerDisconnected(peer_id));
                    }

                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!(%address, "listening on");
                    }

                    SwarmEvent::ListenerError { error, .. } => {
                        error!(%error, "listener error");
                    }

                    _ => {}
                }
            }
        }
    }
}

use libp2p::futures::StreamExt;
