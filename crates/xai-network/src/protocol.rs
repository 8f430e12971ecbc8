//! Wire message types for the XAI P2P protocol.
//!
//! Gossip messages are wrapped in a signed [`Envelope`]: `{sender_pubkey,
//! version, nonce, timestamp, payload, signature}`, signed with the node's
//! long-lived secp256k1 identity key over the canonical encoding of every
//! other field. Framing is MAGIC_BYTES prefix + bincode payload, matching the
//! rest of this workspace's wire and on-disk formats — never JSON for
//! consensus-adjacent data.
//!
//! Replay protection (per-sender nonce dedup) and the 2-hour timestamp-skew
//! window are enforced by [`Envelope::verify`]; the bounded recently-seen-nonce
//! cache itself lives in the peer-scoring layer (`peer_scoring`), since it
//! needs to be shared across every envelope a peer sends, not recomputed per
//! message.

use xai_core::constants::{MAGIC_BYTES, MAX_BLOCK_SIZE, MAX_LOCATOR_SIZE};
use xai_core::crypto::{KeyPair, PublicKey};
use xai_core::error::NetworkError;
use xai_core::types::{Block, BlockHeader, Hash256, Transaction};

/// Gossipsub topic for block propagation.
pub const BLOCKS_TOPIC: &str = "/xai/blocks/1";

/// Gossipsub topic for transaction propagation.
pub const TXS_TOPIC: &str = "/xai/txs/1";

/// Gossipsub topic for checkpoint announcements and peer-consensus queries.
pub const CHECKPOINTS_TOPIC: &str = "/xai/checkpoints/1";

/// Maximum wire message size (block size + overhead for framing).
pub const MAX_MESSAGE_SIZE: usize = MAX_BLOCK_SIZE + 1024;

/// Maximum allowed clock skew between an envelope's timestamp and local time.
pub const MAX_ENVELOPE_SKEW_SECS: u64 = 7_200;

/// The protocol version string every envelope must carry to be accepted.
pub const PROTOCOL_VERSION: &str = "xai/1";

/// A gossip payload exchanged between XAI peers.
///
/// Mirrors the protocol's payload catalogue: `hello`, `inv`, `getdata`,
/// `transaction`, `block`, `getpeers`, `peers`, `checkpoint_request`,
/// `checkpoint_response`. `GetBlock`/`GetHeaders` additionally back the
/// point-to-point request-response protocol (see [`XaiRequest`]).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub enum NetworkMessage {
    /// Handshake announcing the sender's chain state.
    Hello {
        chain_height: u64,
        genesis_hash: Hash256,
        network: String,
        version: String,
    },
    /// Announce newly known transaction/block ids without sending full bodies.
    Inv {
        transactions: Vec<Hash256>,
        blocks: Vec<Hash256>,
    },
    /// Request the full bodies of specific transactions/blocks.
    GetData {
        transactions: Vec<Hash256>,
        blocks: Vec<Hash256>,
    },
    /// A new validated transaction to propagate.
    NewTransaction(Transaction),
    /// A new validated block to propagate.
    NewBlock(Block),
    /// Request the sender's known peer addresses.
    GetPeers,
    /// A list of peer addresses (`host:port` strings).
    Peers(Vec<String>),
    /// Request a specific block by hash (point-to-point).
    GetBlock(Hash256),
    /// Request block headers starting from locator hashes (point-to-point).
    GetHeaders(Vec<Hash256>),
    /// Request a peer's checkpoint summary at a given height.
    CheckpointRequest { height: u64 },
    /// A peer's checkpoint summary, for peer-consensus verification.
    CheckpointResponse {
        height: u64,
        block_hash: Hash256,
        checkpoint_hash: Hash256,
        merkle_root: Hash256,
        total_supply: u64,
    },
}

impl NetworkMessage {
    /// Validate message-specific constraints before encoding or after decoding.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if let NetworkMessage::GetHeaders(locator) = self {
            if locator.len() > MAX_LOCATOR_SIZE {
                return Err(NetworkError::ProtocolViolation(format!(
                    "locator too large: {} > {MAX_LOCATOR_SIZE}",
                    locator.len()
                )));
            }
        }
        Ok(())
    }

    /// Returns the gossipsub topic this message should be published to.
    pub fn topic(&self) -> &'static str {
        match self {
            NetworkMessage::NewBlock(_)
            | NetworkMessage::GetBlock(_)
            | NetworkMessage::Inv { .. }
            | NetworkMessage::GetData { .. } => BLOCKS_TOPIC,
            NetworkMessage::NewTransaction(_) | NetworkMessage::GetHeaders(_) => TXS_TOPIC,
            NetworkMessage::CheckpointRequest { .. } | NetworkMessage::CheckpointResponse { .. } => {
                CHECKPOINTS_TOPIC
            }
            NetworkMessage::Hello { .. } | NetworkMessage::GetPeers | NetworkMessage::Peers(_) => {
                BLOCKS_TOPIC
            }
        }
    }
}

/// A signed envelope wrapping every gossip message.
///
/// The signature covers the bincode encoding of every field except
/// `signature` itself, hashed with SHA-256 before signing (secp256k1 signs
/// fixed-size digests, not arbitrary-length messages).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub struct Envelope {
    /// Compressed secp256k1 public key (33 bytes) of the sending node's
    /// long-lived identity key.
    pub sender_pubkey: Vec<u8>,
    /// Protocol version string; must equal [`PROTOCOL_VERSION`] to be accepted.
    pub version: String,
    /// Per-sender monotonically-increasing nonce, used for replay detection.
    pub nonce: u64,
    /// Unix seconds at send time.
    pub timestamp: u64,
    /// The wrapped message.
    pub payload: NetworkMessage,
    /// secp256k1 signature over the hash of every other field.
    pub signature: Vec<u8>,
}

#[derive(bincode::Encode)]
struct EnvelopeSigningFields<'a> {
    sender_pubkey: &'a [u8],
    version: &'a str,
    nonce: u64,
    timestamp: u64,
    payload: &'a NetworkMessage,
}

impl Envelope {
    fn signing_hash(
        sender_pubkey: &[u8],
        version: &str,
        nonce: u64,
        timestamp: u64,
        payload: &NetworkMessage,
    ) -> Result<Hash256, NetworkError> {
        let fields = EnvelopeSigningFields {
            sender_pubkey,
            version,
            nonce,
            timestamp,
            payload,
        };
        let bytes = bincode::encode_to_vec(&fields, bincode::config::standard())
            .map_err(|e| NetworkError::ProtocolViolation(format!("envelope encode error: {e}")))?;
        Ok(Hash256::sha256(&bytes))
    }

    /// Build and sign a new envelope with the node's identity key.
    pub fn sign(
        keypair: &KeyPair,
        nonce: u64,
        timestamp: u64,
        payload: NetworkMessage,
    ) -> Result<Self, NetworkError> {
        payload.validate()?;
        let sender_pubkey = keypair.public_key().to_bytes().to_vec();
        let hash = Self::signing_hash(&sender_pubkey, PROTOCOL_VERSION, nonce, timestamp, &payload)?;
        let signature = keypair.sign(hash.as_bytes());
        Ok(Self {
            sender_pubkey,
            version: PROTOCOL_VERSION.to_string(),
            nonce,
            timestamp,
            payload,
            signature,
        })
    }

    /// Verify protocol version, clock skew, and signature.
    ///
    /// Replay-nonce tracking is the caller's responsibility (see
    /// `peer_scoring`'s dedup cache); this only checks what is self-contained
    /// in the envelope.
    pub fn verify(&self, current_time: u64) -> Result<PublicKey, NetworkError> {
        if self.version != PROTOCOL_VERSION {
            return Err(NetworkError::ProtocolViolation(format!(
                "version mismatch: {} != {PROTOCOL_VERSION}",
                self.version
            )));
        }

        let skew = current_time.abs_diff(self.timestamp);
        if skew > MAX_ENVELOPE_SKEW_SECS {
            return Err(NetworkError::ProtocolViolation(format!(
                "timestamp skew {skew}s exceeds {MAX_ENVELOPE_SKEW_SECS}s"
            )));
        }

        self.payload.validate()?;

        let pubkey = PublicKey::from_bytes(&self.sender_pubkey)
            .map_err(|_| NetworkError::ProtocolViolation("invalid sender public key".into()))?;

        let hash = Self::signing_hash(
            &self.sender_pubkey,
            &self.version,
            self.nonce,
            self.timestamp,
            &self.payload,
        )?;
        pubkey
            .verify(hash.as_bytes(), &self.signature)
            .map_err(|_| NetworkError::ProtocolViolation("envelope signature invalid".into()))?;

        Ok(pubkey)
    }

    /// Encode this envelope as MAGIC_BYTES + bincode payload.
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        let payload = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| NetworkError::ProtocolViolation(format!("encode error: {e}")))?;
        let total_size = MAGIC_BYTES.len() + payload.len();
        if total_size > MAX_MESSAGE_SIZE {
            return Err(NetworkError::MessageTooLarge { size: total_size });
        }
        let mut buf = Vec::with_capacity(total_size);
        buf.extend_from_slice(&MAGIC_BYTES);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode an envelope from MAGIC_BYTES + bincode payload.
    ///
    /// Returns `None` if the magic bytes don't match, the message is too
    /// large, or deserialization fails. Does not verify the signature; call
    /// [`Envelope::verify`] on the result.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_MESSAGE_SIZE || data.len() < MAGIC_BYTES.len() {
            return None;
        }
        if data[..MAGIC_BYTES.len()] != MAGIC_BYTES {
            return None;
        }
        let payload = &data[MAGIC_BYTES.len()..];
        let (envelope, _): (Self, usize) =
            bincode::decode_from_slice(payload, bincode::config::standard()).ok()?;
        Some(envelope)
    }
}

/// Point-to-point request types for the XAI req-resp protocol.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub enum XaiRequest {
    /// Request a block by its hash.
    GetBlock(Hash256),
    /// Request headers from locator hashes.
    GetHeaders(Vec<Hash256>),
    /// Request a peer's checkpoint summary at a given height.
    CheckpointQuery(u64),
}

/// Point-to-point response types for the XAI req-resp protocol.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub enum XaiResponse {
    /// A block response.
    Block(Option<Block>),
    /// Headers response.
    Headers(Vec<BlockHeader>),
    /// A checkpoint summary response (`None` if the peer has no checkpoint
    /// at that height).
    Checkpoint(Option<CheckpointSummary>),
}

/// The comparable summary fields of a checkpoint, exchanged between peers
/// for consensus verification (never the encrypted UTXO snapshot itself).
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct CheckpointSummary {
    pub height: u64,
    pub block_hash: Hash256,
    pub checkpoint_hash: Hash256,
    pub merkle_root: Hash256,
    pub total_supply: u64,
}

/// Maximum request size (hash + locator overhead).
pub const MAX_REQUEST_SIZE: usize = 32 * 64 + 128; // 64 locator hashes + overhead

/// Maximum response size (up to one full block or many headers).
pub const MAX_RESPONSE_SIZE: usize = MAX_BLOCK_SIZE + 1024;

/// Protocol name for request-response.
pub const REQ_RESP_PROTOCOL: &str = "/xai/req-resp/1";

/// Codec for the XAI request-response protocol.
/// Uses a 4-byte big-endian length prefix + bincode payload.
#[derive(Debug, Clone, Default)]
pub struct XaiCodec;

#[async_trait::async_trait]
impl libp2p::request_response::Codec for XaiCodec {
    type Protocol = libp2p::StreamProtocol;
    type Request = XaiRequest;
    type Response = XaiResponse;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> std::io::Result<Self::Request>
    where
        T: libp2p::futures::AsyncRead + Unpin + Send,
    {
        use libp2p::futures::AsyncReadExt;
        let mut len_buf = [0u8; 4];
        io.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_REQUEST_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }
        let mut buf = vec![0u8; len];
        io.read_exact(&mut buf).await?;
        let (request, _): (XaiRequest, _) =
            bincode::decode_from_slice(&buf, bincode::config::standard())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(request)
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> std::io::Result<Self::Response>
    where
        T: libp2p::futures::AsyncRead + Unpin + Send,
    {
        use libp2p::futures::AsyncReadExt;
        let mut len_buf = [0u8; 4];
        io.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_RESPONSE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "response too large",
            ));
        }
        let mut buf = vec![0u8; len];
        io.read_exact(&mut buf).await?;
        let (response, _): (XaiResponse, _) =
            bincode::decode_from_slice(&buf, bincode::config::standard())
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(response)
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> std::io::Result<()>
    where
        T: libp2p::futures::AsyncWrite + Unpin + Send,
    {
        use libp2p::futures::AsyncWriteExt;
        let buf = bincode::encode_to_vec(&req, bincode::config::standard())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        if buf.len() > MAX_REQUEST_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }
        let len = (buf.len() as u32).to_be_bytes();
        io.write_all(&len).await?;
        io.write_all(&buf).await?;
        Ok(())
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        resp: Self::Response,
    ) -> std::io::Result<()>
    where
        T: libp2p::futures::AsyncWrite + Unpin + Send,
    {
        use libp2p::futures::AsyncWriteExt;
        let buf = bincode::encode_to_vec(&resp, bincode::config::standard())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        if buf.len() > MAX_RESPONSE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "response too large",
            ));
        }
        let len = (buf.len() as u32).to_be_bytes();
        io.write_all(&len).await?;
        io.write_all(&buf).await?;
        Ok(())
    }
}
