//! Header checkpoint pinning and periodic UTXO-snapshot checkpoints.
//!
//! Two related but distinct mechanisms live in this module:
//!
//! - **Compiled-in checkpoints** ([`check_checkpoint`], [`is_below_checkpoint`]):
//!   a hardcoded `(height, hash)` list shipped in the binary, pinning known-good
//!   blocks so that no reorg can unwind past them.
//! - **[`CheckpointManager`]**: a runtime subsystem that periodically snapshots
//!   the full UTXO set to disk (encrypted at rest) for fast-recovery and as an
//!   additional, peer-verifiable anti-long-range defense on top of the
//!   compiled-in list.
//!
//! # Attack vectors
//!
//! - **Long-range rewrite:** Without checkpoints an attacker with sufficient
//!   hash power could rewrite arbitrarily deep history. Checkpoints pin known-
//!   good blocks so that reorgs below the last checkpoint are rejected outright.
//!
//! - **Checkpoint spoofing:** The compiled-in checkpoint list is compiled into
//!   the binary. An attacker would need to distribute a modified binary to
//!   exploit this, which is outside our threat model. Runtime checkpoints are
//!   instead cross-checked against peers before being trusted for reorg
//!   rejection (see [`CheckpointManager::verify_with_peers`]).
//!
//! # Usage
//!
//! The node layer should call [`check_checkpoint`] (or
//! [`check_checkpoint_with`] for testing) when connecting a new block whose
//! height is known. It should call [`is_below_checkpoint`] before accepting a
//! reorg that would disconnect blocks at or below the last checkpoint height.
//!
//! The [`ConsensusEngine`](crate::engine) does **not** call these functions
//! directly because it validates one block at a time without tracking
//! heights end-to-end. The node is responsible for invoking checkpoint
//! validation during sync header processing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use xai_core::constants::{CHECKPOINTS, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_MAX_CHECKPOINTS};
use xai_core::error::ConsensusError;
use xai_core::types::{Hash256, OutPoint, UtxoEntry};

/// A fixed application-level salt for Argon2 key derivation.
///
/// The node secret (not this salt) is the actual secret input; the salt only
/// needs to be fixed and non-degenerate, not itself confidential, since it is
/// the same for every node and only domain-separates this KDF usage from
/// others that might derive keys from the same secret.
const KDF_SALT: &[u8] = b"xai-checkpoint-snapshot-kdf-v1\0";

const NONCE_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Compiled-in checkpoint pinning
// ---------------------------------------------------------------------------

/// Verify that a block at the given `height` has the expected checkpoint hash.
///
/// If `height` matches a checkpoint height, the block hash must match exactly.
/// If there is no checkpoint at `height`, the function succeeds unconditionally.
///
/// # Errors
///
/// Returns [`ConsensusError::CheckpointConflict`] when the hash does not
/// match the checkpoint at the given height.
pub fn check_checkpoint(height: u64, hash: &Hash256) -> Result<(), ConsensusError> {
    check_checkpoint_with(CHECKPOINTS, height, hash)
}

/// Like [`check_checkpoint`] but takes an explicit checkpoint list.
///
/// This is the testable core: production code passes [`CHECKPOINTS`], while
/// tests can supply their own list.
pub fn check_checkpoint_with(
    checkpoints: &[(u64, [u8; 32])],
    height: u64,
    hash: &Hash256,
) -> Result<(), ConsensusError> {
    for &(cp_height, cp_hash) in checkpoints {
        if cp_height == height {
            if hash.as_bytes() != &cp_hash {
                return Err(ConsensusError::CheckpointConflict(height));
            }
            return Ok(());
        }
    }
    Ok(())
}

/// Return the height of the most recent checkpoint, or 0 if there are none.
pub fn last_checkpoint_height() -> u64 {
    last_checkpoint_height_with(CHECKPOINTS)
}

/// Like [`last_checkpoint_height`] but with an explicit checkpoint list.
pub fn last_checkpoint_height_with(checkpoints: &[(u64, [u8; 32])]) -> u64 {
    checkpoints.iter().map(|(h, _)| *h).max().unwrap_or(0)
}

/// Returns `true` if `height` is at or below the last checkpoint height.
///
/// The node should reject any reorg that would disconnect blocks at or below
/// this height, because those blocks are pinned by a checkpoint.
pub fn is_below_checkpoint(height: u64) -> bool {
    is_below_checkpoint_with(CHECKPOINTS, height)
}

/// Like [`is_below_checkpoint`] but with an explicit checkpoint list.
pub fn is_below_checkpoint_with(checkpoints: &[(u64, [u8; 32])], height: u64) -> bool {
    let last = last_checkpoint_height_with(checkpoints);
    last > 0 && height <= last
}

// ---------------------------------------------------------------------------
// Runtime checkpoint manager
// ---------------------------------------------------------------------------

/// Errors from checkpoint creation, loading, or peer verification.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("UTXO snapshot encoding error: {0}")]
    Encoding(String),
    #[error("UTXO snapshot encryption failure")]
    Encryption,
    #[error("UTXO snapshot decryption failure (wrong key or corrupted data)")]
    Decryption,
    #[error("no checkpoint found at height {0}")]
    NotFound(u64),
}

/// A point-in-time snapshot of the chain state, persisted to disk.
///
/// The UTXO portion is encrypted at rest (AES-256-GCM) with a key derived
/// from the node's local secret; every other field is plaintext so peers can
/// exchange and compare `checkpoint_hash` without decrypting anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub height: u64,
    pub block_hash: Hash256,
    pub previous_hash: Hash256,
    pub timestamp: u64,
    pub difficulty: u64,
    pub total_supply: u64,
    pub merkle_root: Hash256,
    /// `SHA-256` over the canonical encoding of every field above.
    pub checkpoint_hash: Hash256,
    /// AES-256-GCM ciphertext of the bincode-encoded `Vec<(OutPoint, UtxoEntry)>`.
    encrypted_utxo_snapshot: Vec<u8>,
    /// 12-byte AES-GCM nonce used for `encrypted_utxo_snapshot`.
    nonce: Vec<u8>,
}

impl CheckpointRecord {
    /// Compute the canonical checkpoint hash over the plaintext header fields.
    fn compute_hash(
        height: u64,
        block_hash: &Hash256,
        previous_hash: &Hash256,
        timestamp: u64,
        difficulty: u64,
        total_supply: u64,
        merkle_root: &Hash256,
    ) -> Hash256 {
        let mut data = Vec::with_capacity(8 + 32 + 32 + 8 + 8 + 8 + 32);
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(block_hash.as_bytes());
        data.extend_from_slice(previous_hash.as_bytes());
        data.extend_from_slice(&timestamp.to_le_bytes());
        data.extend_from_slice(&difficulty.to_le_bytes());
        data.extend_from_slice(&total_supply.to_le_bytes());
        data.extend_from_slice(merkle_root.as_bytes());
        Hash256::sha256(&data)
    }
}

/// A peer's response to a checkpoint query, used for consensus verification.
///
/// Grounded in the wire `checkpoint_response` payload
/// `{height, block_hash, checkpoint_hash, merkle_root, total_supply}`: peers
/// never transmit the encrypted UTXO snapshot itself, only the comparable
/// summary fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCheckpointResponse {
    pub peer_id: String,
    pub height: u64,
    pub checkpoint_hash: Hash256,
    pub block_hash: Hash256,
    pub merkle_root: Hash256,
    pub total_supply: u64,
}

/// Abstraction over the P2P layer for checkpoint peer-consensus queries.
///
/// Implemented by `xai-network`'s peer service; defined here so
/// `xai-consensus` does not depend on `xai-network`.
#[async_trait]
pub trait PeerCheckpointClient: Send + Sync {
    /// Query up to `max_peers` connected peers for their checkpoint at
    /// `height`, waiting at most `per_peer_timeout` for each response.
    /// Peers that time out or are unreachable are simply absent from the
    /// result, not represented as an error.
    async fn query_checkpoint(
        &self,
        height: u64,
        max_peers: usize,
        per_peer_timeout: Duration,
    ) -> Vec<PeerCheckpointResponse>;
}

/// The default number of peers sampled for checkpoint verification.
pub const PEER_SAMPLE_SIZE: usize = 5;

/// Per-peer timeout for a checkpoint query.
pub const PEER_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum fraction of sampled peers that must agree for a checkpoint to be
/// considered verified.
pub const MIN_CONSENSUS_RATIO: f64 = 0.67;

/// Outcome of cross-checking a local checkpoint against peers.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// At least `MIN_CONSENSUS_RATIO` of sampled peers returned a matching hash.
    Verified { agreeing: usize, sampled: usize },
    /// Peers were queried but consensus was not reached; the checkpoint is
    /// flagged, not auto-overwritten.
    Disputed { agreeing: usize, sampled: usize },
    /// No peers responded at all.
    NoPeers,
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified { .. })
    }
}

/// Manages periodic, encrypted, peer-verifiable UTXO checkpoints on disk.
///
/// Checkpoints are written atomically (write-temp, fsync, rename) to
/// `base_dir/cp_<height>.json`. Once more than `max_checkpoints` are present,
/// the oldest are moved to `base_dir/pruned/` rather than deleted.
pub struct CheckpointManager {
    base_dir: PathBuf,
    key: Zeroizing<[u8; 32]>,
    interval: u64,
    max_checkpoints: usize,
    /// Height of the most recent checkpoint that reached peer consensus.
    /// Reorgs that would cross this height are rejected.
    last_verified_height: Mutex<Option<u64>>,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("base_dir", &self.base_dir)
            .field("interval", &self.interval)
            .field("max_checkpoints", &self.max_checkpoints)
            .finish_non_exhaustive()
    }
}

impl CheckpointManager {
    /// Create a manager rooted at `base_dir`, deriving its snapshot-encryption
    /// key from `node_secret` via Argon2. `base_dir` and `base_dir/pruned` are
    /// created if missing.
    pub fn new(base_dir: impl Into<PathBuf>, node_secret: &[u8]) -> Result<Self, CheckpointError> {
        Self::with_params(
            base_dir,
            node_secret,
            DEFAULT_CHECKPOINT_INTERVAL,
            DEFAULT_MAX_CHECKPOINTS,
        )
    }

    /// Like [`CheckpointManager::new`] but with explicit interval/retention,
    /// for tests and non-default node configuration.
    pub fn with_params(
        base_dir: impl Into<PathBuf>,
        node_secret: &[u8],
        interval: u64,
        max_checkpoints: usize,
    ) -> Result<Self, CheckpointError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| CheckpointError::Io {
            path: base_dir.clone(),
            source: e,
        })?;
        fs::create_dir_all(base_dir.join("pruned")).map_err(|e| CheckpointError::Io {
            path: base_dir.join("pruned"),
            source: e,
        })?;

        let mut key = Zeroizing::new([0u8; 32]);
        Argon2::default()
            .hash_password_into(node_secret, KDF_SALT, key.as_mut())
            .map_err(|_| CheckpointError::Encryption)?;

        Ok(Self {
            base_dir,
            key,
            interval,
            max_checkpoints,
            last_verified_height: Mutex::new(None),
        })
    }

    /// Whether a checkpoint should be taken at `height` (every `interval`
    /// blocks, starting at `interval` -- genesis is never checkpointed).
    pub fn should_checkpoint(&self, height: u64) -> bool {
        height > 0 && height % self.interval == 0
    }

    fn checkpoint_path(&self, height: u64) -> PathBuf {
        self.base_dir.join(format!("cp_{height}.json"))
    }

    fn pruned_path(&self, height: u64) -> PathBuf {
        self.base_dir.join("pruned").join(format!("cp_{height}.json"))
    }

    /// Encrypt a UTXO snapshot with this manager's key.
    fn encrypt_snapshot(
        &self,
        utxos: &[(OutPoint, UtxoEntry)],
    ) -> Result<(Vec<u8>, Vec<u8>), CheckpointError> {
        let plaintext = bincode::encode_to_vec(utxos, bincode::config::standard())
            .map_err(|e| CheckpointError::Encoding(e.to_string()))?;

        let key = Key::<Aes256Gcm>::from_slice(self.key.as_ref());
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| CheckpointError::Encryption)?;

        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    /// Decrypt and decode a checkpoint's UTXO snapshot.
    pub fn decrypt_snapshot(
        &self,
        record: &CheckpointRecord,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, CheckpointError> {
        if record.nonce.len() != NONCE_LEN {
            return Err(CheckpointError::Decryption);
        }
        let key = Key::<Aes256Gcm>::from_slice(self.key.as_ref());
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&record.nonce);

        let plaintext = cipher
            .decrypt(nonce, record.encrypted_utxo_snapshot.as_ref())
            .map_err(|_| CheckpointError::Decryption)?;

        let (utxos, _) = bincode::decode_from_slice(&plaintext, bincode::config::standard())
            .map_err(|e| CheckpointError::Encoding(e.to_string()))?;
        Ok(utxos)
    }

    /// Atomically create and persist a checkpoint, then prune old ones.
    ///
    /// Writes to a `.tmp` sibling file, fsyncs it, and renames it into place
    /// so a crash mid-write never leaves a corrupt checkpoint at the final
    /// path -- the previous checkpoint (if any) remains valid until the
    /// rename completes.
    #[allow(clippy::too_many_arguments)]
    pub fn create_checkpoint(
        &self,
        height: u64,
        block_hash: Hash256,
        previous_hash: Hash256,
        timestamp: u64,
        difficulty: u64,
        total_supply: u64,
        merkle_root: Hash256,
        utxos: &[(OutPoint, UtxoEntry)],
    ) -> Result<CheckpointRecord, CheckpointError> {
        let checkpoint_hash = CheckpointRecord::compute_hash(
            height,
            &block_hash,
            &previous_hash,
            timestamp,
            difficulty,
            total_supply,
            &merkle_root,
        );
        let (encrypted_utxo_snapshot, nonce) = self.encrypt_snapshot(utxos)?;

        let record = CheckpointRecord {
            height,
            block_hash,
            previous_hash,
            timestamp,
            difficulty,
            total_supply,
            merkle_root,
            checkpoint_hash,
            encrypted_utxo_snapshot,
            nonce,
        };

        self.write_atomic(&record)?;
        self.prune()?;

        Ok(record)
    }

    fn write_atomic(&self, record: &CheckpointRecord) -> Result<(), CheckpointError> {
        let final_path = self.checkpoint_path(record.height);
        let tmp_path = self.base_dir.join(format!("cp_{}.json.tmp", record.height));

        let json = serde_json::to_vec_pretty(record)?;

        let file = fs::File::create(&tmp_path).map_err(|e| CheckpointError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        {
            use std::io::Write;
            let mut writer = std::io::BufWriter::new(&file);
            writer.write_all(&json).map_err(|e| CheckpointError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
            writer.flush().map_err(|e| CheckpointError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
        }
        file.sync_all().map_err(|e| CheckpointError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;

        fs::rename(&tmp_path, &final_path).map_err(|e| CheckpointError::Io {
            path: final_path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Load a persisted checkpoint by height.
    pub fn load_checkpoint(&self, height: u64) -> Result<CheckpointRecord, CheckpointError> {
        let path = self.checkpoint_path(height);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CheckpointError::NotFound(height)
            } else {
                CheckpointError::Io { path: path.clone(), source: e }
            }
        })?;
        let record = serde_json::from_slice(&bytes)?;
        Ok(record)
    }

    /// Heights of all checkpoints currently retained (not pruned), ascending.
    pub fn list_heights(&self) -> Result<Vec<u64>, CheckpointError> {
        let mut heights = Vec::new();
        let entries = fs::read_dir(&self.base_dir).map_err(|e| CheckpointError::Io {
            path: self.base_dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::Io {
                path: self.base_dir.clone(),
                source: e,
            })?;
            if let Some(h) = parse_checkpoint_filename(&entry.file_name().to_string_lossy()) {
                heights.push(h);
            }
        }
        heights.sort_unstable();
        Ok(heights)
    }

    /// Move checkpoints beyond `max_checkpoints` (oldest first) to `pruned/`.
    fn prune(&self) -> Result<(), CheckpointError> {
        let mut heights = self.list_heights()?;
        if heights.len() <= self.max_checkpoints {
            return Ok(());
        }
        heights.sort_unstable();
        let excess = heights.len() - self.max_checkpoints;
        for height in &heights[..excess] {
            let from = self.checkpoint_path(*height);
            let to = self.pruned_path(*height);
            fs::rename(&from, &to).map_err(|e| CheckpointError::Io { path: from, source: e })?;
        }
        Ok(())
    }

    /// Query peers and determine whether the local checkpoint reaches
    /// consensus. On success, records `height` as the new last-verified
    /// height so future reorgs cannot cross it.
    pub async fn verify_with_peers(
        &self,
        record: &CheckpointRecord,
        client: &dyn PeerCheckpointClient,
    ) -> VerificationOutcome {
        let responses = client
            .query_checkpoint(record.height, PEER_SAMPLE_SIZE, PEER_QUERY_TIMEOUT)
            .await;

        if responses.is_empty() {
            return VerificationOutcome::NoPeers;
        }

        let sampled = responses.len();
        let agreeing = responses
            .iter()
            .filter(|r| {
                r.height == record.height
                    && r.checkpoint_hash == record.checkpoint_hash
                    && r.block_hash == record.block_hash
                    && r.merkle_root == record.merkle_root
                    && r.total_supply == record.total_supply
            })
            .count();

        let ratio = agreeing as f64 / sampled as f64;
        if ratio >= MIN_CONSENSUS_RATIO {
            *self.last_verified_height.lock() = Some(record.height);
            VerificationOutcome::Verified { agreeing, sampled }
        } else {
            VerificationOutcome::Disputed { agreeing, sampled }
        }
    }

    /// The height of the most recent peer-verified checkpoint, if any.
    pub fn last_verified_height(&self) -> Option<u64> {
        *self.last_verified_height.lock()
    }

    /// Returns `true` if a reorg down to `target_height` would cross the most
    /// recently peer-verified checkpoint and must therefore be rejected.
    pub fn rejects_reorg_to(&self, target_height: u64) -> bool {
        match self.last_verified_height() {
            Some(verified) => target_height < verified,
            None => false,
        }
    }
}

/// Parse a `cp_<height>.json` filename into its height, if it matches.
fn parse_checkpoint_filename(name: &str) -> Option<u64> {
    name.strip_prefix("cp_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // ------------------------------------------------------------------
    // Compiled-in checkpoint pinning
    // ------------------------------------------------------------------

    const TEST_CHECKPOINTS: &[(u64, [u8; 32])] = &[
        (10, [0xAA; 32]),
        (50, [0xBB; 32]),
    ];

    #[test]
    fn checkpoint_passes_for_matching_hash() {
        let hash = Hash256([0xAA; 32]);
        assert!(check_checkpoint_with(TEST_CHECKPOINTS, 10, &hash).is_ok());

        let hash2 = Hash256([0xBB; 32]);
        assert!(check_checkpoint_with(TEST_CHECKPOINTS, 50, &hash2).is_ok());
    }

    #[test]
    fn checkpoint_fails_for_wrong_hash() {
        let wrong = Hash256([0xFF; 32]);
        let err = check_checkpoint_with(TEST_CHECKPOINTS, 10, &wrong).unwrap_err();
        assert_eq!(err, ConsensusError::CheckpointConflict(10));
    }

    #[test]
    fn no_checkpoint_at_height_passes() {
        let arbitrary = Hash256([0xDE; 32]);
        for height in [0, 5, 11, 49, 100, u64::MAX] {
            assert!(check_checkpoint_with(TEST_CHECKPOINTS, height, &arbitrary).is_ok());
        }
        assert!(check_checkpoint(42, &arbitrary).is_ok());
    }

    #[test]
    fn last_checkpoint_height_empty() {
        assert_eq!(last_checkpoint_height(), 0);
        assert_eq!(last_checkpoint_height_with(&[]), 0);
    }

    #[test]
    fn last_checkpoint_height_with_entries() {
        assert_eq!(last_checkpoint_height_with(TEST_CHECKPOINTS), 50);
    }

    #[test]
    fn is_below_checkpoint_works() {
        assert!(is_below_checkpoint_with(TEST_CHECKPOINTS, 0));
        assert!(is_below_checkpoint_with(TEST_CHECKPOINTS, 50));
        assert!(!is_below_checkpoint_with(TEST_CHECKPOINTS, 51));
        assert!(!is_below_checkpoint(0));
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn sample_utxos() -> Vec<(OutPoint, UtxoEntry)> {
        use xai_core::address::{Address, Network};
        use xai_core::types::TxOutput;

        let recipient = Address::from_pubkey_hash(Hash256([0x42; 32]), Network::Mainnet);
        vec![(
            OutPoint { txid: Hash256([0x01; 32]), index: 0 },
            UtxoEntry {
                output: TxOutput { amount: 50 * xai_core::constants::COIN, recipient },
                block_height: 0,
                is_coinbase: true,
            },
        )]
    }

    fn make_manager(dir: &Path) -> CheckpointManager {
        CheckpointManager::with_params(dir, b"test node secret", 1000, 10).unwrap()
    }

    // ------------------------------------------------------------------
    // CheckpointManager: creation and round-trip
    // ------------------------------------------------------------------

    #[test]
    fn should_checkpoint_at_interval_multiples() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        assert!(!mgr.should_checkpoint(0));
        assert!(!mgr.should_checkpoint(999));
        assert!(mgr.should_checkpoint(1000));
        assert!(mgr.should_checkpoint(2000));
        assert!(!mgr.should_checkpoint(2001));
    }

    #[test]
    fn create_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();

        let record = mgr
            .create_checkpoint(
                1000,
                Hash256([0x11; 32]),
                Hash256([0x22; 32]),
                123456,
                u64::MAX,
                50 * xai_core::constants::COIN,
                Hash256([0x33; 32]),
                &utxos,
            )
            .unwrap();

        let loaded = mgr.load_checkpoint(1000).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn checkpoint_hash_is_deterministic() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();

        let r1 = mgr
            .create_checkpoint(1000, Hash256([0x11; 32]), Hash256([0x22; 32]), 1, 2, 3, Hash256([0x33; 32]), &utxos)
            .unwrap();

        // Same header fields -> same checkpoint_hash, independent of encryption
        // (which uses a fresh random nonce each time).
        let dir2 = tempdir().unwrap();
        let mgr2 = make_manager(dir2.path());
        let r2 = mgr2
            .create_checkpoint(1000, Hash256([0x11; 32]), Hash256([0x22; 32]), 1, 2, 3, Hash256([0x33; 32]), &utxos)
            .unwrap();

        assert_eq!(r1.checkpoint_hash, r2.checkpoint_hash);
        assert_ne!(r1.nonce, r2.nonce, "nonces should be randomly distinct");
    }

    #[test]
    fn load_missing_checkpoint_errors() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let err = mgr.load_checkpoint(1000).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(1000)));
    }

    #[test]
    fn decrypt_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();

        let record = mgr
            .create_checkpoint(1000, Hash256::ZERO, Hash256::ZERO, 1, 2, 3, Hash256::ZERO, &utxos)
            .unwrap();

        let decrypted = mgr.decrypt_snapshot(&record).unwrap();
        assert_eq!(decrypted, utxos);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        let record = mgr
            .create_checkpoint(1000, Hash256::ZERO, Hash256::ZERO, 1, 2, 3, Hash256::ZERO, &utxos)
            .unwrap();

        let wrong_mgr = CheckpointManager::with_params(dir.path(), b"different secret", 1000, 10).unwrap();
        assert!(matches!(
            wrong_mgr.decrypt_snapshot(&record),
            Err(CheckpointError::Decryption)
        ));
    }

    #[test]
    fn file_on_disk_does_not_contain_plaintext_utxo_amount() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        mgr.create_checkpoint(1000, Hash256::ZERO, Hash256::ZERO, 1, 2, 3, Hash256::ZERO, &utxos)
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("cp_1000.json")).unwrap();
        // The plaintext coin amount must not appear verbatim in the stored file.
        let amount = 50u64 * xai_core::constants::COIN;
        assert!(!raw.contains(&amount.to_string()));
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    #[test]
    fn prune_moves_oldest_to_pruned_dir() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::with_params(dir.path(), b"secret", 1000, 3).unwrap();
        let utxos = sample_utxos();

        for i in 1..=5u64 {
            mgr.create_checkpoint(
                i * 1000,
                Hash256([i as u8; 32]),
                Hash256::ZERO,
                i,
                1,
                1,
                Hash256::ZERO,
                &utxos,
            )
            .unwrap();
        }

        let remaining = mgr.list_heights().unwrap();
        assert_eq!(remaining, vec![3000, 4000, 5000]);

        assert!(dir.path().join("pruned/cp_1000.json").exists());
        assert!(dir.path().join("pruned/cp_2000.json").exists());
        assert!(!dir.path().join("cp_1000.json").exists());
    }

    #[test]
    fn pruned_checkpoint_still_loadable_by_direct_path() {
        let dir = tempdir().unwrap();
        let mgr = CheckpointManager::with_params(dir.path(), b"secret", 1000, 1).unwrap();
        let utxos = sample_utxos();

        mgr.create_checkpoint(1000, Hash256::ZERO, Hash256::ZERO, 1, 1, 1, Hash256::ZERO, &utxos)
            .unwrap();
        mgr.create_checkpoint(2000, Hash256::ZERO, Hash256::ZERO, 2, 1, 1, Hash256::ZERO, &utxos)
            .unwrap();

        // 1000 was pruned -- not loadable via load_checkpoint (checks base_dir only).
        assert!(matches!(mgr.load_checkpoint(1000), Err(CheckpointError::NotFound(1000))));
        // But the raw file survives for manual recovery.
        assert!(dir.path().join("pruned/cp_1000.json").exists());
    }

    // ------------------------------------------------------------------
    // Peer consensus verification
    // ------------------------------------------------------------------

    struct MockPeerClient {
        responses: Vec<PeerCheckpointResponse>,
    }

    #[async_trait]
    impl PeerCheckpointClient for MockPeerClient {
        async fn query_checkpoint(
            &self,
            height: u64,
            max_peers: usize,
            _timeout: Duration,
        ) -> Vec<PeerCheckpointResponse> {
            self.responses
                .iter()
                .filter(|r| r.height == height)
                .take(max_peers)
                .cloned()
                .collect()
        }
    }

    fn matching_response(record: &CheckpointRecord, peer_id: &str) -> PeerCheckpointResponse {
        PeerCheckpointResponse {
            peer_id: peer_id.to_string(),
            height: record.height,
            checkpoint_hash: record.checkpoint_hash,
            block_hash: record.block_hash,
            merkle_root: record.merkle_root,
            total_supply: record.total_supply,
        }
    }

    #[tokio::test]
    async fn verify_passes_with_unanimous_agreement() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        let record = mgr
            .create_checkpoint(1000, Hash256([1; 32]), Hash256([2; 32]), 1, 2, 3, Hash256([4; 32]), &utxos)
            .unwrap();

        let client = MockPeerClient {
            responses: (0..5).map(|i| matching_response(&record, &format!("peer{i}"))).collect(),
        };

        let outcome = mgr.verify_with_peers(&record, &client).await;
        assert_eq!(outcome, VerificationOutcome::Verified { agreeing: 5, sampled: 5 });
        assert!(outcome.is_verified());
        assert_eq!(mgr.last_verified_height(), Some(1000));
    }

    #[tokio::test]
    async fn verify_passes_at_exactly_67_percent() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        let record = mgr
            .create_checkpoint(1000, Hash256([1; 32]), Hash256([2; 32]), 1, 2, 3, Hash256([4; 32]), &utxos)
            .unwrap();

        let mut responses: Vec<_> = (0..4).map(|i| matching_response(&record, &format!("peer{i}"))).collect();
        // 4th response disagrees on block_hash. 3/4 = 0.75 >= 0.67.
        let mut disagreeing = matching_response(&record, "peer-disagree");
        disagreeing.block_hash = Hash256([0xFF; 32]);
        responses[3] = disagreeing;

        let client = MockPeerClient { responses };
        let outcome = mgr.verify_with_peers(&record, &client).await;
        assert_eq!(outcome, VerificationOutcome::Verified { agreeing: 3, sampled: 4 });
    }

    #[tokio::test]
    async fn verify_disputed_below_threshold() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        let record = mgr
            .create_checkpoint(1000, Hash256([1; 32]), Hash256([2; 32]), 1, 2, 3, Hash256([4; 32]), &utxos)
            .unwrap();

        let mut responses: Vec<_> = vec![matching_response(&record, "peer0")];
        for i in 1..5 {
            let mut r = matching_response(&record, &format!("peer{i}"));
            r.total_supply += 1;
            responses.push(r);
        }

        let client = MockPeerClient { responses };
        let outcome = mgr.verify_with_peers(&record, &client).await;
        assert_eq!(outcome, VerificationOutcome::Disputed { agreeing: 1, sampled: 5 });
        assert!(!outcome.is_verified());
        assert_eq!(mgr.last_verified_height(), None);
    }

    #[tokio::test]
    async fn verify_no_peers() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        let record = mgr
            .create_checkpoint(1000, Hash256::ZERO, Hash256::ZERO, 1, 1, 1, Hash256::ZERO, &utxos)
            .unwrap();

        let client = MockPeerClient { responses: vec![] };
        let outcome = mgr.verify_with_peers(&record, &client).await;
        assert_eq!(outcome, VerificationOutcome::NoPeers);
    }

    #[tokio::test]
    async fn verified_checkpoint_blocks_deep_reorg() {
        let dir = tempdir().unwrap();
        let mgr = make_manager(dir.path());
        let utxos = sample_utxos();
        let record = mgr
            .create_checkpoint(1000, Hash256([1; 32]), Hash256([2; 32]), 1, 2, 3, Hash256([4; 32]), &utxos)
            .unwrap();

        assert!(!mgr.rejects_reorg_to(1500));

        let client = MockPeerClient {
            responses: (0..5).map(|i| matching_response(&record, &format!("peer{i}"))).collect(),
        };
        mgr.verify_with_peers(&record, &client).await;

        assert!(mgr.rejects_reorg_to(500));
        assert!(!mgr.rejects_reorg_to(1500));
    }

    #[test]
    fn parse_checkpoint_filename_rejects_non_matching() {
        assert_eq!(parse_checkpoint_filename("cp_1000.json"), Some(1000));
        assert_eq!(parse_checkpoint_filename("cp_1000.json.tmp"), None);
        assert_eq!(parse_checkpoint_filename("other.json"), None);
        assert_eq!(parse_checkpoint_filename("cp_abc.json"), None);
    }
}
