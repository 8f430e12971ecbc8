//! # xai-consensus — Block production, validation, proof-of-work, and checkpoints.
//!
//! This crate implements the [`BlockProducer`](xai_core::traits::BlockProducer)
//! trait, wiring together xai-core's validation, difficulty adjustment, and
//! reward modules with a pluggable chain state. It also owns the checkpoint
//! subsystem: compiled-in header pinning plus periodic, peer-verifiable,
//! encrypted UTXO snapshots.
//!
//! Proof-of-work is SHA-256 double-hash of the block header; see
//! [`block_validation::check_pow`](xai_core::block_validation::check_pow).

pub mod checkpoint;
pub mod engine;

pub use checkpoint::{
    CheckpointError, CheckpointManager, CheckpointRecord, PeerCheckpointClient,
    PeerCheckpointResponse, VerificationOutcome,
};
pub use engine::{mine_block, ConsensusEngine};
