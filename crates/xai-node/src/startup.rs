//! Full-chain validation performed once at node startup.
//!
//! Walks every block from genesis to the current tip and re-checks the
//! invariants `connect_block` is supposed to have already enforced: block
//! linkage, proof-of-work, transaction signatures, merkle roots, and the
//! supply cap. This catches corruption introduced outside the normal
//! connect path (a hand-edited database, a bug in an older binary version)
//! rather than re-deriving anything `connect_block` doesn't already check.

use tracing::{info, warn};

use xai_core::chain_state::ChainStore;
use xai_core::constants::MAX_SUPPLY;
use xai_core::crypto;
use xai_core::genesis;
use xai_core::merkle;
use xai_core::types::TxType;
use xai_core::{block_validation, error::XaiError};

use crate::storage::RocksStore;

/// Severity of a single [`ValidationIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The chain cannot be trusted; the node should refuse to start.
    Critical,
    /// Something is wrong but the node can still run (e.g. a cosmetic mismatch).
    Warning,
}

/// A single problem found while validating the chain.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Height of the offending block, or `None` for chain-wide issues.
    pub height: Option<u64>,
    pub description: String,
}

/// Summary of a full startup validation pass.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub genesis_valid: bool,
    pub chain_integrity: bool,
    pub pow_valid: bool,
    pub signatures_valid: bool,
    pub merkle_roots_valid: bool,
    pub supply_cap_valid: bool,
    pub total_supply: u64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn empty() -> Self {
        Self {
            total_blocks: 0,
            total_transactions: 0,
            genesis_valid: false,
            chain_integrity: true,
            pow_valid: true,
            signatures_valid: true,
            merkle_roots_valid: true,
            supply_cap_valid: true,
            total_supply: 0,
            issues: Vec::new(),
        }
    }

    fn add(&mut self, severity: Severity, height: Option<u64>, description: impl Into<String>) {
        self.issues.push(ValidationIssue { severity, height, description: description.into() });
    }

    /// Overall pass/fail: no critical issues and every individual check passed.
    pub fn success(&self) -> bool {
        self.genesis_valid
            && self.chain_integrity
            && self.pow_valid
            && self.signatures_valid
            && self.merkle_roots_valid
            && self.supply_cap_valid
            && !self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn critical_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Critical)
    }
}

/// Walk the full chain held by `store`, from genesis to the current tip,
/// and produce a [`ValidationReport`].
///
/// Returns `Err` only for a storage I/O failure; a corrupt-but-readable
/// chain is reported via [`ValidationReport::success`], not an `Err`.
pub fn validate_chain_on_startup(store: &RocksStore) -> Result<ValidationReport, XaiError> {
    let mut report = ValidationReport::empty();
    let (tip_height, _) = store.chain_tip()?;

    let genesis_hash = store.get_block_hash(0)?;
    match genesis_hash {
        Some(hash) if hash == genesis::genesis_hash() => {
            report.genesis_valid = true;
        }
        Some(hash) => {
            report.genesis_valid = false;
            report.add(
                Severity::Critical,
                Some(0),
                format!("genesis hash mismatch: found {hash}, expected {}", genesis::genesis_hash()),
            );
        }
        None => {
            report.genesis_valid = false;
            report.add(Severity::Critical, None, "chain has no genesis block");
            return Ok(report);
        }
    }

    let mut cumulative_supply: u64 = 0;
    let mut prev_hash = genesis::genesis_hash();

    for height in 0..=tip_height {
        let Some(hash) = store.get_block_hash(height)? else {
            report.chain_integrity = false;
            report.add(Severity::Critical, Some(height), "missing height index entry");
            continue;
        };
        let Some(block) = store.get_block(&hash)? else {
            report.chain_integrity = false;
            report.add(Severity::Critical, Some(height), "block body missing from storage");
            continue;
        };

        report.total_blocks += 1;
        report.total_transactions += block.transactions.len() as u64;

        if height > 0 && block.header.prev_hash != prev_hash {
            report.chain_integrity = false;
            report.add(
                Severity::Critical,
                Some(height),
                format!("prev_hash {} does not match parent hash {prev_hash}", block.header.prev_hash),
            );
        }

        if !block_validation::header_satisfies_pow(&block.header) {
            report.pow_valid = false;
            report.add(Severity::Critical, Some(height), "block header does not satisfy its proof-of-work target");
        }

        let txids: Vec<_> = block.transactions.iter().filter_map(|tx| tx.txid().ok()).collect();
        if txids.len() != block.transactions.len() {
            report.signatures_valid = false;
            report.add(Severity::Critical, Some(height), "transaction with unserializable txid");
        }
        if merkle::merkle_root(&txids) != block.header.merkle_root {
            report.merkle_roots_valid = false;
            report.add(Severity::Critical, Some(height), "merkle root does not match block transactions");
        }

        for (i, tx) in block.transactions.iter().enumerate() {
            match tx.tx_type {
                TxType::Coinbase => {
                    cumulative_supply = cumulative_supply.saturating_add(tx.total_output_value().unwrap_or(0));
                }
                _ => {
                    if crypto::verify_transaction(tx).is_err() {
                        report.signatures_valid = false;
                        report.add(
                            Severity::Critical,
                            Some(height),
                            format!("transaction {i} has an invalid signature"),
                        );
                    }
                }
            }
        }

        prev_hash = hash;
    }

    report.total_supply = cumulative_supply;
    if cumulative_supply > MAX_SUPPLY {
        report.supply_cap_valid = false;
        report.add(
            Severity::Critical,
            None,
            format!("cumulative coinbase issuance {cumulative_supply} exceeds supply cap {MAX_SUPPLY}"),
        );
    }

    if report.success() {
        info!(
            blocks = report.total_blocks,
            transactions = report.total_transactions,
            supply = report.total_supply,
            "startup chain validation passed"
        );
    } else {
        warn!(
            critical_issues = report.critical_issues().count(),
            "startup chain validation found issues"
        );
    }

    Ok(report)
}
