//! Block validation for the XAI protocol.
//!
//! Two levels of validation:
//!
//! - **Structural** ([`validate_block_structure`]): context-free checks on
//!   block format, merkle root, coinbase position, and transaction structure.
//! - **Contextual** ([`validate_block`]): full validation including header
//!   linkage, proof-of-work, timestamp, coinbase reward, supply cap, and
//!   contextual transaction validation with double-spend detection.
//!
//! The genesis block (height 0) is **not** validated through this module.
//! Use [`genesis::is_genesis`](crate::genesis::is_genesis) instead.

use std::collections::HashSet;

use crate::address::Address;
use crate::constants::{MAX_BLOCK_SIZE, MAX_FUTURE_BLOCK_TIME, MAX_SUPPLY};
use crate::error::{BlockError, TransactionError};
use crate::merkle;
use crate::types::{Block, Hash256, OutPoint, UtxoEntry};
use crate::validation;

/// Context required for full block validation.
///
/// The caller provides these values from the chain state. They describe
/// the expected parent linkage, difficulty, timing, and reward for the
/// block being validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    /// Height of the block being validated.
    pub height: u64,
    /// Expected previous block hash (the parent's header hash).
    pub prev_hash: Hash256,
    /// Parent block's timestamp (for monotonicity check).
    pub prev_timestamp: u64,
    /// Expected difficulty target for this height.
    pub expected_difficulty: u64,
    /// Current wall-clock time in Unix seconds (for future timestamp check).
    pub current_time: u64,
    /// Expected base block reward for this height (from halving schedule).
    pub block_reward: u64,
    /// Cumulative coin supply issued by all blocks up to and not including
    /// this one. Used to enforce [`MAX_SUPPLY`].
    pub cumulative_supply: u64,
}

/// Summary of a successfully validated block.
///
/// Returned by [`validate_block`] after all checks pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all non-coinbase transaction fees in coin-units.
    pub total_fees: u64,
    /// Total value of all coinbase outputs in coin-units.
    pub coinbase_value: u64,
}

/// Split a 32-byte hash into four 64-bit little-endian limbs, least
/// significant limb first (`limbs[0]` holds `hash.0[0..8]`).
fn hash_limbs(hash: &Hash256) -> [u64; 4] {
    let mut limbs = [0u64; 4];
    for (i, limb) in limbs.iter_mut().enumerate() {
        *limb = u64::from_le_bytes(hash.0[i * 8..i * 8 + 8].try_into().expect("8-byte chunk"));
    }
    limbs
}

/// Expand a u64 difficulty target into the full 256-bit target it denotes.
///
/// `2^256 - 1 = (2^64 - 1) * (2^192 + 2^128 + 2^64 + 1)`, so scaling
/// `u64::MAX` proportionally up to a 256-bit value of the same "easiness"
/// just means placing `difficulty_target` in each of the four 64-bit limbs.
/// A target of `u64::MAX` therefore expands to the all-ones 256-bit value
/// (accepts any hash); a target of `0` expands to the all-zero value
/// (accepts nothing).
fn expand_target(difficulty_target: u64) -> [u64; 4] {
    [difficulty_target; 4]
}

/// Compare two 256-bit values given as little-endian limb arrays: `a <= b`.
fn limbs_le(a: &[u64; 4], b: &[u64; 4]) -> bool {
    for i in (0..4).rev() {
        if a[i] != b[i] {
            return a[i] < b[i];
        }
    }
    true
}

/// Check if a block header satisfies its own proof-of-work difficulty target.
///
/// Treats the full 32-byte header hash as a 256-bit little-endian integer
/// and checks it against the full 256-bit expansion of `difficulty_target`
/// (see [`expand_target`]), not merely its low 64 bits. A target of
/// `u64::MAX` accepts any hash (easiest difficulty).
pub fn header_satisfies_pow(header: &crate::types::BlockHeader) -> bool {
    let hash = header.hash();
    limbs_le(&hash_limbs(&hash), &expand_target(header.difficulty_target))
}

/// Check if a block header hash satisfies the proof-of-work difficulty target.
pub fn check_pow(block: &Block) -> bool {
    header_satisfies_pow(&block.header)
}

/// Validate block structure (context-free).
///
/// Checks:
/// - At least one transaction (the coinbase)
/// - First transaction is coinbase, no others are
/// - No duplicate transaction IDs
/// - Merkle root in header matches computed root
/// - Block serialized size is within [`MAX_BLOCK_SIZE`]
/// - Proof-of-work satisfies the header's claimed difficulty
/// - All transactions pass structural validation
pub fn validate_block_structure(block: &Block) -> Result<(), BlockError> {
    // --- Must have at least one transaction (coinbase) ---

    if block.transactions.is_empty() {
        return Err(BlockError::NoCoinbase);
    }

    // --- First transaction must be coinbase ---

    if !block.transactions[0].is_coinbase() {
        return Err(BlockError::FirstTxNotCoinbase);
    }

    // --- No other transaction may be coinbase ---

    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        if tx.is_coinbase() {
            return Err(BlockError::MultipleCoinbase);
        }
        // Structural validation for non-coinbase transactions
        validation::validate_transaction_structure(tx).map_err(|e| {
            BlockError::TransactionError {
                index: i,
                source: e,
            }
        })?;
    }

    // --- Coinbase structural validation ---

    validation::validate_transaction_structure(&block.transactions[0]).map_err(|e| {
        BlockError::TransactionError {
            index: 0,
            source: e,
        }
    })?;

    // --- No duplicate txids ---

    let mut txids = HashSet::with_capacity(block.transactions.len());
    let mut txid_vec = Vec::with_capacity(block.transactions.len());

    for (i, tx) in block.transactions.iter().enumerate() {
        let txid = tx.txid().map_err(|e| BlockError::TransactionError {
            index: i,
            source: e,
        })?;
        if !txids.insert(txid) {
            return Err(BlockError::DuplicateTxid(txid.to_string()));
        }
        txid_vec.push(txid);
    }

    // --- Merkle root ---

    let computed_root = merkle::merkle_root(&txid_vec);
    if block.header.merkle_root != computed_root {
        return Err(BlockError::InvalidMerkleRoot);
    }

    // --- Block size ---

    let encoded = bincode::encode_to_vec(block, bincode::config::standard())
        .map_err(|e| BlockError::TransactionError {
            index: 0,
            source: TransactionError::Serialization(e.to_string()),
        })?;
    if encoded.len() > MAX_BLOCK_SIZE {
        return Err(BlockError::OversizedBlock {
            size: encoded.len(),
            max: MAX_BLOCK_SIZE,
        });
    }

    // --- PoW (satisfies the header's own claimed difficulty) ---

    if !check_pow(block) {
        return Err(BlockError::InvalidPoW);
    }

    Ok(())
}

/// Validate a block against the chain state (contextual).
///
/// Performs structural validation, then:
/// - Verifies `prev_hash` matches the expected parent
/// - Verifies `difficulty_target` matches the expected difficulty
/// - Verifies timestamp is after the parent and not too far in the future
/// - Validates all non-coinbase transactions contextually (signature,
///   UTXO ownership, nonce sequencing, maturity)
/// - Detects double-spending across transactions within the block
/// - Verifies coinbase reward does not exceed `block_reward + total_fees`
/// - Verifies the new cumulative supply does not exceed [`MAX_SUPPLY`]
///
/// Returns a [`ValidatedBlock`] with computed fees and coinbase value on success.
///
/// `get_utxo` looks up UTXOs from the state **before** this block. Intra-block
/// spending (spending an output created in the same block) is not permitted.
/// `get_next_nonce` looks up the next expected nonce for a sender, also as of
/// the state before this block.
pub fn validate_block<F, G>(
    block: &Block,
    context: &BlockContext,
    get_utxo: F,
    get_next_nonce: G,
) -> Result<ValidatedBlock, BlockError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
    G: Fn(&Address) -> u64,
{
    // --- Structural checks ---

    validate_block_structure(block)?;

    // --- Header linkage ---

    if block.header.prev_hash != context.prev_hash {
        return Err(BlockError::InvalidPrevHash);
    }

    // --- Difficulty ---

    if block.header.difficulty_target != context.expected_difficulty {
        return Err(BlockError::InvalidDifficulty {
            got: block.header.difficulty_target,
            expected: context.expected_difficulty,
        });
    }

    // --- Timestamp ---

    if block.header.timestamp <= context.prev_timestamp {
        return Err(BlockError::TimestampNotAfterParent);
    }

    let max_time = context.current_time.saturating_add(MAX_FUTURE_BLOCK_TIME);
    if block.header.timestamp > max_time {
        return Err(BlockError::TimestampTooFar(
            block.header.timestamp as i64 - context.current_time as i64,
        ));
    }

    // --- Non-coinbase transactions: contextual validation + double-spend detection ---

    let mut block_spent = HashSet::new();
    let mut total_fees: u64 = 0;

    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        // Cross-transaction double-spend check
        for input in &tx.inputs {
            if !block_spent.insert(input.previous_output.clone()) {
                return Err(BlockError::DoubleSpend(
                    input.previous_output.to_string(),
                ));
            }
        }

        // Full contextual transaction validation
        let validated = validation::validate_transaction(
            tx,
            &get_utxo,
            &get_next_nonce,
            context.height,
        )
        .map_err(|e| BlockError::TransactionError {
            index: i,
            source: e,
        })?;

        total_fees = total_fees
            .checked_add(validated.fee)
            .ok_or(BlockError::TransactionError {
                index: i,
                source: TransactionError::ValueOverflow,
            })?;
    }

    // --- Coinbase reward ---

    let coinbase = &block.transactions[0];
    let coinbase_value = coinbase
        .total_output_value()
        .ok_or(BlockError::TransactionError {
            index: 0,
            source: TransactionError::ValueOverflow,
        })?;

    let max_reward = context
        .block_reward
        .checked_add(total_fees)
        .ok_or(BlockError::TransactionError {
            index: 0,
            source: TransactionError::ValueOverflow,
        })?;

    if coinbase_value > max_reward {
        return Err(BlockError::InvalidReward {
            got: coinbase_value,
            expected: max_reward,
        });
    }

    // --- Supply cap ---

    let new_supply = context
        .cumulative_supply
        .checked_add(coinbase_value)
        .ok_or(BlockError::SupplyCapExceeded {
            total: u64::MAX,
            cap: MAX_SUPPLY,
        })?;
    if new_supply > MAX_SUPPLY {
        return Err(BlockError::SupplyCapExceeded {
            total: new_supply,
            cap: MAX_SUPPLY,
        });
    }

    Ok(ValidatedBlock {
        total_fees,
        coinbase_value,
    })
}
