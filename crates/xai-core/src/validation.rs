//! Transaction validation for the XAI protocol.
//!
//! Two levels of validation:
//!
//! - **Structural** ([`validate_transaction_structure`]): context-free checks on
//!   transaction format and internal consistency. No external state required.
//! - **Contextual** ([`validate_transaction`]): UTXO-aware checks including
//!   signature verification, sender-ownership of spent outputs, nonce
//!   sequencing, and value conservation.
//!
//! Coinbase transactions are only structurally validated here; their reward
//! amount is checked during block validation (xai-consensus).

use std::collections::HashSet;

use crate::address::Address;
use crate::constants::{MAX_FUTURE_BLOCK_TIME, MAX_TX_SIZE};
use crate::crypto;
use crate::error::TransactionError;
use crate::types::{OutPoint, Transaction, TxType, UtxoEntry};

/// Summary of a successfully validated transaction.
///
/// Returned by [`validate_transaction`] after all checks pass. Contains
/// the computed fee and value totals for use in block template assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTransaction {
    /// Total value of all spent inputs, in coin-units.
    pub total_input: u64,
    /// Total value of all created outputs, in coin-units.
    pub total_output: u64,
    /// Actual fee collected by the miner (`total_input - total_output`).
    pub fee: u64,
}

/// Validate transaction structure (context-free).
///
/// Checks that apply to every transaction regardless of type:
/// - All output values are non-zero
/// - Total output value does not overflow
/// - Serialized size is within [`MAX_TX_SIZE`]
/// - Timestamp is not more than [`MAX_FUTURE_BLOCK_TIME`] ahead of the local clock
///
/// Remaining checks are type-specific; see [`validate_transfer_structure`]
/// and [`validate_coinbase_structure`].
pub fn validate_transaction_structure(tx: &Transaction) -> Result<(), TransactionError> {
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.amount == 0 {
            return Err(TransactionError::ZeroValueOutput(i));
        }
    }

    if tx.total_output_value().is_none() {
        return Err(TransactionError::ValueOverflow);
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if tx.timestamp > now + MAX_FUTURE_BLOCK_TIME {
        return Err(TransactionError::TimestampTooFarInFuture { got: tx.timestamp, now });
    }

    let encoded = bincode::encode_to_vec(tx, bincode::config::standard())
        .map_err(|e| TransactionError::Serialization(e.to_string()))?;
    if encoded.len() > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction {
            size: encoded.len(),
            max: MAX_TX_SIZE,
        });
    }

    match tx.tx_type {
        TxType::Transfer => validate_transfer_structure(tx)?,
        TxType::Coinbase => validate_coinbase_structure(tx)?,
        TxType::Governance => validate_governance_structure(tx)?,
    }

    Ok(())
}

/// Validate a coinbase's type-specific shape.
///
/// Coinbase transactions mint new value rather than spending it: they
/// carry no inputs, exactly one output, and pay no fee.
fn validate_coinbase_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if !tx.inputs.is_empty() {
        return Err(TransactionError::CoinbaseHasInputs);
    }
    if tx.outputs.len() != 1 {
        return Err(TransactionError::InvalidCoinbase(
            "must have exactly one output".into(),
        ));
    }
    if tx.fee != 0 {
        return Err(TransactionError::InvalidCoinbase("fee must be zero".into()));
    }
    Ok(())
}

/// Validate a transfer's type-specific shape.
///
/// - Non-empty inputs and outputs
/// - No null outpoints
/// - No duplicate input outpoints
/// - A signature and a 33-byte compressed public key are present
fn validate_transfer_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if input.previous_output.is_null() {
            return Err(TransactionError::NullOutpointInRegularTx);
        }
        if !seen.insert(&input.previous_output) {
            return Err(TransactionError::DuplicateInput(
                input.previous_output.to_string(),
            ));
        }
    }

    if tx.signature.is_empty() {
        return Err(TransactionError::InvalidSignature);
    }
    if tx.public_key.len() != 33 {
        return Err(TransactionError::InvalidSignature);
    }

    Ok(())
}

/// Validate a governance transaction's type-specific shape.
///
/// Governance transactions carry no value: no inputs, no outputs, zero
/// amount. They still require a valid signature from `sender` so that
/// a proposal or vote can be attributed to an account.
fn validate_governance_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if !tx.inputs.is_empty() || !tx.outputs.is_empty() {
        return Err(TransactionError::InvalidCoinbase(
            "governance transactions may not move value".into(),
        ));
    }
    if tx.amount != 0 {
        return Err(TransactionError::InvalidCoinbase(
            "governance transactions carry zero amount".into(),
        ));
    }
    if tx.signature.is_empty() || tx.public_key.len() != 33 {
        return Err(TransactionError::InvalidSignature);
    }
    Ok(())
}

/// Validate a transfer transaction against the UTXO set and sender nonce
/// state (contextual).
///
/// Performs full validation including structural checks plus:
/// - The signature verifies and the public key hashes to `tx.sender`
/// - `tx.nonce` matches the sender's next expected nonce
/// - Every spent outpoint references an existing, unspent, mature UTXO
///   owned by `tx.sender`
/// - Total input value covers total output value (fee >= 0)
///
/// Returns a [`ValidatedTransaction`] with the computed fee on success.
///
/// Coinbase and governance transactions are rejected here; coinbase
/// reward amounts are checked during block validation, and governance
/// transactions carry no UTXO-level effects to verify.
///
/// `get_utxo` and `get_next_nonce` let the caller supply any backing
/// store (RocksDB, an in-memory map, ...).
pub fn validate_transaction<F, G>(
    tx: &Transaction,
    get_utxo: F,
    get_next_nonce: G,
    current_height: u64,
) -> Result<ValidatedTransaction, TransactionError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
    G: Fn(&Address) -> u64,
{
    if tx.tx_type != TxType::Transfer {
        return Err(TransactionError::NotATransfer);
    }

    validate_transaction_structure(tx)?;

    crypto::verify_transaction(tx).map_err(|_| TransactionError::InvalidSignature)?;

    let expected_nonce = get_next_nonce(&tx.sender);
    if tx.nonce != expected_nonce {
        return Err(TransactionError::BadNonce {
            got: tx.nonce,
            expected: expected_nonce,
        });
    }

    let mut total_input: u64 = 0;

    for (i, input) in tx.inputs.iter().enumerate() {
        let utxo = get_utxo(&input.previous_output).ok_or_else(|| {
            TransactionError::UnknownUtxo(input.previous_output.to_string())
        })?;

        if !utxo.is_mature(current_height) {
            return Err(TransactionError::ImmatureCoinbase(
                input.previous_output.to_string(),
            ));
        }

        if utxo.output.recipient.pubkey_hash() != tx.sender.pubkey_hash() {
            return Err(TransactionError::InputNotOwnedBySender(i));
        }

        total_input = total_input
            .checked_add(utxo.output.amount)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_output = tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;

    if total_input < total_output {
        return Err(TransactionError::InsufficientFunds {
            have: total_input,
            need: total_output,
        });
    }

    let fee = total_input - total_output;
    if fee < tx.fee {
        return Err(TransactionError::InsufficientFunds {
            have: fee,
            need: tx.fee,
        });
    }

    Ok(ValidatedTransaction {
        total_input,
        total_output,
        fee,
    })
}
