//! Shared test helpers for E2E and integration tests.

use xai_core::address::{Address, Network};
use xai_core::merkle;
use xai_core::types::*;

/// Simple deterministic address from a seed byte.
pub fn addr(seed: u8) -> Address {
    Address::from_pubkey_hash(Hash256([seed; 32]), Network::Mainnet)
}

/// Create a coinbase transaction with a unique height marker.
///
/// Folds `height` into `nonce` so that each coinbase produces a distinct
/// txid per block height, matching the production consensus engine's
/// behaviour.
pub fn make_coinbase(value: u64, recipient: Address, height: u64) -> Transaction {
    Transaction {
        version: 1,
        tx_type: TxType::Coinbase,
        sender: Address::coinbase_sentinel(Network::Mainnet),
        recipient,
        amount: value,
        fee: 0,
        nonce: height,
        timestamp: 1_700_000_000 + height,
        inputs: vec![],
        outputs: vec![TxOutput { amount: value, recipient }],
        lock_time: height,
        signature: vec![],
        public_key: vec![],
    }
}

/// Create a simple spending transaction (unsigned).
pub fn make_tx(
    sender: Address,
    inputs: Vec<OutPoint>,
    outputs: Vec<(u64, Address)>,
    nonce: u64,
) -> Transaction {
    let amount = outputs.iter().map(|(v, _)| v).sum();
    let recipient = outputs.first().map(|(_, a)| *a).unwrap_or(sender);
    Transaction {
        version: 1,
        tx_type: TxType::Transfer,
        sender,
        recipient,
        amount,
        fee: 0,
        nonce,
        timestamp: 1_700_000_000,
        inputs: inputs.into_iter().map(TxInput::spending).collect(),
        outputs: outputs
            .into_iter()
            .map(|(amount, recipient)| TxOutput { amount, recipient })
            .collect(),
        lock_time: 0,
        signature: vec![0; 64],
        public_key: vec![0; 32],
    }
}

/// Create a block with correct merkle root.
pub fn make_block(prev_hash: Hash256, timestamp: u64, txs: Vec<Transaction>) -> Block {
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
    let mr = merkle::merkle_root(&txids);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: mr,
            timestamp,
            difficulty_target: u64::MAX,
            nonce: 0,
        },
        transactions: txs,
    }
}
