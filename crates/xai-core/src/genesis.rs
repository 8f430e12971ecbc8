//! Genesis block definition for the XAI network.
//!
//! The genesis block is the first block in the chain (height 0). It contains
//! a single coinbase transaction paying the regular height-0 schedule reward
//! to a deterministic genesis recipient address — there is no premine.
//!
//! All values are hardcoded and deterministic — every node computes the
//! identical genesis block.

use std::sync::LazyLock;

use crate::address::{Address, Network};
use crate::merkle;
use crate::reward;
use crate::types::{Block, BlockHeader, Hash256, Transaction, TxOutput, TxType};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Message hashed to derive the genesis recipient address (like Bitcoin's
/// "The Times" headline, but folded into the address rather than carried in
/// a transaction field).
pub const GENESIS_MESSAGE: &[u8] = b"XAI genesis 2026: proof of work, no premine, capped supply.";

/// Cached genesis data, computed once on first access.
struct GenesisData {
    block: Block,
    hash: Hash256,
    coinbase_txid: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

/// Build the genesis block and cache derived values.
fn build_genesis() -> GenesisData {
    let coinbase = build_genesis_coinbase();
    // Hardcoded coinbase — serialization cannot fail.
    let coinbase_txid = coinbase
        .txid()
        .expect("genesis coinbase is hardcoded valid data");
    let mr = merkle::merkle_root(&[coinbase_txid]);

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: mr,
            timestamp: GENESIS_TIMESTAMP,
            difficulty_target: u64::MAX,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    let hash = block.header.hash();

    GenesisData {
        block,
        hash,
        coinbase_txid,
    }
}

/// The deterministic genesis recipient address: `SHA256(GENESIS_MESSAGE)` truncated
/// to a pubkey hash, on mainnet. No keypair controls it; its sole purpose is to
/// make the genesis coinbase output (and therefore the genesis block hash) a
/// function of `GENESIS_MESSAGE` rather than an arbitrary constant.
pub fn genesis_recipient() -> Address {
    Address::from_pubkey_hash(Hash256::sha256(GENESIS_MESSAGE), Network::Mainnet)
}

/// Build the genesis coinbase transaction.
///
/// Pays the height-0 schedule reward (no inputs, one output) to
/// [`genesis_recipient`]. Identical in shape to every other coinbase
/// transaction in the chain — genesis carries no premine.
fn build_genesis_coinbase() -> Transaction {
    let recipient = genesis_recipient();
    let amount = reward::block_reward(0);

    Transaction {
        version: 1,
        tx_type: TxType::Coinbase,
        sender: Address::coinbase_sentinel(Network::Mainnet),
        recipient,
        amount,
        fee: 0,
        nonce: 0,
        timestamp: GENESIS_TIMESTAMP,
        inputs: vec![],
        outputs: vec![TxOutput { amount, recipient }],
        lock_time: 0,
        signature: vec![],
        public_key: vec![],
    }
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block header hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

/// The transaction ID of the genesis coinbase.
pub fn genesis_coinbase_txid() -> Hash256 {
    GENESIS.coinbase_txid
}

/// Check whether a block is the genesis block by comparing header hashes.
pub fn is_genesis(block: &Block) -> bool {
    block.header.hash() == GENESIS.hash
}
