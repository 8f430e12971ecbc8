//! Criterion benchmarks for xai-consensus critical operations.
//!
//! Covers: block validation and difficulty adjustment.
//! Uses a mock ChainState identical to the engine's own test suite.

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use xai_core::address::{Address, Network};
use xai_core::constants::BLOCK_TIME_SECS;
use xai_core::error::{TransactionError, XaiError};
use xai_core::traits::{BlockProducer, ChainState};
use xai_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxOutput, TxType, UtxoEntry,
};
use xai_core::{genesis, merkle, reward};

use xai_consensus::engine::{mine_block, ConsensusEngine};

// --- Mock ChainState (mirrors xai_consensus::engine's own test fixture) ---

struct MockChainState {
    headers: Vec<BlockHeader>,
    blocks: Vec<Block>,
    hashes: Vec<Hash256>,
    utxos: HashMap<OutPoint, UtxoEntry>,
    supply: u64,
    nonces: HashMap<Address, u64>,
}

impl MockChainState {
    fn with_genesis() -> Self {
        let genesis = genesis::genesis_block().clone();
        let hash = genesis.header.hash();
        Self {
            headers: vec![genesis.header.clone()],
            blocks: vec![genesis],
            hashes: vec![hash],
            utxos: HashMap::new(),
            supply: reward::block_reward(0),
            nonces: HashMap::new(),
        }
    }

    fn add_block(&mut self, timestamp: u64, difficulty: u64) {
        let prev_hash = *self.hashes.last().unwrap();
        let height = self.headers.len() as u64;
        let recipient = Address::from_pubkey_hash(Hash256([0xAA; 32]), Network::Mainnet);
        let amount = reward::block_reward(height);
        let coinbase = Transaction {
            version: 1,
            tx_type: TxType::Coinbase,
            sender: Address::coinbase_sentinel(Network::Mainnet),
            recipient,
            amount,
            fee: 0,
            nonce: 0,
            timestamp,
            inputs: vec![],
            outputs: vec![TxOutput { amount, recipient }],
            lock_time: height,
            signature: vec![],
            public_key: vec![],
        };
        let txid = coinbase.txid().unwrap();
        let mr = merkle::merkle_root(&[txid]);
        let header = BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: mr,
            timestamp,
            difficulty_target: difficulty,
            nonce: 0,
        };
        let hash = header.hash();
        let block = Block {
            header: header.clone(),
            transactions: vec![coinbase],
        };
        self.headers.push(header);
        self.blocks.push(block);
        self.hashes.push(hash);
        self.supply = self.supply.saturating_add(amount);
    }

    fn tip_height(&self) -> u64 {
        self.headers.len() as u64 - 1
    }

    fn tip_hash(&self) -> Hash256 {
        *self.hashes.last().unwrap()
    }
}

impl ChainState for MockChainState {
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), XaiError> {
        Ok((self.tip_height(), self.tip_hash()))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError> {
        Ok(self
            .hashes
            .iter()
            .position(|h| h == hash)
            .map(|i| self.headers[i].clone()))
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError> {
        Ok(self
            .hashes
            .iter()
            .position(|h| h == hash)
            .map(|i| self.blocks[i].clone()))
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError> {
        Ok(self.hashes.get(height as usize).copied())
    }

    fn circulating_supply(&self) -> Result<u64, XaiError> {
        Ok(self.supply)
    }

    fn next_nonce(&self, sender: &Address) -> Result<u64, XaiError> {
        Ok(*self.nonces.get(sender).unwrap_or(&0))
    }

    fn validate_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        if tx.inputs.is_empty() && tx.tx_type != TxType::Coinbase {
            return Err(TransactionError::EmptyInputsOrOutputs);
        }
        Ok(())
    }
}

fn make_engine_and_block() -> (ConsensusEngine, Block) {
    let cs = MockChainState::with_genesis();
    let tip_ts = cs.headers.last().unwrap().timestamp;
    let current_time = tip_ts + BLOCK_TIME_SECS;

    let engine = ConsensusEngine::with_clock(Arc::new(cs), move || current_time);

    let recipient = Address::from_pubkey_hash(Hash256([0xBB; 32]), Network::Mainnet);
    let mut block = engine
        .create_block_template(&recipient, tip_ts + BLOCK_TIME_SECS)
        .unwrap();
    mine_block(&mut block, u64::MAX);

    (engine, block)
}

fn bench_block_validation(c: &mut Criterion) {
    let (engine, block) = make_engine_and_block();

    c.bench_function("block_validation", |b| {
        b.iter(|| engine.validate_block(black_box(&block)))
    });
}

fn bench_difficulty_adjustment(c: &mut Criterion) {
    // Build a chain with 65 blocks so the LWMA window is fully populated.
    let mut cs = MockChainState::with_genesis();
    let base_ts = genesis::GENESIS_TIMESTAMP;
    for i in 1..=65 {
        cs.add_block(base_ts + i * BLOCK_TIME_SECS, u64::MAX / 2);
    }

    let tip_ts = cs.headers.last().unwrap().timestamp;
    let current_time = tip_ts + BLOCK_TIME_SECS;
    let engine = ConsensusEngine::with_clock(Arc::new(cs), move || current_time);

    let next_height = 66u64;

    c.bench_function("difficulty_adjustment", |b| {
        b.iter(|| engine.difficulty_target(black_box(next_height)))
    });
}

criterion_group!(benches, bench_block_validation, bench_difficulty_adjustment);
criterion_main!(benches);
