//! Error types for the XAI protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("unknown UTXO: {0}")] UnknownUtxo(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("invalid signature")] InvalidSignature,
    #[error("duplicate input: {0}")] DuplicateInput(String),
    #[error("oversized: {size} > {max}")] OversizedTransaction { size: usize, max: usize },
    #[error("empty inputs or outputs")] EmptyInputsOrOutputs,
    #[error("value overflow")] ValueOverflow,
    #[error("invalid coinbase: {0}")] InvalidCoinbase(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("immature coinbase UTXO: {0}")] ImmatureCoinbase(String),
    #[error("zero-value output at index {0}")] ZeroValueOutput(usize),
    #[error("null outpoint in non-coinbase transaction")] NullOutpointInRegularTx,
    #[error("nonce {got} does not match expected {expected} for sender")] BadNonce { got: u64, expected: u64 },
    #[error("fee {0} below minimum")] FeeTooLow(u64),
    #[error("input {0} is not owned by the transaction's sender")] InputNotOwnedBySender(usize),
    #[error("coinbase transaction may not carry inputs")] CoinbaseHasInputs,
    #[error("non-transfer transaction type in transfer-only validation path")] NotATransfer,
    #[error("transaction timestamp {got} too far in the future (now {now})")] TimestampTooFarInFuture { got: u64, now: u64 },
    #[error("UTXO {0} already reserved by a pending transaction")] UtxoLocked(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid PoW")] InvalidPoW,
    #[error("invalid prev hash")] InvalidPrevHash,
    #[error("timestamp too far in the future: {0}")] TimestampTooFar(i64),
    #[error("timestamp not after parent")] TimestampNotAfterParent,
    #[error("invalid merkle root")] InvalidMerkleRoot,
    #[error("invalid reward: got {got}, expected {expected}")] InvalidReward { got: u64, expected: u64 },
    #[error("supply cap exceeded: {total} > {cap}")] SupplyCapExceeded { total: u64, cap: u64 },
    #[error("oversized: {size} > {max}")] OversizedBlock { size: usize, max: usize },
    #[error("no coinbase")] NoCoinbase,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("duplicate txid: {0}")] DuplicateTxid(String),
    #[error("double spend across transactions: {0}")] DoubleSpend(String),
    #[error("invalid difficulty: got {got}, expected {expected}")] InvalidDifficulty { got: u64, expected: u64 },
    #[error("tx error in {index}: {source}")] TransactionError { index: usize, source: TransactionError },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("reorg depth {depth} exceeds max allowed {max}")] ReorgTooDeep { depth: u64, max: u64 },
    #[error("block conflicts with checkpoint at height {0}")] CheckpointConflict(u64),
    #[error("chain split with equal work, tie-break by first-seen")] EqualWorkTie,
    #[error("unknown parent block: {0}")] UnknownParent(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("peer disconnected: {0}")] PeerDisconnected(String),
    #[error("message too large: {size}")] MessageTooLarge { size: usize },
    #[error("timeout")] Timeout,
    #[error("peer banned: {0}")] PeerBanned(String),
    #[error("protocol violation: {0}")] ProtocolViolation(String),
    #[error("handshake failed: {0}")] HandshakeFailed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature verification failed")] VerificationFailed,
    #[error("pubkey hash does not match expected sender")] PubkeyHashMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid length")] InvalidLength,
    #[error("invalid character: {0}")] InvalidCharacter(char),
    #[error("unknown network: {0}")] UnknownNetwork(String),
    #[error("mixed case")] MixedCase,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("conflicts with pool tx {existing_txid} on outpoint {outpoint}")] Conflict { new_txid: String, existing_txid: String, outpoint: String },
    #[error("pool full")] PoolFull,
    #[error("internal: {0}")] Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("undo data missing for block: {0}")] UndoDataMissing(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")] DuplicateBlock(String),
}

/// Top-level error aggregating every component error into the taxonomy the
/// node's operational surfaces (logs, RPC error codes, peer-ban reasons)
/// are organized around: validation, verification, consensus, state,
/// network, timeout, capacity.
#[derive(Error, Debug)]
pub enum XaiError {
    #[error("validation: {0}")] Validation(#[from] TransactionError),
    #[error("validation: {0}")] BlockValidation(#[from] BlockError),
    #[error("verification: {0}")] Verification(#[from] CryptoError),
    #[error("validation: {0}")] AddressValidation(#[from] AddressError),
    #[error("consensus: {0}")] Consensus(#[from] ConsensusError),
    #[error("state: {0}")] State(#[from] ChainStateError),
    #[error("capacity: {0}")] Capacity(#[from] MempoolError),
    #[error("network: {0}")] Network(#[from] NetworkError),
    #[error("state: storage failure: {0}")] Storage(String),
}
