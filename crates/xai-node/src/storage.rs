//! RocksDB-backed persistent chain state storage.
//!
//! Implements [`ChainStore`] using RocksDB column families for blocks, headers,
//! UTXOs, height index, undo data, and metadata. All mutations use atomic
//! [`WriteBatch`] for crash safety.
//!
//! On first open, automatically connects the genesis block.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, SliceTransform, WriteBatch, DB};

use xai_core::address::Address;
use xai_core::chain_state::{ChainStore, ConnectBlockResult, DisconnectBlockResult};
use xai_core::error::{ChainStateError, XaiError};
use xai_core::genesis;
use xai_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, UtxoEntry};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_HEADERS: &str = "headers";
const CF_UTXOS: &str = "utxos";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_UNDO: &str = "undo";
const CF_METADATA: &str = "metadata";
const CF_ADDRESS_INDEX: &str = "address_index";
const CF_NONCES: &str = "nonces";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_HEADERS,
    CF_UTXOS,
    CF_HEIGHT_INDEX,
    CF_UNDO,
    CF_METADATA,
    CF_ADDRESS_INDEX,
    CF_NONCES,
];

// --- Metadata keys ---

const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TIP_HASH: &[u8] = b"tip_hash";
const META_CIRCULATING_SUPPLY: &[u8] = b"circulating_supply";
const META_UTXO_COUNT: &[u8] = b"utxo_count";

/// Undo data for reverting a connected block.
///
/// Stores the UTXOs consumed by the block's transactions so they can be
/// restored during chain reorganization.
#[derive(bincode::Encode, bincode::Decode)]
struct BlockUndo {
    /// Spent UTXOs in the order they were consumed.
    spent_utxos: Vec<(OutPoint, UtxoEntry)>,
    /// Prior next-nonce value per sender touched by this block (first value
    /// seen before the block's first transaction from that sender), or
    /// `None` if the sender had no nonce entry before this block.
    nonce_updates: Vec<(Address, Option<u64>)>,
}

/// RocksDB-backed persistent chain state storage.
///
/// Stores blocks, headers, UTXOs, height index, undo data, and aggregate
/// metadata in separate column families. All mutations are atomic via
/// [`WriteBatch`].
///
/// On first open, automatically connects the genesis block.
pub struct RocksStore {
    db: DB,
    /// Outpoints reserved for pending transactions: outpoint → lock expiry (unix secs).
    ///
    /// Held in memory, not in the database — a reservation is only meaningful
    /// to the node process that made it, and doesn't need to survive restart.
    pending_locks: parking_lot::Mutex<std::collections::HashMap<OutPoint, u64>>,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist. If the database is
    /// empty (no tip), automatically connects the genesis block.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, XaiError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                // Address index keys are prefixed by a fixed 20-byte pubkey hash.
                if *name == CF_ADDRESS_INDEX {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(20));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| XaiError::Storage(e.to_string()))?;

        let mut store = Self { db, pending_locks: parking_lot::Mutex::new(std::collections::HashMap::new()) };

        // Auto-connect genesis if the chain is empty.
        if store.is_empty() {
            let genesis = genesis::genesis_block();
            store.connect_block(genesis, 0)?;
        }

        // Migrate: build address index if empty but UTXOs exist.
        store.migrate_address_index()?;

        Ok(store)
    }

    /// Current circulating supply in coin-units.
    pub fn circulating_supply_checked(&self) -> Result<u64, XaiError> {
        self.get_meta_u64(META_CIRCULATING_SUPPLY)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), XaiError> {
        self.db.flush().map_err(|e| XaiError::Storage(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    ///
    /// Compaction merges SSTables, reclaims space from deleted keys, and
    /// improves read performance. Call this during low-activity periods (e.g.
    /// on startup after initial sync completes).
    pub fn compact(&self) -> Result<(), XaiError> {
        for cf_name in ALL_CFS {
            let cf = self.cf_handle(cf_name)?;
            self.db.compact_range_cf(&cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Delete full block data for blocks older than `keep_recent` blocks
    /// from the current tip. Headers and undo data are preserved.
    ///
    /// Returns the number of blocks pruned.
    pub fn prune_blocks(&self, keep_recent: u64) -> Result<u64, XaiError> {
        let (tip_height, _) = self.chain_tip()?;

        // Blocks at heights 1..=cutoff are eligible for pruning. Height 0
        // (genesis) is never pruned.
        let cutoff = tip_height.saturating_sub(keep_recent);
        if cutoff == 0 {
            return Ok(0);
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let mut batch = WriteBatch::default();
        let mut pruned_count = 0u64;

        for height in 1..=cutoff {
            let hash_bytes = match self
                .db
                .get_cf(&cf_height, Self::height_key(height))
                .map_err(|e| XaiError::Storage(e.to_string()))?
            {
                Some(bytes) if bytes.len() == 32 => bytes,
                _ => continue,
            };

            if self
                .db
                .get_cf(&cf_blocks, &hash_bytes)
                .map_err(|e| XaiError::Storage(e.to_string()))?
                .is_some()
            {
                batch.delete_cf(cf_blocks, &hash_bytes);
                pruned_count += 1;
            }
        }

        if pruned_count > 0 {
            self.db
                .write(batch)
                .map_err(|e| XaiError::Storage(e.to_string()))?;
            tracing::info!("pruned {} full block(s) up to height {}", pruned_count, cutoff);
        }

        Ok(pruned_count)
    }

    /// Returns true if the block at the given height has been pruned
    /// (header exists but full block data does not).
    pub fn is_block_pruned(&self, height: u64) -> Result<bool, XaiError> {
        let hash = match self.get_block_hash(height)? {
            Some(h) => h,
            None => return Ok(false),
        };

        if self.get_block_header(&hash)?.is_none() {
            return Ok(false);
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let has_full_data = self
            .db
            .get_cf(&cf_blocks, hash.as_bytes())
            .map_err(|e| XaiError::Storage(e.to_string()))?
            .is_some();

        Ok(!has_full_data)
    }

    // --- Internal helpers ---

    /// Get a u64 from the metadata column family.
    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, XaiError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
            Some(_) => Err(XaiError::Storage("invalid metadata value length".into())),
            None => Ok(0),
        }
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, XaiError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| XaiError::Storage(format!("missing column family: {name}")))
    }

    /// Encode an OutPoint as a bincode key.
    fn encode_outpoint(outpoint: &OutPoint) -> Result<Vec<u8>, XaiError> {
        bincode::encode_to_vec(outpoint, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    /// Encode an address index key: pubkey_hash(20) || txid(32) || index(8, BE).
    fn encode_address_index_key(pubkey_hash: &xai_core::types::Hash160, outpoint: &OutPoint) -> [u8; 60] {
        let mut key = [0u8; 60];
        key[0..20].copy_from_slice(pubkey_hash.as_bytes());
        key[20..52].copy_from_slice(outpoint.txid.as_bytes());
        key[52..60].copy_from_slice(&outpoint.index.to_be_bytes());
        key
    }

    /// Encode an address as a bincode key for the nonce index.
    fn encode_address_key(address: &Address) -> Result<Vec<u8>, XaiError> {
        bincode::encode_to_vec(address, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))
    }

    /// Look up the next expected nonce for a sender (0 if never seen).
    pub fn next_nonce(&self, sender: &Address) -> Result<u64, XaiError> {
        let cf = self.cf_handle(CF_NONCES)?;
        let key = Self::encode_address_key(sender)?;
        match self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
            _ => Ok(0),
        }
    }

    /// Compute the total coinbase output value for a block.
    fn coinbase_value(block: &Block) -> u64 {
        block
            .coinbase()
            .map(|cb| cb.outputs.iter().map(|o| o.amount).sum())
            .unwrap_or(0)
    }

    /// Process a transaction's inputs: look up the spent UTXOs and record
    /// them in `undo` so they can be restored on disconnect. Does not
    /// mutate storage -- the caller stages deletions into the WriteBatch.
    ///
    /// Returns the number of UTXOs spent.
    fn collect_spent_utxos(&self, tx: &Transaction, undo: &mut BlockUndo) -> Result<usize, XaiError> {
        if tx.is_coinbase() {
            return Ok(0);
        }

        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let mut spent = 0;

        for input in &tx.inputs {
            let key = Self::encode_outpoint(&input.previous_output)?;
            if let Some(data) = self
                .db
                .get_cf(&cf_utxos, &key)
                .map_err(|e| XaiError::Storage(e.to_string()))?
            {
                let (entry, _): (UtxoEntry, _) =
                    bincode::decode_from_slice(&data, bincode::config::standard())
                        .map_err(|e| XaiError::Storage(e.to_string()))?;
                undo.spent_utxos.push((input.previous_output.clone(), entry));
                spent += 1;
            }
        }

        Ok(spent)
    }

    /// One-time migration: build the address index from existing UTXOs.
    fn migrate_address_index(&self) -> Result<(), XaiError> {
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;

        let mut iter = self.db.iterator_cf(&cf_addr, rocksdb::IteratorMode::Start);
        if iter.next().is_some() {
            return Ok(()); // Already populated.
        }
        drop(iter);

        let utxo_count = self.get_meta_u64(META_UTXO_COUNT)?;
        if utxo_count == 0 {
            return Ok(());
        }

        tracing::info!("migrating address index for {} UTXOs", utxo_count);

        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let mut batch = WriteBatch::default();
        let mut count = 0u64;

        let iter = self.db.iterator_cf(&cf_utxos, rocksdb::IteratorMode::Start);
        for item in iter {
            let (key_bytes, value_bytes) = item.map_err(|e| XaiError::Storage(e.to_string()))?;
            let (outpoint, _): (OutPoint, _) =
                bincode::decode_from_slice(&key_bytes, bincode::config::standard())
                    .map_err(|e| XaiError::Storage(e.to_string()))?;
            let (entry, _): (UtxoEntry, _) =
                bincode::decode_from_slice(&value_bytes, bincode::config::standard())
                    .map_err(|e| XaiError::Storage(e.to_string()))?;

            let addr_key =
                Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), &outpoint);
            batch.put_cf(cf_addr, addr_key, []);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch).map_err(|e| XaiError::Storage(e.to_string()))?;
            tracing::info!("address index migration complete: {} entries", count);
        }

        Ok(())
    }

    /// Get all UTXOs owned by a given pubkey hash using the address index.
    ///
    /// Uses RocksDB prefix iteration over `CF_ADDRESS_INDEX` for O(k) lookup
    /// where k is the number of UTXOs owned by this address.
    pub fn get_utxos_by_address(
        &self,
        pubkey_hash: &xai_core::types::Hash160,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let prefix = pubkey_hash.as_bytes();

        let mut result = Vec::new();
        let iter = self.db.prefix_iterator_cf(&cf_addr, prefix);

        for item in iter {
            let (key_bytes, _) = item.map_err(|e| XaiError::Storage(e.to_string()))?;

            if key_bytes.len() != 60 || &key_bytes[0..20] != prefix {
                break;
            }

            let mut txid_bytes = [0u8; 32];
            txid_bytes.copy_from_slice(&key_bytes[20..52]);
            let index = u64::from_be_bytes(key_bytes[52..60].try_into().unwrap());
            let outpoint = OutPoint {
                txid: Hash256(txid_bytes),
                index,
            };

            let utxo_key = Self::encode_outpoint(&outpoint)?;
            if let Some(utxo_data) = self
                .db
                .get_cf(&cf_utxos, &utxo_key)
                .map_err(|e| XaiError::Storage(e.to_string()))?
            {
                let (entry, _): (UtxoEntry, _) =
                    bincode::decode_from_slice(&utxo_data, bincode::config::standard())
                        .map_err(|e| XaiError::Storage(e.to_string()))?;
                result.push((outpoint, entry));
            }
        }

        Ok(result)
    }

    /// Get a geometric block locator for chain synchronization.
    ///
    /// Returns hashes in the pattern: tip, tip-1, tip-2, tip-4, tip-8, ..., genesis.
    /// This allows efficient common ancestor discovery with O(log n) hashes.
    pub fn get_block_locator(&self) -> Result<Vec<Hash256>, XaiError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            return Ok(vec![Hash256::ZERO]);
        }

        let mut locator = Vec::new();
        let mut step = 1u64;
        let mut height = tip_height;

        loop {
            if let Some(hash) = self.get_block_hash(height)? {
                locator.push(hash);
            }

            if height == 0 {
                break;
            }

            // Geometric backoff: 1, 1, 2, 4, 8, 16, ...
            if height <= step {
                height = 0;
            } else {
                height -= step;
            }

            if locator.len() > 10 {
                step *= 2;
            }
        }

        if locator.last() != Some(&Hash256::ZERO) {
            if let Some(genesis_hash) = self.get_block_hash(0)? {
                if !locator.contains(&genesis_hash) {
                    locator.push(genesis_hash);
                }
            }
        }

        Ok(locator)
    }

    /// Look up the height at which a given hash appears in the height index.
    ///
    /// Iterates the height index from the most-recent end backwards, since
    /// recent blocks are the common case for locator and header-sync queries.
    /// Returns `None` if the hash is not in the main chain.
    fn get_height_for_hash(&self, hash: &Hash256) -> Result<Option<u64>, XaiError> {
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let iter = self.db.iterator_cf(&cf_height, rocksdb::IteratorMode::End);
        for item in iter {
            let (key_bytes, value_bytes) = item.map_err(|e| XaiError::Storage(e.to_string()))?;
            if value_bytes.len() == 32 {
                let stored_hash = Hash256(value_bytes[..32].try_into().unwrap());
                if stored_hash == *hash && key_bytes.len() == 8 {
                    let height = u64::from_be_bytes(key_bytes[..8].try_into().unwrap());
                    return Ok(Some(height));
                }
            }
        }
        Ok(None)
    }

    /// Find the first locator hash that we have in our chain.
    ///
    /// Returns (height, hash) of the common ancestor, or None if no match.
    pub fn find_common_ancestor(&self, locator: &[Hash256]) -> Result<Option<(u64, Hash256)>, XaiError> {
        for hash in locator {
            if self.get_block_header(hash)?.is_none() {
                continue;
            }
            if let Some(height) = self.get_height_for_hash(hash)? {
                return Ok(Some((height, *hash)));
            }
            // We have the block but it is not on our main chain (stale/orphan).
            // Keep looking for a deeper common ancestor.
        }

        Ok(None)
    }

    /// Get up to `max_count` headers after the given hash.
    ///
    /// Caps at 2000 headers maximum per request. Uses the height index for an
    /// O(result_count) scan rather than O(chain_length).
    pub fn get_headers_after(&self, hash: &Hash256, max_count: usize) -> Result<Vec<BlockHeader>, XaiError> {
        const MAX_HEADERS_PER_REQUEST: usize = 2000;
        let limit = max_count.min(MAX_HEADERS_PER_REQUEST);

        let start_height = match self.get_height_for_hash(hash)? {
            Some(h) => h,
            None => return Ok(vec![]),
        };

        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let mut headers = Vec::new();

        let start_key = Self::height_key(start_height + 1);
        let iter = self.db.iterator_cf(
            &cf_height,
            rocksdb::IteratorMode::From(&start_key, rocksdb::Direction::Forward),
        );

        for item in iter {
            if headers.len() >= limit {
                break;
            }
            let (_, value_bytes) = item.map_err(|e| XaiError::Storage(e.to_string()))?;
            if value_bytes.len() == 32 {
                let h = Hash256(value_bytes[..32].try_into().unwrap());
                if let Some(header) = self.get_block_header(&h)? {
                    headers.push(header);
                }
            }
        }

        Ok(headers)
    }
}

impl ChainStore for RocksStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, XaiError> {
        // Validate height consistency.
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(ChainStateError::HeightMismatch {
                    expected: 0,
                    got: height,
                }
                .into());
            }
        } else if height != tip_height + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: tip_height + 1,
                got: height,
            }
            .into());
        }

        let block_hash = block.header.hash();

        // Reject duplicate blocks.
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        if self
            .db
            .get_cf(&cf_blocks, block_hash.as_bytes())
            .map_err(|e| XaiError::Storage(e.to_string()))?
            .is_some()
        {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }

        // Collect spent UTXOs for undo data.
        let mut undo = BlockUndo {
            spent_utxos: Vec::new(),
            nonce_updates: Vec::new(),
        };
        let mut total_spent = 0;
        for tx in &block.transactions {
            total_spent += self.collect_spent_utxos(tx, &mut undo)?;
        }

        // Compute nonce advances for non-coinbase senders, recording each
        // sender's prior value (before this block) exactly once.
        let mut nonce_advances: std::collections::HashMap<Address, u64> = std::collections::HashMap::new();
        let mut nonce_prior_seen: std::collections::HashSet<Address> = std::collections::HashSet::new();
        for tx in &block.transactions {
            if tx.is_coinbase() {
                continue;
            }
            if nonce_prior_seen.insert(tx.sender) {
                let prior = self.next_nonce(&tx.sender)?;
                undo.nonce_updates.push((
                    tx.sender,
                    if prior == 0 { None } else { Some(prior) },
                ));
            }
            nonce_advances.insert(tx.sender, tx.nonce + 1);
        }

        // Build an atomic WriteBatch.
        let mut batch = WriteBatch::default();

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_headers = self.cf_handle(CF_HEADERS)?;
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_nonces = self.cf_handle(CF_NONCES)?;

        for (sender, next) in &nonce_advances {
            let key = Self::encode_address_key(sender)?;
            batch.put_cf(cf_nonces, &key, next.to_le_bytes());
        }

        // Delete spent UTXOs and their address-index entries.
        for (outpoint, entry) in &undo.spent_utxos {
            let key = Self::encode_outpoint(outpoint)?;
            batch.delete_cf(cf_utxos, &key);

            let addr_key =
                Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), outpoint);
            batch.delete_cf(cf_addr_index, addr_key);
        }

        // Create new UTXOs and their address-index entries.
        let mut total_created = 0u64;
        for tx in &block.transactions {
            let txid = tx.txid().map_err(|e| XaiError::Storage(e.to_string()))?;
            let is_coinbase = tx.is_coinbase();

            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid,
                    index: index as u64,
                };
                let entry = UtxoEntry {
                    output: output.clone(),
                    block_height: height,
                    is_coinbase,
                };
                let key = Self::encode_outpoint(&outpoint)?;
                let value = bincode::encode_to_vec(&entry, bincode::config::standard())
                    .map_err(|e| XaiError::Storage(e.to_string()))?;
                batch.put_cf(cf_utxos, &key, &value);
                total_created += 1;

                let addr_key =
                    Self::encode_address_index_key(&output.recipient.pubkey_hash(), &outpoint);
                batch.put_cf(cf_addr_index, addr_key, []);
            }
        }

        // Store block and header.
        let block_bytes = bincode::encode_to_vec(block, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))?;
        let header_bytes = bincode::encode_to_vec(&block.header, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))?;
        batch.put_cf(cf_blocks, block_hash.as_bytes(), &block_bytes);
        batch.put_cf(cf_headers, block_hash.as_bytes(), &header_bytes);

        // Height index.
        batch.put_cf(cf_height, Self::height_key(height), block_hash.as_bytes());

        // Undo data.
        let undo_bytes = bincode::encode_to_vec(&undo, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))?;
        batch.put_cf(cf_undo, block_hash.as_bytes(), &undo_bytes);

        // Update metadata.
        batch.put_cf(cf_meta, META_TIP_HEIGHT, height.to_le_bytes());
        batch.put_cf(cf_meta, META_TIP_HASH, block_hash.as_bytes());

        let current_utxo_count = self.get_meta_u64(META_UTXO_COUNT)?;
        let new_utxo_count = current_utxo_count + total_created - total_spent as u64;
        batch.put_cf(cf_meta, META_UTXO_COUNT, new_utxo_count.to_le_bytes());

        let current_supply = self.get_meta_u64(META_CIRCULATING_SUPPLY)?;
        let coinbase_val = Self::coinbase_value(block);
        let new_supply = current_supply.saturating_add(coinbase_val);
        batch.put_cf(cf_meta, META_CIRCULATING_SUPPLY, new_supply.to_le_bytes());

        self.db.write(batch).map_err(|e| XaiError::Storage(e.to_string()))?;

        Ok(ConnectBlockResult {
            utxos_created: total_created as usize,
            utxos_spent: total_spent,
        })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, XaiError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            return Err(ChainStateError::EmptyChain.into());
        }

        let block = self
            .get_block(&tip_hash)?
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        let cf_undo = self.cf_handle(CF_UNDO)?;
        let undo_bytes = self
            .db
            .get_cf(&cf_undo, tip_hash.as_bytes())
            .map_err(|e| XaiError::Storage(e.to_string()))?
            .ok_or_else(|| ChainStateError::UndoDataMissing(tip_hash.to_string()))?;
        let (undo, _): (BlockUndo, _) = bincode::decode_from_slice(&undo_bytes, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))?;

        let mut batch = WriteBatch::default();

        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_nonces = self.cf_handle(CF_NONCES)?;

        // Revert sender nonces to their pre-block values.
        for (sender, prior) in &undo.nonce_updates {
            let key = Self::encode_address_key(sender)?;
            match prior {
                Some(value) => batch.put_cf(cf_nonces, &key, value.to_le_bytes()),
                None => batch.delete_cf(cf_nonces, &key),
            }
        }

        // Remove UTXOs created by this block.
        let mut total_removed = 0u64;
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid().map_err(|e| XaiError::Storage(e.to_string()))?;
            for (index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    txid,
                    index: index as u64,
                };
                let key = Self::encode_outpoint(&outpoint)?;
                if self
                    .db
                    .get_cf(&cf_utxos, &key)
                    .map_err(|e| XaiError::Storage(e.to_string()))?
                    .is_some()
                {
                    batch.delete_cf(cf_utxos, &key);

                    let addr_key =
                        Self::encode_address_index_key(&output.recipient.pubkey_hash(), &outpoint);
                    batch.delete_cf(cf_addr_index, addr_key);

                    total_removed += 1;
                }
            }
        }

        // Restore spent UTXOs from undo data.
        let total_restored = undo.spent_utxos.len();
        for (outpoint, entry) in &undo.spent_utxos {
            let key = Self::encode_outpoint(outpoint)?;
            let value = bincode::encode_to_vec(entry, bincode::config::standard())
                .map_err(|e| XaiError::Storage(e.to_string()))?;
            batch.put_cf(cf_utxos, &key, &value);

            let addr_key =
                Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), outpoint);
            batch.put_cf(cf_addr_index, addr_key, []);
        }

        // Remove undo data and height index entry.
        batch.delete_cf(cf_undo, tip_hash.as_bytes());
        batch.delete_cf(cf_height, Self::height_key(tip_height));

        // Update tip metadata.
        if tip_height == 0 {
            batch.put_cf(cf_meta, META_TIP_HEIGHT, 0u64.to_le_bytes());
            batch.put_cf(cf_meta, META_TIP_HASH, Hash256::ZERO.as_bytes());
        } else {
            batch.put_cf(cf_meta, META_TIP_HEIGHT, (tip_height - 1).to_le_bytes());
            batch.put_cf(cf_meta, META_TIP_HASH, block.header.prev_hash.as_bytes());
        }

        let current_utxo_count = self.get_meta_u64(META_UTXO_COUNT)?;
        let new_utxo_count = current_utxo_count + total_restored as u64 - total_removed;
        batch.put_cf(cf_meta, META_UTXO_COUNT, new_utxo_count.to_le_bytes());

        let current_supply = self.get_meta_u64(META_CIRCULATING_SUPPLY)?;
        let coinbase_val = Self::coinbase_value(&block);
        let new_supply = current_supply.saturating_sub(coinbase_val);
        batch.put_cf(cf_meta, META_CIRCULATING_SUPPLY, new_supply.to_le_bytes());

        self.db.write(batch).map_err(|e| XaiError::Storage(e.to_string()))?;

        Ok(DisconnectBlockResult {
            utxos_restored: total_restored,
            utxos_removed: total_removed as usize,
        })
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, XaiError> {
        let cf = self.cf_handle(CF_UTXOS)?;
        let key = Self::encode_outpoint(outpoint)?;
        match self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(data) => {
                let (entry, _): (UtxoEntry, _) =
                    bincode::decode_from_slice(&data, bincode::config::standard())
                        .map_err(|e| XaiError::Storage(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), XaiError> {
        let cf = self.cf_handle(CF_METADATA)?;
        let hash = match self
            .db
            .get_cf(&cf, META_TIP_HASH)
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => Hash256(bytes.try_into().unwrap()),
            _ => return Ok((0, Hash256::ZERO)),
        };

        if hash == Hash256::ZERO {
            return Ok((0, Hash256::ZERO));
        }

        let height = self.get_meta_u64(META_TIP_HEIGHT)?;
        Ok((height, hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, XaiError> {
        let cf = self.cf_handle(CF_HEADERS)?;
        match self
            .db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(data) => {
                let (header, _): (BlockHeader, _) =
                    bincode::decode_from_slice(&data, bincode::config::standard())
                        .map_err(|e| XaiError::Storage(e.to_string()))?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, XaiError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self
            .db
            .get_cf(&cf, hash.as_bytes())
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(data) => {
                let (block, _): (Block, _) =
                    bincode::decode_from_slice(&data, bincode::config::standard())
                        .map_err(|e| XaiError::Storage(e.to_string()))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, XaiError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        match self
            .db
            .get_cf(&cf, Self::height_key(height))
            .map_err(|e| XaiError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => Ok(Some(Hash256(bytes.try_into().unwrap()))),
            _ => Ok(None),
        }
    }

    fn circulating_supply(&self) -> u64 {
        self.get_meta_u64(META_CIRCULATING_SUPPLY).unwrap_or(0)
    }

    fn utxo_count(&self) -> usize {
        self.get_meta_u64(META_UTXO_COUNT).unwrap_or(0) as usize
    }

    fn is_empty(&self) -> bool {
        match self.chain_tip() {
            Ok((_, hash)) => hash == Hash256::ZERO,
            Err(_) => true,
        }
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, XaiError> {
        let cf = self.cf_handle(CF_UTXOS)?;
        let mut utxos = Vec::new();

        let iter = self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start);
        for item in iter {
            let (key_bytes, value_bytes) = item.map_err(|e| XaiError::Storage(e.to_string()))?;
            let (outpoint, _): (OutPoint, _) =
                bincode::decode_from_slice(&key_bytes, bincode::config::standard())
                    .map_err(|e| XaiError::Storage(e.to_string()))?;
            let (entry, _): (UtxoEntry, _) =
                bincode::decode_from_slice(&value_bytes, bincode::config::standard())
                    .map_err(|e| XaiError::Storage(e.to_string()))?;
            utxos.push((outpoint, entry));
        }

        Ok(utxos)
    }

    fn add(&mut self, outpoint: OutPoint, entry: UtxoEntry) -> Result<bool, XaiError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let key = Self::encode_outpoint(&outpoint)?;
        if self
            .db
            .get_cf(&cf_utxos, &key)
            .map_err(|e| XaiError::Storage(e.to_string()))?
            .is_some()
        {
            return Ok(false);
        }

        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let value = bincode::encode_to_vec(&entry, bincode::config::standard())
            .map_err(|e| XaiError::Storage(e.to_string()))?;
        let addr_key = Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), &outpoint);

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_utxos, &key, &value);
        batch.put_cf(cf_addr_index, addr_key, []);
        let new_count = self.get_meta_u64(META_UTXO_COUNT)? + 1;
        batch.put_cf(cf_meta, META_UTXO_COUNT, new_count.to_le_bytes());

        self.db.write(batch).map_err(|e| XaiError::Storage(e.to_string()))?;
        Ok(true)
    }

    fn mark_spent(&mut self, outpoint: &OutPoint, spender: &Address) -> Result<bool, XaiError> {
        let Some(entry) = self.get_utxo(outpoint)? else {
            return Ok(false);
        };
        if entry.output.recipient != *spender {
            return Ok(false);
        }

        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let key = Self::encode_outpoint(outpoint)?;
        let addr_key = Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), outpoint);

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf_utxos, &key);
        batch.delete_cf(cf_addr_index, addr_key);
        let new_count = self.get_meta_u64(META_UTXO_COUNT)?.saturating_sub(1);
        batch.put_cf(cf_meta, META_UTXO_COUNT, new_count.to_le_bytes());

        self.db.write(batch).map_err(|e| XaiError::Storage(e.to_string()))?;
        Ok(true)
    }

    fn lock_pending(&self, outpoint: &OutPoint) -> bool {
        let now = now_secs();
        let mut locks = self.pending_locks.lock();
        locks.retain(|_, expiry| *expiry > now);
        if locks.contains_key(outpoint) {
            return false;
        }
        locks.insert(
            outpoint.clone(),
            now + xai_core::constants::PENDING_UTXO_TIMEOUT_SECS,
        );
        true
    }

    fn unlock(&self, outpoint: &OutPoint) {
        self.pending_locks.lock().remove(outpoint);
    }

    fn restore(&mut self, snapshot: xai_core::chain_state::UtxoSnapshot) -> Result<(), XaiError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addr_index = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut batch = WriteBatch::default();

        let existing = self.iter_utxos()?;
        for (outpoint, entry) in &existing {
            batch.delete_cf(cf_utxos, Self::encode_outpoint(outpoint)?);
            batch.delete_cf(
                cf_addr_index,
                Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), outpoint),
            );
        }

        let mut new_supply = 0u64;
        for (outpoint, entry) in &snapshot.utxos {
            let key = Self::encode_outpoint(outpoint)?;
            let value = bincode::encode_to_vec(entry, bincode::config::standard())
                .map_err(|e| XaiError::Storage(e.to_string()))?;
            batch.put_cf(cf_utxos, &key, &value);
            batch.put_cf(
                cf_addr_index,
                Self::encode_address_index_key(&entry.output.recipient.pubkey_hash(), outpoint),
                [],
            );
            if entry.is_coinbase {
                new_supply = new_supply.saturating_add(entry.output.amount);
            }
        }

        batch.put_cf(cf_meta, META_UTXO_COUNT, (snapshot.utxos.len() as u64).to_le_bytes());
        batch.put_cf(cf_meta, META_CIRCULATING_SUPPLY, new_supply.to_le_bytes());

        self.db.write(batch).map_err(|e| XaiError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::address::{Address, Network};
    use xai_core::constants::COIN;
    use xai_core::merkle;
    use xai_core::types::{Hash160, TxInput, TxOutput, TxType};

    fn temp_store() -> (RocksStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("chaindata")).unwrap();
        (store, dir)
    }

    fn pkh(seed: u8) -> Hash160 {
        Hash160([seed; 20])
    }

    fn addr(seed: u8) -> Address {
        Address::from_hash160(pkh(seed), Network::Mainnet)
    }

    /// Build a coinbase paying `amount` to `recipient_seed`, varying `nonce`
    /// (folded into `fee`, unused for coinbase validation) so distinct calls
    /// for the same height produce distinct txids.
    fn make_coinbase_unique(amount: u64, recipient_seed: u8, nonce: u64) -> Transaction {
        let recipient = addr(recipient_seed);
        Transaction {
            version: 1,
            tx_type: TxType::Coinbase,
            sender: Address::coinbase_sentinel(Network::Mainnet),
            recipient,
            amount,
            fee: 0,
            nonce,
            timestamp: 1_700_000_000 + nonce,
            inputs: vec![],
            outputs: vec![TxOutput { amount, recipient }],
            lock_time: 0,
            signature: vec![],
            public_key: vec![],
        }
    }

    fn make_tx(inputs: &[OutPoint], amount: u64, recipient_seed: u8) -> Transaction {
        let recipient = addr(recipient_seed);
        Transaction {
            version: 1,
            tx_type: TxType::Transfer,
            sender: addr(0xAA),
            recipient,
            amount,
            fee: 0,
            nonce: 0,
            timestamp: 1_700_000_000,
            inputs: inputs
                .iter()
                .map(|op| TxInput::spending(op.clone()))
                .collect(),
            outputs: vec![TxOutput { amount, recipient }],
            lock_time: 0,
            signature: vec![],
            public_key: vec![],
        }
    }

    fn make_block(prev_hash: Hash256, timestamp: u64, transactions: Vec<Transaction>) -> Block {
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid().unwrap()).collect();
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash,
                merkle_root: merkle::merkle_root(&txids),
                timestamp,
                difficulty_target: u64::MAX,
                nonce: 0,
            },
            transactions,
        }
    }

    // ------------------------------------------------------------------
    // Genesis auto-connect
    // ------------------------------------------------------------------

    #[test]
    fn open_auto_connects_genesis() {
        let (store, _dir) = temp_store();
        let (height, hash) = store.chain_tip().unwrap();
        assert_eq!(height, 0);
        assert_eq!(hash, genesis::genesis_hash());
        assert_eq!(store.utxo_count(), 1);
    }

    // ------------------------------------------------------------------
    // Connect block
    // ------------------------------------------------------------------

    #[test]
    fn connect_block_advances_tip() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        let hash1 = block1.header.hash();
        let result = store.connect_block(&block1, 1).unwrap();

        assert_eq!(result.utxos_created, 1);
        assert_eq!(result.utxos_spent, 0);
        assert_eq!(store.chain_tip().unwrap(), (1, hash1));
    }

    #[test]
    fn connect_block_rejects_height_mismatch() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);

        let err = store.connect_block(&block1, 2).unwrap_err();
        assert!(matches!(
            err,
            XaiError::State(ChainStateError::HeightMismatch { expected: 1, got: 2 })
        ));
    }

    #[test]
    fn connect_block_rejects_duplicate() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1.clone()]);
        store.connect_block(&block1, 1).unwrap();

        let err = store.connect_block(&block1, 1).unwrap_err();
        assert!(matches!(
            err,
            XaiError::State(ChainStateError::DuplicateBlock(_))
        ));
    }

    #[test]
    fn supply_tracks_across_blocks() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let initial_supply = store.circulating_supply();
        let genesis_reward = genesis::genesis_block().coinbase().unwrap().outputs[0].amount;
        assert_eq!(initial_supply, genesis_reward);

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        store.connect_block(&block1, 1).unwrap();

        assert_eq!(store.circulating_supply(), genesis_reward + 50 * COIN);
    }

    // ------------------------------------------------------------------
    // Disconnect tip
    // ------------------------------------------------------------------

    #[test]
    fn disconnect_tip_reverts_to_genesis() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        store.connect_block(&block1, 1).unwrap();

        let result = store.disconnect_tip().unwrap();
        assert_eq!(result.utxos_removed, 1);
        assert_eq!(result.utxos_restored, 0);

        let (height, hash) = store.chain_tip().unwrap();
        assert_eq!(height, 0);
        assert_eq!(hash, genesis_hash);
        assert_eq!(store.utxo_count(), 1); // genesis only
    }

    #[test]
    fn disconnect_restores_spent_utxos() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let coinbase_txid = genesis::genesis_coinbase_txid();
        let genesis_reward = genesis::genesis_block().coinbase().unwrap().outputs[0].amount;

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let spend = make_tx(
            &[OutPoint {
                txid: coinbase_txid,
                index: 0,
            }],
            genesis_reward - COIN,
            0xCC,
        );
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1, spend]);
        store.connect_block(&block1, 1).unwrap();

        assert!(store
            .get_utxo(&OutPoint {
                txid: coinbase_txid,
                index: 0
            })
            .unwrap()
            .is_none());

        let result = store.disconnect_tip().unwrap();
        assert_eq!(result.utxos_removed, 2);
        assert_eq!(result.utxos_restored, 1);

        let restored = store
            .get_utxo(&OutPoint {
                txid: coinbase_txid,
                index: 0,
            })
            .unwrap()
            .unwrap();
        assert_eq!(restored.output.amount, genesis_reward);
        assert!(restored.is_coinbase);
    }

    #[test]
    fn disconnect_supply_reverts() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let genesis_reward = genesis::genesis_block().coinbase().unwrap().outputs[0].amount;

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        store.connect_block(&block1, 1).unwrap();
        assert_eq!(store.circulating_supply(), genesis_reward + 50 * COIN);

        store.disconnect_tip().unwrap();
        assert_eq!(store.circulating_supply(), genesis_reward);
    }

    #[test]
    fn disconnect_removes_height_mapping() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        store.connect_block(&block1, 1).unwrap();
        assert!(store.get_block_hash(1).unwrap().is_some());

        store.disconnect_tip().unwrap();
        assert!(store.get_block_hash(1).unwrap().is_none());
        assert_eq!(store.get_block_hash(0).unwrap(), Some(genesis::genesis_hash()));
    }

    #[test]
    fn disconnect_empty_chain_errors() {
        let (mut store, _dir) = temp_store();
        store.disconnect_tip().unwrap();
        let err = store.disconnect_tip().unwrap_err();
        assert!(matches!(err, XaiError::State(ChainStateError::EmptyChain)));
    }

    // ------------------------------------------------------------------
    // Persistence across reopen
    // ------------------------------------------------------------------

    #[test]
    fn persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chaindata");
        let genesis_hash = genesis::genesis_hash();
        let genesis_reward = genesis::genesis_block().coinbase().unwrap().outputs[0].amount;

        {
            let mut store = RocksStore::open(&db_path).unwrap();
            let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
            let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
            store.connect_block(&block1, 1).unwrap();
            store.flush().unwrap();
        }

        {
            let store = RocksStore::open(&db_path).unwrap();
            let (height, _) = store.chain_tip().unwrap();
            assert_eq!(height, 1);
            assert_eq!(store.utxo_count(), 2);
            assert_eq!(store.circulating_supply(), genesis_reward + 50 * COIN);
        }
    }

    // ------------------------------------------------------------------
    // Connect-disconnect roundtrip
    // ------------------------------------------------------------------

    #[test]
    fn connect_disconnect_roundtrip() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let genesis_reward = genesis::genesis_block().coinbase().unwrap().outputs[0].amount;

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        let hash1 = block1.header.hash();
        store.connect_block(&block1, 1).unwrap();

        let cb2 = make_coinbase_unique(50 * COIN, 0xCC, 2);
        let block2 = make_block(hash1, 1_000_120, vec![cb2]);
        let hash2 = block2.header.hash();
        store.connect_block(&block2, 2).unwrap();

        let cb3 = make_coinbase_unique(50 * COIN, 0xDD, 3);
        let block3 = make_block(hash2, 1_000_180, vec![cb3]);
        store.connect_block(&block3, 3).unwrap();

        assert_eq!(store.utxo_count(), 4); // genesis + 3 coinbases
        assert_eq!(store.circulating_supply(), genesis_reward + 150 * COIN);

        store.disconnect_tip().unwrap();
        assert_eq!(store.chain_tip().unwrap(), (2, hash2));

        store.disconnect_tip().unwrap();
        assert_eq!(store.chain_tip().unwrap(), (1, hash1));

        store.disconnect_tip().unwrap();
        assert_eq!(store.chain_tip().unwrap(), (0, genesis_hash));
        assert_eq!(store.utxo_count(), 1);
        assert_eq!(store.circulating_supply(), genesis_reward);
    }

    // ------------------------------------------------------------------
    // Miscellaneous
    // ------------------------------------------------------------------

    #[test]
    fn get_utxo_nonexistent() {
        let (store, _dir) = temp_store();
        let op = OutPoint {
            txid: Hash256([0xFF; 32]),
            index: 0,
        };
        assert!(store.get_utxo(&op).unwrap().is_none());
    }

    #[test]
    fn get_block_nonexistent() {
        let (store, _dir) = temp_store();
        assert!(store.get_block(&Hash256([0xFF; 32])).unwrap().is_none());
    }

    #[test]
    fn get_block_header_nonexistent() {
        let (store, _dir) = temp_store();
        assert!(store.get_block_header(&Hash256([0xFF; 32])).unwrap().is_none());
    }

    #[test]
    fn contains_utxo_after_genesis() {
        let (store, _dir) = temp_store();
        let coinbase_txid = genesis::genesis_coinbase_txid();
        assert!(store
            .contains_utxo(&OutPoint {
                txid: coinbase_txid,
                index: 0
            })
            .unwrap());
        assert!(!store
            .contains_utxo(&OutPoint {
                txid: coinbase_txid,
                index: 1
            })
            .unwrap());
    }

    #[test]
    fn blocks_persist_after_disconnect() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let cb1 = make_coinbase_unique(50 * COIN, 0xBB, 1);
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        let hash1 = block1.header.hash();
        store.connect_block(&block1, 1).unwrap();

        store.disconnect_tip().unwrap();

        assert!(store.get_block(&hash1).unwrap().is_some());
        assert!(store.get_block_header(&hash1).unwrap().is_some());
    }

    // ------------------------------------------------------------------
    // Address index
    // ------------------------------------------------------------------

    #[test]
    fn address_index_created_on_connect() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let addr_pkh = pkh(0xEE);
        let cb1 = make_coinbase_unique(50 * COIN, 0xEE, 1);
        let cb1_txid = cb1.txid().unwrap();
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        store.connect_block(&block1, 1).unwrap();

        let utxos = store.get_utxos_by_address(&addr_pkh).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].0.txid, cb1_txid);
        assert_eq!(utxos[0].0.index, 0);
        assert_eq!(utxos[0].1.output.amount, 50 * COIN);
    }

    #[test]
    fn address_index_deleted_on_spend() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let addr_pkh = pkh(0xEE);
        let cb1 = make_coinbase_unique(50 * COIN, 0xEE, 1);
        let cb1_txid = cb1.txid().unwrap();
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        let hash1 = block1.header.hash();
        store.connect_block(&block1, 1).unwrap();

        assert_eq!(store.get_utxos_by_address(&addr_pkh).unwrap().len(), 1);

        let cb2 = make_coinbase_unique(50 * COIN, 0xFF, 2);
        let spend_tx = make_tx(
            &[OutPoint {
                txid: cb1_txid,
                index: 0,
            }],
            49 * COIN,
            0xDD,
        );
        let block2 = make_block(hash1, 1_000_120, vec![cb2, spend_tx]);
        store.connect_block(&block2, 2).unwrap();

        assert_eq!(store.get_utxos_by_address(&addr_pkh).unwrap().len(), 0);
    }

    #[test]
    fn address_index_restored_on_disconnect() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let addr_pkh = pkh(0xEE);
        let cb1 = make_coinbase_unique(50 * COIN, 0xEE, 1);
        let cb1_txid = cb1.txid().unwrap();
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
        let hash1 = block1.header.hash();
        store.connect_block(&block1, 1).unwrap();

        let cb2 = make_coinbase_unique(50 * COIN, 0xFF, 2);
        let spend_tx = make_tx(
            &[OutPoint {
                txid: cb1_txid,
                index: 0,
            }],
            49 * COIN,
            0xDD,
        );
        let block2 = make_block(hash1, 1_000_120, vec![cb2, spend_tx]);
        store.connect_block(&block2, 2).unwrap();

        assert_eq!(store.get_utxos_by_address(&addr_pkh).unwrap().len(), 0);

        store.disconnect_tip().unwrap();

        let utxos = store.get_utxos_by_address(&addr_pkh).unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].0.txid, cb1_txid);
        assert_eq!(utxos[0].1.output.amount, 50 * COIN);
    }

    #[test]
    fn address_index_prefix_lookup() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let addr_pkh = pkh(0xEE);

        let cb1a = make_coinbase_unique(30 * COIN, 0xEE, 1);
        let cb1a_txid = cb1a.txid().unwrap();
        let cb1b = make_coinbase_unique(20 * COIN, 0xEE, 101);
        let cb1b_txid = cb1b.txid().unwrap();
        let block1 = make_block(genesis_hash, 1_000_060, vec![cb1a, cb1b]);
        store.connect_block(&block1, 1).unwrap();

        let utxos = store.get_utxos_by_address(&addr_pkh).unwrap();
        assert_eq!(utxos.len(), 2);

        let values: Vec<u64> = utxos.iter().map(|(_, entry)| entry.output.amount).collect();
        assert!(values.contains(&(30 * COIN)));
        assert!(values.contains(&(20 * COIN)));

        let txids: Vec<Hash256> = utxos.iter().map(|(op, _)| op.txid).collect();
        assert!(txids.contains(&cb1a_txid));
        assert!(txids.contains(&cb1b_txid));
    }

    #[test]
    fn address_index_empty_for_unknown() {
        let (store, _dir) = temp_store();
        let unknown_addr = pkh(0xAB);
        assert_eq!(store.get_utxos_by_address(&unknown_addr).unwrap().len(), 0);
    }

    #[test]
    fn address_index_migration() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("chaindata");

        {
            let mut store = RocksStore::open(&db_path).unwrap();
            let genesis_hash = genesis::genesis_hash();
            let cb1 = make_coinbase_unique(50 * COIN, 0xEE, 1);
            let block1 = make_block(genesis_hash, 1_000_060, vec![cb1]);
            store.connect_block(&block1, 1).unwrap();
            store.flush().unwrap();
        }

        {
            let store = RocksStore::open(&db_path).unwrap();
            let utxos = store.get_utxos_by_address(&pkh(0xEE)).unwrap();
            assert_eq!(utxos.len(), 1);
            assert_eq!(utxos[0].1.output.amount, 50 * COIN);
        }
    }

    // ------------------------------------------------------------------
    // Chain sync methods
    // ------------------------------------------------------------------

    #[test]
    fn get_block_locator_geometric_pattern() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let mut prev = genesis_hash;
        for i in 1..=10 {
            let cb = make_coinbase_unique(50 * COIN, 0xBB, i);
            let block = make_block(prev, 1_000_000 + i * 60, vec![cb]);
            prev = block.header.hash();
            store.connect_block(&block, i).unwrap();
        }

        let locator = store.get_block_locator().unwrap();

        assert!(locator.len() >= 2);
        assert_eq!(locator[0], store.get_block_hash(10).unwrap().unwrap());
        assert!(locator.contains(&genesis_hash));
    }

    #[test]
    fn get_block_locator_single_block() {
        let (store, _dir) = temp_store();
        let locator = store.get_block_locator().unwrap();
        let genesis_hash = genesis::genesis_hash();

        assert_eq!(locator.len(), 1);
        assert_eq!(locator[0], genesis_hash);
    }

    #[test]
    fn find_common_ancestor_finds_matching_hash() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let mut prev = genesis_hash;
        for i in 1..=5 {
            let cb = make_coinbase_unique(50 * COIN, 0xBB, i);
            let block = make_block(prev, 1_000_000 + i * 60, vec![cb]);
            prev = block.header.hash();
            store.connect_block(&block, i).unwrap();
        }

        let hash3 = store.get_block_hash(3).unwrap().unwrap();
        let locator = vec![Hash256([0xFF; 32]), hash3, genesis_hash];

        let common = store.find_common_ancestor(&locator).unwrap();
        assert_eq!(common, Some((3, hash3)));
    }

    #[test]
    fn find_common_ancestor_returns_none_for_unknown() {
        let (store, _dir) = temp_store();
        let locator = vec![Hash256([0xFF; 32]), Hash256([0xEE; 32])];
        let common = store.find_common_ancestor(&locator).unwrap();
        assert_eq!(common, None);
    }

    #[test]
    fn get_headers_after_returns_correct_range() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let mut prev = genesis_hash;
        for i in 1..=5 {
            let cb = make_coinbase_unique(50 * COIN, 0xBB, i);
            let block = make_block(prev, 1_000_000 + i * 60, vec![cb]);
            prev = block.header.hash();
            store.connect_block(&block, i).unwrap();
        }

        let hash2 = store.get_block_hash(2).unwrap().unwrap();
        let headers = store.get_headers_after(&hash2, 10).unwrap();

        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].hash(), store.get_block_hash(3).unwrap().unwrap());
        assert_eq!(headers[1].hash(), store.get_block_hash(4).unwrap().unwrap());
        assert_eq!(headers[2].hash(), store.get_block_hash(5).unwrap().unwrap());
    }

    #[test]
    fn get_headers_after_caps_at_2000() {
        let (store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();
        let headers = store.get_headers_after(&genesis_hash, 3000).unwrap();
        assert_eq!(headers.len(), 0);
    }

    #[test]
    fn get_headers_after_unknown_hash_returns_empty() {
        let (store, _dir) = temp_store();
        let unknown_hash = Hash256([0xFF; 32]);
        let headers = store.get_headers_after(&unknown_hash, 10).unwrap();
        assert_eq!(headers.len(), 0);
    }

    // ------------------------------------------------------------------
    // Storage compaction
    // ------------------------------------------------------------------

    #[test]
    fn compact_succeeds() {
        let (mut store, _dir) = temp_store();
        let genesis_hash = genesis::genesis_hash();

        let mut prev = genesis_hash;
        for i in 1..=3 {
            let cb = make_coinbase_unique(50 * COIN, i as u8, i);
            let block = make_block(prev, 1_000_000 + i * 60, vec![cb]);
            prev = block.header.hash();
            store.connect_block(&block, i).unwrap();
        }

        store.compact().unwrap();

        let (height, _) = store.chain_tip().unwrap();
        assert_eq!(height, 3);
        assert_eq!(store.utxo_count(), 4);
    }

    // ------------------------------------------------------------------
    // Block pruning
    // ------------------------------------------------------------------

    fn build_chain(store: &mut RocksStore, count: u64) -> Vec<Hash256> {
        let genesis_hash = genesis::genesis_hash();
        let mut hashes = vec![genesis_hash];
        let mut prev = genesis_hash;
        for i in 1..=count {
            let cb = make_coinbase_unique(50 * COIN, i as u8, i);
            let block = make_block(prev, 1_000_000 + i * 60, vec![cb]);
            prev = block.header.hash();
            store.connect_block(&block, i).unwrap();
            hashes.push(prev);
        }
        hashes
    }

    #[test]
    fn prune_blocks_removes_old_data() {
        let (mut store, _dir) = temp_store();
        let hashes = build_chain(&mut store, 4);

        let pruned = store.prune_blocks(2).unwrap();
        assert_eq!(pruned, 2);

        assert!(store.get_block(&hashes[1]).unwrap().is_none());
        assert!(store.get_block(&hashes[2]).unwrap().is_none());
        assert!(store.get_block(&hashes[3]).unwrap().is_some());
        assert!(store.get_block(&hashes[4]).unwrap().is_some());
    }

    #[test]
    fn prune_blocks_preserves_headers() {
        let (mut store, _dir) = temp_store();
        let hashes = build_chain(&mut store, 4);

        store.prune_blocks(2).unwrap();

        assert!(store.get_block_header(&hashes[1]).unwrap().is_some());
        assert!(store.get_block_header(&hashes[2]).unwrap().is_some());
        assert!(store.get_block_header(&hashes[3]).unwrap().is_some());
        assert!(store.get_block_header(&hashes[4]).unwrap().is_some());
    }

    #[test]
    fn prune_blocks_preserves_undo() {
        let (mut store, _dir) = temp_store();
        build_chain(&mut store, 4);

        store.prune_blocks(2).unwrap();

        let result = store.disconnect_tip().unwrap();
        assert_eq!(result.utxos_removed, 1);

        let result2 = store.disconnect_tip().unwrap();
        assert_eq!(result2.utxos_removed, 1);
    }

    #[test]
    fn prune_blocks_preserves_genesis() {
        let (mut store, _dir) = temp_store();
        build_chain(&mut store, 5);

        let pruned = store.prune_blocks(0).unwrap();
        assert_eq!(pruned, 5);

        let genesis_hash = genesis::genesis_hash();
        assert!(store.get_block(&genesis_hash).unwrap().is_some());
        assert!(store.get_block_header(&genesis_hash).unwrap().is_some());
    }

    #[test]
    fn prune_blocks_returns_count() {
        let (mut store, _dir) = temp_store();
        build_chain(&mut store, 6);

        let count = store.prune_blocks(3).unwrap();
        assert_eq!(count, 3);

        let count2 = store.prune_blocks(3).unwrap();
        assert_eq!(count2, 0);
    }

    #[test]
    fn is_block_pruned_works() {
        let (mut store, _dir) = temp_store();
        build_chain(&mut store, 5);

        assert!(!store.is_block_pruned(0).unwrap());
        assert!(!store.is_block_pruned(1).unwrap());
        assert!(!store.is_block_pruned(3).unwrap());
        assert!(!store.is_block_pruned(5).unwrap());

        store.prune_blocks(2).unwrap();

        assert!(store.is_block_pruned(1).unwrap());
        assert!(store.is_block_pruned(2).unwrap());
        assert!(store.is_block_pruned(3).unwrap());
        assert!(!store.is_block_pruned(0).unwrap());
        assert!(!store.is_block_pruned(4).unwrap());
        assert!(!store.is_block_pruned(5).unwrap());
        assert!(!store.is_block_pruned(99).unwrap());
    }

    fn sample_entry(amount: u64, recipient: Address) -> UtxoEntry {
        UtxoEntry {
            output: TxOutput { amount, recipient },
            block_height: 0,
            is_coinbase: false,
        }
    }

    #[test]
    fn add_is_idempotent() {
        let (mut store, _dir) = temp_store();
        let op = OutPoint { txid: Hash256([7; 32]), index: 0 };
        let entry = sample_entry(10 * COIN, addr(0x01));
        assert!(store.add(op.clone(), entry.clone()).unwrap());
        assert!(!store.add(op.clone(), entry).unwrap());
        assert_eq!(store.utxo_count(), 1);
        assert!(store.get(&op).unwrap().is_some());
    }

    #[test]
    fn mark_spent_rejects_wrong_owner() {
        let (mut store, _dir) = temp_store();
        let op = OutPoint { txid: Hash256([8; 32]), index: 0 };
        store.add(op.clone(), sample_entry(10 * COIN, addr(0x01))).unwrap();

        assert!(!store.mark_spent(&op, &addr(0x02)).unwrap());
        assert!(store.get(&op).unwrap().is_some());

        assert!(store.mark_spent(&op, &addr(0x01)).unwrap());
        assert!(store.get(&op).unwrap().is_none());
        assert_eq!(store.utxo_count(), 0);
    }

    #[test]
    fn mark_spent_missing_utxo_returns_false() {
        let (mut store, _dir) = temp_store();
        let op = OutPoint { txid: Hash256([9; 32]), index: 0 };
        assert!(!store.mark_spent(&op, &addr(0x01)).unwrap());
    }

    #[test]
    fn lock_pending_rejects_double_reservation() {
        let (store, _dir) = temp_store();
        let op = OutPoint { txid: Hash256([10; 32]), index: 0 };
        assert!(store.lock_pending(&op));
        assert!(!store.lock_pending(&op));
        store.unlock(&op);
        assert!(store.lock_pending(&op));
    }

    #[test]
    fn restore_rebuilds_utxo_set_and_supply() {
        let (mut store, _dir) = temp_store();
        let op1 = OutPoint { txid: Hash256([1; 32]), index: 0 };
        let mut coinbase_entry = sample_entry(10 * COIN, addr(0x01));
        coinbase_entry.is_coinbase = true;
        store.add(op1.clone(), coinbase_entry.clone()).unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.utxos.len(), 1);

        let (mut other, _other_dir) = temp_store();
        other.restore(snapshot).unwrap();
        assert_eq!(other.utxo_count(), 1);
        assert_eq!(other.get(&op1).unwrap().unwrap().output.amount, 10 * COIN);
        assert_eq!(other.circulating_supply(), 10 * COIN);
    }
}
