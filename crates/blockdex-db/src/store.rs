//! RocksDB-backed address index.
//!
//! [`RocksIndex`] owns the database handle, the chain parser, and the shared
//! [`InternalState`]. Block connect and disconnect are implemented per chain
//! type in [`crate::bitcoin`] and [`crate::ethereum`]; this module holds what
//! both share: opening and version checks, the `height` and `addresses`
//! families, and the internal state blob. All mutations of one block go
//! through a single [`WriteBatch`].

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use blockdex_core::codec::{pack_address_key, pack_tx_indexes, unpack_address_key, unpack_tx_indexes, TxIndexes};
use blockdex_core::constants::{BLOCK_TIMES_CAPACITY, DB_VERSION};
use blockdex_core::error::{ChainStateError, IndexError};
use blockdex_core::traits::ChainParser;
use blockdex_core::types::{Block, BlockInfo, ChainType, ContractInfo};

use crate::config::DbConfig;
use crate::internal_state::{DbState, InternalState, InternalStateColumn};
use crate::schema::{
    column_families, height_key, pack_block_info, unpack_block_info, unpack_height_key, CF_ADDRESSES, CF_BLOCK_TXS, CF_DEFAULT,
    CF_FIAT_RATES, CF_HEIGHT, CF_TRANSACTIONS, INTERNAL_STATE_KEY,
};

/// Transactions touching each address in one block, keyed by descriptor.
pub(crate) type AddressesMap = HashMap<Vec<u8>, Vec<TxIndexes>>;

/// Record that `btxid` touched `addr` at `index`.
///
/// Returns true if the (address, tx) pair was already seen in this block,
/// i.e. the tx must not be counted again for the address. Duplicate indexes
/// of the same tx coalesce.
pub(crate) fn add_to_addresses_map(map: &mut AddressesMap, addr: &[u8], btxid: &[u8], index: i32) -> bool {
    let txs = map.entry(addr.to_vec()).or_default();
    if let Some(t) = txs.iter_mut().find(|t| t.btxid == btxid) {
        if !t.indexes.contains(&index) {
            t.indexes.push(index);
        }
        return true;
    }
    txs.push(TxIndexes { btxid: btxid.to_vec(), indexes: vec![index] });
    false
}

pub(crate) fn storage_err(e: rocksdb::Error) -> IndexError {
    IndexError::Storage(e.to_string())
}

/// `value -= amount`, clamped at zero. Source chains occasionally produce
/// negative intermediate values; those are logged and reset.
pub(crate) fn sub_clamped(value: &mut BigUint, amount: &BigUint, addr_desc: &[u8], what: &str) {
    if *value >= *amount {
        *value -= amount;
    } else {
        tracing::warn!(addr = %hex::encode(addr_desc), what, value = %value, amount = %amount, "negative value clamped to zero");
        *value = BigUint::default();
    }
}

/// RocksDB-backed index of addresses, balances and token ledgers.
pub struct RocksIndex {
    db: DB,
    path: PathBuf,
    pub(crate) parser: Arc<dyn ChainParser>,
    pub(crate) chain_type: ChainType,
    pub(crate) txid_len: usize,
    pub(crate) is: Arc<InternalState>,
    pub(crate) contracts_cache: Mutex<HashMap<Vec<u8>, Option<ContractInfo>>>,
    pub(crate) alias_cache: Mutex<HashMap<Vec<u8>, String>>,
}

impl RocksIndex {
    /// Open or create the index at `path` for `coin`.
    ///
    /// Loads and validates the internal state, then marks the database
    /// open.
    ///
    /// # Errors
    ///
    /// Fails if the stored coin differs from `coin`, if a bulk load was
    /// interrupted (state `inconsistent`), if a column has an unsupported
    /// schema version, or if the extended-index setting differs from the
    /// one the database was created with.
    pub fn open(path: impl AsRef<Path>, parser: Arc<dyn ChainParser>, coin: &str, config: &DbConfig) -> Result<Self, IndexError> {
        let chain_type = parser.chain_type();
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.increase_parallelism(config.parallelism);

        let names = column_families(chain_type);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(storage_err)?;

        let is = Self::load_internal_state(&db, chain_type, coin, config.extended_index, &names)?;
        let txid_len = parser.packed_txid_len();
        let index = Self {
            db,
            path: path.as_ref().to_path_buf(),
            parser,
            chain_type,
            txid_len,
            is: Arc::new(is),
            contracts_cache: Mutex::new(HashMap::new()),
            alias_cache: Mutex::new(HashMap::new()),
        };

        if index.is.columns().iter().any(|c| c.version + 1 == DB_VERSION) {
            index.upgrade_previous_version()?;
        }
        if let Some((height, _)) = index.get_best_block()? {
            index.is.set_best_height(height);
        }
        index.load_block_times()?;
        index.is.set_db_state(DbState::Open);
        index.store_internal_state()?;
        tracing::info!(coin, chain = %chain_type, best_height = index.is.best_height(), "index opened");
        Ok(index)
    }

    fn load_internal_state(
        db: &DB,
        chain_type: ChainType,
        coin: &str,
        extended_index: bool,
        names: &[&str],
    ) -> Result<InternalState, IndexError> {
        let cf = db
            .cf_handle(CF_DEFAULT)
            .ok_or_else(|| IndexError::Storage(format!("missing column family: {CF_DEFAULT}")))?;
        let Some(buf) = db.get_cf(cf, INTERNAL_STATE_KEY).map_err(storage_err)? else {
            return Ok(InternalState::new(coin, names, extended_index));
        };
        let is = InternalState::unpack(&buf)?;
        let stored_coin = is.coin();
        if !stored_coin.is_empty() && stored_coin != coin {
            return Err(ChainStateError::CoinMismatch { db: stored_coin, configured: coin.to_string() }.into());
        }
        if is.db_state() == DbState::Inconsistent {
            tracing::error!(coin, "database is in inconsistent state, resync from scratch is required");
            return Err(ChainStateError::InconsistentState.into());
        }
        if is.extended_index() != extended_index {
            return Err(ChainStateError::ExtendedIndexMismatch { db: is.extended_index(), configured: extended_index }.into());
        }
        is.with_data(|data| -> Result<(), IndexError> {
            for name in names {
                match data.db_columns.iter().find(|c| c.name == *name) {
                    None => data.db_columns.push(InternalStateColumn::new(name)),
                    Some(c) if c.version == DB_VERSION => {}
                    Some(c) if c.version + 1 == DB_VERSION && chain_type == ChainType::Bitcoin => {}
                    Some(c) => {
                        return Err(ChainStateError::SchemaVersionMismatch {
                            column: c.name.clone(),
                            found: c.version,
                            expected: DB_VERSION,
                        }
                        .into());
                    }
                }
            }
            Ok(())
        })?;
        Ok(is)
    }

    /// Upgrade from the previous schema version by dropping the caches.
    fn upgrade_previous_version(&self) -> Result<(), IndexError> {
        tracing::info!(from = DB_VERSION - 1, to = DB_VERSION, "upgrading index, dropping transactions and fiat rates");
        let mut batch = WriteBatch::default();
        let cf_tx = self.cf_handle(CF_TRANSACTIONS)?;
        batch.delete_range_cf(cf_tx, Vec::new(), vec![0xffu8; self.txid_len + 1]);
        let cf_fiat = self.cf_handle(CF_FIAT_RATES)?;
        batch.delete_range_cf(cf_fiat, Vec::new(), vec![0xffu8; 16]);
        self.write(batch)?;
        self.is.set_column_stats(CF_TRANSACTIONS, 0, 0, 0);
        self.is.set_column_stats(CF_FIAT_RATES, 0, 0, 0);
        self.is.with_data(|data| {
            for c in &mut data.db_columns {
                c.version = DB_VERSION;
            }
        });
        Ok(())
    }

    fn load_block_times(&self) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_HEIGHT)?;
        let mut times = Vec::with_capacity(BLOCK_TIMES_CAPACITY);
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(BLOCK_TIMES_CAPACITY) {
            let (_, value) = item.map_err(storage_err)?;
            let (_, time, _, _) = unpack_block_info(&value)?;
            times.push(time);
        }
        times.reverse();
        self.is.set_block_times(times);
        Ok(())
    }

    /// Persist the internal state blob.
    pub fn store_internal_state(&self) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_DEFAULT)?;
        let buf = self.is.pack()?;
        self.db.put_cf(cf, INTERNAL_STATE_KEY, buf).map_err(storage_err)
    }

    /// Shared internal state.
    pub fn internal_state(&self) -> &Arc<InternalState> {
        &self.is
    }

    pub fn parser(&self) -> &Arc<dyn ChainParser> {
        &self.parser
    }

    pub fn chain_type(&self) -> ChainType {
        self.chain_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the database closed and flush memtables.
    ///
    /// An index left `inconsistent` by an unfinished bulk load stays so.
    pub fn close(&self) -> Result<(), IndexError> {
        if self.is.db_state() == DbState::Open {
            self.is.set_db_state(DbState::Closed);
        }
        self.store_internal_state()?;
        self.db.flush().map_err(storage_err)?;
        tracing::info!(path = %self.path.display(), "index closed");
        Ok(())
    }

    /// Switch between `inconsistent` (bulk load running) and `open`.
    pub(crate) fn set_inconsistent_state(&self, inconsistent: bool) -> Result<(), IndexError> {
        self.is.set_db_state(if inconsistent { DbState::Inconsistent } else { DbState::Open });
        self.store_internal_state()
    }

    pub(crate) fn ensure_chain(&self, expected: ChainType) -> Result<(), IndexError> {
        if self.chain_type != expected {
            return Err(ChainStateError::UnsupportedChainType(self.chain_type.to_string()).into());
        }
        Ok(())
    }

    pub(crate) fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, IndexError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| IndexError::Storage(format!("missing column family: {name}")))
    }

    pub(crate) fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, IndexError> {
        let cf = self.cf_handle(cf)?;
        self.db.get_cf(cf, key).map_err(storage_err)
    }

    pub(crate) fn write(&self, batch: WriteBatch) -> Result<(), IndexError> {
        self.db.write(batch).map_err(storage_err)
    }

    pub(crate) fn db(&self) -> &DB {
        &self.db
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Connect a block: one atomic batch covering every column it touches.
    pub fn connect_block(&self, block: &Block) -> Result<(), IndexError> {
        let mut batch = WriteBatch::default();
        let mut addresses = AddressesMap::new();
        self.write_height(&mut batch, &BlockInfo::from_block(block))?;
        match self.chain_type {
            ChainType::Bitcoin => self.connect_bitcoin(&mut batch, block, &mut addresses)?,
            ChainType::Ethereum => self.connect_ethereum(&mut batch, block, &mut addresses)?,
        }
        self.store_addresses(&mut batch, block.height, &addresses)?;
        self.write(batch)?;
        self.is.set_best_height(block.height);
        let avg = self.is.append_block_time(block.time);
        tracing::debug!(height = block.height, txs = block.txs.len(), avg_block_period = ?avg, "block connected");
        Ok(())
    }

    /// Remove blocks `lower..=higher`, newest first, in one batch.
    ///
    /// # Errors
    ///
    /// Fails with [`ChainStateError::RebuildIndex`] if the rollback log of
    /// any height in the range was already pruned.
    pub fn disconnect_block_range(&self, lower: u32, higher: u32) -> Result<(), IndexError> {
        if lower > higher {
            return Ok(());
        }
        tracing::info!(lower, higher, "disconnecting blocks");
        match self.chain_type {
            ChainType::Bitcoin => self.disconnect_range_bitcoin(lower, higher)?,
            ChainType::Ethereum => self.disconnect_range_ethereum(lower, higher)?,
        }
        self.is.remove_last_block_times((higher - lower + 1) as usize);
        let best = self.get_best_block()?.map(|(h, _)| h).unwrap_or(0);
        self.is.set_best_height(best);
        tracing::info!(lower, higher, best, "blocks disconnected");
        Ok(())
    }

    pub(crate) fn write_height(&self, batch: &mut WriteBatch, info: &BlockInfo) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_HEIGHT)?;
        let packed_hash = self.parser.pack_block_hash(&info.hash)?;
        batch.put_cf(cf, height_key(info.height), pack_block_info(&packed_hash, info));
        Ok(())
    }

    /// Put the rollback log of `height` and prune the one that fell out of
    /// the retention window.
    pub(crate) fn store_and_cleanup_block_txs(&self, batch: &mut WriteBatch, height: u32, packed: Vec<u8>) -> Result<(), IndexError> {
        let keep = self.parser.keep_block_addresses();
        if keep == 0 {
            return Ok(());
        }
        let cf = self.cf_handle(CF_BLOCK_TXS)?;
        batch.put_cf(cf, height_key(height), packed);
        if height >= keep {
            batch.delete_cf(cf, height_key(height - keep));
        }
        Ok(())
    }

    /// Height and hash of the newest connected block, `None` when empty.
    pub fn get_best_block(&self) -> Result<Option<(u32, String)>, IndexError> {
        let cf = self.cf_handle(CF_HEIGHT)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, value) = item.map_err(storage_err)?;
                let height = unpack_height_key(&key)?;
                let (hash, _, _, _) = unpack_block_info(&value)?;
                Ok(Some((height, self.parser.unpack_block_hash(&hash)?)))
            }
            None => Ok(None),
        }
    }

    pub fn get_block_hash(&self, height: u32) -> Result<Option<String>, IndexError> {
        Ok(self.get_block_info(height)?.map(|info| info.hash))
    }

    pub fn get_block_info(&self, height: u32) -> Result<Option<BlockInfo>, IndexError> {
        let Some(value) = self.get(CF_HEIGHT, &height_key(height))? else {
            return Ok(None);
        };
        let (hash, time, txs, size) = unpack_block_info(&value)?;
        Ok(Some(BlockInfo { hash: self.parser.unpack_block_hash(&hash)?, time, txs, size, height }))
    }

    // ------------------------------------------------------------------
    // Addresses
    // ------------------------------------------------------------------

    pub(crate) fn store_addresses(&self, batch: &mut WriteBatch, height: u32, addresses: &AddressesMap) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        for (addr, txs) in addresses {
            batch.put_cf(cf, pack_address_key(addr, height), pack_tx_indexes(txs));
        }
        Ok(())
    }

    /// Walk the transactions of `addr_desc` between `lower` and `higher`
    /// (inclusive), newest first.
    ///
    /// The callback receives the txid, the block height and the indexes at
    /// which the tx touched the address; returning `ControlFlow::Break`
    /// ends the walk.
    pub fn get_addr_desc_transactions<F>(&self, addr_desc: &[u8], lower: u32, higher: u32, mut f: F) -> Result<(), IndexError>
    where
        F: FnMut(&str, u32, &[i32]) -> Result<ControlFlow<()>, IndexError>,
    {
        let cf = self.cf_handle(CF_ADDRESSES)?;
        let start = pack_address_key(addr_desc, higher);
        let stop = pack_address_key(addr_desc, lower);
        let iter = self.db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(storage_err)?;
            if &key[..] > stop.as_slice() {
                break;
            }
            // a longer descriptor sharing this prefix
            if key.len() != stop.len() {
                continue;
            }
            let (_, height) = unpack_address_key(&key)?;
            let txs = unpack_tx_indexes(&value, self.txid_len)?;
            for t in txs.iter().rev() {
                let txid = self.parser.unpack_txid(&t.btxid)?;
                if f(&txid, height, &t.indexes)?.is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// [`RocksIndex::get_addr_desc_transactions`] for a textual address.
    pub fn get_transactions<F>(&self, address: &str, lower: u32, higher: u32, f: F) -> Result<(), IndexError>
    where
        F: FnMut(&str, u32, &[i32]) -> Result<ControlFlow<()>, IndexError>,
    {
        let desc = self.parser.addr_desc_from_address(address)?;
        self.get_addr_desc_transactions(&desc, lower, higher, f)
    }

    /// Decoded `addresses` row of one (address, height), in append order.
    pub fn get_address_row(&self, addr_desc: &[u8], height: u32) -> Result<Option<Vec<TxIndexes>>, IndexError> {
        match self.get(CF_ADDRESSES, &pack_address_key(addr_desc, height))? {
            Some(v) => Ok(Some(unpack_tx_indexes(&v, self.txid_len)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Raw rows of one column family in key order.
    pub fn column_rows(&self, name: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>, IndexError> {
        let cf = self.cf_handle(name)?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|item| item.map_err(storage_err))
            .collect()
    }

    /// Recount rows and bytes of every column family.
    ///
    /// Stops early, leaving the remaining columns untouched, once `stop` is
    /// set.
    pub fn compute_column_stats(&self, stop: &AtomicBool) -> Result<(), IndexError> {
        for name in column_families(self.chain_type) {
            let cf = self.cf_handle(name)?;
            let (mut rows, mut key_bytes, mut value_bytes) = (0i64, 0i64, 0i64);
            for item in self.db.iterator_cf(cf, IteratorMode::Start) {
                if stop.load(Ordering::Relaxed) {
                    tracing::info!(column = name, "column stats computation interrupted");
                    return Err(IndexError::Interrupted);
                }
                let (key, value) = item.map_err(storage_err)?;
                rows += 1;
                key_bytes += key.len() as i64;
                value_bytes += value.len() as i64;
            }
            tracing::info!(column = name, rows, key_bytes, value_bytes, "column stats computed");
            self.is.set_column_stats(name, rows, key_bytes, value_bytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockdex_core::testing::{btc_tx, make_block, script, txid, TestBitcoinParser, TestEthereumParser};

    fn temp_index() -> (RocksIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let index = RocksIndex::open(dir.path().join("db"), Arc::new(TestBitcoinParser::default()), "Bitcoin", &DbConfig::default()).unwrap();
        (index, dir)
    }

    #[test]
    fn addresses_map_coalesces_indexes() {
        let mut map = AddressesMap::new();
        assert!(!add_to_addresses_map(&mut map, b"a", b"t1", 0));
        assert!(add_to_addresses_map(&mut map, b"a", b"t1", !0));
        assert!(add_to_addresses_map(&mut map, b"a", b"t1", 0));
        assert!(!add_to_addresses_map(&mut map, b"a", b"t2", 1));
        assert_eq!(map[&b"a".to_vec()][0].indexes, vec![0, !0]);
        assert_eq!(map[&b"a".to_vec()].len(), 2);
    }

    #[test]
    fn fresh_index_is_empty_and_open() {
        let (index, _dir) = temp_index();
        assert_eq!(index.get_best_block().unwrap(), None);
        assert_eq!(index.internal_state().db_state(), DbState::Open);
        assert_eq!(index.internal_state().coin(), "Bitcoin");
    }

    #[test]
    fn best_block_follows_connects() {
        let (index, _dir) = temp_index();
        for h in 0..3u8 {
            let tx = btc_tx(&txid(h + 1), &[], &[(script(h), 100)]);
            index.connect_block(&make_block(u32::from(h), 0, vec![tx])).unwrap();
        }
        let (height, hash) = index.get_best_block().unwrap().unwrap();
        assert_eq!(height, 2);
        assert_eq!(Some(hash), index.get_block_hash(2).unwrap());
        let info = index.get_block_info(1).unwrap().unwrap();
        assert_eq!(info.txs, 1);
        assert_eq!(info.height, 1);
        assert_eq!(index.internal_state().best_height(), 2);
        assert!(index.get_block_info(3).unwrap().is_none());
    }

    #[test]
    fn reopen_with_other_coin_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let parser = Arc::new(TestBitcoinParser::default());
        {
            let index = RocksIndex::open(&path, parser.clone(), "Bitcoin", &DbConfig::default()).unwrap();
            index.close().unwrap();
        }
        let err = RocksIndex::open(&path, parser, "Litecoin", &DbConfig::default()).err().unwrap();
        assert!(matches!(err, IndexError::ChainState(ChainStateError::CoinMismatch { .. })));
    }

    #[test]
    fn reopen_with_other_extended_flag_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let parser = Arc::new(TestBitcoinParser::default());
        drop(RocksIndex::open(&path, parser.clone(), "Bitcoin", &DbConfig::default()).unwrap());
        let cfg = DbConfig { extended_index: true, ..DbConfig::default() };
        let err = RocksIndex::open(&path, parser, "Bitcoin", &cfg).err().unwrap();
        assert!(matches!(err, IndexError::ChainState(ChainStateError::ExtendedIndexMismatch { .. })));
    }

    #[test]
    fn close_marks_state_closed_and_reopen_loads_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let parser = Arc::new(TestBitcoinParser::default());
        {
            let index = RocksIndex::open(&path, parser.clone(), "Bitcoin", &DbConfig::default()).unwrap();
            for h in 0..4u8 {
                let tx = btc_tx(&txid(h + 1), &[], &[(script(1), 1)]);
                index.connect_block(&make_block(u32::from(h), 0, vec![tx])).unwrap();
            }
            index.close().unwrap();
            assert_eq!(index.internal_state().db_state(), DbState::Closed);
        }
        let index = RocksIndex::open(&path, parser, "Bitcoin", &DbConfig::default()).unwrap();
        assert_eq!(index.internal_state().block_times_len(), 4);
        assert_eq!(index.internal_state().avg_block_period(), Some(600));
        assert_eq!(index.internal_state().best_height(), 3);
    }

    #[test]
    fn previous_schema_version_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let parser = Arc::new(TestBitcoinParser::default());
        {
            let index = RocksIndex::open(&path, parser.clone(), "Bitcoin", &DbConfig::default()).unwrap();
            index.put_tx(&btc_tx(&txid(7), &[], &[(script(1), 1)]), 5, 1_500_003_000).unwrap();
            assert!(index.get_tx(&txid(7)).unwrap().is_some());
            index.internal_state().with_data(|d| {
                for c in &mut d.db_columns {
                    c.version = DB_VERSION - 1;
                }
            });
            index.close().unwrap();
        }
        let index = RocksIndex::open(&path, parser, "Bitcoin", &DbConfig::default()).unwrap();
        assert!(index.internal_state().columns().iter().all(|c| c.version == DB_VERSION));
        assert!(index.get_tx(&txid(7)).unwrap().is_none());
    }

    #[test]
    fn unsupported_schema_version_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        let parser = Arc::new(TestEthereumParser::default());
        {
            let index = RocksIndex::open(&path, parser.clone(), "Ethereum", &DbConfig::default()).unwrap();
            index.internal_state().with_data(|d| d.db_columns[1].version = DB_VERSION - 1);
            index.close().unwrap();
        }
        let err = RocksIndex::open(&path, parser, "Ethereum", &DbConfig::default()).err().unwrap();
        assert!(matches!(err, IndexError::ChainState(ChainStateError::SchemaVersionMismatch { .. })));
    }

    #[test]
    fn column_stats_count_rows() {
        let (index, _dir) = temp_index();
        let tx = btc_tx(&txid(1), &[], &[(script(1), 10), (script(2), 20)]);
        index.connect_block(&make_block(0, 0, vec![tx])).unwrap();
        index.compute_column_stats(&AtomicBool::new(false)).unwrap();
        let cols = index.internal_state().columns();
        let addresses = cols.iter().find(|c| c.name == CF_ADDRESSES).unwrap();
        assert_eq!(addresses.rows, 2);
        let height = cols.iter().find(|c| c.name == CF_HEIGHT).unwrap();
        assert_eq!(height.rows, 1);
        assert!(matches!(index.compute_column_stats(&AtomicBool::new(true)), Err(IndexError::Interrupted)));
    }
}
