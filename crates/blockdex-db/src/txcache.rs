//! Cache of confirmed transactions fetched from the backend.
//!
//! Rows live in the `transactions` column family keyed by packed txid. The
//! value is the parser's packed form with the confirmation count zeroed;
//! readers recompute confirmations from the current best height.

use std::sync::Arc;

use rocksdb::WriteBatch;

use blockdex_core::error::IndexError;
use blockdex_core::traits::BlockOracle;
use blockdex_core::types::Tx;

use crate::schema::CF_TRANSACTIONS;
use crate::store::{storage_err, RocksIndex};

impl RocksIndex {
    /// Cached transaction and the height of its block.
    pub fn get_tx(&self, txid: &str) -> Result<Option<(Tx, u32)>, IndexError> {
        let key = self.parser.pack_txid(txid)?;
        match self.get(CF_TRANSACTIONS, &key)? {
            Some(buf) => Ok(Some(self.parser.unpack_tx(&buf)?)),
            None => Ok(None),
        }
    }

    /// Store a confirmed transaction, keeping the column statistics current.
    pub fn put_tx(&self, tx: &Tx, height: u32, block_time: i64) -> Result<(), IndexError> {
        let key = self.parser.pack_txid(&tx.txid)?;
        let mut stored = tx.clone();
        stored.confirmations = 0;
        let value = self.parser.pack_tx(&stored, height, block_time)?;

        let old = self.get(CF_TRANSACTIONS, &key)?;
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        self.db().put_cf(cf, &key, &value).map_err(storage_err)?;
        match old {
            Some(old) => self.is.add_column_stats(CF_TRANSACTIONS, 0, 0, value.len() as i64 - old.len() as i64),
            None => self.is.add_column_stats(CF_TRANSACTIONS, 1, key.len() as i64, value.len() as i64),
        }
        Ok(())
    }

    pub fn delete_tx(&self, txid: &str) -> Result<(), IndexError> {
        let key = self.parser.pack_txid(txid)?;
        let Some(old) = self.get(CF_TRANSACTIONS, &key)? else {
            return Ok(());
        };
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf_handle(CF_TRANSACTIONS)?, &key);
        self.write(batch)?;
        self.is.add_column_stats(CF_TRANSACTIONS, -1, -(key.len() as i64), -(old.len() as i64));
        Ok(())
    }
}

/// Read-through transaction cache in front of a [`BlockOracle`].
pub struct TxCache {
    index: Arc<RocksIndex>,
    oracle: Arc<dyn BlockOracle>,
    enabled: bool,
}

impl TxCache {
    pub fn new(index: Arc<RocksIndex>, oracle: Arc<dyn BlockOracle>, enabled: bool) -> Self {
        Self { index, oracle, enabled }
    }

    /// Transaction by id, from the cache when present, otherwise from the
    /// backend. Confirmed backend results are written to the cache when
    /// caching is enabled; mempool transactions never are.
    pub async fn get_transaction(&self, txid: &str) -> Result<Tx, IndexError> {
        let best = self.index.internal_state().best_height();
        if let Some((mut tx, height)) = self.index.get_tx(txid)? {
            tx.confirmations = (best + 1).saturating_sub(height);
            tracing::trace!(txid, height, "transaction cache hit");
            return Ok(tx);
        }

        let tx = self.oracle.transaction(txid).await?;
        if self.enabled && tx.confirmations > 0 {
            let height = best.saturating_sub(tx.confirmations - 1);
            let block_time = tx.block_time.unwrap_or_default();
            if let Err(e) = self.index.put_tx(&tx, height, block_time) {
                tracing::warn!(txid, error = %e, "failed to cache transaction");
            }
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use async_trait::async_trait;
    use blockdex_core::error::OracleError;
    use blockdex_core::testing::{btc_tx, make_block, script, txid, TestBitcoinParser};
    use blockdex_core::types::Block;
    use parking_lot::Mutex;

    struct TxOracle {
        tx: Tx,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl BlockOracle for TxOracle {
        async fn best_block_hash(&self) -> Result<String, OracleError> {
            Err(OracleError::BlockNotFound)
        }

        async fn best_block_height(&self) -> Result<u32, OracleError> {
            Err(OracleError::BlockNotFound)
        }

        async fn block_hash(&self, _height: u32) -> Result<String, OracleError> {
            Err(OracleError::BlockNotFound)
        }

        async fn block(&self, _hash: &str, _height: u32) -> Result<Block, OracleError> {
            Err(OracleError::BlockNotFound)
        }

        async fn transaction(&self, txid: &str) -> Result<Tx, OracleError> {
            *self.calls.lock() += 1;
            if txid == self.tx.txid {
                Ok(self.tx.clone())
            } else {
                Err(OracleError::TxNotFound(txid.to_string()))
            }
        }
    }

    fn setup(confirmations: u32, enabled: bool) -> (TxCache, Arc<TxOracle>, Arc<RocksIndex>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let parser = Arc::new(TestBitcoinParser::default());
        let index = Arc::new(RocksIndex::open(dir.path().join("db"), parser, "Bitcoin", &DbConfig::default()).unwrap());
        for h in 0..=10 {
            index.connect_block(&make_block(h, 0, vec![])).unwrap();
        }
        let mut tx = btc_tx(&txid(9), &[], &[(script(1), 5)]);
        tx.confirmations = confirmations;
        tx.block_time = Some(1_500_004_800);
        let oracle = Arc::new(TxOracle { tx, calls: Mutex::new(0) });
        let cache = TxCache::new(index.clone(), oracle.clone(), enabled);
        (cache, oracle, index, dir)
    }

    #[tokio::test]
    async fn confirmed_tx_is_cached_with_its_height() {
        let (cache, oracle, index, _dir) = setup(3, true);
        let tx = cache.get_transaction(&txid(9)).await.unwrap();
        assert_eq!(tx.confirmations, 3);
        let (_, height) = index.get_tx(&txid(9)).unwrap().unwrap();
        assert_eq!(height, 8);

        let again = cache.get_transaction(&txid(9)).await.unwrap();
        assert_eq!(again.confirmations, 3);
        assert_eq!(*oracle.calls.lock(), 1);

        index.connect_block(&make_block(11, 0, vec![])).unwrap();
        assert_eq!(cache.get_transaction(&txid(9)).await.unwrap().confirmations, 4);
    }

    #[tokio::test]
    async fn mempool_tx_is_not_cached() {
        let (cache, oracle, index, _dir) = setup(0, true);
        cache.get_transaction(&txid(9)).await.unwrap();
        cache.get_transaction(&txid(9)).await.unwrap();
        assert!(index.get_tx(&txid(9)).unwrap().is_none());
        assert_eq!(*oracle.calls.lock(), 2);
    }

    #[tokio::test]
    async fn disabled_cache_only_reads_through() {
        let (cache, _oracle, index, _dir) = setup(5, false);
        cache.get_transaction(&txid(9)).await.unwrap();
        assert!(index.get_tx(&txid(9)).unwrap().is_none());
    }

    #[tokio::test]
    async fn backend_errors_propagate() {
        let (cache, _oracle, _index, _dir) = setup(1, true);
        let err = cache.get_transaction(&txid(3)).await.unwrap_err();
        assert!(matches!(err, IndexError::Oracle(OracleError::TxNotFound(_))));
    }

    #[test]
    fn put_and_delete_track_column_stats() {
        let (_cache, _oracle, index, _dir) = setup(1, true);
        let tx = btc_tx(&txid(4), &[], &[(script(2), 1)]);
        index.put_tx(&tx, 2, 1_500_001_200).unwrap();
        index.put_tx(&tx, 2, 1_500_001_200).unwrap();
        let rows = |index: &RocksIndex| {
            index.internal_state().columns().into_iter().find(|c| c.name == CF_TRANSACTIONS).unwrap().rows
        };
        assert_eq!(rows(&index), 1);
        let (stored, height) = index.get_tx(&txid(4)).unwrap().unwrap();
        assert_eq!(height, 2);
        assert_eq!(stored.confirmations, 0);
        index.delete_tx(&txid(4)).unwrap();
        index.delete_tx(&txid(4)).unwrap();
        assert_eq!(rows(&index), 0);
        assert!(index.get_tx(&txid(4)).unwrap().is_none());
    }
}
