//! Bulk loader for the initial sync.
//!
//! [`BulkConnect`] keeps the `txAddresses`, `addressBalance` and
//! `addressContracts` rows dirtied by consecutive blocks in memory. Once a
//! map grows past its limit, part of it is written on a background thread
//! while later blocks keep being processed; at most one such flush runs per
//! map. The database is marked `inconsistent` for the whole run and only
//! [`BulkConnect::close`] marks it open again, so an interrupted or failed
//! load refuses to reopen.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use rocksdb::WriteBatch;

use blockdex_core::error::{ChainStateError, IndexError};
use blockdex_core::types::{Block, BlockInfo, ChainType};

use crate::bitcoin::{BalancesMap, TxAddressesMap};
use crate::config::BulkConfig;
use crate::ethereum::AddrContractsMap;
use crate::schema::{pack_bitcoin_block_txs, pack_ethereum_block_txs};
use crate::store::{AddressesMap, RocksIndex};

type Queued = Vec<(BlockInfo, AddressesMap)>;

/// Take up to `count` rows, fully spent transactions first.
fn take_tx_addresses(map: &mut TxAddressesMap, count: usize) -> TxAddressesMap {
    let mut keys: Vec<Vec<u8>> =
        map.iter().filter(|(_, ta)| ta.is_fully_spent()).map(|(k, _)| k.clone()).take(count).collect();
    if keys.len() < count {
        let more = count - keys.len();
        keys.extend(map.iter().filter(|(_, ta)| !ta.is_fully_spent()).map(|(k, _)| k.clone()).take(more));
    }
    keys.into_iter().filter_map(|k| map.remove_entry(&k)).collect()
}

fn take_some<V>(map: &mut HashMap<Vec<u8>, V>, count: usize) -> HashMap<Vec<u8>, V> {
    let keys: Vec<Vec<u8>> = map.keys().take(count).cloned().collect();
    keys.into_iter().filter_map(|k| map.remove_entry(&k)).collect()
}

// ----------------------------------------------------------------------
// Background flushes
// ----------------------------------------------------------------------

/// Rows handed to a background flush that may not be committed yet.
/// Lookups must check these before the database.
#[derive(Clone, Copy, Default)]
pub(crate) struct PendingRows<'a> {
    pub tx_addresses: Option<&'a TxAddressesMap>,
    pub balances: Option<&'a BalancesMap>,
}

/// A flush running on its own thread. `rows` stays readable until the
/// thread is joined.
struct InFlight<T> {
    rows: Arc<T>,
    handle: JoinHandle<Result<(), IndexError>>,
}

impl<T: Send + Sync + 'static> InFlight<T> {
    fn spawn(index: &Arc<RocksIndex>, rows: T, write: fn(&RocksIndex, &T) -> Result<(), IndexError>) -> Self {
        let rows = Arc::new(rows);
        let (index, shared) = (Arc::clone(index), Arc::clone(&rows));
        let handle = std::thread::spawn(move || write(&index, &shared));
        Self { rows, handle }
    }

    fn join(self) -> Result<Arc<T>, IndexError> {
        let Self { rows, handle } = self;
        match handle.join() {
            Ok(result) => result.map(|()| rows),
            Err(_) => Err(IndexError::Storage("bulk flush thread panicked".into())),
        }
    }
}

fn write_tx_addresses(index: &RocksIndex, rows: &TxAddressesMap) -> Result<(), IndexError> {
    let mut batch = WriteBatch::default();
    index.store_tx_addresses(&mut batch, rows)?;
    index.write(batch)?;
    tracing::debug!(rows = rows.len(), "tx addresses flushed");
    Ok(())
}

fn write_balances(index: &RocksIndex, rows: &BalancesMap) -> Result<(), IndexError> {
    let mut batch = WriteBatch::default();
    index.store_balances(&mut batch, rows)?;
    index.write(batch)?;
    tracing::debug!(rows = rows.len(), "balances flushed");
    Ok(())
}

fn write_addr_contracts(index: &RocksIndex, rows: &AddrContractsMap) -> Result<(), IndexError> {
    let mut batch = WriteBatch::default();
    index.store_addr_contracts(&mut batch, rows)?;
    index.write(batch)?;
    tracing::debug!(rows = rows.len(), "address contracts flushed");
    Ok(())
}

fn write_heights(index: &RocksIndex, queued: &Queued) -> Result<(), IndexError> {
    let mut batch = WriteBatch::default();
    for (info, addresses) in queued {
        index.write_height(&mut batch, info)?;
        index.store_addresses(&mut batch, info.height, addresses)?;
    }
    index.write(batch)
}

/// Join `flight` if one is running, keeping its rows until it has finished.
fn settle<T: Send + Sync + 'static>(flight: &mut Option<InFlight<T>>) -> Result<Option<Arc<T>>, IndexError> {
    flight.take().map(InFlight::join).transpose()
}

// ----------------------------------------------------------------------
// Loader
// ----------------------------------------------------------------------

/// In-memory accumulator used while loading a long run of blocks.
pub struct BulkConnect {
    index: Arc<RocksIndex>,
    config: BulkConfig,
    tx_addresses: TxAddressesMap,
    balances: BalancesMap,
    addr_contracts: AddrContractsMap,
    queued: Queued,
    queued_addresses: usize,
    tx_addresses_flush: Option<InFlight<TxAddressesMap>>,
    balances_flush: Option<InFlight<BalancesMap>>,
    addr_contracts_flush: Option<InFlight<AddrContractsMap>>,
    heights_flush: Option<InFlight<Queued>>,
    // set once a block failed half way; the maps can no longer be written
    failed: bool,
}

impl RocksIndex {
    /// Start a bulk load. The database stays `inconsistent` until the
    /// returned loader is closed.
    pub fn init_bulk_connect(self: &Arc<Self>, config: BulkConfig) -> Result<BulkConnect, IndexError> {
        self.set_inconsistent_state(true)?;
        tracing::info!(
            max_tx_addresses = config.max_tx_addresses,
            max_balances = config.max_balances,
            max_addresses = config.max_addresses,
            "bulk connect started"
        );
        Ok(BulkConnect {
            index: Arc::clone(self),
            config,
            tx_addresses: TxAddressesMap::new(),
            balances: BalancesMap::new(),
            addr_contracts: AddrContractsMap::new(),
            queued: Vec::new(),
            queued_addresses: 0,
            tx_addresses_flush: None,
            balances_flush: None,
            addr_contracts_flush: None,
            heights_flush: None,
            failed: false,
        })
    }
}

impl BulkConnect {
    pub fn index(&self) -> &Arc<RocksIndex> {
        &self.index
    }

    /// Connect the next block. The rollback log is written only when
    /// `store_block_txs` is set, i.e. for blocks near the expected tip.
    ///
    /// After an error the loader refuses further blocks and [`close`]
    /// no longer writes anything.
    ///
    /// [`close`]: BulkConnect::close
    pub fn connect_block(&mut self, block: &Block, store_block_txs: bool) -> Result<(), IndexError> {
        if self.failed {
            return Err(ChainStateError::InconsistentState.into());
        }
        let result = self.apply_block(block, store_block_txs).and_then(|()| self.start_flushes());
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn apply_block(&mut self, block: &Block, store_block_txs: bool) -> Result<(), IndexError> {
        let index = &self.index;
        let mut addresses = AddressesMap::new();
        let mut batch = WriteBatch::default();
        match index.chain_type() {
            ChainType::Bitcoin => {
                let pending = PendingRows {
                    tx_addresses: self.tx_addresses_flush.as_ref().map(|f| &*f.rows),
                    balances: self.balances_flush.as_ref().map(|f| &*f.rows),
                };
                let block_txs = index.process_bitcoin_block(
                    block,
                    &mut addresses,
                    &mut self.tx_addresses,
                    &mut self.balances,
                    pending,
                )?;
                if store_block_txs {
                    index.store_and_cleanup_block_txs(&mut batch, block.height, pack_bitcoin_block_txs(&block_txs))?;
                }
            }
            ChainType::Ethereum => {
                let pending = self.addr_contracts_flush.as_ref().map(|f| &*f.rows);
                let out = index.process_ethereum_block(block, &mut addresses, &mut self.addr_contracts, pending)?;
                index.store_ethereum_extras(&mut batch, block, &out)?;
                if store_block_txs {
                    index.store_and_cleanup_block_txs(&mut batch, block.height, pack_ethereum_block_txs(&out.block_txs))?;
                }
            }
        }
        if !batch.is_empty() {
            index.write(batch)?;
        }
        self.queued_addresses += addresses.len();
        self.queued.push((BlockInfo::from_block(block), addresses));
        Ok(())
    }

    /// Hand oversized maps to background writers. A map's previous flush is
    /// joined first so its rows land before newer versions of them.
    fn start_flushes(&mut self) -> Result<(), IndexError> {
        if self.tx_addresses.len() > self.config.max_tx_addresses {
            settle(&mut self.tx_addresses_flush)?;
            let rows = take_tx_addresses(&mut self.tx_addresses, self.config.partial_tx_addresses());
            self.tx_addresses_flush = Some(InFlight::spawn(&self.index, rows, write_tx_addresses));
        }
        if self.balances.len() > self.config.max_balances {
            settle(&mut self.balances_flush)?;
            let rows = take_some(&mut self.balances, self.config.partial_balances());
            self.balances_flush = Some(InFlight::spawn(&self.index, rows, write_balances));
        }
        if self.addr_contracts.len() > self.config.max_addr_contracts {
            settle(&mut self.addr_contracts_flush)?;
            let rows = take_some(&mut self.addr_contracts, self.config.partial_addr_contracts());
            self.addr_contracts_flush = Some(InFlight::spawn(&self.index, rows, write_addr_contracts));
        }
        if self.queued_addresses > self.config.max_addresses {
            self.settle_heights()?;
            let queued = self.take_queued();
            self.heights_flush = Some(InFlight::spawn(&self.index, queued, write_heights));
        }
        Ok(())
    }

    fn take_queued(&mut self) -> Queued {
        self.queued_addresses = 0;
        std::mem::take(&mut self.queued)
    }

    /// Join the running height flush and record its blocks as connected.
    fn settle_heights(&mut self) -> Result<(), IndexError> {
        let Some(queued) = settle(&mut self.heights_flush)? else {
            return Ok(());
        };
        let is = self.index.internal_state();
        for (info, _) in queued.iter() {
            is.append_block_time(info.time);
        }
        if let Some((last, _)) = queued.last() {
            is.set_best_height(last.height);
            tracing::info!(
                height = last.height,
                blocks = queued.len(),
                tx_addresses = self.tx_addresses.len(),
                balances = self.balances.len(),
                addr_contracts = self.addr_contracts.len(),
                "bulk connect progress"
            );
        }
        Ok(())
    }

    /// Wait for every running flush; the first error wins.
    fn settle_all(&mut self) -> Result<(), IndexError> {
        let tx_addresses = settle(&mut self.tx_addresses_flush).map(drop);
        let balances = settle(&mut self.balances_flush).map(drop);
        let addr_contracts = settle(&mut self.addr_contracts_flush).map(drop);
        let heights = self.settle_heights();
        tx_addresses.and(balances).and(addr_contracts).and(heights)
    }

    /// Write everything still held in memory and mark the database open.
    ///
    /// Fails with [`ChainStateError::InconsistentState`] without writing the
    /// maps when an earlier block did not connect.
    pub fn close(mut self) -> Result<(), IndexError> {
        if self.failed {
            self.abort();
            return Err(ChainStateError::InconsistentState.into());
        }
        self.settle_all()?;
        let index = Arc::clone(&self.index);
        self.tx_addresses_flush =
            Some(InFlight::spawn(&index, std::mem::take(&mut self.tx_addresses), write_tx_addresses));
        self.balances_flush = Some(InFlight::spawn(&index, std::mem::take(&mut self.balances), write_balances));
        self.addr_contracts_flush =
            Some(InFlight::spawn(&index, std::mem::take(&mut self.addr_contracts), write_addr_contracts));
        let queued = self.take_queued();
        self.heights_flush = Some(InFlight::spawn(&index, queued, write_heights));
        self.settle_all()?;

        index.set_inconsistent_state(false)?;
        tracing::info!(best_height = index.internal_state().best_height(), "bulk connect finished");
        Ok(())
    }

    /// Stop without writing the rows held in memory. Flushes already
    /// running are waited for; the database stays `inconsistent`.
    pub fn abort(self) {
        tracing::warn!(
            best_height = self.index.internal_state().best_height(),
            "bulk connect aborted, index left inconsistent"
        );
    }
}

impl Drop for BulkConnect {
    fn drop(&mut self) {
        if let Err(e) = self.settle_all() {
            tracing::error!(error = %e, "bulk flush failed");
        }
    }
}
