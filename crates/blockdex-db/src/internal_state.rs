//! Persisted bookkeeping of the index: coin, schema version per column,
//! consistency flag, best height, and the recent block-time ring.
//!
//! One [`InternalState`] exists per open index and is shared through an
//! `Arc`. The JSON form is stored under `default["internalState"]`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use blockdex_core::constants::{AVG_BLOCK_PERIOD_WINDOW, BLOCK_TIMES_CAPACITY, DB_VERSION};
use blockdex_core::error::IndexError;

/// Consistency flag of the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbState {
    #[default]
    Closed,
    Open,
    /// Set for the duration of a bulk load.
    Inconsistent,
}

/// Statistics of one column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalStateColumn {
    pub name: String,
    pub version: u32,
    pub rows: i64,
    pub key_bytes: i64,
    pub value_bytes: i64,
    pub updated: DateTime<Utc>,
}

impl InternalStateColumn {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), version: DB_VERSION, rows: 0, key_bytes: 0, value_bytes: 0, updated: Utc::now() }
    }
}

/// The serialized part of the internal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalStateData {
    pub coin: String,
    pub db_state: DbState,
    #[serde(default)]
    pub extended_index: bool,
    #[serde(default)]
    pub best_height: u32,
    #[serde(default)]
    pub initial_sync: bool,
    #[serde(default)]
    pub is_synchronized: bool,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_store: Option<DateTime<Utc>>,
    pub db_columns: Vec<InternalStateColumn>,
}

#[derive(Debug, Default)]
struct BlockTimes {
    times: VecDeque<i64>,
}

impl BlockTimes {
    fn push(&mut self, t: i64) {
        if self.times.len() == BLOCK_TIMES_CAPACITY {
            self.times.pop_front();
        }
        self.times.push_back(t);
    }

    fn avg_period(&self) -> Option<i64> {
        let n = self.times.len();
        if n < 2 {
            return None;
        }
        let first = n.saturating_sub(AVG_BLOCK_PERIOD_WINDOW + 1);
        let gaps = (n - 1 - first) as i64;
        Some((self.times[n - 1] - self.times[first]) / gaps)
    }
}

/// Shared, mutex guarded internal state.
#[derive(Debug)]
pub struct InternalState {
    data: Mutex<InternalStateData>,
    block_times: Mutex<BlockTimes>,
}

impl InternalState {
    /// Fresh state for an empty database.
    pub fn new(coin: &str, columns: &[&str], extended_index: bool) -> Self {
        Self::from_data(InternalStateData {
            coin: coin.to_string(),
            db_state: DbState::Closed,
            extended_index,
            best_height: 0,
            initial_sync: false,
            is_synchronized: false,
            last_sync: None,
            last_store: None,
            db_columns: columns.iter().map(|c| InternalStateColumn::new(c)).collect(),
        })
    }

    pub fn from_data(data: InternalStateData) -> Self {
        Self { data: Mutex::new(data), block_times: Mutex::new(BlockTimes::default()) }
    }

    /// Parse the persisted JSON form.
    pub fn unpack(buf: &[u8]) -> Result<Self, IndexError> {
        Ok(Self::from_data(serde_json::from_slice(buf)?))
    }

    /// Serialize for storage, stamping the store time.
    pub fn pack(&self) -> Result<Vec<u8>, IndexError> {
        let mut data = self.data.lock();
        data.last_store = Some(Utc::now());
        Ok(serde_json::to_vec(&*data)?)
    }

    /// Snapshot of the serialized part.
    pub fn snapshot(&self) -> InternalStateData {
        self.data.lock().clone()
    }

    pub fn coin(&self) -> String {
        self.data.lock().coin.clone()
    }

    pub fn db_state(&self) -> DbState {
        self.data.lock().db_state
    }

    pub fn set_db_state(&self, state: DbState) {
        self.data.lock().db_state = state;
    }

    pub fn extended_index(&self) -> bool {
        self.data.lock().extended_index
    }

    pub fn best_height(&self) -> u32 {
        self.data.lock().best_height
    }

    pub fn set_best_height(&self, height: u32) {
        self.data.lock().best_height = height;
    }

    pub fn start_sync(&self, initial: bool) {
        let mut data = self.data.lock();
        data.initial_sync = initial;
        data.is_synchronized = false;
    }

    pub fn finish_sync(&self, best_height: u32) {
        let mut data = self.data.lock();
        data.initial_sync = false;
        data.is_synchronized = true;
        data.best_height = best_height;
        data.last_sync = Some(Utc::now());
    }

    pub fn is_synchronized(&self) -> bool {
        self.data.lock().is_synchronized
    }

    // --- Column statistics ---

    pub fn columns(&self) -> Vec<InternalStateColumn> {
        self.data.lock().db_columns.clone()
    }

    /// Apply deltas to the statistics of `name`.
    pub fn add_column_stats(&self, name: &str, rows: i64, key_bytes: i64, value_bytes: i64) {
        let mut data = self.data.lock();
        if let Some(c) = data.db_columns.iter_mut().find(|c| c.name == name) {
            c.rows += rows;
            c.key_bytes += key_bytes;
            c.value_bytes += value_bytes;
            c.updated = Utc::now();
        }
    }

    /// Replace the statistics of `name` with freshly computed totals.
    pub fn set_column_stats(&self, name: &str, rows: i64, key_bytes: i64, value_bytes: i64) {
        let mut data = self.data.lock();
        if let Some(c) = data.db_columns.iter_mut().find(|c| c.name == name) {
            c.rows = rows;
            c.key_bytes = key_bytes;
            c.value_bytes = value_bytes;
            c.updated = Utc::now();
        }
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut InternalStateData) -> R) -> R {
        f(&mut self.data.lock())
    }

    // --- Block times ---

    /// Replace the ring with times loaded from the `height` column.
    pub fn set_block_times(&self, times: impl IntoIterator<Item = i64>) {
        let mut bt = self.block_times.lock();
        bt.times.clear();
        for t in times {
            bt.push(t);
        }
    }

    /// Record the time of a newly connected block and return the average
    /// block period in seconds, if known.
    pub fn append_block_time(&self, time: i64) -> Option<i64> {
        let mut bt = self.block_times.lock();
        bt.push(time);
        bt.avg_period()
    }

    /// Drop the times of `count` disconnected blocks.
    pub fn remove_last_block_times(&self, count: usize) {
        let mut bt = self.block_times.lock();
        let keep = bt.times.len().saturating_sub(count);
        bt.times.truncate(keep);
    }

    pub fn avg_block_period(&self) -> Option<i64> {
        self.block_times.lock().avg_period()
    }

    pub fn block_times_len(&self) -> usize {
        self.block_times.lock().times.len()
    }
}
