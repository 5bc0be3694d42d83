//! Indexer configuration.
//!
//! Provides [`IndexerConfig`] with defaults for the data directory, the
//! RocksDB options, the bulk-load thresholds and the sync worker. Values can
//! be overridden from a file and from `BLOCKDEX__*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// RocksDB options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Store spending details on every output (fixed at creation).
    pub extended_index: bool,
    pub max_open_files: i32,
    /// Background threads used by RocksDB for flush and compaction.
    pub parallelism: i32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { extended_index: false, max_open_files: 1 << 14, parallelism: 8 }
    }
}

/// Soft limits of the bulk loader's in-memory maps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub max_tx_addresses: usize,
    pub max_balances: usize,
    pub max_addresses: usize,
    pub max_addr_contracts: usize,
    /// A partial flush writes `max / partial_divisor` rows.
    pub partial_divisor: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_tx_addresses: 500_000,
            max_balances: 700_000,
            max_addresses: 200_000,
            max_addr_contracts: 1_200_000,
            partial_divisor: 10,
        }
    }
}

impl BulkConfig {
    pub fn partial_tx_addresses(&self) -> usize {
        self.max_tx_addresses / self.partial_divisor.max(1)
    }

    pub fn partial_balances(&self) -> usize {
        self.max_balances / self.partial_divisor.max(1)
    }

    pub fn partial_addr_contracts(&self) -> usize {
        self.max_addr_contracts / self.partial_divisor.max(1)
    }
}

/// Sync worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Parallel block fetch workers; 1 disables parallel fetch.
    pub workers: usize,
    /// Gap above which parallel fetch (or bulk load) is used.
    pub chunk: u32,
    /// Allow bulk load during initial sync.
    pub bulk_connect: bool,
    /// First height indexed into an empty database.
    pub min_start_height: u32,
    pub rpc_timeout_secs: u64,
    pub retry_delay_ms: u64,
    /// Fetch blocks without connecting them.
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            chunk: 100,
            bulk_connect: true,
            min_start_height: 0,
            rpc_timeout_secs: 25,
            retry_delay_ms: 500,
            dry_run: false,
        }
    }
}

impl SyncConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Configuration of one indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Coin name recorded in the database; a mismatch refuses to open.
    pub coin: String,
    pub db: DbConfig,
    pub bulk: BulkConfig,
    pub sync: SyncConfig,
    /// Write confirmed transactions fetched from the backend to the cache.
    pub tx_cache: bool,
    /// Log filter string (e.g. "info", "blockdex_db=debug").
    pub log_level: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blockdex");

        Self {
            data_dir,
            coin: "Bitcoin".to_string(),
            db: DbConfig::default(),
            bulk: BulkConfig::default(),
            sync: SyncConfig::default(),
            tx_cache: true,
            log_level: "info".to_string(),
        }
    }
}

impl IndexerConfig {
    /// Path to the RocksDB index directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Load defaults, then an optional config file, then environment
    /// variables prefixed with `BLOCKDEX__` (nested keys joined by `__`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(config::Environment::with_prefix("BLOCKDEX").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bulk_thresholds() {
        let cfg = BulkConfig::default();
        assert_eq!(cfg.max_tx_addresses, 500_000);
        assert_eq!(cfg.partial_tx_addresses(), 50_000);
        assert_eq!(cfg.partial_balances(), 70_000);
    }

    #[test]
    fn zero_divisor_does_not_panic() {
        let cfg = BulkConfig { partial_divisor: 0, ..BulkConfig::default() };
        assert_eq!(cfg.partial_addr_contracts(), 1_200_000);
    }

    #[test]
    fn default_sync_timings() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.retry_delay(), Duration::from_millis(500));
        assert_eq!(cfg.rpc_timeout(), Duration::from_secs(25));
        assert!(cfg.workers > 1);
    }

    #[test]
    fn default_data_dir_ends_with_blockdex() {
        let cfg = IndexerConfig::default();
        assert!(cfg.data_dir.ends_with("blockdex"), "data_dir: {:?}", cfg.data_dir);
    }

    #[test]
    fn db_path_appends_db() {
        let cfg = IndexerConfig { data_dir: PathBuf::from("/tmp/blockdex-test"), ..IndexerConfig::default() };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/blockdex-test/db"));
    }

    #[test]
    fn load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blockdex.toml");
        std::fs::write(
            &path,
            "coin = \"Ethereum\"\ntx_cache = false\n[sync]\nworkers = 2\n[bulk]\nmax_balances = 1000\n",
        )
        .unwrap();
        let cfg = IndexerConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.coin, "Ethereum");
        assert!(!cfg.tx_cache);
        assert_eq!(cfg.sync.workers, 2);
        assert_eq!(cfg.sync.chunk, 100);
        assert_eq!(cfg.bulk.max_balances, 1000);
        assert_eq!(cfg.bulk.max_tx_addresses, 500_000);
    }
}
