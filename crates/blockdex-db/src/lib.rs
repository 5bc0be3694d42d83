//! # blockdex-db: RocksDB address index.
//!
//! Rollback-safe index of blockchain addresses for UTXO (Bitcoin-type) and
//! account (Ethereum-type) chains:
//! - [`store::RocksIndex`]: open/close, block connect and
//!   disconnect, address and block queries
//! - [`bulk::BulkConnect`]: write-behind loader for the initial sync
//! - [`sync::SyncWorker`]: keeps the index in step with a block oracle
//! - [`txcache::TxCache`]: read-through cache of confirmed transactions
//! - [`config::IndexerConfig`]: indexer configuration

pub mod balance;
pub mod bitcoin;
pub mod bulk;
pub mod config;
pub mod ethereum;
pub mod fiat;
pub mod internal_state;
pub mod schema;
pub mod store;
pub mod sync;
pub mod txcache;

pub use balance::{AddrBalance, AddressBalanceDetail, Utxo};
pub use bulk::BulkConnect;
pub use config::{BulkConfig, DbConfig, IndexerConfig, SyncConfig};
pub use fiat::CurrencyRatesTicker;
pub use internal_state::{DbState, InternalState};
pub use store::RocksIndex;
pub use sync::{SyncError, SyncMode, SyncWorker};
pub use txcache::TxCache;
