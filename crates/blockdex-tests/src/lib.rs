//! Integration test suite for the Blockdex indexer.
//!
//! The tests under `tests/` drive a real RocksDB index through the public
//! API: the literal end-to-end scenarios, boundary cases, fork handling,
//! bulk loading, and randomized connect/disconnect round trips. Shared
//! chain builders and the in-memory block oracle live in [`helpers`].

pub mod helpers;
