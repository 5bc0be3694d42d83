//! # blockdex-core
//! Chain-neutral types, the storage codec, and the chain seams of the
//! Blockdex address indexer.

pub mod codec;
pub mod constants;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod traits;
pub mod types;
