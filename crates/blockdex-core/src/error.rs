//! Error types for the Blockdex indexer.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated {what}: need {need} bytes, have {have}")] Truncated { what: &'static str, need: usize, have: usize },
    #[error("varint overflows 64 bits")] VarintOverflow,
    #[error("bigint length {0} exceeds maximum")] BigintTooLong(usize),
    #[error("invalid utf-8 in packed string")] InvalidUtf8,
    #[error("invalid data: {0}")] InvalidData(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParserError {
    #[error("address missing")] AddressMissing,
    #[error("txid missing")] TxidMissing,
    #[error("invalid address: {0}")] InvalidAddress(String),
    #[error("invalid txid: {0}")] InvalidTxid(String),
    #[error("invalid block hash: {0}")] InvalidBlockHash(String),
    #[error("serialization: {0}")] Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("block not found")] BlockNotFound,
    #[error("transaction not found: {0}")] TxNotFound(String),
    #[error("transport: {0}")] Transport(String),
    #[error("timeout after {0} ms")] Timeout(u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("cannot disconnect blocks with height {height} and lower, it is necessary to rebuild index")] RebuildIndex { height: u32 },
    #[error("coin mismatch: database holds {db}, configured {configured}")] CoinMismatch { db: String, configured: String },
    #[error("column {column} has version {found}, expected {expected}")] SchemaVersionMismatch { column: String, found: u32, expected: u32 },
    #[error("database is in inconsistent state and cannot be used")] InconsistentState,
    #[error("extended index mismatch: database {db}, configured {configured}")] ExtendedIndexMismatch { db: bool, configured: bool },
    #[error("operation not supported for chain type {0}")] UnsupportedChainType(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)] Codec(#[from] CodecError),
    #[error(transparent)] Parser(#[from] ParserError),
    #[error(transparent)] Oracle(#[from] OracleError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error("storage: {0}")] Storage(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("interrupted")] Interrupted,
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_index_message_names_height() {
        let e = IndexError::from(ChainStateError::RebuildIndex { height: 42 });
        assert_eq!(
            e.to_string(),
            "cannot disconnect blocks with height 42 and lower, it is necessary to rebuild index"
        );
    }

    #[test]
    fn codec_error_converts_transparently() {
        let e: IndexError = CodecError::VarintOverflow.into();
        assert!(matches!(e, IndexError::Codec(CodecError::VarintOverflow)));
        assert_eq!(e.to_string(), "varint overflows 64 bits");
    }
}
