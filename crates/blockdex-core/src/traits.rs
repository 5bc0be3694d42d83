//! Chain-specific seams consumed by the indexing engine.
//!
//! [`ChainParser`] converts between wire-level blocks and the engine's byte
//! forms. [`BlockOracle`] is the chain backend the sync worker pulls blocks
//! from. Both are object safe and used behind `Arc<dyn ...>`.

use async_trait::async_trait;

use crate::error::{OracleError, ParserError};
use crate::types::{AddressDescriptor, Block, ChainType, EvmBlockData, InternalData, TokenTransfer, Tx, Vout};

/// Translates a chain's wire format into indexer byte forms.
///
/// Implementations must be `Send + Sync`; the indexer shares one parser
/// between its writer and the bulk-flush threads.
pub trait ChainParser: Send + Sync {
    /// Data model family of the chain.
    fn chain_type(&self) -> ChainType;

    /// Length of a packed txid (chain constant, e.g. 32).
    fn packed_txid_len(&self) -> usize;

    /// Number of most recent blocks whose rollback log is retained.
    fn keep_block_addresses(&self) -> u32;

    /// Whether the chain publishes human readable address aliases.
    fn use_address_aliases(&self) -> bool {
        false
    }

    /// Pack a hex txid into its binary form.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::TxidMissing`] for an empty txid.
    fn pack_txid(&self, txid: &str) -> Result<Vec<u8>, ParserError>;

    fn unpack_txid(&self, buf: &[u8]) -> Result<String, ParserError>;

    fn pack_block_hash(&self, hash: &str) -> Result<Vec<u8>, ParserError>;

    fn unpack_block_hash(&self, buf: &[u8]) -> Result<String, ParserError>;

    /// Convert a textual address into its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ParserError::AddressMissing`] for an empty address.
    fn addr_desc_from_address(&self, address: &str) -> Result<AddressDescriptor, ParserError>;

    /// Addresses encoded by a descriptor, and whether it is searchable.
    fn addresses_from_addr_desc(&self, desc: &AddressDescriptor) -> Result<(Vec<String>, bool), ParserError>;

    /// Descriptor of the output's locking script.
    fn addr_desc_from_vout(&self, vout: &Vout) -> Result<AddressDescriptor, ParserError>;

    /// Whether balances are kept for the descriptor.
    fn is_addr_desc_indexable(&self, _desc: &AddressDescriptor) -> bool {
        true
    }

    /// Descriptor recorded for input `index` of `tx` when the spent
    /// transaction is not in the index. The default records nothing.
    fn addr_desc_for_unknown_input(&self, _tx: &Tx, _index: usize) -> AddressDescriptor {
        AddressDescriptor::default()
    }

    /// Serialize a confirmed transaction for the `transactions` cache.
    fn pack_tx(&self, tx: &Tx, height: u32, block_time: i64) -> Result<Vec<u8>, ParserError>;

    /// Inverse of [`ChainParser::pack_tx`]; returns the tx and its height.
    fn unpack_tx(&self, buf: &[u8]) -> Result<(Tx, u32), ParserError>;

    /// Token transfers emitted by an account-chain transaction.
    fn token_transfers(&self, _tx: &Tx) -> Result<Vec<TokenTransfer>, ParserError> {
        Ok(Vec::new())
    }

    /// Call trace summary of an account-chain transaction.
    fn internal_data(&self, _tx: &Tx) -> Option<InternalData> {
        None
    }

    /// Block level extras of an account chain.
    fn evm_block_data(&self, _block: &Block) -> Option<EvmBlockData> {
        None
    }
}

/// Source of blocks: a chain daemon reached over RPC.
///
/// Errors must use [`OracleError::BlockNotFound`] for absent heights so
/// that fork detection can tell them apart from transport failures.
#[async_trait]
pub trait BlockOracle: Send + Sync {
    async fn best_block_hash(&self) -> Result<String, OracleError>;

    async fn best_block_height(&self) -> Result<u32, OracleError>;

    async fn block_hash(&self, height: u32) -> Result<String, OracleError>;

    async fn block(&self, hash: &str, height: u32) -> Result<Block, OracleError>;

    /// Fetch a single transaction, confirmed or from the mempool.
    async fn transaction(&self, txid: &str) -> Result<Tx, OracleError>;
}
