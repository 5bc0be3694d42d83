//! Chain-neutral block and transaction types consumed by the indexer.
//!
//! These are the wire-level shapes handed over by a [`crate::traits::BlockOracle`].
//! The engine never interprets addresses itself: every address is turned into
//! an opaque [`AddressDescriptor`] by the [`crate::traits::ChainParser`].

use std::fmt;
use std::ops::Deref;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// Opaque byte form of an address, produced by the chain parser.
///
/// Used directly as a key prefix in the `addresses` column family, so the
/// engine only ever compares it byte-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressDescriptor(pub Vec<u8>);

impl AddressDescriptor {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for AddressDescriptor {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for AddressDescriptor {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for AddressDescriptor {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl fmt::Display for AddressDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Data model family a chain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    /// UTXO chains: balances are sums of unspent outputs.
    Bitcoin,
    /// Account/contract chains: per-address ledgers of txs and tokens.
    Ethereum,
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainType::Bitcoin => write!(f, "bitcoin"),
            ChainType::Ethereum => write!(f, "ethereum"),
        }
    }
}

/// A transaction input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    /// Txid of the spent output; empty for coinbase inputs.
    pub txid: String,
    /// Index of the spent output in `txid`.
    pub vout: u32,
    /// Coinbase script, if this is a coinbase input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    /// Sender addresses as reported by the backend (account chains).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// A transaction output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    /// Amount in the chain's base unit.
    pub value: BigUint,
    /// Position of the output in its transaction.
    pub n: u32,
    /// Hex encoded locking script (UTXO chains).
    #[serde(default)]
    pub script_hex: String,
    /// Recipient addresses as reported by the backend.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// A transaction as delivered by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsize: Option<u32>,
    pub vin: Vec<Vin>,
    pub vout: Vec<Vout>,
    /// Timestamp of the containing block, if confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
    /// Confirmations relative to the backend's tip; 0 means mempool.
    #[serde(default)]
    pub confirmations: u32,
    /// Chain-specific payload the parser understands (receipts, traces).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_specific: Option<serde_json::Value>,
}

/// A block as delivered by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub prev_hash: String,
    pub height: u32,
    pub time: i64,
    pub size: u32,
    pub txs: Vec<Tx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coin_specific: Option<serde_json::Value>,
}

/// Per-height block metadata stored in the `height` column family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: String,
    pub time: i64,
    pub txs: u32,
    pub size: u32,
    pub height: u32,
}

impl BlockInfo {
    pub fn from_block(block: &Block) -> Self {
        Self {
            hash: block.hash.clone(),
            time: block.time,
            txs: block.txs.len() as u32,
            size: block.size,
            height: block.height,
        }
    }
}

/// Token standard of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenStandard {
    /// Balance-carrying tokens (ERC20-like).
    Fungible = 0,
    /// Tokens identified by id (ERC721-like).
    NonFungible = 1,
}

impl TokenStandard {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(TokenStandard::Fungible),
            1 => Some(TokenStandard::NonFungible),
            _ => None,
        }
    }
}

/// A token transfer extracted from a transaction by the parser.
///
/// For [`TokenStandard::NonFungible`] `value` carries the token id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub standard: TokenStandard,
    pub contract: String,
    pub from: String,
    pub to: String,
    pub value: BigUint,
}

/// Kind of an internal call trace entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InternalCallType {
    #[default]
    Call = 0,
    Create = 1,
    SelfDestruct = 2,
}

impl InternalCallType {
    pub fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(InternalCallType::Call),
            1 => Some(InternalCallType::Create),
            2 => Some(InternalCallType::SelfDestruct),
            _ => None,
        }
    }
}

/// A value movement discovered in a transaction's call trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransfer {
    pub kind: InternalCallType,
    pub from: String,
    pub to: String,
    pub value: BigUint,
}

/// Call trace summary of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalData {
    pub kind: InternalCallType,
    /// Address of the contract created by the transaction, if any.
    #[serde(default)]
    pub contract: String,
    #[serde(default)]
    pub transfers: Vec<InternalTransfer>,
    #[serde(default)]
    pub error: String,
}

/// Token contract metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub contract: String,
    pub standard: TokenStandard,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub created_in_block: u32,
    #[serde(default)]
    pub destructed_in_block: u32,
}

/// Human readable name attached to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressAliasRecord {
    pub address: String,
    pub name: String,
}

/// Block-level extras of account chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmBlockData {
    #[serde(default)]
    pub contracts: Vec<ContractInfo>,
    #[serde(default)]
    pub address_aliases: Vec<AddressAliasRecord>,
    /// Set when the backend failed to deliver call traces for the block.
    #[serde(default)]
    pub internal_data_error: Option<String>,
}
