//! Deterministic chain parsers and builders for test suites.
//!
//! Compiled only with the `testing` feature (or in this crate's own tests).
//! The Bitcoin-type parser treats addresses as hex encoded scripts; the
//! Ethereum-type parser uses `0x`-prefixed 20-byte addresses and reads token
//! transfers and call traces from the transaction's `coin_specific` JSON.

use num_bigint::BigUint;
use serde_json::json;

use crate::codec::{pack_varint, unpack_u32, unpack_varint};
use crate::error::ParserError;
use crate::traits::ChainParser;
use crate::types::*;

const TXID_LEN: usize = 32;
const ETH_ADDR_LEN: usize = 20;

fn decode_hex(s: &str) -> Result<Vec<u8>, ParserError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| ParserError::InvalidAddress(e.to_string()))
}

fn pack_txid_hex(txid: &str) -> Result<Vec<u8>, ParserError> {
    if txid.is_empty() {
        return Err(ParserError::TxidMissing);
    }
    let b = hex::decode(txid.strip_prefix("0x").unwrap_or(txid))
        .map_err(|e| ParserError::InvalidTxid(e.to_string()))?;
    if b.len() != TXID_LEN {
        return Err(ParserError::InvalidTxid(txid.to_string()));
    }
    Ok(b)
}

fn pack_tx_json(tx: &Tx, height: u32, block_time: i64) -> Result<Vec<u8>, ParserError> {
    let mut out = height.to_be_bytes().to_vec();
    pack_varint(block_time, &mut out);
    let json = serde_json::to_vec(tx).map_err(|e| ParserError::Serialization(e.to_string()))?;
    out.extend_from_slice(&json);
    Ok(out)
}

fn unpack_tx_json(buf: &[u8]) -> Result<(Tx, u32), ParserError> {
    let height = unpack_u32(buf).map_err(|e| ParserError::Serialization(e.to_string()))?;
    let (block_time, n) =
        unpack_varint(&buf[4..]).map_err(|e| ParserError::Serialization(e.to_string()))?;
    let mut tx: Tx = serde_json::from_slice(&buf[4 + n..])
        .map_err(|e| ParserError::Serialization(e.to_string()))?;
    tx.block_time = Some(block_time);
    Ok((tx, height))
}

// ------------------------------------------------------------------
// Bitcoin-type parser
// ------------------------------------------------------------------

/// UTXO chain parser whose addresses are hex encoded output scripts.
#[derive(Debug, Clone)]
pub struct TestBitcoinParser {
    pub keep_block_addresses: u32,
}

impl Default for TestBitcoinParser {
    fn default() -> Self {
        Self { keep_block_addresses: 300 }
    }
}

impl ChainParser for TestBitcoinParser {
    fn chain_type(&self) -> ChainType {
        ChainType::Bitcoin
    }

    fn packed_txid_len(&self) -> usize {
        TXID_LEN
    }

    fn keep_block_addresses(&self) -> u32 {
        self.keep_block_addresses
    }

    fn pack_txid(&self, txid: &str) -> Result<Vec<u8>, ParserError> {
        pack_txid_hex(txid)
    }

    fn unpack_txid(&self, buf: &[u8]) -> Result<String, ParserError> {
        Ok(hex::encode(buf))
    }

    fn pack_block_hash(&self, hash: &str) -> Result<Vec<u8>, ParserError> {
        hex::decode(hash).map_err(|e| ParserError::InvalidBlockHash(e.to_string()))
    }

    fn unpack_block_hash(&self, buf: &[u8]) -> Result<String, ParserError> {
        Ok(hex::encode(buf))
    }

    fn addr_desc_from_address(&self, address: &str) -> Result<AddressDescriptor, ParserError> {
        if address.is_empty() {
            return Err(ParserError::AddressMissing);
        }
        Ok(AddressDescriptor(decode_hex(address)?))
    }

    fn addresses_from_addr_desc(&self, desc: &AddressDescriptor) -> Result<(Vec<String>, bool), ParserError> {
        Ok((vec![hex::encode(desc.as_bytes())], true))
    }

    fn addr_desc_from_vout(&self, vout: &Vout) -> Result<AddressDescriptor, ParserError> {
        Ok(AddressDescriptor(decode_hex(&vout.script_hex)?))
    }

    fn pack_tx(&self, tx: &Tx, height: u32, block_time: i64) -> Result<Vec<u8>, ParserError> {
        pack_tx_json(tx, height, block_time)
    }

    fn unpack_tx(&self, buf: &[u8]) -> Result<(Tx, u32), ParserError> {
        unpack_tx_json(buf)
    }
}

// ------------------------------------------------------------------
// Ethereum-type parser
// ------------------------------------------------------------------

/// Account chain parser with 20-byte addresses.
#[derive(Debug, Clone)]
pub struct TestEthereumParser {
    pub keep_block_addresses: u32,
    pub aliases: bool,
}

impl Default for TestEthereumParser {
    fn default() -> Self {
        Self { keep_block_addresses: 300, aliases: true }
    }
}

impl ChainParser for TestEthereumParser {
    fn chain_type(&self) -> ChainType {
        ChainType::Ethereum
    }

    fn packed_txid_len(&self) -> usize {
        TXID_LEN
    }

    fn keep_block_addresses(&self) -> u32 {
        self.keep_block_addresses
    }

    fn use_address_aliases(&self) -> bool {
        self.aliases
    }

    fn pack_txid(&self, txid: &str) -> Result<Vec<u8>, ParserError> {
        pack_txid_hex(txid)
    }

    fn unpack_txid(&self, buf: &[u8]) -> Result<String, ParserError> {
        Ok(format!("0x{}", hex::encode(buf)))
    }

    fn pack_block_hash(&self, hash: &str) -> Result<Vec<u8>, ParserError> {
        decode_hex(hash).map_err(|e| ParserError::InvalidBlockHash(e.to_string()))
    }

    fn unpack_block_hash(&self, buf: &[u8]) -> Result<String, ParserError> {
        Ok(format!("0x{}", hex::encode(buf)))
    }

    fn addr_desc_from_address(&self, address: &str) -> Result<AddressDescriptor, ParserError> {
        if address.is_empty() {
            return Err(ParserError::AddressMissing);
        }
        let b = decode_hex(address)?;
        if b.len() != ETH_ADDR_LEN {
            return Err(ParserError::InvalidAddress(address.to_string()));
        }
        Ok(AddressDescriptor(b))
    }

    fn addresses_from_addr_desc(&self, desc: &AddressDescriptor) -> Result<(Vec<String>, bool), ParserError> {
        Ok((vec![format!("0x{}", hex::encode(desc.as_bytes()))], true))
    }

    fn addr_desc_from_vout(&self, vout: &Vout) -> Result<AddressDescriptor, ParserError> {
        match vout.addresses.first() {
            Some(a) => self.addr_desc_from_address(a),
            None => Err(ParserError::AddressMissing),
        }
    }

    fn pack_tx(&self, tx: &Tx, height: u32, block_time: i64) -> Result<Vec<u8>, ParserError> {
        pack_tx_json(tx, height, block_time)
    }

    fn unpack_tx(&self, buf: &[u8]) -> Result<(Tx, u32), ParserError> {
        unpack_tx_json(buf)
    }

    fn token_transfers(&self, tx: &Tx) -> Result<Vec<TokenTransfer>, ParserError> {
        match tx.coin_specific.as_ref().and_then(|c| c.get("token_transfers")) {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| ParserError::Serialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    fn internal_data(&self, tx: &Tx) -> Option<InternalData> {
        let v = tx.coin_specific.as_ref()?.get("internal_data")?;
        serde_json::from_value(v.clone()).ok()
    }

    fn evm_block_data(&self, block: &Block) -> Option<EvmBlockData> {
        serde_json::from_value(block.coin_specific.clone()?).ok()
    }
}

// ------------------------------------------------------------------
// Builders
// ------------------------------------------------------------------

/// A 32-byte hex txid derived from a seed.
pub fn txid(seed: u8) -> String {
    hex::encode([seed; TXID_LEN])
}

/// A deterministic block hash for `height` on branch `fork`.
pub fn block_hash(height: u32, fork: u8) -> String {
    let mut b = [fork; 32];
    b[..4].copy_from_slice(&height.to_be_bytes());
    hex::encode(b)
}

/// A P2PKH-shaped output script derived from a seed.
pub fn script(seed: u8) -> String {
    let mut s = vec![0x76, 0xa9, 0x14];
    s.extend_from_slice(&[seed; 20]);
    s.extend_from_slice(&[0x88, 0xac]);
    hex::encode(s)
}

/// Descriptor of [`script`].
pub fn script_desc(seed: u8) -> AddressDescriptor {
    AddressDescriptor(hex::decode(script(seed)).unwrap_or_default())
}

/// A UTXO transaction spending `inputs` and paying `outputs` (script, value).
pub fn btc_tx(txid: &str, inputs: &[(String, u32)], outputs: &[(String, u64)]) -> Tx {
    Tx {
        txid: txid.to_string(),
        vsize: Some(200),
        vin: inputs
            .iter()
            .map(|(t, v)| Vin { txid: t.clone(), vout: *v, ..Vin::default() })
            .collect(),
        vout: outputs
            .iter()
            .enumerate()
            .map(|(n, (s, v))| Vout {
                value: BigUint::from(*v),
                n: n as u32,
                script_hex: s.clone(),
                addresses: Vec::new(),
            })
            .collect(),
        ..Tx::default()
    }
}

/// A coinbase transaction paying `outputs`.
pub fn coinbase_tx(txid: &str, outputs: &[(String, u64)]) -> Tx {
    let mut tx = btc_tx(txid, &[], outputs);
    tx.vin.push(Vin { coinbase: Some("03".into()), ..Vin::default() });
    tx
}

/// A block at `height` on branch `fork`, linked to its parent on the same branch.
pub fn make_block(height: u32, fork: u8, txs: Vec<Tx>) -> Block {
    Block {
        hash: block_hash(height, fork),
        prev_hash: if height == 0 { String::new() } else { block_hash(height - 1, fork) },
        height,
        time: 1_500_000_000 + i64::from(height) * 600,
        size: 250 * txs.len() as u32 + 80,
        txs,
        coin_specific: None,
    }
}

/// A `0x`-prefixed 20-byte address derived from a seed.
pub fn eth_addr(seed: u8) -> String {
    format!("0x{}", hex::encode([seed; ETH_ADDR_LEN]))
}

/// The all-zero address used for mints and burns.
pub fn eth_zero_addr() -> String {
    eth_addr(0)
}

/// Descriptor of [`eth_addr`].
pub fn eth_desc(seed: u8) -> AddressDescriptor {
    AddressDescriptor(vec![seed; ETH_ADDR_LEN])
}

/// An account transaction moving `value` from `from` to `to`.
///
/// Empty `from` or `to` leaves the corresponding side out.
pub fn eth_tx(txid: &str, from: &str, to: &str, value: u64) -> Tx {
    Tx {
        txid: txid.to_string(),
        vin: vec![Vin {
            addresses: if from.is_empty() { Vec::new() } else { vec![from.to_string()] },
            ..Vin::default()
        }],
        vout: vec![Vout {
            value: BigUint::from(value),
            n: 0,
            script_hex: String::new(),
            addresses: if to.is_empty() { Vec::new() } else { vec![to.to_string()] },
        }],
        ..Tx::default()
    }
}

/// Attach token transfers and an optional call trace to an account transaction.
pub fn with_eth_data(mut tx: Tx, transfers: Vec<TokenTransfer>, internal: Option<InternalData>) -> Tx {
    tx.coin_specific = Some(json!({
        "token_transfers": transfers,
        "internal_data": internal,
    }));
    tx
}

/// A fungible token transfer of `value` units.
pub fn fungible(contract: &str, from: &str, to: &str, value: u64) -> TokenTransfer {
    TokenTransfer {
        standard: TokenStandard::Fungible,
        contract: contract.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        value: BigUint::from(value),
    }
}

/// A non-fungible transfer of token `id`.
pub fn nft(contract: &str, from: &str, to: &str, id: u64) -> TokenTransfer {
    TokenTransfer {
        standard: TokenStandard::NonFungible,
        value: BigUint::from(id),
        ..fungible(contract, from, to, 0)
    }
}
