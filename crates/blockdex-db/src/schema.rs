//! Column families and the packed value grammar of every row.
//!
//! Keys and values are produced and consumed only here and in
//! [`crate::balance`], so the on-disk layout can be audited in one place.

use num_bigint::BigUint;

use blockdex_core::codec::{
    pack_bigint, pack_bytes, pack_string, pack_u32, pack_varint, pack_varuint, unpack_u32, ByteReader,
};
use blockdex_core::error::CodecError;
use blockdex_core::types::{AddressDescriptor, BlockInfo, ChainType, ContractInfo, InternalCallType, TokenStandard};

// --- Column family names ---

pub const CF_DEFAULT: &str = "default";
pub const CF_HEIGHT: &str = "height";
pub const CF_ADDRESSES: &str = "addresses";
pub const CF_BLOCK_TXS: &str = "blockTxs";
pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_FIAT_RATES: &str = "fiatRates";
// Bitcoin-type
pub const CF_ADDRESS_BALANCE: &str = "addressBalance";
pub const CF_TX_ADDRESSES: &str = "txAddresses";
// Ethereum-type
pub const CF_ADDRESS_CONTRACTS: &str = "addressContracts";
pub const CF_INTERNAL_DATA: &str = "internalData";
pub const CF_CONTRACTS: &str = "contracts";
pub const CF_BLOCK_INTERNAL_DATA_ERRORS: &str = "blockInternalDataErrors";
pub const CF_ADDRESS_ALIASES: &str = "addressAliases";

const COMMON_CFS: &[&str] = &[CF_DEFAULT, CF_HEIGHT, CF_ADDRESSES, CF_BLOCK_TXS, CF_TRANSACTIONS, CF_FIAT_RATES];
const BITCOIN_CFS: &[&str] = &[CF_ADDRESS_BALANCE, CF_TX_ADDRESSES];
const ETHEREUM_CFS: &[&str] = &[
    CF_ADDRESS_CONTRACTS,
    CF_INTERNAL_DATA,
    CF_CONTRACTS,
    CF_BLOCK_INTERNAL_DATA_ERRORS,
    CF_ADDRESS_ALIASES,
];

/// Key of the internal state blob in the default column family.
pub const INTERNAL_STATE_KEY: &[u8] = b"internalState";

/// Column families present for a chain type, in a stable order.
pub fn column_families(chain_type: ChainType) -> Vec<&'static str> {
    let specific = match chain_type {
        ChainType::Bitcoin => BITCOIN_CFS,
        ChainType::Ethereum => ETHEREUM_CFS,
    };
    COMMON_CFS.iter().chain(specific).copied().collect()
}

/// Key of every height-addressed row.
pub fn height_key(height: u32) -> [u8; 4] {
    pack_u32(height)
}

pub fn unpack_height_key(key: &[u8]) -> Result<u32, CodecError> {
    unpack_u32(key)
}

// ------------------------------------------------------------------
// height
// ------------------------------------------------------------------

/// Pack a `height` row. The block hash is packed by the chain parser.
pub fn pack_block_info(packed_hash: &[u8], info: &BlockInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed_hash.len() + 16);
    pack_bytes(packed_hash, &mut out);
    pack_varint(info.time, &mut out);
    pack_varuint(u64::from(info.txs), &mut out);
    pack_varuint(u64::from(info.size), &mut out);
    out
}

/// Unpack a `height` row into `(packed_hash, time, txs, size)`.
pub fn unpack_block_info(buf: &[u8]) -> Result<(Vec<u8>, i64, u32, u32), CodecError> {
    let mut r = ByteReader::new(buf);
    let hash = r.len_prefixed()?.to_vec();
    let time = r.varint()?;
    let txs = r.varuint32()?;
    let size = r.varuint32()?;
    Ok((hash, time, txs, size))
}

// ------------------------------------------------------------------
// txAddresses
// ------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxInput {
    pub addr_desc: AddressDescriptor,
    pub value: BigUint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxOutput {
    pub addr_desc: AddressDescriptor,
    pub value: BigUint,
    pub spent: bool,
    /// Extended index only: packed txid of the spending transaction.
    pub spent_txid: Vec<u8>,
    pub spent_index: u32,
    pub spent_height: u32,
}

impl TxOutput {
    /// Clear the spend marker and its extended details.
    pub fn unspend(&mut self) {
        self.spent = false;
        self.spent_txid.clear();
        self.spent_index = 0;
        self.spent_height = 0;
    }
}

/// Per-transaction summary of input and output addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxAddresses {
    pub height: u32,
    /// Stored only with the extended index.
    pub vsize: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl TxAddresses {
    /// True when every output is spent; such rows are never modified again
    /// by connecting later blocks.
    pub fn is_fully_spent(&self) -> bool {
        self.outputs.iter().all(|o| o.spent)
    }
}

pub fn pack_tx_addresses(ta: &TxAddresses, extended: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 40 * (ta.inputs.len() + ta.outputs.len()));
    pack_varuint(u64::from(ta.height), &mut out);
    if extended {
        pack_varuint(u64::from(ta.vsize), &mut out);
    }
    pack_varuint(ta.inputs.len() as u64, &mut out);
    for input in &ta.inputs {
        pack_bytes(&input.addr_desc, &mut out);
        pack_bigint(&input.value, &mut out);
    }
    pack_varuint(ta.outputs.len() as u64, &mut out);
    for output in &ta.outputs {
        // spent outputs carry the complemented descriptor length
        let len = output.addr_desc.len() as i64;
        pack_varint(if output.spent { !len } else { len }, &mut out);
        out.extend_from_slice(&output.addr_desc);
        pack_bigint(&output.value, &mut out);
        if extended && output.spent {
            pack_bytes(&output.spent_txid, &mut out);
            pack_varuint(u64::from(output.spent_index), &mut out);
            pack_varuint(u64::from(output.spent_height), &mut out);
        }
    }
    out
}

pub fn unpack_tx_addresses(buf: &[u8], extended: bool) -> Result<TxAddresses, CodecError> {
    let mut r = ByteReader::new(buf);
    let height = r.varuint32()?;
    let vsize = if extended { r.varuint32()? } else { 0 };
    let n_inputs = r.varuint()? as usize;
    let mut inputs = Vec::with_capacity(n_inputs.min(r.remaining()));
    for _ in 0..n_inputs {
        let addr_desc = AddressDescriptor(r.len_prefixed()?.to_vec());
        let value = r.bigint()?;
        inputs.push(TxInput { addr_desc, value });
    }
    let n_outputs = r.varuint()? as usize;
    let mut outputs = Vec::with_capacity(n_outputs.min(r.remaining()));
    for _ in 0..n_outputs {
        let raw = r.varint()?;
        let (spent, len) = if raw < 0 { (true, !raw) } else { (false, raw) };
        let addr_desc = AddressDescriptor(r.fixed(len as usize, "output descriptor")?.to_vec());
        let value = r.bigint()?;
        let mut output = TxOutput { addr_desc, value, spent, ..TxOutput::default() };
        if extended && spent {
            output.spent_txid = r.len_prefixed()?.to_vec();
            output.spent_index = r.varuint32()?;
            output.spent_height = r.varuint32()?;
        }
        outputs.push(output);
    }
    Ok(TxAddresses { height, vsize, inputs, outputs })
}

// ------------------------------------------------------------------
// blockTxs
// ------------------------------------------------------------------

/// An output reference stored in the Bitcoin-type rollback log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outpoint {
    pub btxid: Vec<u8>,
    pub index: i32,
}

/// One transaction of a Bitcoin-type `blockTxs` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTxs {
    pub btxid: Vec<u8>,
    pub inputs: Vec<Outpoint>,
}

pub fn pack_bitcoin_block_txs(txs: &[BlockTxs]) -> Vec<u8> {
    let mut out = Vec::new();
    for tx in txs {
        out.extend_from_slice(&tx.btxid);
        pack_varuint(tx.inputs.len() as u64, &mut out);
        for input in &tx.inputs {
            out.extend_from_slice(&input.btxid);
            pack_varint(i64::from(input.index), &mut out);
        }
    }
    out
}

pub fn unpack_bitcoin_block_txs(buf: &[u8], txid_len: usize) -> Result<Vec<BlockTxs>, CodecError> {
    let mut r = ByteReader::new(buf);
    let mut txs = Vec::new();
    while !r.is_empty() {
        let btxid = r.fixed(txid_len, "txid")?.to_vec();
        let n = r.varuint()? as usize;
        let mut inputs = Vec::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            let btxid = r.fixed(txid_len, "txid")?.to_vec();
            let index = r.varint()? as i32;
            inputs.push(Outpoint { btxid, index });
        }
        txs.push(BlockTxs { btxid, inputs });
    }
    Ok(txs)
}

/// One token movement of an Ethereum-type `blockTxs` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthBlockTxContract {
    pub from: AddressDescriptor,
    pub to: AddressDescriptor,
    pub contract: AddressDescriptor,
    pub standard: TokenStandard,
    pub value: BigUint,
}

/// One transaction of an Ethereum-type `blockTxs` row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthBlockTx {
    pub btxid: Vec<u8>,
    pub from: AddressDescriptor,
    pub to: AddressDescriptor,
    pub contracts: Vec<EthBlockTxContract>,
}

pub fn pack_ethereum_block_txs(txs: &[EthBlockTx]) -> Vec<u8> {
    let mut out = Vec::new();
    for tx in txs {
        out.extend_from_slice(&tx.btxid);
        pack_bytes(&tx.from, &mut out);
        pack_bytes(&tx.to, &mut out);
        pack_varuint(tx.contracts.len() as u64, &mut out);
        for c in &tx.contracts {
            pack_bytes(&c.from, &mut out);
            pack_bytes(&c.to, &mut out);
            pack_bytes(&c.contract, &mut out);
            pack_varuint(c.standard as u64, &mut out);
            pack_bigint(&c.value, &mut out);
        }
    }
    out
}

pub fn unpack_ethereum_block_txs(buf: &[u8], txid_len: usize) -> Result<Vec<EthBlockTx>, CodecError> {
    let mut r = ByteReader::new(buf);
    let mut txs = Vec::new();
    while !r.is_empty() {
        let btxid = r.fixed(txid_len, "txid")?.to_vec();
        let from = AddressDescriptor(r.len_prefixed()?.to_vec());
        let to = AddressDescriptor(r.len_prefixed()?.to_vec());
        let n = r.varuint()? as usize;
        let mut contracts = Vec::with_capacity(n.min(r.remaining()));
        for _ in 0..n {
            let from = AddressDescriptor(r.len_prefixed()?.to_vec());
            let to = AddressDescriptor(r.len_prefixed()?.to_vec());
            let contract = AddressDescriptor(r.len_prefixed()?.to_vec());
            let standard = token_standard(r.varuint()?)?;
            let value = r.bigint()?;
            contracts.push(EthBlockTxContract { from, to, contract, standard, value });
        }
        txs.push(EthBlockTx { btxid, from, to, contracts });
    }
    Ok(txs)
}

fn token_standard(v: u64) -> Result<TokenStandard, CodecError> {
    TokenStandard::from_u64(v).ok_or_else(|| CodecError::InvalidData(format!("unknown token standard {v}")))
}

// ------------------------------------------------------------------
// addressContracts
// ------------------------------------------------------------------

/// Holdings of one address in one token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrContract {
    pub contract: AddressDescriptor,
    pub standard: TokenStandard,
    pub txs: u32,
    /// Fungible balance, clamped at zero.
    pub value: BigUint,
    /// Sorted, duplicate free token ids held (non-fungible only).
    pub ids: Vec<BigUint>,
}

impl AddrContract {
    pub fn new(contract: AddressDescriptor, standard: TokenStandard) -> Self {
        Self { contract, standard, txs: 0, value: BigUint::default(), ids: Vec::new() }
    }

    /// Insert a token id, keeping the set sorted. Returns false if present.
    pub fn insert_id(&mut self, id: &BigUint) -> bool {
        match self.ids.binary_search(id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id.clone());
                true
            }
        }
    }

    /// Remove a token id. Returns false if it was not held.
    pub fn remove_id(&mut self, id: &BigUint) -> bool {
        match self.ids.binary_search(id) {
            Ok(pos) => {
                self.ids.remove(pos);
                true
            }
            Err(_) => false,
        }
    }
}

/// Per-address ledger of an account chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrContracts {
    pub total_txs: u32,
    pub non_contract_txs: u32,
    pub internal_txs: u32,
    pub contracts: Vec<AddrContract>,
}

impl AddrContracts {
    /// Position of `contract` in the ledger.
    pub fn find(&self, contract: &[u8]) -> Option<usize> {
        self.contracts.iter().position(|c| c.contract.as_bytes() == contract)
    }

    /// True when nothing is left to store.
    pub fn is_empty(&self) -> bool {
        self.non_contract_txs == 0 && self.internal_txs == 0 && self.contracts.is_empty()
    }
}

pub fn pack_addr_contracts(acs: &AddrContracts) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 40 * acs.contracts.len());
    pack_varuint(u64::from(acs.total_txs), &mut out);
    pack_varuint(u64::from(acs.non_contract_txs), &mut out);
    pack_varuint(u64::from(acs.internal_txs), &mut out);
    for c in &acs.contracts {
        pack_bytes(&c.contract, &mut out);
        pack_varuint(c.standard as u64 | (u64::from(c.txs) << 2), &mut out);
        match c.standard {
            TokenStandard::Fungible => pack_bigint(&c.value, &mut out),
            TokenStandard::NonFungible => {
                pack_varuint(c.ids.len() as u64, &mut out);
                for id in &c.ids {
                    pack_bigint(id, &mut out);
                }
            }
        }
    }
    out
}

pub fn unpack_addr_contracts(buf: &[u8]) -> Result<AddrContracts, CodecError> {
    let mut r = ByteReader::new(buf);
    let total_txs = r.varuint32()?;
    let non_contract_txs = r.varuint32()?;
    let internal_txs = r.varuint32()?;
    let mut contracts = Vec::new();
    while !r.is_empty() {
        let contract = AddressDescriptor(r.len_prefixed()?.to_vec());
        let packed = r.varuint()?;
        let standard = token_standard(packed & 3)?;
        let txs = u32::try_from(packed >> 2).map_err(|_| CodecError::InvalidData("contract txs overflow".into()))?;
        let mut c = AddrContract::new(contract, standard);
        c.txs = txs;
        match standard {
            TokenStandard::Fungible => c.value = r.bigint()?,
            TokenStandard::NonFungible => {
                let n = r.varuint()? as usize;
                c.ids.reserve(n.min(r.remaining()));
                for _ in 0..n {
                    c.ids.push(r.bigint()?);
                }
            }
        }
        contracts.push(c);
    }
    Ok(AddrContracts { total_txs, non_contract_txs, internal_txs, contracts })
}

// ------------------------------------------------------------------
// internalData
// ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthInternalTransfer {
    pub kind: InternalCallType,
    pub from: AddressDescriptor,
    pub to: AddressDescriptor,
    pub value: BigUint,
}

/// Stored call trace of one transaction, addresses as descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthInternalData {
    pub kind: InternalCallType,
    pub contract: AddressDescriptor,
    pub transfers: Vec<EthInternalTransfer>,
    pub error: String,
}

fn call_type(v: u64) -> Result<InternalCallType, CodecError> {
    InternalCallType::from_u64(v).ok_or_else(|| CodecError::InvalidData(format!("unknown call type {v}")))
}

pub fn pack_internal_data(data: &EthInternalData) -> Vec<u8> {
    let mut out = Vec::new();
    pack_varuint(data.kind as u64, &mut out);
    pack_bytes(&data.contract, &mut out);
    pack_varuint(data.transfers.len() as u64, &mut out);
    for t in &data.transfers {
        pack_varuint(t.kind as u64, &mut out);
        pack_bytes(&t.from, &mut out);
        pack_bytes(&t.to, &mut out);
        pack_bigint(&t.value, &mut out);
    }
    pack_string(&data.error, &mut out);
    out
}

pub fn unpack_internal_data(buf: &[u8]) -> Result<EthInternalData, CodecError> {
    let mut r = ByteReader::new(buf);
    let kind = call_type(r.varuint()?)?;
    let contract = AddressDescriptor(r.len_prefixed()?.to_vec());
    let n = r.varuint()? as usize;
    let mut transfers = Vec::with_capacity(n.min(r.remaining()));
    for _ in 0..n {
        let kind = call_type(r.varuint()?)?;
        let from = AddressDescriptor(r.len_prefixed()?.to_vec());
        let to = AddressDescriptor(r.len_prefixed()?.to_vec());
        let value = r.bigint()?;
        transfers.push(EthInternalTransfer { kind, from, to, value });
    }
    let error = r.string()?;
    Ok(EthInternalData { kind, contract, transfers, error })
}

// ------------------------------------------------------------------
// contracts
// ------------------------------------------------------------------

pub fn pack_contract_info(info: &ContractInfo) -> Vec<u8> {
    let mut out = Vec::new();
    pack_string(&info.contract, &mut out);
    pack_varuint(info.standard as u64, &mut out);
    pack_string(&info.name, &mut out);
    pack_string(&info.symbol, &mut out);
    pack_varuint(u64::from(info.decimals), &mut out);
    pack_varuint(u64::from(info.created_in_block), &mut out);
    pack_varuint(u64::from(info.destructed_in_block), &mut out);
    out
}

pub fn unpack_contract_info(buf: &[u8]) -> Result<ContractInfo, CodecError> {
    let mut r = ByteReader::new(buf);
    let contract = r.string()?;
    let standard = token_standard(r.varuint()?)?;
    let name = r.string()?;
    let symbol = r.string()?;
    let decimals = u8::try_from(r.varuint()?).map_err(|_| CodecError::InvalidData("decimals overflow".into()))?;
    let created_in_block = r.varuint32()?;
    let destructed_in_block = r.varuint32()?;
    Ok(ContractInfo { contract, standard, name, symbol, decimals, created_in_block, destructed_in_block })
}

// ------------------------------------------------------------------
// blockInternalDataErrors
// ------------------------------------------------------------------

/// A block whose call traces could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInternalDataError {
    pub height: u32,
    pub hash: String,
    pub retries: u32,
    pub error: String,
}

pub fn pack_block_internal_data_error(e: &BlockInternalDataError) -> Vec<u8> {
    let mut out = Vec::new();
    pack_string(&e.hash, &mut out);
    pack_varuint(u64::from(e.retries), &mut out);
    pack_string(&e.error, &mut out);
    out
}

pub fn unpack_block_internal_data_error(height: u32, buf: &[u8]) -> Result<BlockInternalDataError, CodecError> {
    let mut r = ByteReader::new(buf);
    let hash = r.string()?;
    let retries = r.varuint32()?;
    let error = r.string()?;
    Ok(BlockInternalDataError { height, hash, retries, error })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(b: u8, len: usize) -> AddressDescriptor {
        AddressDescriptor(vec![b; len])
    }

    #[test]
    fn column_families_per_chain_type() {
        let btc = column_families(ChainType::Bitcoin);
        assert!(btc.contains(&CF_ADDRESS_BALANCE));
        assert!(!btc.contains(&CF_ADDRESS_CONTRACTS));
        assert_eq!(btc[0], CF_DEFAULT);
        let eth = column_families(ChainType::Ethereum);
        assert!(eth.contains(&CF_INTERNAL_DATA));
        assert!(!eth.contains(&CF_TX_ADDRESSES));
        assert_eq!(eth.len(), 11);
    }

    #[test]
    fn block_info_row() {
        let info = BlockInfo { hash: String::new(), time: 1_534_858_022, txs: 2, size: 1234, height: 0 };
        let buf = pack_block_info(&[0xaa; 32], &info);
        let (hash, time, txs, size) = unpack_block_info(&buf).unwrap();
        assert_eq!(hash, vec![0xaa; 32]);
        assert_eq!((time, txs, size), (1_534_858_022, 2, 1234));
    }

    #[test]
    fn tx_addresses_spent_output_marks_length() {
        let ta = TxAddresses {
            height: 225_493,
            vsize: 0,
            inputs: vec![],
            outputs: vec![
                TxOutput { addr_desc: desc(1, 3), value: BigUint::from(1u8), spent: true, ..TxOutput::default() },
                TxOutput { addr_desc: desc(2, 3), value: BigUint::from(2u8), ..TxOutput::default() },
            ],
        };
        let buf = pack_tx_addresses(&ta, false);
        // height(3) + inputs(1) + outputs(1), then varint(!3) = zigzag(-4) = 7
        assert_eq!(buf[5], 7);
        assert_eq!(unpack_tx_addresses(&buf, false).unwrap(), ta);
        assert!(!ta.is_fully_spent());
    }

    #[test]
    fn tx_addresses_extended_keeps_spend_details() {
        let ta = TxAddresses {
            height: 10,
            vsize: 141,
            inputs: vec![TxInput { addr_desc: desc(3, 22), value: BigUint::from(5000u32) }],
            outputs: vec![TxOutput {
                addr_desc: desc(4, 22),
                value: BigUint::from(4000u32),
                spent: true,
                spent_txid: vec![9; 32],
                spent_index: 1,
                spent_height: 12,
            }],
        };
        let buf = pack_tx_addresses(&ta, true);
        let back = unpack_tx_addresses(&buf, true).unwrap();
        assert_eq!(back, ta);
        assert!(back.is_fully_spent());
    }

    #[test]
    fn tx_addresses_rejects_truncated_row() {
        let ta = TxAddresses {
            height: 1,
            outputs: vec![TxOutput { addr_desc: desc(1, 25), value: BigUint::from(7u8), ..TxOutput::default() }],
            ..TxAddresses::default()
        };
        let buf = pack_tx_addresses(&ta, false);
        assert!(unpack_tx_addresses(&buf[..buf.len() - 2], false).is_err());
    }

    #[test]
    fn bitcoin_block_txs_with_coinbase() {
        let txs = vec![
            BlockTxs { btxid: vec![1; 32], inputs: vec![Outpoint { btxid: vec![0; 32], index: 0 }] },
            BlockTxs {
                btxid: vec![2; 32],
                inputs: vec![Outpoint { btxid: vec![1; 32], index: 0 }, Outpoint { btxid: vec![3; 32], index: 7 }],
            },
        ];
        let buf = pack_bitcoin_block_txs(&txs);
        assert_eq!(unpack_bitcoin_block_txs(&buf, 32).unwrap(), txs);
    }

    #[test]
    fn ethereum_block_txs_with_contracts() {
        let txs = vec![EthBlockTx {
            btxid: vec![5; 32],
            from: desc(1, 20),
            to: AddressDescriptor::default(),
            contracts: vec![EthBlockTxContract {
                from: desc(1, 20),
                to: desc(2, 20),
                contract: desc(9, 20),
                standard: TokenStandard::NonFungible,
                value: BigUint::from(1_000_000u32),
            }],
        }];
        let buf = pack_ethereum_block_txs(&txs);
        assert_eq!(unpack_ethereum_block_txs(&buf, 32).unwrap(), txs);
    }

    #[test]
    fn addr_contracts_type_in_low_bits() {
        let mut nft = AddrContract::new(desc(7, 20), TokenStandard::NonFungible);
        nft.txs = 3;
        assert!(nft.insert_id(&BigUint::from(5u8)));
        assert!(nft.insert_id(&BigUint::from(1u8)));
        assert!(!nft.insert_id(&BigUint::from(5u8)));
        let mut fungible = AddrContract::new(desc(8, 20), TokenStandard::Fungible);
        fungible.txs = 1;
        fungible.value = BigUint::from(42u8);
        let acs = AddrContracts { total_txs: 4, non_contract_txs: 1, internal_txs: 0, contracts: vec![nft, fungible] };
        let buf = pack_addr_contracts(&acs);
        // totals, then descriptor (1 + 20 bytes), then 1 | 3 << 2
        assert_eq!(buf[3 + 21], 13);
        let back = unpack_addr_contracts(&buf).unwrap();
        assert_eq!(back, acs);
        assert_eq!(back.contracts[0].ids, vec![BigUint::from(1u8), BigUint::from(5u8)]);
    }

    #[test]
    fn internal_data_row() {
        let data = EthInternalData {
            kind: InternalCallType::Create,
            contract: desc(4, 20),
            transfers: vec![EthInternalTransfer {
                kind: InternalCallType::Call,
                from: desc(1, 20),
                to: desc(2, 20),
                value: BigUint::from(10u8),
            }],
            error: "out of gas".into(),
        };
        assert_eq!(unpack_internal_data(&pack_internal_data(&data)).unwrap(), data);
    }

    #[test]
    fn contract_info_row() {
        let info = ContractInfo {
            contract: "0x0909".into(),
            standard: TokenStandard::Fungible,
            name: "Test Token".into(),
            symbol: "TT".into(),
            decimals: 18,
            created_in_block: 100,
            destructed_in_block: 0,
        };
        assert_eq!(unpack_contract_info(&pack_contract_info(&info)).unwrap(), info);
    }
}
