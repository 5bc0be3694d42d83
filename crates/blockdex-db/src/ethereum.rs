//! Connect and disconnect of Ethereum-type (account) blocks, plus the
//! contract metadata, address alias and call trace columns.
//!
//! Every appearance of an address in a transaction is reduced to an
//! [`AddrEvent`]. Connect applies the events of a tx in order; disconnect
//! derives the same events from the rollback log and the stored call trace
//! and reverts them in reverse order.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use num_bigint::BigUint;
use rocksdb::{IteratorMode, WriteBatch};

use blockdex_core::codec::pack_address_key;
use blockdex_core::constants::{
    CONTRACT_INDEX_OFFSET, INTERNAL_TRANSFER_FROM, INTERNAL_TRANSFER_TO, TRANSFER_FROM, TRANSFER_TO,
};
use blockdex_core::error::{ChainStateError, CodecError, IndexError};
use blockdex_core::types::{
    AddressAliasRecord, AddressDescriptor, Block, ChainType, ContractInfo, InternalCallType, TokenStandard,
};

use crate::schema::{
    height_key, pack_addr_contracts, pack_block_internal_data_error, pack_contract_info, pack_ethereum_block_txs,
    pack_internal_data, unpack_addr_contracts, unpack_block_internal_data_error, unpack_contract_info,
    unpack_ethereum_block_txs, unpack_height_key, unpack_internal_data, AddrContract, AddrContracts,
    BlockInternalDataError, EthBlockTx, EthBlockTxContract, EthInternalData, EthInternalTransfer, CF_ADDRESSES,
    CF_ADDRESS_ALIASES, CF_ADDRESS_CONTRACTS, CF_BLOCK_INTERNAL_DATA_ERRORS, CF_BLOCK_TXS, CF_CONTRACTS, CF_HEIGHT,
    CF_INTERNAL_DATA, CF_TRANSACTIONS,
};
use crate::store::{add_to_addresses_map, storage_err, sub_clamped, AddressesMap, RocksIndex};

pub(crate) type AddrContractsMap = HashMap<Vec<u8>, AddrContracts>;

type SeenMap = HashMap<Vec<u8>, HashSet<Vec<u8>>>;

/// Result of processing one account-chain block.
#[derive(Debug, Default)]
pub(crate) struct EthBlockOutput {
    pub block_txs: Vec<EthBlockTx>,
    /// Call traces keyed by packed txid.
    pub internal: Vec<(Vec<u8>, EthInternalData)>,
}

fn is_zero_address(addr: &[u8]) -> bool {
    !addr.is_empty() && addr.iter().all(|&b| b == 0)
}

#[derive(Debug, Clone, Copy)]
enum EventKind<'a> {
    Base,
    Internal,
    Token { transfer: &'a EthBlockTxContract, recipient: bool },
}

/// One appearance of an address in a transaction.
#[derive(Debug, Clone, Copy)]
struct AddrEvent<'a> {
    addr: &'a [u8],
    index: i32,
    kind: EventKind<'a>,
    /// False for the sender side when sender and recipient coincide, so the
    /// tx is counted once.
    count: bool,
}

/// Events of one transaction, in connect order.
fn tx_events<'a>(btx: &'a EthBlockTx, internal: Option<&'a EthInternalData>) -> Vec<AddrEvent<'a>> {
    let mut events = Vec::with_capacity(2 + 2 * btx.contracts.len());
    let mut push = |addr: &'a [u8], index: i32, kind: EventKind<'a>, count: bool| {
        if !addr.is_empty() {
            events.push(AddrEvent { addr, index, kind, count });
        }
    };

    push(btx.to.as_bytes(), TRANSFER_TO, EventKind::Base, true);
    push(btx.from.as_bytes(), TRANSFER_FROM, EventKind::Base, btx.from != btx.to);

    if let Some(data) = internal {
        if data.kind == InternalCallType::Create {
            push(data.contract.as_bytes(), INTERNAL_TRANSFER_TO, EventKind::Internal, true);
        }
        for t in &data.transfers {
            push(t.to.as_bytes(), INTERNAL_TRANSFER_TO, EventKind::Internal, true);
            push(t.from.as_bytes(), INTERNAL_TRANSFER_FROM, EventKind::Internal, t.from != t.to);
        }
    }

    for (k, transfer) in btx.contracts.iter().enumerate() {
        let index = k as i32 + CONTRACT_INDEX_OFFSET;
        push(transfer.to.as_bytes(), index, EventKind::Token { transfer, recipient: true }, true);
        push(transfer.from.as_bytes(), !index, EventKind::Token { transfer, recipient: false }, transfer.from != transfer.to);
    }
    events
}

/// Credit or debit a token movement on one holder's contract entry.
fn apply_token_value(ac: &mut AddrContract, transfer: &EthBlockTxContract, credit: bool, addr: &[u8]) {
    match ac.standard {
        TokenStandard::Fungible => {
            if credit {
                ac.value += &transfer.value;
            } else {
                sub_clamped(&mut ac.value, &transfer.value, addr, "token balance");
            }
        }
        TokenStandard::NonFungible => {
            let changed = if credit { ac.insert_id(&transfer.value) } else { ac.remove_id(&transfer.value) };
            if !changed {
                tracing::debug!(addr = %hex::encode(addr), id = %transfer.value, credit, "token id set unchanged");
            }
        }
    }
}

impl RocksIndex {
    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Per-address ledger of an account chain.
    pub fn get_addr_desc_contracts(&self, addr_desc: &[u8]) -> Result<Option<AddrContracts>, IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        match self.get(CF_ADDRESS_CONTRACTS, addr_desc)? {
            Some(buf) => Ok(Some(unpack_addr_contracts(&buf)?)),
            None => Ok(None),
        }
    }

    pub fn get_ethereum_block_txs(&self, height: u32) -> Result<Option<Vec<EthBlockTx>>, IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        match self.get(CF_BLOCK_TXS, &height_key(height))? {
            Some(buf) => Ok(Some(unpack_ethereum_block_txs(&buf, self.txid_len)?)),
            None => Ok(None),
        }
    }

    /// Stored call trace of a transaction.
    pub fn get_ethereum_internal_data(&self, txid: &str) -> Result<Option<EthInternalData>, IndexError> {
        let btxid = self.parser.pack_txid(txid)?;
        self.get_internal_data_packed(&btxid)
    }

    fn get_internal_data_packed(&self, btxid: &[u8]) -> Result<Option<EthInternalData>, IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        match self.get(CF_INTERNAL_DATA, btxid)? {
            Some(buf) => Ok(Some(unpack_internal_data(&buf)?)),
            None => Ok(None),
        }
    }

    // --- Contracts ---

    pub fn get_contract_info(&self, contract: &str) -> Result<Option<ContractInfo>, IndexError> {
        let desc = self.parser.addr_desc_from_address(contract)?;
        self.get_contract_info_desc(&desc)
    }

    /// Contract metadata, served from the in-memory cache when possible.
    pub fn get_contract_info_desc(&self, contract: &[u8]) -> Result<Option<ContractInfo>, IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        if let Some(cached) = self.contracts_cache.lock().get(contract) {
            return Ok(cached.clone());
        }
        let info = match self.get(CF_CONTRACTS, contract)? {
            Some(buf) => Some(unpack_contract_info(&buf)?),
            None => None,
        };
        self.contracts_cache.lock().insert(contract.to_vec(), info.clone());
        Ok(info)
    }

    pub fn store_contract_info(&self, info: &ContractInfo) -> Result<(), IndexError> {
        let mut batch = WriteBatch::default();
        self.put_contract_info(&mut batch, info)?;
        self.write(batch)
    }

    fn put_contract_info(&self, batch: &mut WriteBatch, info: &ContractInfo) -> Result<(), IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        let desc = self.parser.addr_desc_from_address(&info.contract)?;
        let cf = self.cf_handle(CF_CONTRACTS)?;
        batch.put_cf(cf, desc.as_bytes(), pack_contract_info(info));
        self.contracts_cache.lock().remove(desc.as_bytes());
        Ok(())
    }

    // --- Address aliases ---

    /// Name recorded for `address`, if aliases apply to this chain.
    pub fn get_address_alias(&self, address: &str) -> Result<Option<String>, IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        if !self.parser.use_address_aliases() {
            return Ok(None);
        }
        let desc = self.parser.addr_desc_from_address(address)?;
        if let Some(name) = self.alias_cache.lock().get(desc.as_bytes()) {
            return Ok(Some(name.clone()));
        }
        let Some(buf) = self.get(CF_ADDRESS_ALIASES, &desc)? else {
            return Ok(None);
        };
        let name = String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)?;
        self.alias_cache.lock().insert(desc.into_bytes(), name.clone());
        Ok(Some(name))
    }

    pub fn store_address_alias_records(&self, records: &[AddressAliasRecord]) -> Result<(), IndexError> {
        let mut batch = WriteBatch::default();
        self.put_address_aliases(&mut batch, records)?;
        self.write(batch)
    }

    fn put_address_aliases(&self, batch: &mut WriteBatch, records: &[AddressAliasRecord]) -> Result<(), IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        if !self.parser.use_address_aliases() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_ADDRESS_ALIASES)?;
        let mut cache = self.alias_cache.lock();
        for record in records {
            let desc = match self.parser.addr_desc_from_address(&record.address) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(address = %record.address, error = %e, "skipping alias of invalid address");
                    continue;
                }
            };
            batch.put_cf(cf, desc.as_bytes(), record.name.as_bytes());
            cache.insert(desc.into_bytes(), record.name.clone());
        }
        Ok(())
    }

    // --- Blocks with failed call traces ---

    /// Blocks whose call traces could not be fetched, by height.
    pub fn get_block_internal_data_errors(&self) -> Result<Vec<BlockInternalDataError>, IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        let cf = self.cf_handle(CF_BLOCK_INTERNAL_DATA_ERRORS)?;
        let mut errors = Vec::new();
        for item in self.db().iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(storage_err)?;
            let height = unpack_height_key(&key)?;
            errors.push(unpack_block_internal_data_error(height, &value)?);
        }
        Ok(errors)
    }

    pub fn store_block_internal_data_error(&self, record: &BlockInternalDataError) -> Result<(), IndexError> {
        self.ensure_chain(ChainType::Ethereum)?;
        let cf = self.cf_handle(CF_BLOCK_INTERNAL_DATA_ERRORS)?;
        self.db()
            .put_cf(cf, height_key(record.height), pack_block_internal_data_error(record))
            .map_err(storage_err)
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    pub(crate) fn connect_ethereum(&self, batch: &mut WriteBatch, block: &Block, addresses: &mut AddressesMap) -> Result<(), IndexError> {
        let mut contracts = AddrContractsMap::new();
        let out = self.process_ethereum_block(block, addresses, &mut contracts, None)?;
        self.store_addr_contracts(batch, &contracts)?;
        self.store_ethereum_extras(batch, block, &out)?;
        self.store_and_cleanup_block_txs(batch, block.height, pack_ethereum_block_txs(&out.block_txs))
    }

    /// Apply one block to the in-memory ledgers; rows missing from
    /// `contracts` are taken from `pending` or loaded from the database.
    pub(crate) fn process_ethereum_block(
        &self,
        block: &Block,
        addresses: &mut AddressesMap,
        contracts: &mut AddrContractsMap,
        pending: Option<&AddrContractsMap>,
    ) -> Result<EthBlockOutput, IndexError> {
        let height = block.height;
        let mut out = EthBlockOutput::default();
        for tx in &block.txs {
            let btxid = self.parser.pack_txid(&tx.txid)?;
            let from = tx
                .vin
                .first()
                .and_then(|v| v.addresses.first())
                .map(|a| self.eth_addr_desc(height, &tx.txid, a))
                .unwrap_or_default();
            let to = tx
                .vout
                .first()
                .and_then(|v| v.addresses.first())
                .map(|a| self.eth_addr_desc(height, &tx.txid, a))
                .unwrap_or_default();

            let transfers = self.parser.token_transfers(tx).unwrap_or_else(|e| {
                tracing::warn!(height, txid = %tx.txid, error = %e, "cannot read token transfers");
                Vec::new()
            });
            let mut btx = EthBlockTx { btxid: btxid.clone(), from, to, contracts: Vec::with_capacity(transfers.len()) };
            for t in transfers {
                let contract = self.eth_addr_desc(height, &tx.txid, &t.contract);
                if contract.is_empty() {
                    continue;
                }
                btx.contracts.push(EthBlockTxContract {
                    from: self.eth_addr_desc(height, &tx.txid, &t.from),
                    to: self.eth_addr_desc(height, &tx.txid, &t.to),
                    contract,
                    standard: t.standard,
                    value: t.value,
                });
            }

            let internal = self.parser.internal_data(tx).map(|d| EthInternalData {
                kind: d.kind,
                contract: self.eth_addr_desc(height, &tx.txid, &d.contract),
                transfers: d
                    .transfers
                    .iter()
                    .map(|t| EthInternalTransfer {
                        kind: t.kind,
                        from: self.eth_addr_desc(height, &tx.txid, &t.from),
                        to: self.eth_addr_desc(height, &tx.txid, &t.to),
                        value: t.value.clone(),
                    })
                    .collect(),
                error: d.error,
            });

            for ev in tx_events(&btx, internal.as_ref()) {
                self.connect_event(&btxid, ev, addresses, contracts, pending)?;
            }
            if let Some(data) = internal {
                out.internal.push((btxid, data));
            }
            out.block_txs.push(btx);
        }
        Ok(out)
    }

    fn eth_addr_desc(&self, height: u32, txid: &str, address: &str) -> AddressDescriptor {
        if address.is_empty() {
            return AddressDescriptor::default();
        }
        match self.parser.addr_desc_from_address(address) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(height, txid, address, error = %e, "cannot parse address");
                AddressDescriptor::default()
            }
        }
    }

    fn addr_contracts_entry<'a>(
        &self,
        contracts: &'a mut AddrContractsMap,
        pending: Option<&AddrContractsMap>,
        addr: &[u8],
    ) -> Result<&'a mut AddrContracts, IndexError> {
        match contracts.entry(addr.to_vec()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let acs = match pending.and_then(|m| m.get(addr)) {
                    Some(acs) => acs.clone(),
                    None => self.get_addr_desc_contracts(addr)?.unwrap_or_default(),
                };
                Ok(e.insert(acs))
            }
        }
    }

    fn connect_event(
        &self,
        btxid: &[u8],
        ev: AddrEvent<'_>,
        addresses: &mut AddressesMap,
        contracts: &mut AddrContractsMap,
        pending: Option<&AddrContractsMap>,
    ) -> Result<(), IndexError> {
        let acs = self.addr_contracts_entry(contracts, pending, ev.addr)?;
        match ev.kind {
            EventKind::Base if ev.count => acs.non_contract_txs += 1,
            EventKind::Internal if ev.count => acs.internal_txs += 1,
            EventKind::Token { transfer, recipient } if !is_zero_address(ev.addr) => {
                let pos = match acs.find(&transfer.contract) {
                    Some(pos) => pos,
                    None => {
                        acs.contracts.push(AddrContract::new(transfer.contract.clone(), transfer.standard));
                        acs.contracts.len() - 1
                    }
                };
                let ac = &mut acs.contracts[pos];
                if ev.count {
                    ac.txs += 1;
                }
                apply_token_value(ac, transfer, recipient, ev.addr);
            }
            _ => {}
        }
        if !add_to_addresses_map(addresses, ev.addr, btxid, ev.index) {
            acs.total_txs += 1;
        }
        Ok(())
    }

    /// Put ledgers; rows left without any activity are deleted.
    pub(crate) fn store_addr_contracts(&self, batch: &mut WriteBatch, contracts: &AddrContractsMap) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_ADDRESS_CONTRACTS)?;
        for (addr, acs) in contracts {
            if acs.total_txs == 0 && acs.is_empty() {
                batch.delete_cf(cf, addr);
            } else {
                batch.put_cf(cf, addr, pack_addr_contracts(acs));
            }
        }
        Ok(())
    }

    /// Call traces, contract metadata, aliases and trace errors of a block.
    pub(crate) fn store_ethereum_extras(&self, batch: &mut WriteBatch, block: &Block, out: &EthBlockOutput) -> Result<(), IndexError> {
        let cf_internal = self.cf_handle(CF_INTERNAL_DATA)?;
        for (btxid, data) in &out.internal {
            batch.put_cf(cf_internal, btxid, pack_internal_data(data));
            if data.kind == InternalCallType::Create
                && !data.contract.is_empty()
                && self.get_contract_info_desc(&data.contract)?.is_none()
            {
                let (names, _) = self.parser.addresses_from_addr_desc(&data.contract)?;
                let info = ContractInfo {
                    contract: names.into_iter().next().unwrap_or_default(),
                    standard: TokenStandard::Fungible,
                    name: String::new(),
                    symbol: String::new(),
                    decimals: 0,
                    created_in_block: block.height,
                    destructed_in_block: 0,
                };
                self.put_contract_info(batch, &info)?;
            }
        }

        let Some(evm) = self.parser.evm_block_data(block) else {
            return Ok(());
        };
        for info in &evm.contracts {
            self.put_contract_info(batch, info)?;
        }
        self.put_address_aliases(batch, &evm.address_aliases)?;
        if let Some(error) = evm.internal_data_error {
            tracing::warn!(height = block.height, error = %error, "block call traces unavailable");
            let record = BlockInternalDataError { height: block.height, hash: block.hash.clone(), retries: 0, error };
            let cf = self.cf_handle(CF_BLOCK_INTERNAL_DATA_ERRORS)?;
            batch.put_cf(cf, height_key(block.height), pack_block_internal_data_error(&record));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    pub(crate) fn disconnect_range_ethereum(&self, lower: u32, higher: u32) -> Result<(), IndexError> {
        let mut blocks = Vec::with_capacity((higher - lower + 1) as usize);
        for height in lower..=higher {
            match self.get_ethereum_block_txs(height)? {
                Some(txs) => blocks.push(txs),
                None => return Err(ChainStateError::RebuildIndex { height }.into()),
            }
        }

        let mut batch = WriteBatch::default();
        let mut contracts = AddrContractsMap::new();
        let mut address_keys: Vec<Vec<u8>> = Vec::new();
        let cf_height = self.cf_handle(CF_HEIGHT)?;
        let cf_block_txs = self.cf_handle(CF_BLOCK_TXS)?;
        let cf_internal = self.cf_handle(CF_INTERNAL_DATA)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        let cf_contracts = self.cf_handle(CF_CONTRACTS)?;
        let cf_errors = self.cf_handle(CF_BLOCK_INTERNAL_DATA_ERRORS)?;

        for (offset, block_txs) in blocks.iter().enumerate().rev() {
            let height = lower + offset as u32;
            tracing::info!(height, txs = block_txs.len(), "disconnecting block");
            let mut seen = SeenMap::new();
            for btx in block_txs.iter().rev() {
                let internal = self.get_internal_data_packed(&btx.btxid)?;
                for ev in tx_events(btx, internal.as_ref()).into_iter().rev() {
                    self.disconnect_event(&btx.btxid, ev, &mut contracts, &mut seen)?;
                }
                if let Some(data) = &internal {
                    if data.kind == InternalCallType::Create && !data.contract.is_empty() {
                        let created_here = self
                            .get_contract_info_desc(&data.contract)?
                            .is_some_and(|info| info.created_in_block == height);
                        if created_here {
                            batch.delete_cf(cf_contracts, &data.contract);
                            self.contracts_cache.lock().remove(data.contract.as_bytes());
                        }
                    }
                }
                batch.delete_cf(cf_internal, &btx.btxid);
                batch.delete_cf(cf_transactions, &btx.btxid);
            }
            address_keys.extend(seen.keys().map(|addr| pack_address_key(addr, height)));
            batch.delete_cf(cf_block_txs, height_key(height));
            batch.delete_cf(cf_height, height_key(height));
            batch.delete_cf(cf_errors, height_key(height));
        }

        self.store_addr_contracts(&mut batch, &contracts)?;
        let cf_addresses = self.cf_handle(CF_ADDRESSES)?;
        for key in &address_keys {
            batch.delete_cf(cf_addresses, key);
        }
        self.write(batch)
    }

    fn disconnect_event(&self, btxid: &[u8], ev: AddrEvent<'_>, contracts: &mut AddrContractsMap, seen: &mut SeenMap) -> Result<(), IndexError> {
        let first = seen.entry(ev.addr.to_vec()).or_default().insert(btxid.to_vec());
        if !contracts.contains_key(ev.addr) {
            match self.get_addr_desc_contracts(ev.addr)? {
                Some(acs) => {
                    contracts.insert(ev.addr.to_vec(), acs);
                }
                None => {
                    tracing::warn!(addr = %hex::encode(ev.addr), "address contracts not found");
                    return Ok(());
                }
            }
        }
        let Some(acs) = contracts.get_mut(ev.addr) else {
            return Ok(());
        };
        if first {
            acs.total_txs = acs.total_txs.saturating_sub(1);
        }
        match ev.kind {
            EventKind::Base if ev.count => acs.non_contract_txs = acs.non_contract_txs.saturating_sub(1),
            EventKind::Internal if ev.count => acs.internal_txs = acs.internal_txs.saturating_sub(1),
            EventKind::Token { transfer, recipient } if !is_zero_address(ev.addr) => {
                let Some(pos) = acs.find(&transfer.contract) else {
                    if ev.count {
                        tracing::warn!(addr = %hex::encode(ev.addr), contract = %transfer.contract, "contract not found in address ledger");
                    }
                    return Ok(());
                };
                let ac = &mut acs.contracts[pos];
                if ev.count {
                    ac.txs = ac.txs.saturating_sub(1);
                    if ac.txs == 0 {
                        acs.contracts.remove(pos);
                        return Ok(());
                    }
                }
                apply_token_value(ac, transfer, !recipient, ev.addr);
            }
            _ => {}
        }
        Ok(())
    }
}
