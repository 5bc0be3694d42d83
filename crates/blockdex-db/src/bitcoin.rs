//! Connect and disconnect of Bitcoin-type (UTXO) blocks.
//!
//! Processing runs against in-memory maps of `txAddresses` and
//! `addressBalance` rows so that the same code serves a single block connect
//! and the bulk loader, which keeps the maps alive across blocks.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use num_bigint::BigUint;
use rocksdb::WriteBatch;

use blockdex_core::codec::pack_address_key;
use blockdex_core::constants::MAX_ADDR_DESC_LEN;
use blockdex_core::error::{ChainStateError, IndexError, ParserError};
use blockdex_core::types::{AddressDescriptor, Block, ChainType, Vout};

use crate::balance::{pack_addr_balance, unpack_addr_balance, AddrBalance, AddressBalanceDetail, Utxo};
use crate::schema::{
    height_key, pack_bitcoin_block_txs, pack_tx_addresses, unpack_bitcoin_block_txs, unpack_tx_addresses, BlockTxs,
    Outpoint, TxAddresses, TxInput, TxOutput, CF_ADDRESSES, CF_ADDRESS_BALANCE, CF_BLOCK_TXS, CF_HEIGHT,
    CF_TRANSACTIONS, CF_TX_ADDRESSES,
};
use crate::bulk::PendingRows;
use crate::store::{add_to_addresses_map, sub_clamped, AddressesMap, RocksIndex};

pub(crate) type TxAddressesMap = HashMap<Vec<u8>, TxAddresses>;
pub(crate) type BalancesMap = HashMap<Vec<u8>, AddrBalance>;

/// Addresses seen per transaction while disconnecting one block.
type SeenMap = HashMap<Vec<u8>, HashSet<Vec<u8>>>;

/// Returns true the first time `addr_desc` is seen for `btxid`.
fn mark_seen(seen: &mut SeenMap, addr_desc: &[u8], btxid: &[u8]) -> bool {
    seen.entry(addr_desc.to_vec()).or_default().insert(btxid.to_vec())
}

impl RocksIndex {
    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Input and output summary of a transaction.
    pub fn get_tx_addresses(&self, txid: &str) -> Result<Option<TxAddresses>, IndexError> {
        let btxid = self.parser.pack_txid(txid)?;
        self.get_tx_addresses_packed(&btxid)
    }

    pub(crate) fn get_tx_addresses_packed(&self, btxid: &[u8]) -> Result<Option<TxAddresses>, IndexError> {
        self.ensure_chain(ChainType::Bitcoin)?;
        match self.get(CF_TX_ADDRESSES, btxid)? {
            Some(buf) => Ok(Some(unpack_tx_addresses(&buf, self.internal_state().extended_index())?)),
            None => Ok(None),
        }
    }

    /// Balance row of an address descriptor, decoded to `detail`.
    pub fn get_addr_desc_balance(&self, addr_desc: &[u8], detail: AddressBalanceDetail) -> Result<Option<AddrBalance>, IndexError> {
        self.ensure_chain(ChainType::Bitcoin)?;
        match self.get(CF_ADDRESS_BALANCE, addr_desc)? {
            Some(buf) => Ok(Some(unpack_addr_balance(&buf, self.txid_len, detail)?)),
            None => Ok(None),
        }
    }

    pub fn get_address_balance(&self, address: &str, detail: AddressBalanceDetail) -> Result<Option<AddrBalance>, IndexError> {
        let desc = self.parser.addr_desc_from_address(address)?;
        self.get_addr_desc_balance(&desc, detail)
    }

    /// Descriptor and value of output `vout` of `txid`.
    pub fn addr_desc_for_outpoint(&self, txid: &str, vout: u32) -> Result<Option<(AddressDescriptor, BigUint)>, IndexError> {
        let Some(ta) = self.get_tx_addresses(txid)? else {
            return Ok(None);
        };
        Ok(ta.outputs.into_iter().nth(vout as usize).map(|o| (o.addr_desc, o.value)))
    }

    /// Rollback log of the block at `height`, `None` if pruned or absent.
    pub fn get_bitcoin_block_txs(&self, height: u32) -> Result<Option<Vec<BlockTxs>>, IndexError> {
        self.ensure_chain(ChainType::Bitcoin)?;
        match self.get(CF_BLOCK_TXS, &height_key(height))? {
            Some(buf) => Ok(Some(unpack_bitcoin_block_txs(&buf, self.txid_len)?)),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Connect
    // ------------------------------------------------------------------

    pub(crate) fn connect_bitcoin(&self, batch: &mut WriteBatch, block: &Block, addresses: &mut AddressesMap) -> Result<(), IndexError> {
        let mut tx_addresses = TxAddressesMap::new();
        let mut balances = BalancesMap::new();
        let block_txs =
            self.process_bitcoin_block(block, addresses, &mut tx_addresses, &mut balances, PendingRows::default())?;
        self.store_tx_addresses(batch, &tx_addresses)?;
        self.store_balances(batch, &balances)?;
        self.store_and_cleanup_block_txs(batch, block.height, pack_bitcoin_block_txs(&block_txs))
    }

    /// Apply one block to the in-memory maps and return its rollback log.
    ///
    /// Rows missing from the maps are taken from `pending` (rows a bulk
    /// flush is still writing) or else loaded from the database. Outputs of
    /// every tx are processed before any input so that a tx may spend an
    /// output created earlier in the same block.
    pub(crate) fn process_bitcoin_block(
        &self,
        block: &Block,
        addresses: &mut AddressesMap,
        tx_addresses: &mut TxAddressesMap,
        balances: &mut BalancesMap,
        pending: PendingRows<'_>,
    ) -> Result<Vec<BlockTxs>, IndexError> {
        let height = block.height;
        let extended = self.internal_state().extended_index();
        let mut btxids = Vec::with_capacity(block.txs.len());

        for tx in &block.txs {
            let btxid = self.parser.pack_txid(&tx.txid)?;
            let mut ta = TxAddresses {
                height,
                vsize: if extended { tx.vsize.unwrap_or(0) } else { 0 },
                inputs: vec![TxInput::default(); tx.vin.len()],
                outputs: Vec::with_capacity(tx.vout.len()),
            };
            for (i, vout) in tx.vout.iter().enumerate() {
                let mut output = TxOutput { value: vout.value.clone(), ..TxOutput::default() };
                if let Some(addr_desc) = self.output_addr_desc(height, &tx.txid, vout) {
                    if self.parser.is_addr_desc_indexable(&addr_desc) {
                        let balance = self.balance_entry(balances, pending.balances, &addr_desc)?;
                        if !add_to_addresses_map(addresses, &addr_desc, &btxid, i as i32) {
                            balance.txs += 1;
                        }
                        balance.balance += &vout.value;
                        balance.add_utxo(Utxo { btxid: btxid.clone(), vout: i as i32, height, value: vout.value.clone() });
                    }
                    output.addr_desc = addr_desc;
                }
                ta.outputs.push(output);
            }
            tx_addresses.insert(btxid.clone(), ta);
            btxids.push(btxid);
        }

        let mut block_txs = Vec::with_capacity(block.txs.len());
        for (tx, btxid) in block.txs.iter().zip(&btxids) {
            let mut spends = Vec::with_capacity(tx.vin.len());
            for (i, vin) in tx.vin.iter().enumerate() {
                let prev_btxid = match self.parser.pack_txid(&vin.txid) {
                    Ok(b) => b,
                    // coinbase
                    Err(ParserError::TxidMissing) => {
                        spends.push(Outpoint { btxid: vec![0; self.txid_len], index: -1 });
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                spends.push(Outpoint { btxid: prev_btxid.clone(), index: vin.vout as i32 });

                if !tx_addresses.contains_key(&prev_btxid) {
                    let loaded = match pending.tx_addresses.and_then(|m| m.get(&prev_btxid)) {
                        Some(ta) => Some(ta.clone()),
                        None => self.get_tx_addresses_packed(&prev_btxid)?,
                    };
                    match loaded {
                        Some(prev) => {
                            tx_addresses.insert(prev_btxid.clone(), prev);
                        }
                        None => {
                            tracing::warn!(height, txid = %tx.txid, input_txid = %vin.txid, "input tx not found");
                            let addr_desc = self.parser.addr_desc_for_unknown_input(tx, i);
                            if let Some(ta) = tx_addresses.get_mut(btxid) {
                                ta.inputs[i].addr_desc = addr_desc;
                            }
                            continue;
                        }
                    }
                }

                let Some(spent) = tx_addresses
                    .get_mut(&prev_btxid)
                    .and_then(|prev| prev.outputs.get_mut(vin.vout as usize))
                else {
                    tracing::warn!(height, txid = %tx.txid, input_txid = %vin.txid, vout = vin.vout, "input vout out of range");
                    continue;
                };
                if spent.spent {
                    tracing::warn!(height, txid = %tx.txid, input_txid = %vin.txid, vout = vin.vout, "double spend");
                }
                spent.spent = true;
                if extended {
                    spent.spent_txid = btxid.clone();
                    spent.spent_index = i as u32;
                    spent.spent_height = height;
                }
                let (addr_desc, value) = (spent.addr_desc.clone(), spent.value.clone());
                if let Some(ta) = tx_addresses.get_mut(btxid) {
                    ta.inputs[i] = TxInput { addr_desc: addr_desc.clone(), value: value.clone() };
                }

                if addr_desc.is_empty() || !self.parser.is_addr_desc_indexable(&addr_desc) {
                    continue;
                }
                let balance = self.balance_entry(balances, pending.balances, &addr_desc)?;
                if !add_to_addresses_map(addresses, &addr_desc, btxid, !(i as i32)) {
                    balance.txs += 1;
                }
                sub_clamped(&mut balance.balance, &value, &addr_desc, "balance");
                balance.sent += &value;
                if !balance.mark_utxo_as_spent(&prev_btxid, vin.vout as i32) {
                    tracing::debug!(height, addr = %addr_desc, input_txid = %vin.txid, vout = vin.vout, "utxo not in balance");
                }
            }
            block_txs.push(BlockTxs { btxid: btxid.clone(), inputs: spends });
        }
        Ok(block_txs)
    }

    /// Descriptor of an output, `None` if it is not to be indexed.
    fn output_addr_desc(&self, height: u32, txid: &str, vout: &Vout) -> Option<AddressDescriptor> {
        match self.parser.addr_desc_from_vout(vout) {
            Ok(d) if d.is_empty() => {
                tracing::debug!(height, txid, vout = vout.n, "empty address descriptor");
                None
            }
            Ok(d) if d.len() > MAX_ADDR_DESC_LEN => {
                tracing::warn!(height, txid, vout = vout.n, len = d.len(), "address descriptor too long, skipping");
                None
            }
            Ok(d) => Some(d),
            Err(ParserError::AddressMissing) => None,
            Err(e) => {
                tracing::warn!(height, txid, vout = vout.n, error = %e, "cannot parse output address");
                None
            }
        }
    }

    fn balance_entry<'a>(
        &self,
        balances: &'a mut BalancesMap,
        pending: Option<&BalancesMap>,
        addr_desc: &[u8],
    ) -> Result<&'a mut AddrBalance, IndexError> {
        match balances.entry(addr_desc.to_vec()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let ab = match pending.and_then(|m| m.get(addr_desc)) {
                    Some(ab) => ab.clone(),
                    None => self
                        .get_addr_desc_balance(addr_desc, AddressBalanceDetail::UtxoIndexed)?
                        .unwrap_or_default(),
                };
                Ok(e.insert(ab))
            }
        }
    }

    /// Balance of a known address; `None` (logged) if the row is missing.
    fn loaded_balance<'a>(&self, balances: &'a mut BalancesMap, addr_desc: &[u8]) -> Result<Option<&'a mut AddrBalance>, IndexError> {
        if !balances.contains_key(addr_desc) {
            match self.get_addr_desc_balance(addr_desc, AddressBalanceDetail::UtxoIndexed)? {
                Some(ab) => {
                    balances.insert(addr_desc.to_vec(), ab);
                }
                None => {
                    tracing::warn!(addr = %hex::encode(addr_desc), "balance not found");
                    return Ok(None);
                }
            }
        }
        Ok(balances.get_mut(addr_desc))
    }

    pub(crate) fn store_tx_addresses(&self, batch: &mut WriteBatch, tx_addresses: &TxAddressesMap) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_TX_ADDRESSES)?;
        let extended = self.internal_state().extended_index();
        for (btxid, ta) in tx_addresses {
            batch.put_cf(cf, btxid, pack_tx_addresses(ta, extended));
        }
        Ok(())
    }

    /// Put balance rows; rows whose tx count dropped to zero are deleted.
    pub(crate) fn store_balances(&self, batch: &mut WriteBatch, balances: &BalancesMap) -> Result<(), IndexError> {
        let cf = self.cf_handle(CF_ADDRESS_BALANCE)?;
        for (addr_desc, ab) in balances {
            if ab.txs == 0 {
                batch.delete_cf(cf, addr_desc);
            } else {
                batch.put_cf(cf, addr_desc, pack_addr_balance(ab));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Disconnect
    // ------------------------------------------------------------------

    pub(crate) fn disconnect_range_bitcoin(&self, lower: u32, higher: u32) -> Result<(), IndexError> {
        let mut blocks = Vec::with_capacity((higher - lower + 1) as usize);
        for height in lower..=higher {
            match self.get_bitcoin_block_txs(height)? {
                Some(txs) => blocks.push(txs),
                None => return Err(ChainStateError::RebuildIndex { height }.into()),
            }
        }

        let mut batch = WriteBatch::default();
        let mut to_update = TxAddressesMap::new();
        let mut balances = BalancesMap::new();
        let mut txs_to_delete: HashSet<Vec<u8>> = HashSet::new();
        let mut address_keys: Vec<Vec<u8>> = Vec::new();
        let cf_height = self.cf_handle(CF_HEIGHT)?;
        let cf_block_txs = self.cf_handle(CF_BLOCK_TXS)?;

        for (offset, block_txs) in blocks.iter().enumerate().rev() {
            let height = lower + offset as u32;
            tracing::info!(height, txs = block_txs.len(), "disconnecting block");
            let mut seen = SeenMap::new();
            // newest tx first, undoing inputs before outputs
            for btx in block_txs.iter().rev() {
                let ta = match to_update.remove(&btx.btxid) {
                    Some(ta) => Some(ta),
                    None => self.get_tx_addresses_packed(&btx.btxid)?,
                };
                txs_to_delete.insert(btx.btxid.clone());
                let Some(ta) = ta else {
                    tracing::warn!(height, txid = %hex::encode(&btx.btxid), "tx addresses not found");
                    continue;
                };
                self.disconnect_bitcoin_inputs(btx, &ta, &mut to_update, &mut balances, &mut seen)?;
                self.disconnect_bitcoin_outputs(&btx.btxid, &ta, &mut balances, &mut seen)?;
            }
            address_keys.extend(seen.keys().map(|addr| pack_address_key(addr, height)));
            batch.delete_cf(cf_block_txs, height_key(height));
            batch.delete_cf(cf_height, height_key(height));
        }

        to_update.retain(|btxid, _| !txs_to_delete.contains(btxid));
        self.store_tx_addresses(&mut batch, &to_update)?;
        for ab in balances.values_mut() {
            ab.sweep_spent();
            ab.sort_by_height();
        }
        self.store_balances(&mut batch, &balances)?;

        let cf_tx_addresses = self.cf_handle(CF_TX_ADDRESSES)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        for btxid in &txs_to_delete {
            batch.delete_cf(cf_tx_addresses, btxid);
            batch.delete_cf(cf_transactions, btxid);
        }
        let cf_addresses = self.cf_handle(CF_ADDRESSES)?;
        for key in &address_keys {
            batch.delete_cf(cf_addresses, key);
        }
        self.write(batch)
    }

    fn disconnect_bitcoin_inputs(
        &self,
        btx: &BlockTxs,
        ta: &TxAddresses,
        to_update: &mut TxAddressesMap,
        balances: &mut BalancesMap,
        seen: &mut SeenMap,
    ) -> Result<(), IndexError> {
        for (input, spend) in ta.inputs.iter().zip(&btx.inputs) {
            if spend.index < 0 {
                continue;
            }
            if !to_update.contains_key(&spend.btxid) {
                if let Some(prev) = self.get_tx_addresses_packed(&spend.btxid)? {
                    to_update.insert(spend.btxid.clone(), prev);
                }
            }
            // the spent tx was never indexed, so neither was this input
            let Some(prev) = to_update.get_mut(&spend.btxid) else {
                continue;
            };
            let prev_height = prev.height;
            if let Some(output) = prev.outputs.get_mut(spend.index as usize) {
                output.unspend();
            }

            if input.addr_desc.is_empty() || !self.parser.is_addr_desc_indexable(&input.addr_desc) {
                continue;
            }
            let first = mark_seen(seen, &input.addr_desc, &btx.btxid);
            if let Some(ab) = self.loaded_balance(balances, &input.addr_desc)? {
                if first {
                    ab.txs = ab.txs.saturating_sub(1);
                }
                sub_clamped(&mut ab.sent, &input.value, &input.addr_desc, "sent");
                ab.balance += &input.value;
                ab.add_utxo_in_disconnect(Utxo {
                    btxid: spend.btxid.clone(),
                    vout: spend.index,
                    height: prev_height,
                    value: input.value.clone(),
                });
            }
        }
        Ok(())
    }

    fn disconnect_bitcoin_outputs(
        &self,
        btxid: &[u8],
        ta: &TxAddresses,
        balances: &mut BalancesMap,
        seen: &mut SeenMap,
    ) -> Result<(), IndexError> {
        for (i, output) in ta.outputs.iter().enumerate() {
            if output.addr_desc.is_empty() || !self.parser.is_addr_desc_indexable(&output.addr_desc) {
                continue;
            }
            let first = mark_seen(seen, &output.addr_desc, btxid);
            if let Some(ab) = self.loaded_balance(balances, &output.addr_desc)? {
                if first {
                    ab.txs = ab.txs.saturating_sub(1);
                }
                sub_clamped(&mut ab.balance, &output.value, &output.addr_desc, "balance");
                ab.mark_utxo_as_spent(btxid, i as i32);
            }
        }
        Ok(())
    }
}
