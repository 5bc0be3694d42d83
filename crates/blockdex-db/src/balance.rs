//! Per-address balance and UTXO set of Bitcoin-type chains.
//!
//! UTXOs are kept in insertion (height ascending) order. Once a list grows to
//! [`UTXO_MAP_THRESHOLD`] entries a `btxID -> first position` map is built so
//! spends do not rescan the list; spent entries found through the map are
//! tombstoned with `vout = -1` and swept before the row is stored.

use std::collections::HashMap;

use num_bigint::BigUint;

use blockdex_core::codec::{pack_bigint, pack_varuint, ByteReader};
use blockdex_core::constants::UTXO_MAP_THRESHOLD;
use blockdex_core::error::CodecError;

/// How much of a balance row to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressBalanceDetail {
    /// Counters only.
    NoUtxo,
    /// Counters and the UTXO list.
    Utxo,
    /// Counters, UTXO list, and a prebuilt position map for spending.
    UtxoIndexed,
}

/// An unspent output held by an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub btxid: Vec<u8>,
    /// Output index; `-1` marks an entry spent but not yet swept.
    pub vout: i32,
    pub height: u32,
    pub value: BigUint,
}

/// Balance row of one address.
#[derive(Debug, Clone, Default)]
pub struct AddrBalance {
    pub txs: u32,
    pub sent: BigUint,
    pub balance: BigUint,
    pub utxos: Vec<Utxo>,
    utxos_map: HashMap<Vec<u8>, usize>,
}

impl PartialEq for AddrBalance {
    fn eq(&self, other: &Self) -> bool {
        self.txs == other.txs && self.sent == other.sent && self.balance == other.balance && self.utxos == other.utxos
    }
}

impl Eq for AddrBalance {}

/// Compare two packed txids, rejecting most mismatches on the first word.
fn btxid_eq(a: &[u8], b: &[u8]) -> bool {
    if let (Some(x), Some(y)) = (a.first_chunk::<8>(), b.first_chunk::<8>()) {
        if u64::from_ne_bytes(*x) != u64::from_ne_bytes(*y) {
            return false;
        }
    }
    a == b
}

impl AddrBalance {
    pub fn new(txs: u32, sent: BigUint, balance: BigUint, utxos: Vec<Utxo>) -> Self {
        Self { txs, sent, balance, utxos, utxos_map: HashMap::new() }
    }

    /// True once the spend lookup goes through the position map.
    pub fn is_indexed(&self) -> bool {
        !self.utxos_map.is_empty()
    }

    fn rebuild_map(&mut self) {
        self.utxos_map.clear();
        for (i, u) in self.utxos.iter().enumerate() {
            self.utxos_map.entry(u.btxid.clone()).or_insert(i);
        }
    }

    fn manage_map(&mut self) {
        let len = self.utxos.len();
        if len < UTXO_MAP_THRESHOLD {
            return;
        }
        if self.utxos_map.is_empty() {
            self.rebuild_map();
        } else if let Some(last) = self.utxos.last() {
            self.utxos_map.entry(last.btxid.clone()).or_insert(len - 1);
        }
    }

    /// Append a newly created output.
    pub fn add_utxo(&mut self, utxo: Utxo) {
        self.utxos.push(utxo);
        self.manage_map();
    }

    /// Re-insert an output un-spent by a disconnect.
    ///
    /// The entry is placed with the other outputs of the same tx, ordered by
    /// vout, so positions recorded in the map stay valid for that tx. An
    /// output whose tx has no other entry is appended; after
    /// [`sort_by_height`](Self::sort_by_height) it follows the outputs of
    /// its height still held, which need not be where it sat before the
    /// spend. The row then holds the same set of outputs, not the same bytes.
    pub fn add_utxo_in_disconnect(&mut self, utxo: Utxo) {
        let start = if self.utxos_map.is_empty() {
            self.utxos.iter().position(|u| btxid_eq(&u.btxid, &utxo.btxid))
        } else {
            self.utxos_map.get(&utxo.btxid).copied()
        };
        if let Some(start) = start {
            let at = (start..self.utxos.len())
                .find(|&i| self.utxos[i].vout > utxo.vout || !btxid_eq(&self.utxos[i].btxid, &utxo.btxid));
            if let Some(at) = at {
                self.utxos.insert(at, utxo);
                // positions shifted; rebuilt on demand
                self.utxos_map.clear();
                self.manage_map();
                return;
            }
        }
        self.add_utxo(utxo);
    }

    /// Mark output `vout` of `btxid` spent. Returns false if it is not held.
    pub fn mark_utxo_as_spent(&mut self, btxid: &[u8], vout: i32) -> bool {
        if self.utxos.len() < UTXO_MAP_THRESHOLD {
            if let Some(i) = self.utxos.iter().position(|u| u.vout == vout && btxid_eq(&u.btxid, btxid)) {
                self.utxos.remove(i);
                self.utxos_map.clear();
                return true;
            }
            return false;
        }
        if self.utxos_map.is_empty() {
            self.rebuild_map();
        }
        if let Some(&start) = self.utxos_map.get(btxid) {
            for u in &mut self.utxos[start..] {
                if u.vout == vout && btxid_eq(&u.btxid, btxid) {
                    u.vout = -1;
                    return true;
                }
            }
        }
        false
    }

    /// Drop tombstoned entries.
    pub fn sweep_spent(&mut self) {
        let before = self.utxos.len();
        self.utxos.retain(|u| u.vout >= 0);
        if self.utxos.len() != before {
            self.utxos_map.clear();
        }
    }

    /// Sort the UTXO list by height, stable within a height.
    pub fn sort_by_height(&mut self) {
        self.utxos.sort_by_key(|u| u.height);
        self.utxos_map.clear();
    }

    /// Sum of the values of all live UTXOs.
    pub fn utxo_sum(&self) -> BigUint {
        self.utxos.iter().filter(|u| u.vout >= 0).map(|u| &u.value).sum()
    }
}

/// Pack a balance row; tombstoned UTXOs are left out.
pub fn pack_addr_balance(ab: &AddrBalance) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 48 * ab.utxos.len());
    pack_varuint(u64::from(ab.txs), &mut out);
    pack_bigint(&ab.sent, &mut out);
    pack_bigint(&ab.balance, &mut out);
    for u in ab.utxos.iter().filter(|u| u.vout >= 0) {
        out.extend_from_slice(&u.btxid);
        pack_varuint(u.vout as u64, &mut out);
        pack_varuint(u64::from(u.height), &mut out);
        pack_bigint(&u.value, &mut out);
    }
    out
}

pub fn unpack_addr_balance(buf: &[u8], txid_len: usize, detail: AddressBalanceDetail) -> Result<AddrBalance, CodecError> {
    let mut r = ByteReader::new(buf);
    let txs = r.varuint32()?;
    let sent = r.bigint()?;
    let balance = r.bigint()?;
    let mut ab = AddrBalance::new(txs, sent, balance, Vec::new());
    if detail == AddressBalanceDetail::NoUtxo {
        return Ok(ab);
    }
    while !r.is_empty() {
        let btxid = r.fixed(txid_len, "utxo txid")?.to_vec();
        let vout = i32::try_from(r.varuint()?).map_err(|_| CodecError::InvalidData("utxo vout overflow".into()))?;
        let height = r.varuint32()?;
        let value = r.bigint()?;
        ab.utxos.push(Utxo { btxid, vout, height, value });
    }
    if detail == AddressBalanceDetail::UtxoIndexed && ab.utxos.len() >= UTXO_MAP_THRESHOLD {
        ab.rebuild_map();
    }
    Ok(ab)
}
