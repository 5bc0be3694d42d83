//! Binary encodings of every value stored by the indexer.
//!
//! All encodings are canonical and chosen so that index queries reduce to
//! range scans in RocksDB iteration order:
//!
//! - heights are 4-byte big-endian, so byte order equals numeric order;
//! - address keys append the bit-complemented height, so the newest block
//!   sorts first under a forward scan;
//! - integers inside values are base-128 VLQs (zig-zag for signed values);
//! - big integers carry a single length byte followed by the big-endian
//!   magnitude.
//!
//! Decoders never read past the slice and reject under-length input with
//! [`CodecError::Truncated`].

use num_bigint::BigUint;
use num_traits::Zero;

use crate::constants::MAX_PACKED_BIGINT_BYTES;
use crate::error::CodecError;

/// Maximum encoded length of a 64-bit VLQ.
pub const MAX_VARINT_LEN: usize = 10;

// ------------------------------------------------------------------
// Fixed width
// ------------------------------------------------------------------

/// Pack a height or counter as 4 big-endian bytes.
pub fn pack_u32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Unpack 4 big-endian bytes from the front of `buf`.
pub fn unpack_u32(buf: &[u8]) -> Result<u32, CodecError> {
    let bytes: [u8; 4] = buf
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(CodecError::Truncated { what: "uint32", need: 4, have: buf.len() })?;
    Ok(u32::from_be_bytes(bytes))
}

// ------------------------------------------------------------------
// Variable length integers
// ------------------------------------------------------------------

/// Append `v` as an unsigned base-128 VLQ.
pub fn pack_varuint(mut v: u64, out: &mut Vec<u8>) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

/// Decode an unsigned VLQ, returning the value and the bytes consumed.
pub fn unpack_varuint(buf: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut value = 0u64;
    for (i, &b) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && b > 1 {
            return Err(CodecError::VarintOverflow);
        }
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CodecError::Truncated { what: "varuint", need: buf.len() + 1, have: buf.len() })
}

/// Append `v` as a zig-zag encoded VLQ.
pub fn pack_varint(v: i64, out: &mut Vec<u8>) {
    pack_varuint(((v << 1) ^ (v >> 63)) as u64, out);
}

/// Decode a zig-zag VLQ, returning the value and the bytes consumed.
pub fn unpack_varint(buf: &[u8]) -> Result<(i64, usize), CodecError> {
    let (u, n) = unpack_varuint(buf)?;
    Ok((((u >> 1) as i64) ^ -((u & 1) as i64), n))
}

// ------------------------------------------------------------------
// Big integers
// ------------------------------------------------------------------

/// Append a length-prefixed big-endian magnitude.
///
/// Zero packs as a single `0` byte. Magnitudes longer than
/// [`MAX_PACKED_BIGINT_BYTES`] keep only their most significant bytes.
pub fn pack_bigint(v: &BigUint, out: &mut Vec<u8>) {
    if v.is_zero() {
        out.push(0);
        return;
    }
    let bytes = v.to_bytes_be();
    let bytes = &bytes[..bytes.len().min(MAX_PACKED_BIGINT_BYTES)];
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

/// Decode a length-prefixed big-endian magnitude.
pub fn unpack_bigint(buf: &[u8]) -> Result<(BigUint, usize), CodecError> {
    let len = *buf
        .first()
        .ok_or(CodecError::Truncated { what: "bigint", need: 1, have: 0 })? as usize;
    if len > MAX_PACKED_BIGINT_BYTES {
        return Err(CodecError::BigintTooLong(len));
    }
    let body = buf
        .get(1..1 + len)
        .ok_or(CodecError::Truncated { what: "bigint", need: 1 + len, have: buf.len() })?;
    Ok((BigUint::from_bytes_be(body), 1 + len))
}

// ------------------------------------------------------------------
// Strings and byte slices
// ------------------------------------------------------------------

/// Append a varuint length followed by the raw bytes.
pub fn pack_bytes(b: &[u8], out: &mut Vec<u8>) {
    pack_varuint(b.len() as u64, out);
    out.extend_from_slice(b);
}

pub fn pack_string(s: &str, out: &mut Vec<u8>) {
    pack_bytes(s.as_bytes(), out);
}

pub fn unpack_bytes(buf: &[u8]) -> Result<(&[u8], usize), CodecError> {
    let (len, n) = unpack_varuint(buf)?;
    let len = usize::try_from(len).map_err(|_| CodecError::InvalidData("length overflow".into()))?;
    let body = buf
        .get(n..n + len)
        .ok_or(CodecError::Truncated { what: "bytes", need: n + len, have: buf.len() })?;
    Ok((body, n + len))
}

pub fn unpack_string(buf: &[u8]) -> Result<(String, usize), CodecError> {
    let (b, n) = unpack_bytes(buf)?;
    let s = std::str::from_utf8(b).map_err(|_| CodecError::InvalidUtf8)?;
    Ok((s.to_string(), n))
}

// ------------------------------------------------------------------
// Keys
// ------------------------------------------------------------------

/// Key of the `addresses` column family: `addr_desc || !height` (big-endian).
pub fn pack_address_key(addr_desc: &[u8], height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(addr_desc.len() + 4);
    key.extend_from_slice(addr_desc);
    key.extend_from_slice(&pack_u32(!height));
    key
}

/// Split an address key into descriptor and height.
pub fn unpack_address_key(key: &[u8]) -> Result<(&[u8], u32), CodecError> {
    if key.len() < 4 {
        return Err(CodecError::Truncated { what: "address key", need: 4, have: key.len() });
    }
    let split = key.len() - 4;
    let height = !unpack_u32(&key[split..])?;
    Ok((&key[..split], height))
}

// ------------------------------------------------------------------
// Per-address tx index lists
// ------------------------------------------------------------------

/// The indexes at which one transaction touched an address within a block.
///
/// Non-negative entries are output (or recipient) positions, negative
/// entries are bit-complemented input (or sender) positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIndexes {
    pub btxid: Vec<u8>,
    pub indexes: Vec<i32>,
}

/// Pack the value of one `addresses` row.
///
/// `txs` is in append order; the newest transaction is written first.
/// Entries without indexes carry no terminator and are skipped.
pub fn pack_tx_indexes(txs: &[TxIndexes]) -> Vec<u8> {
    let mut out = Vec::with_capacity(txs.len() * 40);
    for t in txs.iter().rev().filter(|t| !t.indexes.is_empty()) {
        out.extend_from_slice(&t.btxid);
        let last = t.indexes.len().saturating_sub(1);
        for (i, &index) in t.indexes.iter().enumerate() {
            let mut v = i64::from(index) << 1;
            if i == last {
                v |= 1;
            }
            pack_varint(v, &mut out);
        }
    }
    out
}

/// Unpack an `addresses` row back into append order.
pub fn unpack_tx_indexes(mut buf: &[u8], txid_len: usize) -> Result<Vec<TxIndexes>, CodecError> {
    let mut txs = Vec::new();
    while !buf.is_empty() {
        if buf.len() < txid_len {
            return Err(CodecError::Truncated { what: "txid", need: txid_len, have: buf.len() });
        }
        let btxid = buf[..txid_len].to_vec();
        buf = &buf[txid_len..];
        let mut indexes = Vec::with_capacity(2);
        loop {
            let (v, n) = unpack_varint(buf)?;
            buf = &buf[n..];
            indexes.push((v >> 1) as i32);
            if v & 1 == 1 {
                break;
            }
            if buf.is_empty() {
                return Err(CodecError::InvalidData("tx index list without terminator".into()));
            }
        }
        txs.push(TxIndexes { btxid, indexes });
    }
    txs.reverse();
    Ok(txs)
}

// ------------------------------------------------------------------
// Sequential reader
// ------------------------------------------------------------------

/// Cursor over a packed record.
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn varuint(&mut self) -> Result<u64, CodecError> {
        let (v, n) = unpack_varuint(self.buf)?;
        self.buf = &self.buf[n..];
        Ok(v)
    }

    /// Read a varuint that must fit a `u32`.
    pub fn varuint32(&mut self) -> Result<u32, CodecError> {
        let v = self.varuint()?;
        u32::try_from(v).map_err(|_| CodecError::InvalidData(format!("value {v} exceeds u32")))
    }

    pub fn varint(&mut self) -> Result<i64, CodecError> {
        let (v, n) = unpack_varint(self.buf)?;
        self.buf = &self.buf[n..];
        Ok(v)
    }

    pub fn bigint(&mut self) -> Result<BigUint, CodecError> {
        let (v, n) = unpack_bigint(self.buf)?;
        self.buf = &self.buf[n..];
        Ok(v)
    }

    pub fn len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let (b, n) = unpack_bytes(self.buf)?;
        self.buf = &self.buf[n..];
        Ok(b)
    }

    pub fn string(&mut self) -> Result<String, CodecError> {
        let (s, n) = unpack_string(self.buf)?;
        self.buf = &self.buf[n..];
        Ok(s)
    }

    pub fn fixed(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < len {
            return Err(CodecError::Truncated { what, need: len, have: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varuint_bytes(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        pack_varuint(v, &mut out);
        out
    }

    // ------------------------------------------------------------------
    // VLQ
    // ------------------------------------------------------------------

    #[test]
    fn varuint_single_byte_below_128() {
        assert_eq!(varuint_bytes(0), vec![0]);
        assert_eq!(varuint_bytes(127), vec![0x7f]);
        assert_eq!(varuint_bytes(128), vec![0x80, 0x01]);
    }

    #[test]
    fn varuint_max_is_ten_bytes() {
        let b = varuint_bytes(u64::MAX);
        assert_eq!(b.len(), MAX_VARINT_LEN);
        assert_eq!(unpack_varuint(&b).unwrap(), (u64::MAX, MAX_VARINT_LEN));
    }

    #[test]
    fn varuint_rejects_overflow() {
        let mut b = vec![0xff; 9];
        b.push(0x02);
        assert_eq!(unpack_varuint(&b), Err(CodecError::VarintOverflow));
        let b = vec![0x80; 11];
        assert_eq!(unpack_varuint(&b), Err(CodecError::VarintOverflow));
    }

    #[test]
    fn varuint_rejects_truncated() {
        assert!(matches!(unpack_varuint(&[0x80, 0x80]), Err(CodecError::Truncated { .. })));
        assert!(matches!(unpack_varuint(&[]), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn varint_zigzag_layout() {
        let mut out = Vec::new();
        pack_varint(-1, &mut out);
        assert_eq!(out, vec![1]);
        out.clear();
        pack_varint(1, &mut out);
        assert_eq!(out, vec![2]);
        assert_eq!(unpack_varint(&[3]).unwrap(), (-2, 1));
        out.clear();
        pack_varint(i64::MIN, &mut out);
        assert_eq!(unpack_varint(&out).unwrap().0, i64::MIN);
    }

    // ------------------------------------------------------------------
    // Bigint
    // ------------------------------------------------------------------

    #[test]
    fn bigint_zero_is_single_byte() {
        let mut out = Vec::new();
        pack_bigint(&BigUint::zero(), &mut out);
        assert_eq!(out, vec![0]);
        assert_eq!(unpack_bigint(&out).unwrap(), (BigUint::zero(), 1));
    }

    #[test]
    fn bigint_layout() {
        let mut out = Vec::new();
        pack_bigint(&BigUint::from(10_000_000u64), &mut out);
        assert_eq!(out, vec![3, 0x98, 0x96, 0x80]);
    }

    #[test]
    fn bigint_truncates_oversized_magnitude() {
        let huge = BigUint::from_bytes_be(&[0xab; 300]);
        let mut out = Vec::new();
        pack_bigint(&huge, &mut out);
        assert_eq!(out.len(), 1 + MAX_PACKED_BIGINT_BYTES);
        assert_eq!(out[0] as usize, MAX_PACKED_BIGINT_BYTES);
    }

    #[test]
    fn bigint_rejects_bad_length() {
        assert_eq!(unpack_bigint(&[249]), Err(CodecError::BigintTooLong(249)));
        assert!(matches!(unpack_bigint(&[2, 1]), Err(CodecError::Truncated { .. })));
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    #[test]
    fn address_key_sorts_newest_first() {
        let older = pack_address_key(b"addr", 100);
        let newer = pack_address_key(b"addr", 101);
        assert!(newer < older);
        assert_eq!(unpack_address_key(&older).unwrap(), (&b"addr"[..], 100));
    }

    #[test]
    fn string_with_unicode() {
        let mut out = Vec::new();
        pack_string("Tether \u{20ae}", &mut out);
        assert_eq!(unpack_string(&out).unwrap().0, "Tether \u{20ae}");
    }

    // ------------------------------------------------------------------
    // Tx indexes
    // ------------------------------------------------------------------

    #[test]
    fn tx_indexes_newest_written_first() {
        let txs = vec![
            TxIndexes { btxid: vec![1; 4], indexes: vec![!0] },
            TxIndexes { btxid: vec![2; 4], indexes: vec![0, !2] },
        ];
        let packed = pack_tx_indexes(&txs);
        assert_eq!(&packed[..4], &[2; 4]);
        assert_eq!(unpack_tx_indexes(&packed, 4).unwrap(), txs);
    }

    #[test]
    fn tx_indexes_terminator_bits() {
        let txs = vec![TxIndexes { btxid: vec![9; 2], indexes: vec![1, 2] }];
        let packed = pack_tx_indexes(&txs);
        // 1<<1 = 2 -> zigzag 4; (2<<1)|1 = 5 -> zigzag 10
        assert_eq!(packed, vec![9, 9, 4, 10]);
    }

    #[test]
    fn tx_indexes_skip_empty_entries() {
        let txs = vec![
            TxIndexes { btxid: vec![1; 4], indexes: vec![0] },
            TxIndexes { btxid: vec![2; 4], indexes: vec![] },
            TxIndexes { btxid: vec![3; 4], indexes: vec![!1] },
        ];
        let unpacked = unpack_tx_indexes(&pack_tx_indexes(&txs), 4).unwrap();
        assert_eq!(unpacked, vec![txs[0].clone(), txs[2].clone()]);
    }

    #[test]
    fn tx_indexes_rejects_missing_terminator() {
        let mut buf = vec![7, 7];
        pack_varint(2, &mut buf);
        assert!(unpack_tx_indexes(&buf, 2).is_err());
    }

    #[test]
    fn byte_reader_sequence() {
        let mut buf = Vec::new();
        pack_varuint(300, &mut buf);
        pack_string("abc", &mut buf);
        pack_bigint(&BigUint::from(42u8), &mut buf);
        buf.extend_from_slice(&[5, 6]);
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.varuint().unwrap(), 300);
        assert_eq!(r.string().unwrap(), "abc");
        assert_eq!(r.bigint().unwrap(), BigUint::from(42u8));
        assert_eq!(r.fixed(2, "tail").unwrap(), &[5, 6]);
        assert!(r.is_empty());
        assert!(r.fixed(1, "tail").is_err());
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn address_keys_order_by_descriptor_then_newest(
            desc in prop::collection::vec(any::<u8>(), 0..40),
            a in any::<u32>(),
            b in any::<u32>(),
        ) {
            prop_assume!(a != b);
            let (ka, kb) = (pack_address_key(&desc, a), pack_address_key(&desc, b));
            prop_assert_eq!(ka < kb, a > b);
            prop_assert_eq!(unpack_address_key(&ka).unwrap(), (&desc[..], a));
        }

        #[test]
        fn tx_index_lists_survive_packing(
            rows in prop::collection::vec(
                (any::<[u8; 8]>(), prop::collection::vec(any::<i32>(), 1..6)),
                0..12,
            ),
        ) {
            let txs: Vec<TxIndexes> = rows
                .into_iter()
                .map(|(btxid, indexes)| TxIndexes { btxid: btxid.to_vec(), indexes })
                .collect();
            prop_assert_eq!(unpack_tx_indexes(&pack_tx_indexes(&txs), 8).unwrap(), txs);
        }
    }
}
