// Combinational helpers for the control pipeline: address slicing, write data
// replication, byte enables, read muxing, tag compare and the AMO unit.

use crate::arrays::TagEntry;
use crate::commons::AmoOp;
use crate::params::CacheParams;

/// One bit per line byte, bit i enables byte i.
pub type ByteEnable = u64;

/// low `n` bits set
pub fn mask(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub tag: u32,
    pub index: usize,
    pub offset: usize,
}

// address decoder

pub fn decode(p: &CacheParams, addr: u32) -> Decoded {
    let addr = addr as u64 & mask(p.addr_bits);
    let offset = addr & mask(p.offset_bits);
    let index = (addr >> p.offset_bits) & mask(p.index_bits);
    let tag = (addr >> (p.offset_bits + p.index_bits)) & mask(p.tag_bits);
    Decoded { tag: tag as u32, index: index as usize, offset: offset as usize }
}

pub fn line_addr(p: &CacheParams, addr: u32) -> u32 {
    (addr as u64 & mask(p.addr_bits) & !mask(p.offset_bits)) as u32
}

/// rebuild the line address of a (tag, index) slot
pub fn compose(p: &CacheParams, tag: u32, index: usize) -> u32 {
    ((tag as u64) << (p.offset_bits + p.index_bits) | (index as u64) << p.offset_bits) as u32
}

/// access width in bytes; a zero length field means one full data word
pub fn access_bytes(p: &CacheParams, len: u32) -> usize {
    if len == 0 { p.word_bytes } else { len as usize }
}

// data replicator

/// Tile the low `nbytes` of `value` across a whole line.
pub fn replicate(value: u64, nbytes: usize, line_bytes: usize) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    (0..line_bytes).map(|i| bytes[i % nbytes]).collect()
}

// write byte-enable generator

pub fn write_byte_enable(offset: usize, nbytes: usize) -> ByteEnable {
    mask(nbytes as u32) << offset
}

// read select mux

pub fn read_select(line: &[u8], offset: usize, nbytes: usize) -> u64 {
    line[offset..offset + nbytes]
        .iter()
        .rev()
        .fold(0u64, |acc, b| acc << 8 | *b as u64)
}

// comparator

/// An invalid way never hits, whatever its stored tag.
pub fn tag_match(entry: &TagEntry, tag: u32) -> bool {
    entry.valid && entry.tag == tag
}

// amo unit

fn sext(value: u64, nbytes: usize) -> i64 {
    let shift = 64 - 8 * nbytes as u32;
    ((value << shift) as i64) >> shift
}

/// New memory value for `op`, truncated to the access width.
pub fn amo(op: AmoOp, old: u64, operand: u64, nbytes: usize) -> u64 {
    let m = mask(8 * nbytes as u32);
    let (old, operand) = (old & m, operand & m);
    let new = match op {
        AmoOp::Add => old.wrapping_add(operand),
        AmoOp::And => old & operand,
        AmoOp::Or => old | operand,
        AmoOp::Xor => old ^ operand,
        AmoOp::Swap => operand,
        AmoOp::Min => if sext(old, nbytes) <= sext(operand, nbytes) { old } else { operand },
        AmoOp::Max => if sext(old, nbytes) >= sext(operand, nbytes) { old } else { operand },
        AmoOp::Minu => old.min(operand),
        AmoOp::Maxu => old.max(operand),
    };
    new & m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CacheConfig, CacheParams};

    fn params() -> CacheParams {
        CacheParams::new(&CacheConfig::default()).unwrap()
    }

    #[test]
    fn decode_splits_tag_index_offset() {
        let p = params();
        let d = decode(&p, 0x1234_5678);
        assert_eq!(d.offset, 0x18);
        assert_eq!(d.index, (0x1234_5678 >> 5) & 0x3f);
        assert_eq!(d.tag, 0x1234_5678 >> 11);
        assert_eq!(compose(&p, d.tag, d.index), line_addr(&p, 0x1234_5678));
        assert_eq!(line_addr(&p, 0x1234_5678), 0x1234_5660);
    }

    #[test]
    fn replicate_tiles_sub_words() {
        assert_eq!(replicate(0xab, 1, 4), vec![0xab; 4]);
        assert_eq!(replicate(0xbeef, 2, 6), vec![0xef, 0xbe, 0xef, 0xbe, 0xef, 0xbe]);
    }

    #[test]
    fn byte_enable_covers_only_the_access() {
        assert_eq!(write_byte_enable(0, 4), 0xf);
        assert_eq!(write_byte_enable(6, 2), 0xc0);
        assert_eq!(write_byte_enable(0, 64), u64::MAX);
    }

    #[test]
    fn read_select_is_little_endian() {
        let line = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
        assert_eq!(read_select(&line, 0, 4), 0x4433_2211);
        assert_eq!(read_select(&line, 6, 2), 0x8877);
        assert_eq!(read_select(&line, 5, 1), 0x66);
    }

    #[test]
    fn invalid_way_never_hits() {
        let zeroed = TagEntry::default();
        assert!(!tag_match(&zeroed, 0));
        let live = TagEntry { tag: 7, valid: true, dirty: false };
        assert!(tag_match(&live, 7));
        assert!(!tag_match(&live, 8));
    }

    #[test]
    fn amo_signed_and_unsigned() {
        assert_eq!(amo(AmoOp::Add, 5, 3, 4), 8);
        assert_eq!(amo(AmoOp::Add, 0xffff_ffff, 1, 4), 0);
        assert_eq!(amo(AmoOp::Min, 0xffff_ffff, 1, 4), 0xffff_ffff);
        assert_eq!(amo(AmoOp::Minu, 0xffff_ffff, 1, 4), 1);
        assert_eq!(amo(AmoOp::Max, 0xffff_ffff, 1, 4), 1);
        assert_eq!(amo(AmoOp::Maxu, 0xffff_ffff, 1, 4), 0xffff_ffff);
        assert_eq!(amo(AmoOp::Swap, 9, 4, 4), 4);
        assert_eq!(amo(AmoOp::Xor, 0b1100, 0b1010, 4), 0b0110);
    }
}
