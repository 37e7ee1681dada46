// Tag and data storage. Both arrays are laid out set-major,
// slot (index, way) lives at index * ways + way.

use bitflags::bitflags;

use crate::datapath::ByteEnable;
use crate::params::CacheParams;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TagEntry {
    pub tag: u32,
    pub valid: bool,
    pub dirty: bool,
}

bitflags! {
    /// Field write enables for a tag array write.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TagFields: u8 {
        const TAG   = 0b001;
        const VALID = 0b010;
        const DIRTY = 0b100;
        const ALL   = Self::TAG.bits() | Self::VALID.bits() | Self::DIRTY.bits();
    }
}

pub struct TagArray {
    ways: usize,
    entries: Vec<TagEntry>,
}

impl TagArray {
    pub fn new(p: &CacheParams) -> Self {
        TagArray { ways: p.assoc, entries: vec![TagEntry::default(); p.num_lines] }
    }

    /// all ways of one set
    pub fn read(&self, index: usize) -> &[TagEntry] {
        &self.entries[index * self.ways..(index + 1) * self.ways]
    }

    pub fn write(&mut self, index: usize, way: usize, value: TagEntry, fields: TagFields) {
        let e = &mut self.entries[index * self.ways + way];
        if fields.contains(TagFields::TAG) { e.tag = value.tag; }
        if fields.contains(TagFields::VALID) { e.valid = value.valid; }
        if fields.contains(TagFields::DIRTY) { e.dirty = value.dirty; }
    }
}

pub struct DataArray {
    ways: usize,
    line_bytes: usize,
    data: Vec<u8>,
}

impl DataArray {
    pub fn new(p: &CacheParams) -> Self {
        DataArray { ways: p.assoc, line_bytes: p.line_bytes, data: vec![0; p.num_lines * p.line_bytes] }
    }

    fn base(&self, index: usize, way: usize) -> usize {
        (index * self.ways + way) * self.line_bytes
    }

    pub fn read(&self, index: usize, way: usize) -> &[u8] {
        let b = self.base(index, way);
        &self.data[b..b + self.line_bytes]
    }

    /// write the bytes of `src` whose enable bit is set
    pub fn write(&mut self, index: usize, way: usize, src: &[u8], be: ByteEnable) {
        let b = self.base(index, way);
        for (i, byte) in src.iter().enumerate().take(self.line_bytes) {
            if be >> i & 1 == 1 {
                self.data[b + i] = *byte;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{CacheConfig, CacheParams};

    fn params() -> CacheParams {
        CacheParams::new(&CacheConfig { cache_size: 256, cache_assoc: 2, ..Default::default() }).unwrap()
    }

    #[test]
    fn tag_write_respects_field_enables() {
        let mut tags = TagArray::new(&params());
        tags.write(1, 1, TagEntry { tag: 0x42, valid: true, dirty: true }, TagFields::ALL);
        tags.write(1, 1, TagEntry { tag: 0, valid: false, dirty: false }, TagFields::DIRTY);
        assert_eq!(tags.read(1)[1], TagEntry { tag: 0x42, valid: true, dirty: false });
        assert_eq!(tags.read(1)[0], TagEntry::default());
        assert_eq!(tags.read(0).len(), 2);
    }

    #[test]
    fn data_write_touches_enabled_bytes_only() {
        let p = params();
        let mut data = DataArray::new(&p);
        data.write(3, 0, &vec![0xff; p.line_bytes], u64::MAX);
        data.write(3, 0, &vec![0x00; p.line_bytes], 0b0110);
        assert_eq!(&data.read(3, 0)[..4], &[0xff, 0x00, 0x00, 0xff]);
        assert!(data.read(3, 1).iter().all(|b| *b == 0));
    }
}
