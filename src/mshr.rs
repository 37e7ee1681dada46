use std::collections::VecDeque;

use crate::commons::CpuReq;

pub type EntryId = usize;

/// What the entry is servicing, which decides what its memory responses do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissKind {
    Fill,       // read/write/AMO miss: refill then replay
    Init,       // init miss over a dirty victim: writeback then install
    Flush,      // FlushLine of a dirty line
    Invalidate, // InvalidateLine of a dirty line
    Sweep,      // one dirty line of a FlushAll/InvalidateAll
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissPhase {
    Writeback,
    Refill,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Victim {
    pub line: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MshrEntry {
    pub line: u32,
    pub index: usize,
    pub way: usize,
    pub kind: MissKind,
    pub phase: MissPhase,
    pub req: Option<CpuReq>,
    pub victim: Option<Victim>,
    pub waiters: VecDeque<CpuReq>,
}

impl MshrEntry {
    pub fn new(kind: MissKind, line: u32, index: usize, way: usize) -> Self {
        MshrEntry {
            line,
            index,
            way,
            kind,
            phase: MissPhase::Refill,
            req: None,
            victim: None,
            waiters: VecDeque::new(),
        }
    }
    pub fn replay(mut self, req: CpuReq) -> Self {
        self.req = Some(req);
        self
    }
    /// a writeback must complete before anything else happens for this entry
    pub fn writeback(mut self, victim: Victim) -> Self {
        self.victim = Some(victim);
        self.phase = MissPhase::Writeback;
        self
    }

    /// Does this entry hold up requests to `line`? The victim line counts
    /// until its writeback has been acknowledged.
    pub fn covers(&self, line: u32) -> bool {
        self.line == line
            || (self.phase == MissPhase::Writeback
                && self.victim.as_ref().map_or(false, |v| v.line == line))
    }

    /// entries that claimed a way for a line not yet installed
    pub fn reserves_way(&self) -> bool {
        matches!(self.kind, MissKind::Fill | MissKind::Init)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MshrError {
    Full,
    Duplicate(u32),
}

/// Outstanding-miss bookkeeping, used only by the control pipeline.
pub trait MissTable: Send {
    fn capacity(&self) -> usize;
    fn len(&self) -> usize;
    fn allocate(&mut self, entry: MshrEntry) -> Result<EntryId, MshrError>;
    fn lookup(&self, line: u32) -> Option<EntryId>;
    fn get(&self, id: EntryId) -> Option<&MshrEntry>;
    fn get_mut(&mut self, id: EntryId) -> Option<&mut MshrEntry>;
    /// free the slot and hand back the entry with its replay data
    fn retire(&mut self, id: EntryId) -> Option<MshrEntry>;
    fn way_reserved(&self, index: usize, way: usize) -> bool;

    fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// hold `req` until entry `id` retires
    fn park(&mut self, id: EntryId, req: CpuReq) -> bool {
        match self.get_mut(id) {
            Some(e) => {
                e.waiters.push_back(req);
                true
            }
            None => false,
        }
    }
}

/// Fixed number of slots; the slot number is the entry id and doubles as the
/// opaque field of memory requests.
pub struct Mshr {
    slots: Vec<Option<MshrEntry>>,
}

impl Mshr {
    pub fn new(entries: usize) -> Self {
        Mshr { slots: vec![None; entries] }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &MshrEntry)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
    }
}

impl MissTable for Mshr {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
    fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
    fn allocate(&mut self, entry: MshrEntry) -> Result<EntryId, MshrError> {
        if self.lookup(entry.line).is_some() {
            return Err(MshrError::Duplicate(entry.line));
        }
        let id = self.slots.iter().position(|s| s.is_none()).ok_or(MshrError::Full)?;
        self.slots[id] = Some(entry);
        Ok(id)
    }
    fn lookup(&self, line: u32) -> Option<EntryId> {
        self.iter().find(|(_, e)| e.covers(line)).map(|(i, _)| i)
    }
    fn get(&self, id: EntryId) -> Option<&MshrEntry> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }
    fn get_mut(&mut self, id: EntryId) -> Option<&mut MshrEntry> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }
    fn retire(&mut self, id: EntryId) -> Option<MshrEntry> {
        self.slots.get_mut(id).and_then(|s| s.take())
    }
    fn way_reserved(&self, index: usize, way: usize) -> bool {
        self.iter().any(|(_, e)| e.reserves_way() && e.index == index && e.way == way)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_full() {
        let mut mshr = Mshr::new(2);
        let a = mshr.allocate(MshrEntry::new(MissKind::Fill, 0x100, 0, 0)).unwrap();
        let b = mshr.allocate(MshrEntry::new(MissKind::Fill, 0x200, 0, 1)).unwrap();
        assert_ne!(a, b);
        assert!(mshr.is_full());
        let full = mshr.allocate(MshrEntry::new(MissKind::Fill, 0x300, 0, 0));
        assert_eq!(full.unwrap_err(), MshrError::Full);
        assert!(mshr.retire(a).is_some());
        assert!(mshr.retire(a).is_none());
        assert_eq!(mshr.len(), 1);
    }

    #[test]
    fn one_entry_per_line() {
        let mut mshr = Mshr::new(4);
        mshr.allocate(MshrEntry::new(MissKind::Fill, 0x100, 0, 0)).unwrap();
        let dup = mshr.allocate(MshrEntry::new(MissKind::Fill, 0x100, 0, 1));
        assert_eq!(dup.unwrap_err(), MshrError::Duplicate(0x100));
    }

    #[test]
    fn victim_line_matches_until_written_back() {
        let mut mshr = Mshr::new(2);
        let victim = Victim { line: 0x400, data: vec![0; 32] };
        let id = mshr
            .allocate(MshrEntry::new(MissKind::Fill, 0x800, 3, 1).writeback(victim))
            .unwrap();
        assert_eq!(mshr.lookup(0x800), Some(id));
        assert_eq!(mshr.lookup(0x400), Some(id));
        assert!(mshr.way_reserved(3, 1));
        assert!(!mshr.way_reserved(3, 0));
        mshr.get_mut(id).unwrap().phase = MissPhase::Refill;
        assert_eq!(mshr.lookup(0x400), None);
    }

    #[test]
    fn parked_requests_come_back_in_order() {
        let mut mshr = Mshr::new(1);
        let id = mshr
            .allocate(MshrEntry::new(MissKind::Fill, 0x40, 2, 0).replay(CpuReq::read(1, 0x40)))
            .unwrap();
        assert!(mshr.park(id, CpuReq::read(2, 0x44)));
        assert!(mshr.park(id, CpuReq::read(3, 0x48)));
        let e = mshr.retire(id).unwrap();
        assert_eq!(e.req.unwrap().opaque, 1);
        let order: Vec<u32> = e.waiters.iter().map(|r| r.opaque).collect();
        assert_eq!(order, vec![2, 3]);
        assert!(!mshr.park(id, CpuReq::read(4, 0x40)));
    }
}
