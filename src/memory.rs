use std::collections::HashMap;
use std::fmt;

use log::trace;

use crate::commons::{MemOpcode, MemReq, MemResp};
use crate::delayed_q::{DelayedMsg, DelayedQ};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemError {
    Misaligned { addr: u32 },
    BadLineSize { addr: u32, len: usize },
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemError::Misaligned { addr } =>
                write!(f, "memory request address {addr:#010x} is not line aligned"),
            MemError::BadLineSize { addr, len } =>
                write!(f, "memory write to {addr:#010x} carries {len} bytes instead of a full line"),
        }
    }
}

impl std::error::Error for MemError {}

/// One served memory request, as seen by the memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemAccess {
    pub cycle: u64,
    pub op: MemOpcode,
    pub addr: u32,
}

/// Line-addressed backing store. Requests take effect when they are sent;
/// the response becomes visible `latency` cycles later.
pub struct MainMemory {
    line_bytes: usize,
    latency: u64,
    lines: HashMap<u32, Vec<u8>>,
    q: DelayedQ<MemResp>,
    log: Vec<MemAccess>,
}

impl MainMemory {
    pub fn new(line_bytes: usize, latency: u64) -> Self {
        MainMemory {
            line_bytes,
            latency: latency.max(1),
            lines: HashMap::new(),
            q: DelayedQ::new(),
            log: Vec::new(),
        }
    }

    fn line_of(&self, addr: u32) -> u32 {
        addr & !(self.line_bytes as u32 - 1)
    }

    fn line_mut(&mut self, line: u32) -> &mut Vec<u8> {
        let n = self.line_bytes;
        self.lines.entry(line).or_insert_with(|| vec![0; n])
    }

    /// serve a request immediately
    pub fn handle(&mut self, req: &MemReq) -> Result<MemResp, MemError> {
        if self.line_of(req.addr) != req.addr {
            return Err(MemError::Misaligned { addr: req.addr });
        }
        if req.op == MemOpcode::Write && req.data.len() != self.line_bytes {
            return Err(MemError::BadLineSize { addr: req.addr, len: req.data.len() });
        }
        self.log.push(MemAccess { cycle: self.q.time(), op: req.op, addr: req.addr });
        let data = match req.op {
            MemOpcode::Read => self.lines.get(&req.addr).cloned().unwrap_or_else(|| vec![0; self.line_bytes]),
            MemOpcode::Write => {
                self.line_mut(req.addr).copy_from_slice(&req.data);
                Vec::new()
            }
        };
        trace!("mem {:?} {:#010x} at cycle {}", req.op, req.addr, self.q.time());
        Ok(MemResp { op: req.op, opaque: req.opaque, data })
    }

    /// serve a request and queue its response behind the memory latency
    pub fn send(&mut self, req: MemReq) -> Result<(), MemError> {
        let resp = self.handle(&req)?;
        self.q.send(DelayedMsg { t: self.latency, msg: resp });
        Ok(())
    }

    pub fn try_fetch(&mut self) -> Option<MemResp> {
        self.q.try_fetch()
    }

    pub fn update_time(&mut self, cycle: u64) {
        self.q.update_time(cycle);
    }

    pub fn is_idle(&self) -> bool {
        self.q.is_empty()
    }

    pub fn latency(&self) -> u64 {
        self.latency
    }

    pub fn log(&self) -> &[MemAccess] {
        &self.log
    }

    pub fn count(&self, op: MemOpcode, line: u32) -> usize {
        self.log.iter().filter(|a| a.op == op && a.addr == line).count()
    }

    // backdoor access, bypasses the log and latency

    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let a = addr.wrapping_add(i as u32);
            let line = self.line_of(a);
            let off = (a - line) as usize;
            self.line_mut(line)[off] = *b;
        }
    }

    pub fn read_bytes(&self, addr: u32, n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| {
                let a = addr.wrapping_add(i as u32);
                let line = self.line_of(a);
                self.lines.get(&line).map_or(0, |l| l[(a - line) as usize])
            })
            .collect()
    }

    pub fn write_word(&mut self, addr: u32, value: u64, nbytes: usize) {
        self.write_bytes(addr, &value.to_le_bytes()[..nbytes]);
    }

    pub fn read_word(&self, addr: u32, nbytes: usize) -> u64 {
        self.read_bytes(addr, nbytes).iter().rev().fold(0, |acc, b| acc << 8 | *b as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_wait_for_the_latency() {
        let mut mem = MainMemory::new(32, 3);
        mem.write_word(0x44, 0xdead_beef, 4);
        mem.send(MemReq { op: MemOpcode::Read, opaque: 7, addr: 0x40, data: vec![] }).unwrap();
        for cycle in 1..3 {
            mem.update_time(cycle);
            assert!(mem.try_fetch().is_none());
        }
        mem.update_time(3);
        let resp = mem.try_fetch().unwrap();
        assert_eq!(resp.opaque, 7);
        assert_eq!(&resp.data[4..8], &[0xef, 0xbe, 0xad, 0xde]);
        assert!(mem.is_idle());
    }

    #[test]
    fn rejects_misaligned_and_short_requests() {
        let mut mem = MainMemory::new(32, 1);
        let req = MemReq { op: MemOpcode::Read, opaque: 0, addr: 0x44, data: vec![] };
        assert_eq!(mem.send(req), Err(MemError::Misaligned { addr: 0x44 }));
        let req = MemReq { op: MemOpcode::Write, opaque: 0, addr: 0x40, data: vec![1; 4] };
        assert_eq!(mem.send(req), Err(MemError::BadLineSize { addr: 0x40, len: 4 }));
        assert!(mem.log().is_empty());
    }

    #[test]
    fn writes_land_in_the_store() {
        let mut mem = MainMemory::new(32, 1);
        let mut line = vec![0u8; 32];
        line[8] = 0x5a;
        mem.send(MemReq { op: MemOpcode::Write, opaque: 1, addr: 0x80, data: line }).unwrap();
        assert_eq!(mem.read_word(0x88, 1), 0x5a);
        assert_eq!(mem.count(MemOpcode::Write, 0x80), 1);
    }
}
