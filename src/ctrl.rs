/*
    The cache control pipeline.

    One call of `tick` is one cycle. Within a cycle the stages are evaluated
    back to front so that a younger request always observes the array and
    MSHR updates of the older requests ahead of it:

        memory response port  (refill or writeback ack, one per cycle)
        M2                    Access, RespondAndIdle
        M1                    TagCheck, AllocateMiss
        M0 -> M1 hand-off     MSHR consult, Stalled requests are parked
        background sweep      FlushAll / InvalidateAll
        fetch into M0         replay queue first, then the CPU input latch
 */

use std::collections::VecDeque;
use std::fmt;

use log::{debug, trace, warn};

use crate::arrays::{DataArray, TagArray, TagEntry, TagFields};
use crate::commons::*;
use crate::datapath;
use crate::mshr::{EntryId, MissKind, MissPhase, MissTable, Mshr, MshrEntry, MshrError, Victim};
use crate::params::CacheParams;
use crate::replacement::{self, ReplacementPolicy};

/// Where a request is in its traversal of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReqState {
    Idle,
    TagCheck,
    Stalled,
    StallStructural,
    AllocateMiss,
    Writeback,
    RequestRefill,
    Refill,
    Access,
    RespondAndIdle,
}

fn transition(req: &CpuReq, from: ReqState, to: ReqState) {
    trace!("req {:#x} {:?} @ {:#010x}: {:?} -> {:?}", req.opaque, req.op, req.addr, from, to);
}

// M0/M1 occupant
struct Txn {
    req: CpuReq,
    state: ReqState,
    replayed: bool,
}

// M2 occupant
enum M2 {
    Access { req: CpuReq, index: usize, way: usize, hit: bool },
    Respond(CpuResp),
}

// result of a TagCheck in M1
enum Outcome {
    Next(M2),
    Parked,
    Allocated,
    Stall,
}

enum Mode {
    Normal,
    Draining(CpuReq),
    Sweeping { req: CpuReq, slot: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub cycles: u64,
    pub hits: u64,
    pub misses: u64,
    pub refills: u64,
    pub writebacks: u64,
    pub parked: u64,
    pub structural_stalls: u64,
    pub errors: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let accesses = self.hits + self.misses;
        let rate = if accesses == 0 { 0.0 } else { self.hits as f64 / accesses as f64 * 100.0 };
        writeln!(f, "cycles              {}", self.cycles)?;
        writeln!(f, "hits / misses       {} / {} ({rate:.1}% hit rate)", self.hits, self.misses)?;
        writeln!(f, "refills             {}", self.refills)?;
        writeln!(f, "writebacks          {}", self.writebacks)?;
        writeln!(f, "parked on MSHR      {}", self.parked)?;
        writeln!(f, "structural stalls   {}", self.structural_stalls)?;
        write!(f, "error responses     {}", self.errors)
    }
}

pub struct CacheCtrl<M: MissTable = Mshr> {
    params: CacheParams,
    tags: TagArray,
    data: DataArray,
    policy: Box<dyn ReplacementPolicy>,
    mshr: M,

    cpu_req: Option<CpuReq>,    // input latch, held until M0 takes it
    replay: VecDeque<CpuReq>,
    m0: Option<Txn>,
    m1: Option<Txn>,
    m2: Option<M2>,
    mode: Mode,
    woken: bool,                // an MSHR entry retired this cycle

    cpu_resps: VecDeque<CpuResp>,
    mem_reqs: VecDeque<MemReq>,
    mem_resps: VecDeque<MemResp>,
    stats: CacheStats,
}

impl CacheCtrl<Mshr> {
    pub fn new(params: CacheParams) -> Self {
        let policy = replacement::build(&params);
        let mshr = Mshr::new(params.mshr_entries);
        Self::with_parts(params, policy, mshr)
    }
}

impl<M: MissTable> CacheCtrl<M> {
    pub fn with_parts(params: CacheParams, policy: Box<dyn ReplacementPolicy>, mshr: M) -> Self {
        CacheCtrl {
            tags: TagArray::new(&params),
            data: DataArray::new(&params),
            params,
            policy,
            mshr,
            cpu_req: None,
            replay: VecDeque::new(),
            m0: None,
            m1: None,
            m2: None,
            mode: Mode::Normal,
            woken: false,
            cpu_resps: VecDeque::new(),
            mem_reqs: VecDeque::new(),
            mem_resps: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    // ports

    pub fn cpu_req_ready(&self) -> bool {
        self.cpu_req.is_none()
    }
    /// Hands the request back when the input latch is still occupied. Opaque
    /// bits beyond the configured width are dropped.
    pub fn send_cpu_req(&mut self, mut req: CpuReq) -> Result<(), CpuReq> {
        if self.cpu_req.is_some() {
            return Err(req);
        }
        req.opaque &= datapath::mask(self.params.opaque_bits) as u32;
        self.cpu_req = Some(req);
        Ok(())
    }
    pub fn recv_cpu_resp(&mut self) -> Option<CpuResp> {
        self.cpu_resps.pop_front()
    }
    pub fn recv_mem_req(&mut self) -> Option<MemReq> {
        self.mem_reqs.pop_front()
    }
    pub fn send_mem_resp(&mut self, resp: MemResp) {
        self.mem_resps.push_back(resp);
    }

    // inspection

    pub fn params(&self) -> &CacheParams {
        &self.params
    }
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
    pub fn mshr(&self) -> &M {
        &self.mshr
    }
    /// tag state of the line holding `addr`, if it is present
    pub fn probe(&self, addr: u32) -> Option<TagEntry> {
        let d = datapath::decode(&self.params, addr);
        self.tags.read(d.index).iter().copied().find(|e| datapath::tag_match(e, d.tag))
    }
    pub fn is_idle(&self) -> bool {
        self.cpu_req.is_none()
            && self.m0.is_none()
            && self.m1.is_none()
            && self.m2.is_none()
            && self.replay.is_empty()
            && self.mshr.is_empty()
            && self.mem_resps.is_empty()
            && matches!(self.mode, Mode::Normal)
    }

    pub fn tick(&mut self) -> Result<(), Fault> {
        self.stats.cycles += 1;
        self.service_mem_resp()?;
        self.stage_m2();
        self.stage_m1()?;
        self.handoff_m0();
        self.sweep_step()?;
        self.fetch();
        self.woken = false;
        Ok(())
    }

    // helper functions

    fn issue(&mut self, op: MemOpcode, id: EntryId, addr: u32, data: Vec<u8>) {
        match op {
            MemOpcode::Read => debug!("refill {:#010x} (mshr {})", addr, id),
            MemOpcode::Write => {
                self.stats.writebacks += 1;
                debug!("writeback {:#010x} (mshr {})", addr, id);
            }
        }
        self.mem_reqs.push_back(MemReq { op, opaque: id as u32, addr, data });
    }

    fn alloc(&mut self, entry: MshrEntry) -> Result<EntryId, Fault> {
        let line = entry.line;
        match self.mshr.allocate(entry) {
            Ok(id) => {
                debug!("mshr {} allocated for {:#010x} ({}/{} in use)", id, line, self.mshr.len(), self.mshr.capacity());
                Ok(id)
            }
            Err(MshrError::Duplicate(line)) => Err(Fault::DuplicateMiss { line }),
            Err(MshrError::Full) => Err(Fault::MshrOverflow),
        }
    }

    fn retire(&mut self, id: EntryId) -> Result<MshrEntry, Fault> {
        let entry = self.mshr.retire(id).ok_or(Fault::UnknownEntry { opaque: id as u32 })?;
        debug!("mshr {} retired for {:#010x}, {} parked", id, entry.line, entry.waiters.len());
        self.woken = true;
        Ok(entry)
    }

    fn park(&mut self, id: EntryId, req: CpuReq) {
        transition(&req, ReqState::TagCheck, ReqState::Stalled);
        self.stats.parked += 1;
        if !self.mshr.park(id, req.clone()) {
            self.replay.push_back(req);
        }
    }

    /// parked requests re-enter the pipeline in arrival order
    fn release(&mut self, waiters: VecDeque<CpuReq>) {
        for req in waiters {
            transition(&req, ReqState::Stalled, ReqState::TagCheck);
            self.replay.push_back(req);
        }
    }

    fn full_line(&self) -> datapath::ByteEnable {
        datapath::mask(self.params.line_bytes as u32)
    }

    fn write_data(&mut self, index: usize, way: usize, offset: usize, nbytes: usize, value: u64, dirty: bool) {
        let src = datapath::replicate(value, nbytes, self.params.line_bytes);
        let be = datapath::write_byte_enable(offset, nbytes);
        self.data.write(index, way, &src, be);
        if dirty {
            let e = TagEntry { dirty: true, ..Default::default() };
            self.tags.write(index, way, e, TagFields::DIRTY);
        }
    }

    /// Install `line` in a claimed way without fetching it.
    fn install(&mut self, index: usize, way: usize, line: u32) {
        let tag = datapath::decode(&self.params, line).tag;
        let zeros = vec![0; self.params.line_bytes];
        let be = self.full_line();
        self.data.write(index, way, &zeros, be);
        self.tags.write(index, way, TagEntry { tag, valid: true, dirty: false }, TagFields::ALL);
        self.policy.touch(index, way);
    }

    fn validate(&self, req: &CpuReq) -> Option<Status> {
        if let Opcode::Unknown(_) = req.op {
            return Some(Status::BadOpcode);
        }
        if !req.op.is_data_access() {
            return None;
        }
        let nbytes = datapath::access_bytes(&self.params, req.len);
        if !nbytes.is_power_of_two() || nbytes > self.params.word_bytes {
            return Some(Status::BadLength);
        }
        let offset = datapath::decode(&self.params, req.addr).offset;
        if offset + nbytes > self.params.line_bytes {
            return Some(Status::OutOfBounds);
        }
        if offset % nbytes != 0 {
            return Some(Status::Misaligned);
        }
        None
    }

    /// Access against a present line; the response carries `hit`.
    fn access(&mut self, req: &CpuReq, index: usize, way: usize, hit: bool) -> CpuResp {
        let offset = datapath::decode(&self.params, req.addr).offset;
        let nbytes = datapath::access_bytes(&self.params, req.len);
        let mut resp = CpuResp::ack(req, hit);
        match req.op {
            Opcode::Read => {
                resp.data = datapath::read_select(self.data.read(index, way), offset, nbytes);
            }
            Opcode::Write => self.write_data(index, way, offset, nbytes, req.data, true),
            // init leaves the dirty bit alone
            Opcode::Init => self.write_data(index, way, offset, nbytes, req.data, false),
            Opcode::Amo(op) => {
                let old = datapath::read_select(self.data.read(index, way), offset, nbytes);
                let new = datapath::amo(op, old, req.data, nbytes);
                self.write_data(index, way, offset, nbytes, new, true);
                resp.data = old;
            }
            _ => (),
        }
        transition(req, ReqState::Access, ReqState::RespondAndIdle);
        resp
    }

    // memory response port

    fn service_mem_resp(&mut self) -> Result<(), Fault> {
        let Some(resp) = self.mem_resps.pop_front() else {
            return Ok(());
        };
        let id = resp.opaque as EntryId;
        let (kind, phase) = match self.mshr.get(id) {
            Some(e) => (e.kind, e.phase),
            None => return Err(Fault::UnknownEntry { opaque: resp.opaque }),
        };
        match (phase, resp.op) {
            (MissPhase::Writeback, MemOpcode::Write) => match kind {
                MissKind::Fill => {
                    let params = self.params;
                    let mut line = None;
                    let mut victim_waiters = VecDeque::new();
                    if let Some(e) = self.mshr.get_mut(id) {
                        e.phase = MissPhase::Refill;
                        line = Some(e.line);
                        if let Some(req) = &e.req {
                            transition(req, ReqState::Writeback, ReqState::RequestRefill);
                        }
                        // the victim line is no longer covered, its waiters go now
                        if let Some(v) = e.victim.as_ref().map(|v| v.line) {
                            let (out, keep): (VecDeque<_>, VecDeque<_>) = e.waiters
                                .drain(..)
                                .partition(|r| datapath::line_addr(&params, r.addr) == v);
                            e.waiters = keep;
                            victim_waiters = out;
                        }
                    }
                    if let Some(line) = line {
                        self.issue(MemOpcode::Read, id, line, Vec::new());
                    }
                    self.release(victim_waiters);
                }
                MissKind::Init => {
                    let entry = self.retire(id)?;
                    self.install(entry.index, entry.way, entry.line);
                    if let Some(req) = &entry.req {
                        let resp = self.access(req, entry.index, entry.way, false);
                        self.cpu_resps.push_back(resp);
                    }
                    self.release(entry.waiters);
                }
                MissKind::Flush | MissKind::Invalidate => {
                    let entry = self.retire(id)?;
                    if let Some(req) = &entry.req {
                        transition(req, ReqState::Writeback, ReqState::RespondAndIdle);
                        self.cpu_resps.push_back(CpuResp::ack(req, true));
                    }
                    self.release(entry.waiters);
                }
                MissKind::Sweep => {
                    let entry = self.retire(id)?;
                    self.release(entry.waiters);
                }
            },
            (MissPhase::Refill, MemOpcode::Read) => {
                let entry = self.retire(id)?;
                self.refill(entry, &resp.data);
            }
            (_, op) => return Err(Fault::UnexpectedResponse { opaque: resp.opaque, op }),
        }
        Ok(())
    }

    fn refill(&mut self, entry: MshrEntry, line_data: &[u8]) {
        let MshrEntry { line, index, way, req, waiters, .. } = entry;
        let tag = datapath::decode(&self.params, line).tag;
        let be = self.full_line();
        self.data.write(index, way, line_data, be);
        self.tags.write(index, way, TagEntry { tag, valid: true, dirty: false }, TagFields::ALL);
        self.policy.touch(index, way);
        self.stats.refills += 1;
        if let Some(req) = req {
            transition(&req, ReqState::RequestRefill, ReqState::Refill);
            transition(&req, ReqState::Refill, ReqState::Access);
            let resp = self.access(&req, index, way, false);
            self.cpu_resps.push_back(resp);
        }
        self.release(waiters);
    }

    // M2

    fn stage_m2(&mut self) {
        let resp = match self.m2.take() {
            None => return,
            Some(M2::Access { req, index, way, hit }) => self.access(&req, index, way, hit),
            Some(M2::Respond(resp)) => resp,
        };
        self.cpu_resps.push_back(resp);
    }

    // M1

    fn stage_m1(&mut self) -> Result<(), Fault> {
        let (req, state) = match &self.m1 {
            Some(txn) => (txn.req.clone(), txn.state),
            None => return Ok(()),
        };
        if state == ReqState::StallStructural && !self.woken {
            self.stats.structural_stalls += 1;
            return Ok(());
        }
        match self.tag_check(&req)? {
            Outcome::Next(next) => {
                self.m1 = None;
                self.m2 = Some(next);
            }
            Outcome::Parked | Outcome::Allocated => self.m1 = None,
            Outcome::Stall => {
                self.stats.structural_stalls += 1;
                if let Some(txn) = self.m1.as_mut() {
                    if txn.state != ReqState::StallStructural {
                        transition(&txn.req, txn.state, ReqState::StallStructural);
                        txn.state = ReqState::StallStructural;
                    }
                }
            }
        }
        Ok(())
    }

    fn tag_check(&mut self, req: &CpuReq) -> Result<Outcome, Fault> {
        if self.params.blocking() && !self.mshr.is_empty() {
            return Ok(Outcome::Stall);
        }
        if let Some(status) = self.validate(req) {
            warn!("rejecting req {:#x} {:?} @ {:#010x} len {}: {:?}", req.opaque, req.op, req.addr, req.len, status);
            self.stats.errors += 1;
            return Ok(Outcome::Next(M2::Respond(CpuResp::error(req, status))));
        }

        let d = datapath::decode(&self.params, req.addr);
        let line = datapath::line_addr(&self.params, req.addr);
        if let Some(id) = self.mshr.lookup(line) {
            self.park(id, req.clone());
            return Ok(Outcome::Parked);
        }

        let set = self.tags.read(d.index).to_vec();
        let mut hits = set.iter().enumerate().filter(|(_, e)| datapath::tag_match(e, d.tag)).map(|(w, _)| w);
        let hit_way = hits.next();
        if hits.next().is_some() {
            return Err(Fault::DuplicateTag { index: d.index, tag: d.tag });
        }

        match (req.op, hit_way) {
            (Opcode::FlushLine, Some(way)) if set[way].dirty => {
                if self.mshr.is_full() {
                    return Ok(Outcome::Stall);
                }
                self.tags.write(d.index, way, TagEntry::default(), TagFields::DIRTY);
                self.writeback_line(MissKind::Flush, req, line, d.index, way)?;
                Ok(Outcome::Allocated)
            }
            (Opcode::InvalidateLine, Some(way)) if set[way].dirty => {
                if self.mshr.is_full() {
                    return Ok(Outcome::Stall);
                }
                self.tags.write(d.index, way, TagEntry::default(), TagFields::VALID | TagFields::DIRTY);
                self.writeback_line(MissKind::Invalidate, req, line, d.index, way)?;
                Ok(Outcome::Allocated)
            }
            (Opcode::InvalidateLine, Some(way)) => {
                self.tags.write(d.index, way, TagEntry::default(), TagFields::VALID);
                Ok(Outcome::Next(M2::Respond(CpuResp::ack(req, true))))
            }
            (Opcode::FlushLine | Opcode::InvalidateLine, hit) => {
                Ok(Outcome::Next(M2::Respond(CpuResp::ack(req, hit.is_some()))))
            }
            (op, Some(way)) if op.is_data_access() => {
                self.policy.touch(d.index, way);
                self.stats.hits += 1;
                transition(req, ReqState::TagCheck, ReqState::Access);
                Ok(Outcome::Next(M2::Access { req: req.clone(), index: d.index, way, hit: true }))
            }
            (op, None) if op.is_data_access() => self.allocate_miss(req, d.index, line, &set),
            _ => Ok(Outcome::Next(M2::Respond(CpuResp::ack(req, hit_way.is_some())))),
        }
    }

    // FlushLine / InvalidateLine of a dirty line
    fn writeback_line(&mut self, kind: MissKind, req: &CpuReq, line: u32, index: usize, way: usize) -> Result<(), Fault> {
        let data = self.data.read(index, way).to_vec();
        let victim = Victim { line, data: data.clone() };
        let id = self.alloc(MshrEntry::new(kind, line, index, way).replay(req.clone()).writeback(victim))?;
        transition(req, ReqState::TagCheck, ReqState::Writeback);
        self.issue(MemOpcode::Write, id, line, data);
        Ok(())
    }

    fn allocate_miss(&mut self, req: &CpuReq, index: usize, line: u32, set: &[TagEntry]) -> Result<Outcome, Fault> {
        // cold ways first, the policy only decides among valid lines
        let cold = (0..set.len()).find(|&w| !set[w].valid && !self.mshr.way_reserved(index, w));
        let way = match cold {
            Some(w) => w,
            None => {
                let valid: Vec<bool> = set.iter().map(|e| e.valid).collect();
                let w = self.policy.select_victim(index, &valid);
                if self.mshr.way_reserved(index, w) {
                    return Ok(Outcome::Stall);
                }
                w
            }
        };
        let old = set[way];
        let dirty_victim = old.valid && old.dirty;
        let needs_entry = req.op != Opcode::Init || dirty_victim;
        if needs_entry && self.mshr.is_full() {
            return Ok(Outcome::Stall);
        }

        transition(req, ReqState::TagCheck, ReqState::AllocateMiss);
        self.stats.misses += 1;
        let victim = if dirty_victim {
            let victim_line = datapath::compose(&self.params, old.tag, index);
            Some(Victim { line: victim_line, data: self.data.read(index, way).to_vec() })
        } else {
            None
        };
        if old.valid {
            debug!("evicting {:#010x} from set {} way {}{}",
                datapath::compose(&self.params, old.tag, index), index, way,
                if old.dirty { " (dirty)" } else { "" });
            self.tags.write(index, way, TagEntry::default(), TagFields::VALID | TagFields::DIRTY);
        }

        if !needs_entry {
            self.install(index, way, line);
            transition(req, ReqState::AllocateMiss, ReqState::Access);
            return Ok(Outcome::Next(M2::Access { req: req.clone(), index, way, hit: false }));
        }

        let kind = if req.op == Opcode::Init { MissKind::Init } else { MissKind::Fill };
        let mut entry = MshrEntry::new(kind, line, index, way).replay(req.clone());
        match victim {
            Some(v) => {
                let (addr, data) = (v.line, v.data.clone());
                entry = entry.writeback(v);
                let id = self.alloc(entry)?;
                transition(req, ReqState::AllocateMiss, ReqState::Writeback);
                self.issue(MemOpcode::Write, id, addr, data);
            }
            None => {
                let id = self.alloc(entry)?;
                transition(req, ReqState::AllocateMiss, ReqState::RequestRefill);
                self.issue(MemOpcode::Read, id, line, Vec::new());
            }
        }
        Ok(Outcome::Allocated)
    }

    // M0 -> M1

    fn handoff_m0(&mut self) {
        if self.m1.is_some() {
            return;
        }
        let Some(txn) = self.m0.take() else {
            return;
        };
        let line = datapath::line_addr(&self.params, txn.req.addr);
        if let Some(id) = self.mshr.lookup(line) {
            self.park(id, txn.req);
            return;
        }
        // older requests to this line are still waiting to replay
        if !txn.replayed && self.replay.iter().any(|r| datapath::line_addr(&self.params, r.addr) == line) {
            transition(&txn.req, ReqState::TagCheck, ReqState::Stalled);
            self.stats.parked += 1;
            self.replay.push_back(txn.req);
            return;
        }
        self.m1 = Some(txn);
    }

    // FlushAll / InvalidateAll

    fn sweep_step(&mut self) -> Result<(), Fault> {
        let drained = self.m0.is_none()
            && self.m1.is_none()
            && self.m2.is_none()
            && self.replay.is_empty()
            && self.mshr.is_empty();
        let (req, slot) = match &self.mode {
            Mode::Normal => return Ok(()),
            Mode::Draining(req) => {
                if drained {
                    debug!("sweep {:?} starts", req.op);
                    let req = req.clone();
                    self.mode = Mode::Sweeping { req, slot: 0 };
                }
                return Ok(());
            }
            Mode::Sweeping { req, slot } => (req.clone(), *slot),
        };

        if slot == self.params.num_lines {
            if self.mshr.is_empty() {
                debug!("sweep {:?} done", req.op);
                transition(&req, ReqState::Access, ReqState::RespondAndIdle);
                self.cpu_resps.push_back(CpuResp::ack(&req, false));
                self.mode = Mode::Normal;
            }
            return Ok(());
        }

        let (index, way) = (slot / self.params.assoc, slot % self.params.assoc);
        let e = self.tags.read(index)[way];
        if e.valid && e.dirty {
            if self.mshr.is_full() {
                return Ok(());
            }
            let line = datapath::compose(&self.params, e.tag, index);
            let data = self.data.read(index, way).to_vec();
            let victim = Victim { line, data: data.clone() };
            let id = self.alloc(MshrEntry::new(MissKind::Sweep, line, index, way).writeback(victim))?;
            self.issue(MemOpcode::Write, id, line, data);
        }
        if e.valid {
            let fields = if req.op == Opcode::InvalidateAll {
                TagFields::VALID | TagFields::DIRTY
            } else {
                TagFields::DIRTY
            };
            self.tags.write(index, way, TagEntry::default(), fields);
        }
        self.mode = Mode::Sweeping { req, slot: slot + 1 };
        Ok(())
    }

    // fetch

    fn fetch(&mut self) {
        if self.m0.is_some() {
            return;
        }
        if let Some(req) = self.replay.pop_front() {
            self.m0 = Some(Txn { req, state: ReqState::TagCheck, replayed: true });
            return;
        }
        if !matches!(self.mode, Mode::Normal) {
            return;
        }
        let Some(req) = self.cpu_req.take() else {
            return;
        };
        transition(&req, ReqState::Idle, ReqState::TagCheck);
        if req.op.is_sweep() {
            debug!("sweep {:?} waits for the pipeline to drain", req.op);
            self.mode = Mode::Draining(req);
        } else {
            self.m0 = Some(Txn { req, state: ReqState::TagCheck, replayed: false });
        }
    }
}
