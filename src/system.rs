use std::collections::VecDeque;

use anyhow::{ensure, Context, Result};
use log::info;

use crate::commons::{CpuReq, CpuResp};
use crate::ctrl::CacheCtrl;
use crate::memory::MainMemory;
use crate::params::CacheParams;

/// A cache controller wired to a fixed-latency main memory, stepped one
/// cycle at a time without an event scheduler.
pub struct System {
    pub ctrl: CacheCtrl,
    pub mem: MainMemory,
    cycle: u64,
}

impl System {
    pub fn new(params: CacheParams, mem_latency: u64) -> Self {
        System {
            mem: MainMemory::new(params.line_bytes, mem_latency),
            ctrl: CacheCtrl::new(params),
            cycle: 0,
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn step(&mut self) -> Result<()> {
        while let Some(resp) = self.mem.try_fetch() {
            self.ctrl.send_mem_resp(resp);
        }
        self.ctrl.tick().with_context(|| format!("cache fault at cycle {}", self.cycle))?;
        while let Some(req) = self.ctrl.recv_mem_req() {
            self.mem.send(req)?;
        }
        self.cycle += 1;
        self.mem.update_time(self.cycle);
        Ok(())
    }

    /// Feed `reqs` in order, one per cycle as the input latch frees up, and
    /// collect every response in completion order.
    pub fn run(&mut self, reqs: impl IntoIterator<Item = CpuReq>, max_cycles: u64) -> Result<Vec<CpuResp>> {
        let mut pending: VecDeque<CpuReq> = reqs.into_iter().collect();
        let expected = pending.len();
        let deadline = self.cycle + max_cycles;
        let mut resps = Vec::with_capacity(expected);
        while resps.len() < expected {
            ensure!(self.cycle < deadline,
                "{} of {} responses after {} cycles", resps.len(), expected, max_cycles);
            if let Some(req) = pending.pop_front() {
                if let Err(req) = self.ctrl.send_cpu_req(req) {
                    pending.push_front(req);
                }
            }
            self.step()?;
            while let Some(resp) = self.ctrl.recv_cpu_resp() {
                resps.push(resp);
            }
        }
        info!("{} requests served by cycle {}", expected, self.cycle);
        Ok(resps)
    }

    pub fn call(&mut self, req: CpuReq) -> Result<CpuResp> {
        let mut resps = self.run([req], 10_000)?;
        resps.pop().context("no response")
    }

    /// step until the controller and the memory have nothing in flight
    pub fn drain(&mut self, max_cycles: u64) -> Result<()> {
        let deadline = self.cycle + max_cycles;
        while !(self.ctrl.is_idle() && self.mem.is_idle()) {
            ensure!(self.cycle < deadline, "still busy after {} cycles", max_cycles);
            self.step()?;
        }
        Ok(())
    }
}
