//! Event-driven rendition of the single-cache system: a processor replaying a
//! request stream, the cache controller and main memory, each an asynchronix
//! model, advanced one simulated second per cycle.

mod cache;
mod memory;
mod processor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use asynchronix::simulation::{Mailbox, SimInit};
use asynchronix::time::MonotonicTime;
use log::info;

pub use cache::CacheModel;
pub use memory::MemoryModel;
pub use processor::Processor;

use crate::commons::{CpuReq, CpuResp};
use crate::ctrl::CacheStats;
use crate::memory::MainMemory;
use crate::params::CacheParams;

const WINDOW: usize = 8;

/// First error raised inside a model; the driver stops on it.
#[derive(Clone, Default)]
pub struct Shared {
    failure: Arc<Mutex<Option<anyhow::Error>>>,
}

impl Shared {
    pub fn fail(&self, e: anyhow::Error) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(e);
        }
    }
    fn take(&self) -> Option<anyhow::Error> {
        self.failure.lock().ok().and_then(|mut slot| slot.take())
    }
}

#[derive(Debug)]
pub struct SimReport {
    pub responses: Vec<CpuResp>,
    pub stats: CacheStats,
    pub cycles: u64,
}

pub fn simulate(params: CacheParams, reqs: Vec<CpuReq>, mem_latency: u64, max_cycles: u64) -> Result<SimReport> {
    let shared = Shared::default();
    let done = Arc::new(AtomicBool::new(false));
    let resps = Arc::new(Mutex::new(Vec::new()));
    let stats = Arc::new(Mutex::new(CacheStats::default()));

    // create models
    let mut processor = Processor::new(reqs, WINDOW, resps.clone(), done.clone());
    let mem = MainMemory::new(params.line_bytes, mem_latency);
    let mut memory = MemoryModel::new(mem, shared.clone());
    let mut cache = CacheModel::new(params, stats.clone(), shared.clone());

    // mailboxes and addresses
    let proc_mbox = Mailbox::<Processor>::new();
    let cache_mbox = Mailbox::<CacheModel>::new();
    let mem_mbox = Mailbox::<MemoryModel>::new();
    let proc_addr = proc_mbox.address();
    let cache_addr = cache_mbox.address();
    let mem_addr = mem_mbox.address();

    // connect models
    processor.o_cache_req.connect(CacheModel::on_cpu_req, &cache_mbox);
    cache.o_cpu_resp.connect(Processor::on_cache_resp, &proc_mbox);
    cache.o_mem_req.connect(MemoryModel::on_mem_req, &mem_mbox);
    memory.o_mem_resp.connect(CacheModel::on_mem_resp, &cache_mbox);

    let mut sim = SimInit::new()
        .add_model(processor, proc_mbox)
        .add_model(cache, cache_mbox)
        .add_model(memory, mem_mbox)
        .init(MonotonicTime::EPOCH);

    // run simulation
    for _ in 0..max_cycles {
        if done.load(Ordering::Relaxed) {
            break;
        }

        // tick: memory responses first, then the controller, then new requests
        sim.send_event(MemoryModel::on_tick, (), &mem_addr);
        sim.send_event(CacheModel::on_tick, (), &cache_addr);
        sim.send_event(Processor::on_tick, (), &proc_addr);

        sim.step_by(Duration::from_secs(1));

        // post-tick
        sim.send_event(MemoryModel::on_post_tick, (), &mem_addr);
        sim.send_event(CacheModel::on_post_tick, (), &cache_addr);
        sim.send_event(Processor::on_post_tick, (), &proc_addr);

        if let Some(e) = shared.take() {
            return Err(e.context(format!("simulation stopped at cycle {}", sim.time().as_secs())));
        }
    }
    let cycles = sim.time().as_secs() as u64;
    if !done.load(Ordering::Relaxed) {
        bail!("requests still outstanding after {} cycles", max_cycles);
    }
    info!("finished simulation in {} cycles", cycles);

    let responses = match resps.lock() {
        Ok(mut r) => std::mem::take(&mut *r),
        Err(_) => bail!("response log poisoned"),
    };
    let stats = match stats.lock() {
        Ok(s) => s.clone(),
        Err(_) => bail!("stats poisoned"),
    };
    Ok(SimReport { responses, stats, cycles })
}
