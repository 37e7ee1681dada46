use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use asynchronix::model::{Model, Output};
use log::debug;

use crate::commons::{CpuReq, CpuResp};

/// Replays a request stream into the cache, keeping at most `window`
/// requests outstanding.
pub struct Processor {
    pub o_cache_req: Output<CpuReq>,
    reqs: VecDeque<CpuReq>,
    window: usize,
    outstanding: usize,
    resps: Arc<Mutex<Vec<CpuResp>>>,
    done: Arc<AtomicBool>,
}

impl Processor {
    pub fn new(reqs: Vec<CpuReq>, window: usize, resps: Arc<Mutex<Vec<CpuResp>>>, done: Arc<AtomicBool>) -> Self {
        Processor {
            o_cache_req: Output::new(),
            reqs: reqs.into(),
            window: window.max(1),
            outstanding: 0,
            resps,
            done,
        }
    }

    pub async fn on_tick(&mut self, _: ()) {
        if self.outstanding >= self.window {
            return;
        }
        if let Some(req) = self.reqs.pop_front() {
            debug!("issuing req {:#x} {:?} @ {:#010x}", req.opaque, req.op, req.addr);
            self.outstanding += 1;
            self.o_cache_req.send(req).await;
        }
    }

    pub async fn on_post_tick(&mut self, _: ()) {
        if self.reqs.is_empty() && self.outstanding == 0 {
            self.done.store(true, Ordering::Relaxed);
        }
    }

    pub async fn on_cache_resp(&mut self, resp: CpuResp) {
        debug!("resp {:#x} {:?} hit={} data={:#x}", resp.opaque, resp.status, resp.hit, resp.data);
        self.outstanding = self.outstanding.saturating_sub(1);
        if let Ok(mut resps) = self.resps.lock() {
            resps.push(resp);
        }
    }
}

impl Model for Processor {}
