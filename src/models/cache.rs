use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use asynchronix::model::{Model, Output};
use log::error;

use crate::commons::{CpuReq, CpuResp, MemReq, MemResp};
use crate::ctrl::{CacheCtrl, CacheStats};
use crate::params::CacheParams;

use super::Shared;

pub struct CacheModel {
    pub o_cpu_resp: Output<CpuResp>,
    pub o_mem_req: Output<MemReq>,
    ctrl: CacheCtrl,
    inbox: VecDeque<CpuReq>,
    stats: Arc<Mutex<CacheStats>>,
    shared: Shared,
    halted: bool,
}

impl CacheModel {
    pub fn new(params: CacheParams, stats: Arc<Mutex<CacheStats>>, shared: Shared) -> Self {
        CacheModel {
            o_cpu_resp: Output::new(),
            o_mem_req: Output::new(),
            ctrl: CacheCtrl::new(params),
            inbox: VecDeque::new(),
            stats,
            shared,
            halted: false,
        }
    }

    pub async fn on_cpu_req(&mut self, req: CpuReq) {
        self.inbox.push_back(req);
    }

    pub async fn on_mem_resp(&mut self, resp: MemResp) {
        self.ctrl.send_mem_resp(resp);
    }

    pub async fn on_tick(&mut self, _: ()) {
        if self.halted {
            return;
        }
        if let Some(req) = self.inbox.pop_front() {
            if let Err(req) = self.ctrl.send_cpu_req(req) {
                self.inbox.push_front(req);
            }
        }
        if let Err(fault) = self.ctrl.tick() {
            error!("cache fault: {fault}");
            self.shared.fail(fault.into());
            self.halted = true;
            return;
        }
        while let Some(req) = self.ctrl.recv_mem_req() {
            self.o_mem_req.send(req).await;
        }
        while let Some(resp) = self.ctrl.recv_cpu_resp() {
            self.o_cpu_resp.send(resp).await;
        }
    }

    pub async fn on_post_tick(&mut self, _: ()) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = self.ctrl.stats().clone();
        }
    }
}

impl Model for CacheModel {}
