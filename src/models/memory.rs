use asynchronix::model::{Model, Output};

use crate::commons::{MemReq, MemResp};
use crate::memory::MainMemory;

use super::Shared;

pub struct MemoryModel {
    pub o_mem_resp: Output<MemResp>,
    mem: MainMemory,
    cycle: u64,
    shared: Shared,
}

impl MemoryModel {
    pub fn new(mem: MainMemory, shared: Shared) -> Self {
        MemoryModel { o_mem_resp: Output::new(), mem, cycle: 0, shared }
    }

    pub async fn on_mem_req(&mut self, req: MemReq) {
        if let Err(e) = self.mem.send(req) {
            self.shared.fail(e.into());
        }
    }

    // responses that came due this cycle go out before the cache ticks
    pub async fn on_tick(&mut self, _: ()) {
        while let Some(resp) = self.mem.try_fetch() {
            self.o_mem_resp.send(resp).await;
        }
    }

    pub async fn on_post_tick(&mut self, _: ()) {
        self.cycle += 1;
        self.mem.update_time(self.cycle);
    }
}

impl Model for MemoryModel {}
