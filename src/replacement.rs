use crate::params::{CacheParams, PolicyKind};

/// Victim selection for one cache. The controller fills cold ways on its own
/// and asks the policy only when every way of the set is valid.
pub trait ReplacementPolicy: Send {
    fn select_victim(&mut self, set: usize, valid: &[bool]) -> usize;
    /// called on every hit and every refill
    fn touch(&mut self, set: usize, way: usize);
}

pub fn build(p: &CacheParams) -> Box<dyn ReplacementPolicy> {
    match p.policy {
        PolicyKind::RoundRobin => Box::new(RoundRobin::new(p.num_sets, p.assoc)),
        PolicyKind::Lru => Box::new(Lru::new(p.num_sets, p.assoc)),
    }
}

// round robin

pub struct RoundRobin {
    ways: usize,
    ptr: Vec<usize>,
}

impl RoundRobin {
    pub fn new(sets: usize, ways: usize) -> Self {
        RoundRobin { ways, ptr: vec![0; sets] }
    }
}

impl ReplacementPolicy for RoundRobin {
    fn select_victim(&mut self, set: usize, _valid: &[bool]) -> usize {
        self.ptr[set]
    }
    fn touch(&mut self, set: usize, _way: usize) {
        self.ptr[set] = (self.ptr[set] + 1) % self.ways;
    }
}

// least recently used

pub struct Lru {
    // per set, least recently used first
    order: Vec<Vec<usize>>,
}

impl Lru {
    pub fn new(sets: usize, ways: usize) -> Self {
        Lru { order: (0..sets).map(|_| (0..ways).collect()).collect() }
    }
}

impl ReplacementPolicy for Lru {
    fn select_victim(&mut self, set: usize, _valid: &[bool]) -> usize {
        self.order[set][0]
    }
    fn touch(&mut self, set: usize, way: usize) {
        let order = &mut self.order[set];
        order.retain(|&w| w != way);
        order.push(way);
    }
}
