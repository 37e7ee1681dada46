//! Cycle-level model of a set-associative, write-back, non-blocking data
//! cache controller sitting between one CPU-side requester and a
//! line-granular main memory.

pub mod arrays;
pub mod commons;
pub mod ctrl;
pub mod datapath;
pub mod delayed_q;
pub mod memory;
pub mod models;
pub mod mshr;
pub mod params;
pub mod replacement;
pub mod system;
pub mod utils;

pub use commons::*;
pub use ctrl::{CacheCtrl, CacheStats, ReqState};
pub use memory::MainMemory;
pub use params::{CacheConfig, CacheParams, PolicyKind};
pub use system::System;
