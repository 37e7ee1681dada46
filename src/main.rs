use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{info, warn};

use cachesim_ctrl::models;
use cachesim_ctrl::utils::{read_trace, strided};
use cachesim_ctrl::{CacheConfig, CacheParams, PolicyKind, Status, System};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Engine {
    /// step the controller and memory directly
    Direct,
    /// run the asynchronix models
    Events,
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// capacity in bytes
    #[arg(long, default_value_t = 4096)]
    cache_size: u32,

    #[arg(long, default_value_t = 2)]
    assoc: u32,

    #[arg(long, default_value_t = 32)]
    line_bytes: u32,

    /// CPU data word width
    #[arg(long, default_value_t = 32)]
    data_bits: u32,

    /// miss status holding registers, 1 makes the cache blocking
    #[arg(long, default_value_t = 1)]
    mshr: usize,

    /// rr or lru
    #[arg(long, default_value = "rr")]
    policy: PolicyKind,

    #[arg(long, default_value_t = 100)]
    mem_latency: u64,

    /// request trace; a strided write/read sweep runs when omitted
    #[arg(short, long)]
    trace: Option<PathBuf>,

    #[arg(long, default_value_t = 1_000_000)]
    max_cycles: u64,

    #[arg(long, value_enum, default_value_t = Engine::Direct)]
    engine: Engine,
}

fn main() -> Result<()> {
    // logging
    let env = Env::default()
        .filter_or("CACHESIM_LOG", "info")
        .write_style_or("CACHESIM_LOG_STYLE", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let config = CacheConfig {
        cache_size: args.cache_size,
        cache_assoc: args.assoc,
        line_bits: args.line_bytes * 8,
        data_bits: args.data_bits,
        mshr_entries: args.mshr,
        policy: args.policy,
        ..CacheConfig::default()
    };
    let params = CacheParams::new(&config)?;
    info!("{:?}", params);

    let reqs = match &args.trace {
        Some(path) => read_trace(path)?,
        None => strided(128, 0, params.line_bytes as u32),
    };

    let (resps, stats, cycles) = match args.engine {
        Engine::Direct => {
            let mut sys = System::new(params, args.mem_latency);
            let resps = sys.run(reqs, args.max_cycles)?;
            (resps, sys.ctrl.stats().clone(), sys.cycle())
        }
        Engine::Events => {
            let report = models::simulate(params, reqs, args.mem_latency, args.max_cycles)?;
            (report.responses, report.stats, report.cycles)
        }
    };

    for r in resps.iter().filter(|r| r.status != Status::Ok) {
        warn!("req {:#x} {:?} failed: {:?}", r.opaque, r.op, r.status);
    }

    // print stats
    println!("finished simulation in {} cycles", cycles);
    println!("{}", stats);
    Ok(())
}
