use std::str::FromStr;

use anyhow::{bail, ensure, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PolicyKind {
    RoundRobin,
    Lru,
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rr" | "round-robin" => Ok(PolicyKind::RoundRobin),
            "lru" => Ok(PolicyKind::Lru),
            other => Err(format!("invalid replacement policy `{other}`")),
        }
    }
}

/// Construction-time configuration surface.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {       // unit         reasonable defaults
    pub cache_size: u32,        // bytes        4096
    pub cache_assoc: u32,       // ways         2
    pub line_bits: u32,         // bits         256
    pub addr_bits: u32,         // bits         32
    pub opaque_bits: u32,       // bits         8
    pub data_bits: u32,         // bits         32
    pub mshr_entries: usize,    // entries      1
    pub policy: PolicyKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            cache_size: 4096,
            cache_assoc: 2,
            line_bits: 256,
            addr_bits: 32,
            opaque_bits: 8,
            data_bits: 32,
            mshr_entries: 1,
            policy: PolicyKind::RoundRobin,
        }
    }
}

/// Structural constants of one cache instance, derived once from a
/// `CacheConfig` and shared read-only by every component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheParams {
    pub cache_size: u32,
    pub assoc: usize,
    pub addr_bits: u32,
    pub opaque_bits: u32,
    pub mshr_entries: usize,
    pub policy: PolicyKind,

    pub line_bytes: usize,
    pub word_bytes: usize,
    pub words_per_line: usize,
    pub num_lines: usize,
    pub num_sets: usize,

    pub offset_bits: u32,
    pub index_bits: u32,
    pub tag_bits: u32,
    pub way_bits: u32,
    pub word_sel_bits: u32,
    pub byte_sel_bits: u32,
}

fn log2(x: usize) -> u32 {
    x.trailing_zeros()
}

// bits needed to select one of `n` items
fn clog2(n: usize) -> u32 {
    if n <= 1 { 0 } else { usize::BITS - (n - 1).leading_zeros() }
}

impl CacheParams {
    pub fn new(cfg: &CacheConfig) -> Result<Self> {
        ensure!(cfg.cache_size > 0, "cache size must be non-zero");
        ensure!(cfg.cache_assoc > 0, "associativity must be non-zero");
        ensure!(cfg.mshr_entries > 0, "MSHR needs at least one entry");
        ensure!(cfg.line_bits > 0 && cfg.line_bits % 8 == 0,
            "cacheline width {} is not a whole number of bytes", cfg.line_bits);
        if ![8, 16, 32, 64].contains(&cfg.data_bits) {
            bail!("unsupported data width {} (expected 8, 16, 32 or 64)", cfg.data_bits);
        }
        ensure!(cfg.line_bits % cfg.data_bits == 0,
            "cacheline width {} is not a multiple of the data width {}", cfg.line_bits, cfg.data_bits);

        let line_bytes = (cfg.line_bits / 8) as usize;
        let word_bytes = (cfg.data_bits / 8) as usize;
        let assoc = cfg.cache_assoc as usize;
        ensure!(line_bytes.is_power_of_two(), "cacheline of {line_bytes} bytes is not a power of two");
        ensure!(line_bytes <= 64, "cacheline of {line_bytes} bytes exceeds the 64-byte byte-enable");
        ensure!(assoc.is_power_of_two(), "associativity {assoc} is not a power of two");

        let cache_size = cfg.cache_size as usize;
        ensure!(cache_size % (assoc * line_bytes) == 0,
            "cache size {cache_size} is not divisible by associativity {assoc} x line size {line_bytes}");
        let num_lines = cache_size / line_bytes;
        let num_sets = num_lines / assoc;
        ensure!(num_sets.is_power_of_two(), "{num_sets} sets is not a power of two");

        let offset_bits = log2(line_bytes);
        let index_bits = log2(num_sets);
        ensure!(cfg.addr_bits <= 32, "address width {} exceeds 32 bits", cfg.addr_bits);
        ensure!(cfg.addr_bits > offset_bits + index_bits,
            "address width {} leaves no tag bits (index {index_bits}, offset {offset_bits})", cfg.addr_bits);
        ensure!(cfg.opaque_bits <= 32, "opaque width {} exceeds 32 bits", cfg.opaque_bits);
        ensure!(cfg.mshr_entries as u64 <= 1u64 << cfg.opaque_bits,
            "{} MSHR entries do not fit a {}-bit memory opaque", cfg.mshr_entries, cfg.opaque_bits);

        let words_per_line = line_bytes / word_bytes;
        Ok(CacheParams {
            cache_size: cfg.cache_size,
            assoc,
            addr_bits: cfg.addr_bits,
            opaque_bits: cfg.opaque_bits,
            mshr_entries: cfg.mshr_entries,
            policy: cfg.policy,
            line_bytes,
            word_bytes,
            words_per_line,
            num_lines,
            num_sets,
            offset_bits,
            index_bits,
            tag_bits: cfg.addr_bits - offset_bits - index_bits,
            way_bits: clog2(assoc),
            word_sel_bits: log2(words_per_line),
            byte_sel_bits: log2(word_bytes),
        })
    }

    /// a single MSHR entry makes the whole pipeline wait on every miss
    pub fn blocking(&self) -> bool {
        self.mshr_entries == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_geometry() {
        let p = CacheParams::new(&CacheConfig::default()).unwrap();
        assert_eq!(p.line_bytes, 32);
        assert_eq!(p.num_lines, 128);
        assert_eq!(p.num_sets, 64);
        assert_eq!(p.offset_bits, 5);
        assert_eq!(p.index_bits, 6);
        assert_eq!(p.tag_bits, 21);
        assert_eq!(p.way_bits, 1);
        assert_eq!(p.words_per_line, 8);
        assert_eq!(p.word_sel_bits, 3);
        assert_eq!(p.byte_sel_bits, 2);
        assert!(p.blocking());
    }

    #[test]
    fn direct_mapped_has_no_way_bits() {
        let cfg = CacheConfig { cache_assoc: 1, mshr_entries: 4, ..Default::default() };
        let p = CacheParams::new(&cfg).unwrap();
        assert_eq!(p.way_bits, 0);
        assert_eq!(p.num_sets, 128);
        assert!(!p.blocking());
    }

    #[test]
    fn rejects_indivisible_capacity() {
        let cfg = CacheConfig { cache_size: 1000, ..Default::default() };
        let err = CacheParams::new(&cfg).unwrap_err();
        assert!(err.to_string().contains("not divisible"));
    }

    #[test]
    fn rejects_non_power_of_two_assoc() {
        let cfg = CacheConfig { cache_size: 3 * 32 * 4, cache_assoc: 3, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_err());
    }

    #[test]
    fn rejects_bad_widths() {
        let cfg = CacheConfig { data_bits: 24, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_err());
        let cfg = CacheConfig { line_bits: 1024, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_err());
        let cfg = CacheConfig { mshr_entries: 0, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_err());
        let cfg = CacheConfig { addr_bits: 11, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_err());
    }

    #[test]
    fn mshr_ids_must_fit_the_opaque_field() {
        let cfg = CacheConfig { mshr_entries: 300, opaque_bits: 8, ..Default::default() };
        let err = CacheParams::new(&cfg).unwrap_err();
        assert!(err.to_string().contains("8-bit memory opaque"));
        let cfg = CacheConfig { mshr_entries: 256, opaque_bits: 8, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_ok());
        let cfg = CacheConfig { mshr_entries: 2, opaque_bits: 0, ..Default::default() };
        assert!(CacheParams::new(&cfg).is_err());
    }

    #[test]
    fn policy_parses() {
        assert_eq!("LRU".parse::<PolicyKind>(), Ok(PolicyKind::Lru));
        assert_eq!("rr".parse::<PolicyKind>(), Ok(PolicyKind::RoundRobin));
        assert!("plru".parse::<PolicyKind>().is_err());
    }
}
