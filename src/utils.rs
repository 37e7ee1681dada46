use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use crate::commons::{CpuReq, Opcode};

fn parse_num(s: &str) -> Result<u64> {
    let v = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    };
    v.with_context(|| format!("bad number `{s}`"))
}

/// Parse a request trace. One request per line, `<op> <addr> [data] [len]`,
/// numbers in decimal or `0x` hex; `#` starts a comment. Requests are tagged
/// with their position in the trace.
pub fn parse_trace(text: &str) -> Result<Vec<CpuReq>> {
    let mut reqs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let parsed = (|| -> Result<CpuReq> {
            let op = parts.next().ok_or_else(|| anyhow!("missing opcode"))?;
            let op = op.parse::<Opcode>().map_err(|e| anyhow!(e))?;
            let addr = parts.next().ok_or_else(|| anyhow!("missing address"))?;
            let addr = u32::try_from(parse_num(addr)?).context("address wider than 32 bits")?;
            let data = parts.next().map(parse_num).transpose()?.unwrap_or(0);
            let len = parts.next().map(parse_num).transpose()?.unwrap_or(0);
            if parts.next().is_some() {
                bail!("trailing fields");
            }
            let len = u32::try_from(len).context("length wider than 32 bits")?;
            Ok(CpuReq { op, opaque: reqs.len() as u32, addr, len, data })
        })();
        reqs.push(parsed.with_context(|| format!("line {}: `{}`", lineno + 1, line))?);
    }
    Ok(reqs)
}

pub fn read_trace(path: impl AsRef<Path>) -> Result<Vec<CpuReq>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading trace {}", path.display()))?;
    let reqs = parse_trace(&text).with_context(|| format!("parsing trace {}", path.display()))?;
    info!("read {} requests from {}", reqs.len(), path.display());
    Ok(reqs)
}

/// Write `count` words `stride` bytes apart starting at `base`, then read
/// them back in the same order.
pub fn strided(count: usize, base: u32, stride: u32) -> Vec<CpuReq> {
    let addrs = (0..count as u32).map(|i| base.wrapping_add(i.wrapping_mul(stride)));
    let writes = addrs.clone().enumerate().map(|(i, a)| CpuReq::write(i as u32, a, i as u64 + 1));
    let reads = addrs.enumerate().map(|(i, a)| CpuReq::read((count + i) as u32, a));
    writes.chain(reads).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::AmoOp;

    #[test]
    fn parses_mnemonics_numbers_and_comments() {
        let text = "\
# warm up
wr 0x40 0x1234
rd 64
amoadd 0x40 3 4   # word sized
invall 0
";
        let reqs = parse_trace(text).unwrap();
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[0], CpuReq::write(0, 0x40, 0x1234));
        assert_eq!(reqs[1], CpuReq::read(1, 0x40));
        assert_eq!(reqs[2], CpuReq::amo(AmoOp::Add, 2, 0x40, 3).with_len(4));
        assert_eq!(reqs[3].op, Opcode::InvalidateAll);
    }

    #[test]
    fn reports_the_bad_line() {
        let err = parse_trace("rd 0\nld 4\n").unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
        assert!(parse_trace("rd 0x100000000").is_err());
        assert!(parse_trace("rd 0 1 2 3").is_err());
        let err = parse_trace("wr 0 1 0x100000004").unwrap_err();
        assert!(format!("{err:#}").contains("length wider than 32 bits"));
    }

    #[test]
    fn strided_writes_then_reads() {
        let reqs = strided(3, 0x100, 0x20);
        assert_eq!(reqs.len(), 6);
        assert_eq!(reqs[2], CpuReq::write(2, 0x140, 3));
        assert_eq!(reqs[3], CpuReq::read(3, 0x100));
    }
}
