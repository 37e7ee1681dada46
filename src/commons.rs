use std::fmt;
use std::str::FromStr;

// opcodes

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmoOp {
    Add,
    And,
    Or,
    Swap,
    Min,
    Minu,
    Max,
    Maxu,
    Xor,
}

/// CPU-side request type. The discriminants follow the 4-bit type field of the
/// request message; codes this controller does not know decode to `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
    Init,
    Amo(AmoOp),
    FlushLine,
    InvalidateLine,
    FlushAll,
    InvalidateAll,
    Unknown(u8),
}

impl Opcode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Opcode::Read,
            1 => Opcode::Write,
            2 => Opcode::Init,
            3 => Opcode::Amo(AmoOp::Add),
            4 => Opcode::Amo(AmoOp::And),
            5 => Opcode::Amo(AmoOp::Or),
            6 => Opcode::Amo(AmoOp::Swap),
            7 => Opcode::Amo(AmoOp::Min),
            8 => Opcode::Amo(AmoOp::Minu),
            9 => Opcode::Amo(AmoOp::Max),
            10 => Opcode::Amo(AmoOp::Maxu),
            11 => Opcode::Amo(AmoOp::Xor),
            12 => Opcode::FlushLine,
            13 => Opcode::InvalidateLine,
            14 => Opcode::FlushAll,
            15 => Opcode::InvalidateAll,
            c => Opcode::Unknown(c),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Opcode::Read => 0,
            Opcode::Write => 1,
            Opcode::Init => 2,
            Opcode::Amo(AmoOp::Add) => 3,
            Opcode::Amo(AmoOp::And) => 4,
            Opcode::Amo(AmoOp::Or) => 5,
            Opcode::Amo(AmoOp::Swap) => 6,
            Opcode::Amo(AmoOp::Min) => 7,
            Opcode::Amo(AmoOp::Minu) => 8,
            Opcode::Amo(AmoOp::Max) => 9,
            Opcode::Amo(AmoOp::Maxu) => 10,
            Opcode::Amo(AmoOp::Xor) => 11,
            Opcode::FlushLine => 12,
            Opcode::InvalidateLine => 13,
            Opcode::FlushAll => 14,
            Opcode::InvalidateAll => 15,
            Opcode::Unknown(c) => *c,
        }
    }

    /// whole-cache maintenance, run in the background sweep
    pub fn is_sweep(&self) -> bool {
        matches!(self, Opcode::FlushAll | Opcode::InvalidateAll)
    }

    /// requests that touch the data array
    pub fn is_data_access(&self) -> bool {
        matches!(self, Opcode::Read | Opcode::Write | Opcode::Init | Opcode::Amo(_))
    }
}

impl FromStr for Opcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "rd" | "read" => Opcode::Read,
            "wr" | "write" => Opcode::Write,
            "init" => Opcode::Init,
            "amoadd" => Opcode::Amo(AmoOp::Add),
            "amoand" => Opcode::Amo(AmoOp::And),
            "amoor" => Opcode::Amo(AmoOp::Or),
            "amoswap" => Opcode::Amo(AmoOp::Swap),
            "amomin" => Opcode::Amo(AmoOp::Min),
            "amominu" => Opcode::Amo(AmoOp::Minu),
            "amomax" => Opcode::Amo(AmoOp::Max),
            "amomaxu" => Opcode::Amo(AmoOp::Maxu),
            "amoxor" => Opcode::Amo(AmoOp::Xor),
            "flush" => Opcode::FlushLine,
            "inv" => Opcode::InvalidateLine,
            "flushall" => Opcode::FlushAll,
            "invall" => Opcode::InvalidateAll,
            other => return Err(format!("unknown opcode mnemonic `{other}`")),
        })
    }
}

// CPU-SIDE MESSAGES

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuReq {
    pub op: Opcode,
    pub opaque: u32,
    pub addr: u32,
    pub len: u32,   // bytes, 0 means a full data word
    pub data: u64,
}

impl CpuReq {
    pub fn read(opaque: u32, addr: u32) -> Self {
        CpuReq { op: Opcode::Read, opaque, addr, len: 0, data: 0 }
    }
    pub fn write(opaque: u32, addr: u32, data: u64) -> Self {
        CpuReq { op: Opcode::Write, opaque, addr, len: 0, data }
    }
    pub fn amo(op: AmoOp, opaque: u32, addr: u32, data: u64) -> Self {
        CpuReq { op: Opcode::Amo(op), opaque, addr, len: 0, data }
    }
    pub fn maint(op: Opcode, opaque: u32, addr: u32) -> Self {
        CpuReq { op, opaque, addr, len: 0, data: 0 }
    }
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }
}

/// Per-request outcome. Anything but `Ok` is a rejected request; the
/// controller keeps serving the requests behind it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadOpcode,
    BadLength,
    Misaligned,
    OutOfBounds,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuResp {
    pub op: Opcode,
    pub opaque: u32,
    pub status: Status,
    pub hit: bool,
    pub len: u32,
    pub data: u64,
}

impl CpuResp {
    pub fn ack(req: &CpuReq, hit: bool) -> Self {
        CpuResp { op: req.op, opaque: req.opaque, status: Status::Ok, hit, len: req.len, data: 0 }
    }
    pub fn error(req: &CpuReq, status: Status) -> Self {
        CpuResp { op: req.op, opaque: req.opaque, status, hit: false, len: req.len, data: 0 }
    }
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

// MEMORY-SIDE MESSAGES

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemOpcode {
    Read,
    Write,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemReq {
    pub op: MemOpcode,
    pub opaque: u32,    // MSHR entry id
    pub addr: u32,      // line aligned
    pub data: Vec<u8>,  // full line for writes, empty for reads
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemResp {
    pub op: MemOpcode,
    pub opaque: u32,
    pub data: Vec<u8>,  // full line for reads, empty for write acks
}

// FAULTS

/// Internal invariant violations. These indicate a bug in the controller, not
/// in the requester, and stop the simulation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    DuplicateTag { index: usize, tag: u32 },
    DuplicateMiss { line: u32 },
    MshrOverflow,
    UnknownEntry { opaque: u32 },
    UnexpectedResponse { opaque: u32, op: MemOpcode },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DuplicateTag { index, tag } =>
                write!(f, "tag {tag:#x} valid in more than one way of set {index}"),
            Fault::DuplicateMiss { line } =>
                write!(f, "second MSHR entry allocated for line {line:#010x}"),
            Fault::MshrOverflow =>
                write!(f, "MSHR allocation past capacity"),
            Fault::UnknownEntry { opaque } =>
                write!(f, "memory response for unallocated MSHR entry {opaque}"),
            Fault::UnexpectedResponse { opaque, op } =>
                write!(f, "unexpected memory {op:?} response for MSHR entry {opaque}"),
        }
    }
}

impl std::error::Error for Fault {}
