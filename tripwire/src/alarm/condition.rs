//! Condition kinds and the per-kind probe table
//!
//! Every alarm kind reduces to one question asked from an instrumentation
//! probe: "does this event count, and by how much?". [`Condition::evaluate`]
//! answers it with a [`Trigger`], which the owning configuration then feeds
//! into its engine.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{Address, ConfigError};

use super::parse::{parse_u32, parse_u64};

// ============================================================================
// Alarm Kinds
// ============================================================================

/// Name-level alarm kind, as written in a control string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmKind {
    Icount,
    Address,
    Ssc,
    Itext,
    Int3,
    IsaExtension,
    IsaCategory,
    Interactive,
    EnterFunc,
    ExitFunc,
    Cpuid,
    Magic,
    Pcontrol,
    Timeout,
    Signal,
    ImageLoad,
}

impl AlarmKind {
    pub const ALL: [AlarmKind; 16] = [
        AlarmKind::Icount,
        AlarmKind::Address,
        AlarmKind::Ssc,
        AlarmKind::Itext,
        AlarmKind::Int3,
        AlarmKind::IsaExtension,
        AlarmKind::IsaCategory,
        AlarmKind::Interactive,
        AlarmKind::EnterFunc,
        AlarmKind::ExitFunc,
        AlarmKind::Cpuid,
        AlarmKind::Magic,
        AlarmKind::Pcontrol,
        AlarmKind::Timeout,
        AlarmKind::Signal,
        AlarmKind::ImageLoad,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            AlarmKind::Icount => "icount",
            AlarmKind::Address => "address",
            AlarmKind::Ssc => "ssc",
            AlarmKind::Itext => "itext",
            AlarmKind::Int3 => "int3",
            AlarmKind::IsaExtension => "isa_extension",
            AlarmKind::IsaCategory => "isa_category",
            AlarmKind::Interactive => "interactive",
            AlarmKind::EnterFunc => "enter_func",
            AlarmKind::ExitFunc => "exit_func",
            AlarmKind::Cpuid => "cpuid",
            AlarmKind::Magic => "magic",
            AlarmKind::Pcontrol => "pcontrol",
            AlarmKind::Timeout => "timeout",
            AlarmKind::Signal => "signal",
            AlarmKind::ImageLoad => "image_load",
        }
    }

    /// Interactive alarms are the only kind written without a value.
    #[must_use]
    pub fn takes_value(self) -> bool {
        self != AlarmKind::Interactive
    }
}

impl FromStr for AlarmKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlarmKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| ConfigError::UnknownAlarm(s.to_string()))
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// How an `address:` alarm names its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    /// `address:0x401000`
    Raw(Address),
    /// `address:main`, resolved when an image exporting the symbol loads
    Symbol(String),
    /// `address:libfoo.so+0x40`, resolved against the image's low address
    Image { image: String, offset: u64 },
}

/// A parsed condition: the kind plus its kind-specific value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Retired instruction count
    Icount(u64),
    Address(AddressSpec),
    /// SSC marker (`mov ebx, <tag>` followed by the special nop)
    Ssc(u32),
    /// Exact instruction encoding
    Itext(Vec<u8>),
    Int3,
    IsaExtension(String),
    IsaCategory(String),
    Interactive,
    EnterFunc(String),
    ExitFunc(String),
    /// `cpuid` executed with this leaf in `eax`
    Cpuid(u64),
    /// Simics-style magic instruction with `ebx == a` and `ecx == b`
    Magic { a: u32, b: u32 },
    /// `MPI_Pcontrol` called for this region name
    Pcontrol(String),
    Timeout(Duration),
    Signal(i32),
    /// Image whose file name (no directory) matches
    ImageLoad(String),
}

fn invalid(kind: AlarmKind, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        alarm: kind.name().to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn decode_hex(kind: AlarmKind, value: &str) -> Result<Vec<u8>, ConfigError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() || !digits.is_ascii() || digits.len() % 2 != 0 {
        return Err(invalid(kind, value, "expected an even number of hex digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| invalid(kind, value, "bad nibble in hex string"))
        })
        .collect()
}

/// Base name of a path, accepting both separators.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rfind(['/', '\\']).map_or(path, |pos| &path[pos + 1..])
}

impl Condition {
    /// Build a condition from its kind and the raw value token.
    ///
    /// `value` is `None` only for interactive alarms.
    pub fn parse(kind: AlarmKind, value: Option<&str>) -> Result<Self, ConfigError> {
        let Some(value) = value else {
            return if kind.takes_value() {
                Err(ConfigError::MissingValue(kind.name().to_string()))
            } else {
                Ok(Condition::Interactive)
            };
        };

        let condition = match kind {
            AlarmKind::Icount => Condition::Icount(parse_u64(value)?),
            AlarmKind::Address => Condition::Address(Self::parse_address(value)?),
            AlarmKind::Ssc => {
                let digits = value.strip_prefix("0x").unwrap_or(value);
                let tag = u32::from_str_radix(digits, 16)
                    .map_err(|_| invalid(kind, value, "expected a hex tag"))?;
                Condition::Ssc(tag)
            }
            AlarmKind::Itext => {
                let bytes = decode_hex(kind, value)?;
                if bytes.len() > MAX_INSTRUCTION_BYTES {
                    return Err(invalid(kind, value, "longer than one instruction"));
                }
                Condition::Itext(bytes)
            }
            AlarmKind::Int3 => Condition::Int3,
            AlarmKind::IsaExtension => Condition::IsaExtension(value.to_string()),
            AlarmKind::IsaCategory => Condition::IsaCategory(value.to_string()),
            AlarmKind::Interactive => Condition::Interactive,
            AlarmKind::EnterFunc => Condition::EnterFunc(value.to_string()),
            AlarmKind::ExitFunc => Condition::ExitFunc(value.to_string()),
            AlarmKind::Cpuid => Condition::Cpuid(parse_u64(value)?),
            AlarmKind::Magic => {
                let Some((a, b)) = value.split_once('.') else {
                    return Err(invalid(kind, value, "needs two parameters separated by \".\""));
                };
                Condition::Magic { a: parse_u32(a)?, b: parse_u32(b)? }
            }
            AlarmKind::Pcontrol => {
                if value.len() >= MAX_PCONTROL_REGION {
                    return Err(invalid(kind, value, "region name should be <128 characters"));
                }
                Condition::Pcontrol(value.to_string())
            }
            AlarmKind::Timeout => Condition::Timeout(Duration::from_secs(parse_u64(value)?)),
            AlarmKind::Signal => {
                let signo = value
                    .parse::<i32>()
                    .map_err(|_| invalid(kind, value, "expected a signal number"))?;
                Condition::Signal(signo)
            }
            AlarmKind::ImageLoad => Condition::ImageLoad(value.to_string()),
        };
        Ok(condition)
    }

    fn parse_address(value: &str) -> Result<AddressSpec, ConfigError> {
        if value.starts_with("0x") {
            return Ok(AddressSpec::Raw(parse_u64(value)?));
        }
        match value.split_once('+') {
            None => Ok(AddressSpec::Symbol(value.to_string())),
            Some((image, offset)) => {
                Ok(AddressSpec::Image { image: image.to_string(), offset: parse_u64(offset)? })
            }
        }
    }

    #[must_use]
    pub fn kind(&self) -> AlarmKind {
        match self {
            Condition::Icount(_) => AlarmKind::Icount,
            Condition::Address(_) => AlarmKind::Address,
            Condition::Ssc(_) => AlarmKind::Ssc,
            Condition::Itext(_) => AlarmKind::Itext,
            Condition::Int3 => AlarmKind::Int3,
            Condition::IsaExtension(_) => AlarmKind::IsaExtension,
            Condition::IsaCategory(_) => AlarmKind::IsaCategory,
            Condition::Interactive => AlarmKind::Interactive,
            Condition::EnterFunc(_) => AlarmKind::EnterFunc,
            Condition::ExitFunc(_) => AlarmKind::ExitFunc,
            Condition::Cpuid(_) => AlarmKind::Cpuid,
            Condition::Magic { .. } => AlarmKind::Magic,
            Condition::Pcontrol(_) => AlarmKind::Pcontrol,
            Condition::Timeout(_) => AlarmKind::Timeout,
            Condition::Signal(_) => AlarmKind::Signal,
            Condition::ImageLoad(_) => AlarmKind::ImageLoad,
        }
    }

    /// Threshold the engine counts to.
    ///
    /// Instruction-count alarms count instructions up to their value; every
    /// other kind counts hits up to the `count` token.
    #[must_use]
    pub fn target(&self, count: u64) -> u64 {
        match self {
            Condition::Icount(n) => *n,
            _ => count,
        }
    }

    /// Address a raw `address:` alarm is known at parse time.
    #[must_use]
    pub fn static_address(&self) -> Option<Address> {
        match self {
            Condition::Address(AddressSpec::Raw(addr)) => Some(*addr),
            _ => None,
        }
    }

    /// Resolve a symbol/image address against a freshly loaded image.
    #[must_use]
    pub fn resolve_address(&self, image: &LoadedImage<'_>) -> Option<Address> {
        match self {
            Condition::Address(AddressSpec::Symbol(symbol)) => image
                .symbols
                .iter()
                .find(|(name, _)| name == symbol)
                .map(|(_, value)| value + image.load_offset),
            Condition::Address(AddressSpec::Image { image: wanted, offset }) => {
                (image.name == wanted || file_name(image.name) == wanted)
                    .then(|| image.low_address + offset)
            }
            _ => None,
        }
    }

    /// The per-kind probe table.
    ///
    /// Returns what the engine should do with this probe, or `None` when the
    /// probe is irrelevant to this condition. `address` is the resolved alarm
    /// address for address alarms (0 while unresolved).
    #[must_use]
    pub fn evaluate(&self, probe: &Probe<'_>, address: Address) -> Option<Trigger> {
        match (self, probe) {
            (Condition::Icount(_), Probe::Block { ninst }) => Some(Trigger::Count(*ninst)),

            (Condition::Address(_), Probe::Branch { target }) if address != 0 => {
                Some(Trigger::Target(*target))
            }
            (Condition::Address(_), Probe::FallThrough { next_ip }) => {
                (address != 0 && *next_ip == address).then_some(Trigger::Count(1))
            }
            (Condition::Address(_), Probe::Instruction(ins)) => {
                (address != 0 && ins.ip == address).then_some(Trigger::FirstIp(ins.ip))
            }

            (Condition::Ssc(tag), Probe::Instruction(ins)) => {
                (ins.bytes == ssc_marker(*tag)).then_some(Trigger::Count(1))
            }
            (Condition::Itext(pattern), Probe::Instruction(ins)) => {
                (ins.bytes == pattern.as_slice()).then_some(Trigger::Count(1))
            }
            (Condition::Int3, Probe::Instruction(ins)) => {
                (ins.bytes == [INT3_OPCODE]).then_some(Trigger::Count(1))
            }
            (Condition::IsaExtension(ext), Probe::Instruction(ins)) => {
                (ins.extension == ext).then_some(Trigger::Count(1))
            }
            (Condition::IsaCategory(ctg), Probe::Instruction(ins)) => {
                (ins.category == ctg).then_some(Trigger::Count(1))
            }

            (Condition::Interactive | Condition::Timeout(_), Probe::Block { .. }) => {
                Some(Trigger::Immediate)
            }

            (Condition::EnterFunc(name), Probe::FunctionEnter { name: called })
            | (Condition::ExitFunc(name), Probe::FunctionExit { name: called }) => {
                (name == called).then_some(Trigger::Count(1))
            }

            (Condition::Cpuid(leaf), Probe::Cpuid { eax }) => {
                (eax == leaf).then_some(Trigger::Count(1))
            }
            (Condition::Magic { a, b }, Probe::Magic { eax, ebx, ecx }) => {
                (*eax == tripwire_common::SIM_CMD_MARKER
                    && *ebx == u64::from(*a)
                    && *ecx == u64::from(*b))
                .then_some(Trigger::Count(1))
            }
            (Condition::Pcontrol(region), Probe::Pcontrol { region: called }) => {
                (region == called).then_some(Trigger::Count(1))
            }

            (Condition::Signal(signo), Probe::Signal { signo: delivered }) => {
                (signo == delivered).then_some(Trigger::Immediate)
            }
            (Condition::ImageLoad(name), Probe::ImageLoad(image)) => {
                (file_name(image.name) == name).then_some(Trigger::Immediate)
            }

            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Icount(n) => write!(f, "{n}"),
            Condition::Address(AddressSpec::Raw(addr)) => write!(f, "{addr:#x}"),
            Condition::Address(AddressSpec::Symbol(s)) => f.write_str(s),
            Condition::Address(AddressSpec::Image { image, offset }) => {
                write!(f, "{image}+{offset:#x}")
            }
            Condition::Ssc(tag) => write!(f, "{tag:x}"),
            Condition::Itext(bytes) => bytes.iter().try_for_each(|b| write!(f, "{b:02x}")),
            Condition::Int3 | Condition::Interactive => Ok(()),
            Condition::IsaExtension(s)
            | Condition::IsaCategory(s)
            | Condition::EnterFunc(s)
            | Condition::ExitFunc(s)
            | Condition::Pcontrol(s)
            | Condition::ImageLoad(s) => f.write_str(s),
            Condition::Cpuid(leaf) => write!(f, "{leaf}"),
            Condition::Magic { a, b } => write!(f, "{a}.{b}"),
            Condition::Timeout(d) => write!(f, "{}", d.as_secs()),
            Condition::Signal(signo) => write!(f, "{signo}"),
        }
    }
}

// ============================================================================
// Probes
// ============================================================================

/// Longest x86 instruction encoding.
pub const MAX_INSTRUCTION_BYTES: usize = 15;

/// Region names passed to `MPI_Pcontrol` are copied into a 128 byte buffer.
pub const MAX_PCONTROL_REGION: usize = 128;

pub const INT3_OPCODE: u8 = 0xcc;

/// Encoding of an SSC marker: `mov ebx, <tag>` followed by `addr32 fs nop`.
#[must_use]
pub fn ssc_marker(tag: u32) -> [u8; 8] {
    let t = tag.to_le_bytes();
    [0xbb, t[0], t[1], t[2], t[3], 0x64, 0x67, 0x90]
}

/// Static description of one instruction about to execute.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstructionInfo<'a> {
    pub ip: Address,
    pub bytes: &'a [u8],
    /// ISA extension name (e.g. `AVX2`)
    pub extension: &'a str,
    /// ISA category name (e.g. `CALL`)
    pub category: &'a str,
}

/// An image the application just loaded.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage<'a> {
    /// Full path as the loader reported it
    pub name: &'a str,
    pub low_address: Address,
    pub load_offset: Address,
    /// Symbol table, values relative to the load offset
    pub symbols: &'a [(String, Address)],
}

/// One event reported by the instrumentation layer.
#[derive(Debug, Clone, Copy)]
pub enum Probe<'a> {
    /// Basic block of `ninst` instructions about to execute
    Block { ninst: u64 },
    Instruction(InstructionInfo<'a>),
    /// An instruction retired and falls through to `next_ip`
    FallThrough { next_ip: Address },
    /// Taken branch or call
    Branch { target: Address },
    Cpuid { eax: u64 },
    Magic { eax: u64, ebx: u64, ecx: u64 },
    FunctionEnter { name: &'a str },
    FunctionExit { name: &'a str },
    Pcontrol { region: &'a str },
    Signal { signo: i32 },
    ImageLoad(LoadedImage<'a>),
}

/// What a matching probe asks of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Add to the counter
    Count(u64),
    /// Count if the branch target equals the alarm address
    Target(Address),
    /// Count if this is the thread's first instruction
    FirstIp(Address),
    /// Fire if armed, without counting
    Immediate,
}
