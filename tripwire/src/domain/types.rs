//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep chain indices, alarm positions and thread ids
//! from being mixed up in the firing path.

use std::fmt;

pub use tripwire_common::{Address, Affinity, ThreadId};

/// Control chain id (0-indexed, in registration order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u32);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chain#{}", self.0)
    }
}

/// Identity of one alarm configuration: its chain and its position in it.
///
/// This is the `configId` passed upward on every fire, and the owner tag an
/// engine carries so the firing path can find the configuration that holds
/// it right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmRef {
    pub chain: ChainId,
    pub index: u32,
}

impl AlarmRef {
    #[must_use]
    pub fn new(chain: ChainId, index: u32) -> Self {
        Self { chain, index }
    }

    /// Pack into a single word for atomic storage.
    #[must_use]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.chain.0) << 32) | u64::from(self.index)
    }

    /// Inverse of [`AlarmRef::to_bits`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_bits(bits: u64) -> Self {
        Self { chain: ChainId((bits >> 32) as u32), index: bits as u32 }
    }
}

impl fmt::Display for AlarmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/Alarm#{}", self.chain, self.index)
    }
}

/// Opaque register snapshot handed to handlers that asked for context.
///
/// Only the registers the controller itself inspects are modelled; the
/// instrumentation layer owns the real machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterContext {
    /// Instruction pointer
    pub ip: Address,
    /// Stack pointer
    pub sp: Address,
}
