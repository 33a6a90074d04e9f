//! Structured error types for tripwire
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every `ConfigError` is a usage error found once at startup; callers are
//! expected to refuse to start rather than recover.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown event: {0}")]
pub struct UnknownEventError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Usage: no event in control string")]
    MissingEvent,

    #[error(transparent)]
    UnknownEvent(#[from] UnknownEventError),

    #[error("Unsupported alarm: {0}")]
    UnknownAlarm(String),

    #[error("Usage error: alarm {0} with no value")]
    MissingValue(String),

    #[error("Invalid value {value:?} for {alarm} alarm: {reason}")]
    InvalidValue { alarm: String, value: String, reason: String },

    #[error("Failed converting string to int: {0}")]
    InvalidNumber(String),

    #[error("Usage: redundant token: {0}")]
    RedundantToken(String),

    #[error("Usage: can not use both tid and global tokens")]
    TidWithGlobal,

    #[error("Usage: global token must be used only with count token or icount alarm type")]
    GlobalWithoutCount,

    #[error("Usage: uniform:<period>:<length>:<count>[:tid<tid>]")]
    MalformedUniform,

    #[error("Uniform period ({period}) must be larger than uniform length ({length})")]
    UniformPeriodTooShort { period: u64, length: u64 },

    #[error("Only one uniform control is allowed")]
    DuplicateUniform,

    #[error("Only icount alarm can have vector alarm flag set (got {0})")]
    VectorNotIcount(String),

    #[error("Unexpected config token: {0}")]
    UnknownConfigToken(String),

    #[error("Could not find chain name: {0}")]
    UnknownChainName(String),

    #[error("Control chain has no alarms: {0}")]
    EmptyChain(String),

    #[error("Illegal usage of control chains together with region chains")]
    RegionWithControl,

    #[error("Region chain must hold exactly one alarm: {0}")]
    MultiAlarmRegion(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write event log: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
