//! Alarm configurations
//!
//! An alarm is one `<event>:<kind>:<value>[:tokens]` entry of a control
//! chain. This module parses it ([`parse`]), maps it onto a
//! [`Condition`] and owns the engine that counts it ([`AlarmManager`]).

pub mod condition;
pub mod manager;
pub mod parse;

pub use condition::{
    AddressSpec, AlarmKind, Condition, InstructionInfo, LoadedImage, Probe, Trigger,
};
pub use manager::{AlarmManager, AlarmOptions};
pub use parse::{AlarmSpec, UniformSpec};
