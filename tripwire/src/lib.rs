//! # tripwire - Conditional Triggering for Instrumentation Tools
//!
//! tripwire decides *when* an instrumentation tool should act. A tool
//! describes its triggers as control chains such as
//! `start:icount:1000,stop:address:worker:count3` and receives `start`,
//! `stop` and custom events while the instrumented program runs.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Instrumentation (or the synthetic workload)        │
//! │   thread_start · on_probe(Block/Branch/Instruction/...) ·       │
//! │   after_instruction                                             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ probes, per application thread
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ControlManager                              │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Condition   │──▶│ Threshold    │──▶│ AlarmManager │         │
//! │  │ (per kind)   │   │  Engine      │   │ (disarm gate,│         │
//! │  └──────────────┘   │ (counters,   │   │  uniform,    │         │
//! │                     │  armed flags)│   │  hand-off)   │         │
//! │                     └──────────────┘   └──────┬───────┘         │
//! │                                               ▼                 │
//! │                                        ┌──────────────┐         │
//! │                                        │ ControlChain │         │
//! │                                        │ (next alarm, │         │
//! │                                        │  repeat)     │         │
//! │                                        └──────┬───────┘         │
//! └───────────────────────────────────────────────┼─────────────────┘
//!                                                 │ ControlEvent
//!                                                 ▼
//!                                  crossbeam channels → tool / export
//! ```
//!
//! ## Module Structure
//!
//! - [`engine`]: `ThresholdEngine` and the `ThreadRegistry` of first
//!   instruction pointers. Everything on the hot path lives here.
//! - [`alarm`]: parsing of one alarm, the per-kind [`alarm::Condition`]
//!   table and [`alarm::AlarmManager`].
//! - [`control`]: chains, the event catalog and the [`control::ControlManager`]
//!   that implements [`control::Orchestrator`].
//! - [`export`] / [`event_log`]: JSON event log, written and read back.
//! - [`workload`]: deterministic multi-threaded probe stream used by the CLI.
//! - [`cli`]: command-line arguments.
//! - [`domain`]: id newtypes and structured errors.
//!
//! ## Threading
//!
//! Probe entry points are called from application threads without any
//! global lock. Per-thread counters have a single writer; the global
//! counter is one atomic sum. Bulk arm/disarm is serialised per engine so
//! that exactly one thread wins a fire.

pub mod alarm;
pub mod cli;
pub mod control;
pub mod domain;
pub mod engine;
pub mod event_log;
pub mod export;
pub mod workload;
