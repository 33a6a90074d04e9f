//! Deterministic synthetic workload
//!
//! Drives a [`ControlManager`] the way instrumentation of a real program
//! would: one image load, then every thread starts at the `worker` symbol,
//! runs a loop of equally sized blocks and branches back to the loop head
//! every `branch_every` blocks. Each thread runs on its own OS thread, so
//! engines see real concurrency while the per-thread streams stay fixed.

use std::thread;

use log::debug;

use crate::alarm::{InstructionInfo, LoadedImage, Probe};
use crate::control::ControlManager;
use crate::domain::{Address, RegisterContext, ThreadId};

/// Load address of the synthetic image
pub const IMAGE_BASE: Address = 0x40_0000;
/// Offset of `main` in the image
pub const MAIN_OFFSET: Address = 0x1000;
/// Offset of `worker` (every thread's entry point) in the image
pub const WORKER_OFFSET: Address = 0x2000;
pub const IMAGE_NAME: &str = "/opt/tripwire/bin/workload";

const INSTRUCTION_SIZE: Address = 4;
const NOP: [u8; 1] = [0x90];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub threads: u32,
    /// Blocks each thread executes
    pub blocks: u64,
    pub block_size: u64,
    /// Take the loop branch after this many blocks (0 = never branch)
    pub branch_every: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self { threads: 4, blocks: 10_000, block_size: 10, branch_every: 16 }
    }
}

/// Instructions executed per thread, indexed by thread id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    pub instructions: Vec<u64>,
}

impl WorkloadReport {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.instructions.iter().sum()
    }
}

/// Address of `worker`, where every thread starts.
#[must_use]
pub fn worker_entry() -> Address {
    IMAGE_BASE + WORKER_OFFSET
}

/// Report the image load on thread 0, then run every thread to completion.
pub fn run(manager: &ControlManager, config: &WorkloadConfig) -> WorkloadReport {
    let symbols =
        vec![("main".to_string(), MAIN_OFFSET), ("worker".to_string(), WORKER_OFFSET)];
    let image = LoadedImage {
        name: IMAGE_NAME,
        low_address: IMAGE_BASE,
        load_offset: IMAGE_BASE,
        symbols: &symbols,
    };
    manager.on_probe(ThreadId(0), IMAGE_BASE + MAIN_OFFSET, &Probe::ImageLoad(image), None);

    let instructions = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|tid| scope.spawn(move || run_thread(manager, config, ThreadId(tid))))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });
    WorkloadReport { instructions }
}

fn run_thread(manager: &ControlManager, config: &WorkloadConfig, tid: ThreadId) -> u64 {
    let entry = worker_entry();
    let mut context = RegisterContext { ip: entry, sp: 0x7fff_0000 - u64::from(tid.0) * 0x10_0000 };
    manager.thread_start(tid, &context);
    manager.on_probe(tid, entry, &Probe::FunctionEnter { name: "worker" }, Some(&context));

    let block_bytes = config.block_size * INSTRUCTION_SIZE;
    let mut ip = entry;
    let mut executed = 0;

    for block in 0..config.blocks {
        context.ip = ip;
        manager.on_probe(tid, ip, &Probe::Block { ninst: config.block_size }, Some(&context));

        let head = InstructionInfo { ip, bytes: &NOP, extension: "BASE", category: "NOP" };
        manager.on_probe(tid, ip, &Probe::Instruction(head), Some(&context));
        manager.after_instruction(tid, ip, Some(&context));
        executed += config.block_size;

        let last = ip + block_bytes - INSTRUCTION_SIZE;
        if config.branch_every != 0 && (block + 1) % config.branch_every == 0 {
            manager.on_probe(tid, last, &Probe::Branch { target: entry }, Some(&context));
            ip = entry;
        } else {
            ip += block_bytes;
            manager.on_probe(tid, last, &Probe::FallThrough { next_ip: ip }, Some(&context));
        }
    }

    manager.on_probe(tid, ip, &Probe::FunctionExit { name: "worker" }, Some(&context));
    debug!("{tid} done after {executed} instructions");
    executed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_every_thread() {
        let manager = ControlManager::builder().control("start:icount:5").build().unwrap();
        manager.activate();
        let config = WorkloadConfig { threads: 3, blocks: 20, block_size: 5, branch_every: 4 };
        let report = run(&manager, &config);
        assert_eq!(report.instructions, vec![100, 100, 100]);
        assert_eq!(report.total(), 300);
    }
}
