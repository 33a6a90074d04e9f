//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::control::{ControlManagerBuilder, RegionChain};
use crate::workload::WorkloadConfig;

#[derive(Parser, Debug)]
#[command(
    name = "tripwire",
    about = "Run a synthetic workload under conditional triggers",
    after_help = "\
EXAMPLES:
    tripwire --control start:icount:1000,stop:icount:5000
    tripwire --control precond:address:worker,start:icount:100:global:count1
    tripwire --control uniform:20000:1000:5 --threads 8
    tripwire --region start:icount:1000:tid1 --region stop:icount:2000:tid1"
)]
pub struct Args {
    /// Control chain (repeatable)
    #[arg(long = "control", value_name = "CHAIN")]
    pub controls: Vec<String>,

    /// Region chain; regions of one thread run in order (repeatable)
    #[arg(long = "region", value_name = "CHAIN", conflicts_with = "controls")]
    pub regions: Vec<String>,

    /// Extra event names usable in chains
    #[arg(long = "event", value_name = "NAME")]
    pub events: Vec<String>,

    /// Deliver a start event at the first block when no chain has one
    #[arg(long)]
    pub default_start: bool,

    /// Also deliver each event again after its instruction retired
    #[arg(long)]
    pub late: bool,

    /// Application threads to simulate
    #[arg(long, default_value = "4")]
    pub threads: u32,

    /// Blocks per thread
    #[arg(long, default_value = "10000")]
    pub blocks: u64,

    /// Instructions per block
    #[arg(long, default_value = "10")]
    pub block_size: u64,

    /// Branch back to the loop head after this many blocks (0 = never)
    #[arg(long, default_value = "16")]
    pub branch_every: u64,

    /// Export the event log to file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Dump parsed chains to stderr
    #[arg(long)]
    pub debug_chains: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    #[must_use]
    pub fn workload(&self) -> WorkloadConfig {
        WorkloadConfig {
            threads: self.threads,
            blocks: self.blocks,
            block_size: self.block_size,
            branch_every: self.branch_every,
        }
    }

    /// Builder preloaded with every chain and option from the command line.
    #[must_use]
    pub fn controller(&self) -> ControlManagerBuilder {
        let mut builder = ControlManagerBuilder::new()
            .event_log(true)
            .default_start(self.default_start)
            .debug(self.debug_chains);
        for name in &self.events {
            builder = builder.event(name.as_str());
        }
        for control in &self.controls {
            builder = builder.control(control.as_str());
        }
        for region in &self.regions {
            builder = builder.region(RegionChain::new(region));
        }
        builder
    }

    /// Every chain string, in registration order.
    #[must_use]
    pub fn chains(&self) -> Vec<String> {
        self.controls.iter().chain(&self.regions).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controls_are_repeatable() {
        let args = Args::parse_from([
            "tripwire",
            "--control",
            "start:icount:10",
            "--control",
            "stop:icount:20",
            "--threads",
            "2",
        ]);
        assert_eq!(args.controls.len(), 2);
        assert_eq!(args.workload().threads, 2);
        assert_eq!(args.workload().block_size, 10);
    }

    #[test]
    fn test_region_conflicts_with_control() {
        let result = Args::try_parse_from([
            "tripwire",
            "--control",
            "start:icount:10",
            "--region",
            "start:icount:10",
        ]);
        assert!(result.is_err());
    }
}
