//! # tripwire - Main Entry Point
//!
//! Builds a controller from `--control` / `--region` chains, runs the
//! synthetic workload under it and reports every delivered event.
//! `--export log.json` writes the event log for later comparison.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::thread;
use std::time::Instant;

use tripwire::cli::Args;
use tripwire::control::EventCatalog;
use tripwire::event_log::LiveLog;
use tripwire::export::EventLogExporter;
use tripwire::workload;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<tripwire::domain::ConfigError>())
        || err.to_string().to_lowercase().contains("missing required argument")
    {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    if args.controls.is_empty() && args.regions.is_empty() {
        anyhow::bail!(
            "Missing required argument: --control or --region\n\n\
             Usage:\n  \
             tripwire --control start:icount:1000,stop:icount:5000\n\n\
             Run 'tripwire --help' for more options"
        );
    }

    let (event_tx, event_rx) = unbounded();
    let mut builder = args.controller().handler(event_tx.clone(), false);
    if args.late {
        builder = builder.late_handler(event_tx);
    } else {
        drop(event_tx);
    }
    let manager = builder.build().context("Invalid control configuration")?;

    if !quiet {
        println!("tripwire v{}", env!("CARGO_PKG_VERSION"));
        println!("chains: {}", manager.chains().len());
        if let Some(ref export_path) = args.export {
            println!("export: {}", export_path.display());
        }
    }

    // Consumer runs until every sender (owned by the controller) is gone
    let catalog: EventCatalog = manager.catalog().clone();
    let mut exporter = args.export.as_ref().map(|_| EventLogExporter::new(args.chains()));
    let consumer = thread::spawn(move || {
        let mut live = LiveLog::new();
        for event in event_rx {
            if !quiet {
                println!(
                    "TID{} {}{} ip={:#x} icount={}{}",
                    event.tid.0,
                    if event.late { "late " } else { "" },
                    catalog.name(event.event),
                    event.ip,
                    event.icount,
                    event.alarm.map(|a| format!(" alarm={a}")).unwrap_or_default(),
                );
            }
            live.add_event(&event, &catalog);
            if let Some(exporter) = exporter.as_mut() {
                exporter.add_event(&event, &catalog);
            }
        }
        (live, exporter)
    });

    let started = Instant::now();
    manager.activate();
    let report = workload::run(&manager, &args.workload());
    let stats = manager.stats();
    let uniform_done = manager.uniform_is_done();
    drop(manager);

    let (live, exporter) = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("event consumer panicked"))?;
    info!("workload finished in {:.3}s", started.elapsed().as_secs_f64());

    if !quiet {
        eprintln!(
            "\ndone: {} instructions on {} threads, {} events ({} late, {} dropped)",
            report.total(),
            report.instructions.len(),
            stats.delivered + stats.late_delivered,
            stats.late_delivered,
            stats.dropped,
        );
        for (name, count) in live.by_event() {
            eprintln!("  {name}: {count}");
        }
        for (tid, summary) in live.threads() {
            eprintln!(
                "  TID{tid}: {} events, last at icount {}",
                summary.events, summary.last_icount
            );
        }
        if uniform_done {
            eprintln!("  uniform sampling complete");
        }
    }

    if let (Some(exporter), Some(export_path)) = (exporter, args.export.as_ref()) {
        let file = File::create(export_path).context("Failed to create event log file")?;
        exporter.export(BufWriter::new(file)).context("Failed to export event log")?;
        if !quiet {
            println!("saved: {}", export_path.display());
        }
    }

    Ok(())
}
