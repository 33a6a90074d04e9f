use crossbeam_channel::unbounded;
use std::fs::File;
use std::io::BufWriter;

use tripwire::control::ControlManager;
use tripwire::event_log::EventLog;
use tripwire::export::EventLogExporter;
use tripwire::workload::{self, WorkloadConfig};

#[test]
fn test_exported_log_reads_back() {
    let chain = "start:icount:100,stop:icount:200,repeat:2";
    let (tx, rx) = unbounded();
    let manager = ControlManager::builder()
        .control(chain)
        .handler(tx, false)
        .event_log(true)
        .build()
        .unwrap();
    manager.activate();
    workload::run(&manager, &WorkloadConfig { threads: 2, blocks: 100, block_size: 10, branch_every: 8 });

    let mut exporter = EventLogExporter::new(vec![chain.to_string()]);
    for event in rx.try_iter() {
        exporter.add_event(&event, manager.catalog());
    }
    assert_eq!(exporter.event_count(), 8);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");
    exporter.export(BufWriter::new(File::create(&path).unwrap())).unwrap();

    let log = EventLog::from_file(&path).unwrap();
    assert_eq!(log.chains, vec![chain.to_string()]);
    assert_eq!(log.events.len(), 8);
    assert_eq!(log.named("start").count(), 4);
    assert_eq!(log.named("stop").count(), 4);
    for tid in 0..2 {
        let icounts: Vec<u64> =
            log.events.iter().filter(|e| e.tid == tid).map(|e| e.icount).collect();
        assert_eq!(icounts, vec![100, 290, 390, 580]);
    }
    assert!(log.events.iter().all(|e| e.alarm.is_some() && !e.late));
}

#[test]
fn test_missing_log_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = EventLog::from_file(dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read event log"));
}
