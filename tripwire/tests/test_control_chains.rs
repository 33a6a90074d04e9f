use crossbeam_channel::{unbounded, Receiver};
use std::time::Duration;

use tripwire::alarm::Probe;
use tripwire::control::{ControlEvent, ControlManager, ControlManagerBuilder, EventType, RegionChain};
use tripwire::domain::{RegisterContext, ThreadId};
use tripwire::workload::{self, WorkloadConfig};

fn single_thread(blocks: u64) -> WorkloadConfig {
    WorkloadConfig { threads: 1, blocks, block_size: 10, branch_every: 0 }
}

/// Build, activate and run the workload; return every delivered event.
fn run(builder: ControlManagerBuilder, config: &WorkloadConfig) -> (ControlManager, Vec<ControlEvent>) {
    let (tx, rx) = unbounded();
    let manager = builder.handler(tx, false).event_log(true).build().unwrap();
    manager.activate();
    workload::run(&manager, config);
    let events = rx.try_iter().collect();
    (manager, events)
}

fn timeline(events: &[ControlEvent]) -> Vec<(EventType, u64)> {
    events.iter().map(|e| (e.event, e.icount)).collect()
}

#[test]
fn test_start_then_stop() {
    let builder = ControlManager::builder().control("start:icount:100,stop:icount:200");
    let (_, events) = run(builder, &single_thread(100));
    // The stop hook comes after the start hook, so it counts block 10
    assert_eq!(timeline(&events), vec![(EventType::Start, 100), (EventType::Stop, 290)]);
}

#[test]
fn test_chain_repeats_per_thread() {
    let builder = ControlManager::builder().control("start:icount:100,stop:icount:200,repeat:3");
    let (_, events) = run(builder, &single_thread(100));
    assert_eq!(
        timeline(&events),
        vec![
            (EventType::Start, 100),
            (EventType::Stop, 290),
            (EventType::Start, 390),
            (EventType::Stop, 580),
            (EventType::Start, 680),
            (EventType::Stop, 870),
        ]
    );
}

#[test]
fn test_precond_is_not_delivered() {
    let builder = ControlManager::builder().control("precond:icount:50,start:icount:100");
    let (_, events) = run(builder, &single_thread(100));
    assert_eq!(timeline(&events), vec![(EventType::Start, 140)]);
}

#[test]
fn test_waitfor_arms_after_named_chain() {
    let builder = ControlManager::builder()
        .control("start:icount:100,name:warm")
        .control("stop:icount:50,waitfor:warm");
    let (manager, events) = run(builder, &single_thread(100));
    assert_eq!(timeline(&events), vec![(EventType::Start, 100), (EventType::Stop, 140)]);
    assert_eq!(manager.chain_by_name("warm").map(|c| c.raw()), Some("start:icount:100,name:warm"));
}

#[test]
fn test_per_thread_alarm_fires_on_every_thread() {
    let config = WorkloadConfig { threads: 4, blocks: 50, block_size: 10, branch_every: 0 };
    let (_, events) = run(ControlManager::builder().control("start:icount:100"), &config);
    let mut tids: Vec<u32> = events.iter().map(|e| e.tid.0).collect();
    tids.sort_unstable();
    assert_eq!(tids, vec![0, 1, 2, 3]);
    assert!(events.iter().all(|e| e.icount == 100 && !e.bcast));
}

#[test]
fn test_broadcast_alarm_fires_once() {
    let config = WorkloadConfig { threads: 4, blocks: 50, block_size: 10, branch_every: 0 };
    let (_, events) = run(ControlManager::builder().control("start:icount:100:bcast"), &config);
    assert_eq!(events.len(), 1);
    assert!(events[0].bcast);
}

#[test]
fn test_global_count_fires_once_across_threads() {
    let config = WorkloadConfig { threads: 4, blocks: 100, block_size: 10, branch_every: 0 };
    let (_, events) = run(ControlManager::builder().control("start:icount:2500:global"), &config);
    assert_eq!(events.len(), 1);
}

#[test]
fn test_specific_thread_only() {
    let config = WorkloadConfig { threads: 4, blocks: 50, block_size: 10, branch_every: 0 };
    let (_, events) = run(ControlManager::builder().control("start:icount:100:tid2"), &config);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tid, ThreadId(2));
}

#[test]
fn test_address_alarm_counts_entry_and_loop_branches() {
    let config = WorkloadConfig { threads: 2, blocks: 40, block_size: 10, branch_every: 4 };
    let (_, events) = run(ControlManager::builder().control("start:address:worker:count3"), &config);
    // First instruction at `worker`, then the branches after blocks 4 and 8
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.icount == 80));
    assert!(events.iter().all(|e| e.ip == workload::worker_entry() + 156));
}

#[test]
fn test_image_offset_alarm_resolves_on_load() {
    let (_, events) = run(
        ControlManager::builder().control("start:address:workload+0x2000"),
        &single_thread(10),
    );
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ip, workload::worker_entry());
    assert_eq!(events[0].icount, 10);
}

#[test]
fn test_uniform_sampling_windows() {
    let builder = ControlManager::builder().control("uniform:100:30:2");
    let (manager, events) = run(builder, &single_thread(100));
    assert_eq!(
        timeline(&events),
        vec![
            (EventType::Start, 10),
            (EventType::Stop, 40),
            (EventType::Start, 110),
            (EventType::Stop, 140),
        ]
    );
    assert!(manager.uniform_is_done());
}

#[test]
fn test_region_chain_moves_engine() {
    let builder = ControlManager::builder()
        .region(RegionChain::new("start:icount:100:tid0"))
        .region(RegionChain::new("stop:icount:300:tid0"));
    let (manager, events) = run(builder, &single_thread(100));
    // Region thresholds are absolute: the counter is never reset
    assert_eq!(timeline(&events), vec![(EventType::Start, 100), (EventType::Stop, 300)]);

    let first = &manager.chains()[0].alarms()[0];
    let second = &manager.chains()[1].alarms()[0];
    assert!(first.engine().is_none());
    assert!(second.engine().is_some());
    assert_eq!(manager.current_region(ThreadId(0)), Some(1));
}

#[test]
fn test_untagged_region_belongs_to_thread_zero() {
    let (tx, rx) = unbounded();
    let manager = ControlManager::builder()
        .region(RegionChain::new("start:icount:100"))
        .region(RegionChain::new("stop:icount:300"))
        .handler(tx, false)
        .build()
        .unwrap();
    manager.activate();

    let block = Probe::Block { ninst: 100 };
    for _ in 0..3 {
        manager.on_probe(ThreadId(2), 0x10, &block, None);
        manager.on_probe(ThreadId(0), 0x10, &block, None);
    }
    let events: Vec<_> = rx.try_iter().map(|e| (e.event, e.tid)).collect();
    assert_eq!(events, vec![(EventType::Start, ThreadId(0)), (EventType::Stop, ThreadId(0))]);
    assert!(manager.chains()[1].alarms()[0].engine().is_some());
}

#[test]
fn test_global_region_chain_moves_engine_once() {
    let builder = ControlManager::builder()
        .region(RegionChain::new("start:icount:100:global"))
        .region(RegionChain::new("stop:icount:300:global"));
    let config = WorkloadConfig { threads: 4, blocks: 50, block_size: 10, branch_every: 0 };
    let (manager, events) = run(builder, &config);

    let kinds: Vec<_> = events.iter().map(|e| e.event).collect();
    assert_eq!(kinds, vec![EventType::Start, EventType::Stop]);

    let first = &manager.chains()[0].alarms()[0];
    let second = &manager.chains()[1].alarms()[0];
    assert!(first.engine().is_none());
    let engine = second.engine().unwrap();
    assert!(engine.global_count_value() >= 300);
    assert!(!engine.is_global_armed());
}

#[test]
fn test_late_fire_follows_each_event_once() {
    let (tx, rx) = unbounded();
    let (late_tx, late_rx) = unbounded();
    let manager = ControlManager::builder()
        .control("start:icount:100")
        .handler(tx, false)
        .late_handler(late_tx)
        .build()
        .unwrap();
    manager.activate();
    workload::run(&manager, &single_thread(50));

    let events: Vec<_> = rx.try_iter().collect();
    let late: Vec<_> = late_rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(late.len(), 1);
    assert!(late[0].late);
    assert_eq!(late[0].ip, events[0].ip);
    assert!(late[0].context.is_some());
    assert_eq!(manager.stats().late_delivered, 1);
}

#[test]
fn test_thread_translation_moves_pinned_alarm() {
    let (tx, rx) = unbounded();
    let manager = ControlManager::builder()
        .control("start:icount:10:tid1")
        .handler(tx, false)
        .thread_translation(|tid| if tid == ThreadId(5) { ThreadId(1) } else { tid })
        .build()
        .unwrap();
    manager.activate();

    manager.thread_start(ThreadId(5), &RegisterContext { ip: 0x1000, sp: 0 });
    manager.on_probe(ThreadId(1), 0x1000, &Probe::Block { ninst: 10 }, None);
    assert!(rx.try_recv().is_err());
    manager.on_probe(ThreadId(5), 0x1000, &Probe::Block { ninst: 10 }, None);
    assert_eq!(rx.try_recv().unwrap().tid, ThreadId(5));
}

#[test]
fn test_thread_start_hooks_run_first() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    let seen = Arc::new(AtomicU64::new(0));
    let hook_seen = Arc::clone(&seen);
    let manager = ControlManager::builder()
        .control("start:icount:10")
        .on_thread_start(Box::new(move |_: ThreadId, ctx: &RegisterContext| {
            hook_seen.store(ctx.ip, Ordering::Relaxed);
        }))
        .build()
        .unwrap();
    let registry = Arc::clone(manager.registry());
    manager.thread_start(ThreadId(3), &RegisterContext { ip: 0xbeef, sp: 0 });
    assert_eq!(seen.load(Ordering::Relaxed), 0xbeef);
    assert_eq!(registry.first_ip(ThreadId(3)), 0xbeef);
}

#[test]
fn test_signal_alarm() {
    let (tx, rx) = unbounded();
    let manager =
        ControlManager::builder().control("stop:signal:11").handler(tx, false).build().unwrap();
    manager.activate();
    manager.on_probe(ThreadId(0), 0, &Probe::Signal { signo: 2 }, None);
    assert!(rx.try_recv().is_err());
    manager.on_probe(ThreadId(0), 0, &Probe::Signal { signo: 11 }, None);
    assert_eq!(rx.try_recv().unwrap().event, EventType::Stop);
}

fn wait_for_event(manager: &ControlManager, rx: &Receiver<ControlEvent>) -> Option<ControlEvent> {
    for _ in 0..50 {
        manager.on_probe(ThreadId(0), 0, &Probe::Block { ninst: 1 }, None);
        if let Ok(event) = rx.try_recv() {
            return Some(event);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    None
}

#[test]
fn test_timeout_alarm_fires_after_delay() {
    let (tx, rx) = unbounded();
    let manager =
        ControlManager::builder().control("stop:timeout:1").handler(tx, false).build().unwrap();
    manager.activate();
    manager.on_probe(ThreadId(0), 0, &Probe::Block { ninst: 1 }, None);
    assert!(rx.try_recv().is_err());

    let event = wait_for_event(&manager, &rx).expect("timeout alarm never fired");
    assert_eq!(event.event, EventType::Stop);
}
