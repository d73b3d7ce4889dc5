use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rwprio::{
    ActorKind, DelayRange, Phase, RunStats, Simulation, SimulationConfig, Snapshot, Timings,
};

/// Run a simulation to completion, collecting every snapshot along the way.
///
/// Panics if the run does not end within `timeout`.
fn run(config: SimulationConfig, timeout: Duration) -> (RunStats, u64, Vec<Snapshot>) {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let simulation = Simulation::start(&config).unwrap();
        let mut snapshots = Vec::new();

        while !simulation.is_finished() {
            snapshots.extend(simulation.drain_metrics());
            thread::sleep(Duration::from_millis(5));
        }

        snapshots.extend(simulation.drain_metrics());
        snapshots.sort_by_key(|snapshot| snapshot.timestamp);
        let value = simulation.coordinator().value();
        let stats = simulation.join().unwrap();
        let _ = tx.send((stats, value, snapshots));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(error) => panic!("simulation did not finish in time: {error}"),
    }
}

fn config(
    readers: usize,
    writers: usize,
    duration_ms: u64,
    timings: Timings,
) -> SimulationConfig {
    SimulationConfig {
        timings,
        seed: Some(42),
        ..SimulationConfig::new(readers, writers, Duration::from_millis(duration_ms))
    }
}

#[test]
fn value_matches_total_writes() {
    let (stats, value, _) = run(
        config(4, 3, 400, Timings::default().scaled(1, 50)),
        Duration::from_secs(20),
    );

    assert!(stats.total_writes > 0);
    assert_eq!(value, stats.total_writes);
}

#[test]
fn one_reader_one_writer_both_make_progress() {
    let (stats, _, _) = run(
        config(1, 1, 300, Timings::default().scaled(1, 20)),
        Duration::from_secs(20),
    );

    assert!(stats.total_reads > 0);
    assert!(stats.total_writes > 0);
}

#[test]
fn snapshots_never_show_readers_and_writer_together() {
    let (stats, value, snapshots) = run(
        config(5, 1, 600, Timings::default().scaled(1, 50)),
        Duration::from_secs(20),
    );

    assert!(!snapshots.is_empty());
    assert_eq!(value, stats.total_writes);

    for snapshot in &snapshots {
        assert!(
            snapshot.active_readers == 0 || snapshot.admitted_writers == 0,
            "{snapshot:?}"
        );
    }

    // Value only moves forward across samples.
    assert!(snapshots.windows(2).all(|w| w[0].value <= w[1].value));

    let max_sampled = snapshots.iter().map(|s| s.active_readers).max().unwrap_or(0);
    assert!(stats.max_concurrent_readers >= max_sampled);
}

#[test]
fn readers_only() {
    let (stats, value, _) = run(
        config(3, 0, 200, Timings::default().scaled(1, 10)),
        Duration::from_secs(20),
    );

    assert_eq!(stats.total_writes, 0);
    assert_eq!(value, 0);
    assert!((1..=3).contains(&stats.max_concurrent_readers));
    assert!(stats.total_reads >= 3);
}

#[test]
fn overlapping_readers_reach_full_concurrency() {
    let timings = Timings {
        read_work: DelayRange::new(300, 300),
        ..Timings::default().scaled(1, 10)
    };

    let (stats, _, snapshots) = run(config(4, 0, 50, timings), Duration::from_secs(20));

    assert_eq!(stats.max_concurrent_readers, 4);
    assert!(snapshots.iter().all(|s| s.active_readers <= 4));
}

#[test]
fn single_writer_is_bounded_by_cycle_time() {
    // Duration and delays of the reference scenario, scaled down tenfold.
    let (stats, value, _) = run(
        config(0, 1, 500, Timings::default().scaled(1, 10)),
        Duration::from_secs(20),
    );

    assert!((1..=2).contains(&stats.total_writes), "{stats:?}");
    assert_eq!(stats.total_reads, 0);
    assert_eq!(value, stats.total_writes);
}

#[test]
fn events_are_drained_once_and_kept_for_export() {
    let config = config(2, 1, 200, Timings::default().scaled(1, 20));
    let simulation = Simulation::start(&config).unwrap();
    let mut drained = Vec::new();

    while !simulation.is_finished() {
        drained.extend(simulation.drain_events(8));
        thread::sleep(Duration::from_millis(5));
    }

    drained.extend(simulation.drain_events(usize::MAX));
    assert!(simulation.drain_events(usize::MAX).is_empty());

    let history = simulation.history();
    assert!(history.windows(2).all(|w| w[0].id() < w[1].id()));

    let mut drained = drained.iter().map(|e| e.id()).collect::<Vec<_>>();
    drained.sort();
    assert_eq!(drained, history.iter().map(|e| e.id()).collect::<Vec<_>>());

    let tail = simulation.tail_events(20);
    assert_eq!(tail.len(), history.len().min(20));
    assert_eq!(tail.last().map(|e| e.id()), history.last().map(|e| e.id()));

    let stats = simulation.join().unwrap();

    let count = |actor, phase| {
        history
            .iter()
            .filter(|e| e.actor() == actor && e.phase() == phase)
            .count() as u64
    };

    assert_eq!(count(ActorKind::Reader, Phase::Finished), stats.total_reads);
    assert_eq!(count(ActorKind::Writer, Phase::Finished), stats.total_writes);
    assert_eq!(count(ActorKind::Writer, Phase::Writing), stats.total_writes);
    assert_eq!(count(ActorKind::Writer, Phase::Waiting), stats.total_writes);
}

#[test]
fn bounded_event_history() {
    let config = SimulationConfig {
        event_capacity: Some(10),
        ..config(3, 1, 200, Timings::default().scaled(1, 50))
    };

    let simulation = Simulation::start(&config).unwrap();

    while !simulation.is_finished() {
        thread::sleep(Duration::from_millis(5));
    }

    assert!(simulation.history().len() <= 10);
    simulation.join().unwrap();
}

#[test]
fn start_from_toml() {
    let config = SimulationConfig::from_toml_str(
        r#"
        readers = 2
        writers = 1
        duration_ms = 100
        seed = 3

        [timings]
        read_work = { min_ms = 5, max_ms = 10 }
        read_think = { min_ms = 10, max_ms = 20 }
        write_work = { min_ms = 5, max_ms = 10 }
        write_think = { min_ms = 10, max_ms = 20 }
        "#,
    )
    .unwrap();

    let (stats, value, _) = run(config, Duration::from_secs(20));
    assert!(stats.total_reads > 0);
    assert_eq!(value, stats.total_writes);
}
