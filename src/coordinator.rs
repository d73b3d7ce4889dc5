use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::event::{ActorKind, Clock, Phase, RunStats};
use crate::sink::{EventSink, MetricsSink};
use crate::state::SharedState;

/// Entry points for readers and writers which wrap the [`SharedState`] with
/// observability.
///
/// Every phase transition is recorded in the [`EventSink`] and every state
/// change is followed by a snapshot pushed to the [`MetricsSink`].
pub struct Coordinator {
    state: SharedState,
    events: EventSink,
    metrics: MetricsSink,
    clock: Clock,
    total_reads: AtomicU64,
    total_writes: AtomicU64,
}

impl Coordinator {
    /// Construct a new coordinator around a zeroed state.
    pub fn new(
        clock: Clock,
        event_capacity: Option<usize>,
        metrics_capacity: Option<usize>,
    ) -> Self {
        Self {
            state: SharedState::default(),
            events: EventSink::new(clock, event_capacity),
            metrics: MetricsSink::new(metrics_capacity),
            clock,
            total_reads: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
        }
    }

    /// Construct a coordinator using the sink capacities of `config`.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(Clock::start(), config.event_capacity, config.metrics_capacity)
    }

    /// Perform one read, spending `work` inside the read section without
    /// holding any lock. Returns the value observed.
    pub fn read(&self, actor_id: u32, work: Duration) -> Result<u64> {
        let guard = self.state.enter_read_with(|counters| {
            self.events.record(
                ActorKind::Reader,
                actor_id,
                Phase::Waiting,
                format!(
                    "writer priority, pending writers = {}",
                    counters.waiting_writers + counters.admitted_writers
                ),
            );
        });

        let value = guard.value();
        let readers = guard.active_readers();

        self.events.record(
            ActorKind::Reader,
            actor_id,
            Phase::Reading,
            format!("value = {value}, readers = {readers}"),
        );
        self.snapshot();
        tracing::debug!(reader = actor_id, value, readers, "reading");

        thread::sleep(work);

        let readers = guard.exit()?;

        self.events.record(
            ActorKind::Reader,
            actor_id,
            Phase::Finished,
            format!("readers = {readers}"),
        );
        self.total_reads.fetch_add(1, Ordering::Relaxed);
        self.snapshot();
        tracing::debug!(reader = actor_id, readers, "finished reading");
        Ok(value)
    }

    /// Perform one write, incrementing the value and holding exclusive access
    /// for `work`. Returns the new value.
    pub fn write(&self, actor_id: u32, work: Duration) -> Result<u64> {
        let mut guard = self.state.enter_write_with(|counters| {
            self.events.record(
                ActorKind::Writer,
                actor_id,
                Phase::Waiting,
                format!("waiting writers = {}", counters.waiting_writers),
            );
        })?;

        let old = *guard;

        self.events.record(
            ActorKind::Writer,
            actor_id,
            Phase::Writing,
            format!("old = {old}, new = {}", old.wrapping_add(1)),
        );

        let (_, new) = guard.apply(|value| value.wrapping_add(1))?;
        self.snapshot();
        tracing::debug!(writer = actor_id, old, new, "writing");

        thread::sleep(work);

        self.events.record(
            ActorKind::Writer,
            actor_id,
            Phase::Finished,
            format!("new = {new}"),
        );
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        guard.exit();
        self.snapshot();
        tracing::debug!(writer = actor_id, new, "finished writing");
        Ok(new)
    }

    /// Cumulative counters, safe to call while drivers are running.
    pub fn stats(&self) -> RunStats {
        RunStats {
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            max_concurrent_readers: self.state.counters().max_concurrent_readers,
        }
    }

    /// The current shared value.
    pub fn value(&self) -> u64 {
        self.state.value()
    }

    /// The guarded state.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// The event log of this run.
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// The snapshot queue of this run.
    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    /// The time base of this run.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    fn snapshot(&self) {
        self.metrics.push(self.state.sample(&self.clock));
    }
}
