use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

/// Sequential identifier of a recorded event.
///
/// Provides a total order over the events of one sink. Note that this is the
/// order in which events were recorded, which is not necessarily the order in
/// which the underlying phase transitions became globally visible.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct EventId(NonZeroU64);

impl EventId {
    /// Allocate the next identifier from the given counter.
    pub(crate) fn next(counter: &AtomicU64) -> Self {
        loop {
            if let Some(id) = NonZeroU64::new(counter.fetch_add(1, Ordering::Relaxed)) {
                return Self(id);
            }
        }
    }

    /// The raw value of the identifier.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The role of the task which caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    /// Observes the shared value.
    Reader,
    /// Mutates the shared value.
    Writer,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorKind::Reader => f.write_str("Reader"),
            ActorKind::Writer => f.write_str("Writer"),
        }
    }
}

/// The phase transition an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The actor is blocked waiting for admission.
    Waiting,
    /// A reader entered the read critical section.
    Reading,
    /// A writer holds exclusive access and is mutating the value.
    Writing,
    /// The actor left its critical section.
    Finished,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Waiting => f.write_str("WAITING"),
            Phase::Reading => f.write_str("READING"),
            Phase::Writing => f.write_str("WRITING"),
            Phase::Finished => f.write_str("finished"),
        }
    }
}

/// A recorded phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The unique identifier of this event.
    pub(crate) id: EventId,
    /// Nanoseconds since the run started.
    pub(crate) timestamp: u64,
    /// The index of the thread the event was recorded on.
    pub(crate) thread_index: usize,
    /// Role of the actor.
    pub(crate) actor: ActorKind,
    /// Identifier of the actor within its role, starting at 1.
    pub(crate) actor_id: u32,
    /// The transition.
    pub(crate) phase: Phase,
    /// Human readable detail, such as the observed value.
    pub(crate) detail: String,
}

impl Event {
    /// The unique identifier of this event.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.timestamp)
    }

    /// Index of the thread the event was recorded on.
    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    /// Role of the actor.
    pub fn actor(&self) -> ActorKind {
        self.actor
    }

    /// Identifier of the actor within its role.
    pub fn actor_id(&self) -> u32 {
        self.actor_id
    }

    /// The recorded transition.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Detail attached to the transition.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.elapsed();

        write!(
            f,
            "[{:>4}.{:03}s] {} {} {}",
            elapsed.as_secs(),
            elapsed.subsec_millis(),
            self.actor,
            self.actor_id,
            self.phase
        )?;

        if !self.detail.is_empty() {
            write!(f, " | {}", self.detail)?;
        }

        Ok(())
    }
}

/// A point-in-time sample of the engine state.
///
/// All counters are read under the same guard, so a snapshot is internally
/// consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Nanoseconds since the run started.
    pub timestamp: u64,
    /// Readers inside the read critical section.
    pub active_readers: usize,
    /// Writers which declared intent but have not been admitted yet.
    pub waiting_writers: usize,
    /// Writers admitted past the reader wait which have not exited yet.
    pub admitted_writers: usize,
    /// The shared value.
    pub value: u64,
}

impl Snapshot {
    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.timestamp)
    }
}

/// Cumulative counters of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Completed read operations.
    pub total_reads: u64,
    /// Completed write operations.
    pub total_writes: u64,
    /// Largest number of readers observed inside the read section at once.
    pub max_concurrent_readers: usize,
}

/// The time base shared by every event and snapshot of a run.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
    wall: SystemTime,
}

impl Clock {
    /// Start a new clock at the current instant.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            wall: SystemTime::now(),
        }
    }

    /// Nanoseconds since the clock was started.
    pub fn now(&self) -> u64 {
        // NB: Truncation only happens after ~584 years.
        Instant::now().duration_since(self.start).as_nanos() as u64
    }

    /// Convert a timestamp of this clock into wall-clock time.
    pub fn wall(&self, timestamp: u64) -> SystemTime {
        self.wall + Duration::from_nanos(timestamp)
    }
}
