//! Sinks receiving the observability stream of a run.
//!
//! Producers are the driver threads of a simulation. Consumers are pollers
//! which drain the sinks on their own cadence and never touch the shared
//! state directly.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::event::{ActorKind, Clock, Event, EventId, Phase, Snapshot};

/// Initial event capacity for each shard.
const CAPACITY: usize = 1024;

/// Rotating statically known index of the current thread.
static THREAD_INDEX: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_INDEX_THREAD: Cell<Option<usize>> = Cell::new(None);
}

struct History {
    // Every collected event ordered by id, oldest first.
    events: VecDeque<Event>,
    // Number of leading entries in `events` which have been drained.
    drained: usize,
}

/// Append-only log of phase transitions.
///
/// Recording pushes into a per-thread shard to minimize contention between
/// drivers. Shards are merged into the ordered history whenever the sink is
/// observed through [`drain`], [`tail`] or [`history`]. With a capacity, a
/// shard never holds more than `capacity` events, so memory stays bounded
/// even if nobody polls.
///
/// [`drain`]: EventSink::drain
/// [`tail`]: EventSink::tail
/// [`history`]: EventSink::history
pub struct EventSink {
    // Sharded storage for events not yet merged into history.
    shards: Vec<Mutex<VecDeque<Event>>>,
    history: Mutex<History>,
    // Maximum number of events retained, or `None` for unbounded.
    capacity: Option<usize>,
    // Events evicted from a bounded history before being drained.
    evicted: AtomicU64,
    ids: AtomicU64,
    clock: Clock,
}

impl EventSink {
    /// Create a new event sink.
    ///
    /// With a `capacity`, only the most recent `capacity` events are retained.
    pub fn new(clock: Clock, capacity: Option<usize>) -> Self {
        let threads = num_cpus::get().max(1);
        let reserve = capacity.map_or(CAPACITY, |capacity| capacity.min(CAPACITY));
        let mut shards = Vec::with_capacity(threads);

        for _ in 0..threads {
            shards.push(Mutex::new(VecDeque::with_capacity(reserve)));
        }

        Self {
            shards,
            history: Mutex::new(History {
                events: VecDeque::new(),
                drained: 0,
            }),
            capacity,
            evicted: AtomicU64::new(0),
            ids: AtomicU64::new(1),
            clock,
        }
    }

    /// Record a phase transition.
    pub fn record(
        &self,
        actor: ActorKind,
        actor_id: u32,
        phase: Phase,
        detail: String,
    ) -> EventId {
        let id = EventId::next(&self.ids);
        let thread_index = thread_index();
        let timestamp = self.clock.now();

        let mut shard = self.shards[thread_index % self.shards.len()].lock();

        shard.push_back(Event {
            id,
            timestamp,
            thread_index,
            actor,
            actor_id,
            phase,
            detail,
        });

        // Events older than `capacity` newer ones in the same shard can never
        // make it into the retained window.
        if let Some(capacity) = self.capacity {
            while shard.len() > capacity {
                shard.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }

        id
    }

    /// Pop up to `limit` of the oldest events which have not been drained yet.
    ///
    /// Drained events stay in the history for export.
    pub fn drain(&self, limit: usize) -> Vec<Event> {
        let mut history = self.history.lock();
        self.collect(&mut history);

        let start = history.drained;
        let end = history.events.len().min(start.saturating_add(limit));
        let out = history.events.range(start..end).cloned().collect();
        history.drained = end;
        out
    }

    /// The last `k` events recorded, drained or not, without draining them.
    pub fn tail(&self, k: usize) -> Vec<Event> {
        let mut history = self.history.lock();
        self.collect(&mut history);

        let start = history.events.len().saturating_sub(k);
        history.events.range(start..).cloned().collect()
    }

    /// Every retained event ordered by id.
    pub fn history(&self) -> Vec<Event> {
        let mut history = self.history.lock();
        self.collect(&mut history);

        let mut events = history.events.iter().cloned().collect::<Vec<_>>();
        events.sort_by_key(|event| event.id);
        events
    }

    /// Number of events evicted from a bounded history before a poller
    /// drained them.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Merge all shards into the history.
    fn collect(&self, history: &mut History) {
        let before = history.events.len();

        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            history.events.extend(shard.drain(..));
        }

        if history.events.len() == before {
            return;
        }

        // Shards are merged out of id order. A late event whose id is below
        // one already drained is kept after it.
        let drained = history.drained;
        history.events.make_contiguous()[drained..].sort_by_key(|event| event.id);

        if let Some(capacity) = self.capacity {
            while history.events.len() > capacity {
                history.events.pop_front();

                if history.drained > 0 {
                    history.drained -= 1;
                } else {
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Queue of state snapshots drained by an external poller.
///
/// Producers never block: with a bounded capacity, snapshots which do not fit
/// are discarded and counted.
pub struct MetricsSink {
    tx: Sender<Snapshot>,
    rx: Receiver<Snapshot>,
    dropped: AtomicU64,
}

impl MetricsSink {
    /// Create a new metrics sink, unbounded if `capacity` is `None`.
    pub fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };

        Self {
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a snapshot.
    pub fn push(&self, snapshot: Snapshot) {
        match self.tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // We hold the receiver ourselves.
            Err(TrySendError::Disconnected(_)) => unreachable!(),
        }
    }

    /// Remove and return every queued snapshot in timestamp order.
    pub fn drain(&self) -> Vec<Snapshot> {
        let mut snapshots = self.rx.try_iter().collect::<Vec<_>>();
        snapshots.sort_by_key(|snapshot| snapshot.timestamp);
        snapshots
    }

    /// Number of snapshots discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn thread_index() -> usize {
    THREAD_INDEX_THREAD.with(|index| {
        if let Some(index) = index.get() {
            return index;
        }

        let new_index = THREAD_INDEX.fetch_add(1, Ordering::Relaxed);
        index.set(Some(new_index));
        new_index
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn record(sink: &EventSink, n: u32) {
        sink.record(ActorKind::Reader, n, Phase::Reading, String::new());
    }

    #[test]
    fn drain_respects_limit_and_keeps_history() {
        let sink = EventSink::new(Clock::start(), None);

        for n in 1..=5 {
            record(&sink, n);
        }

        let first = sink.drain(3);
        assert_eq!(
            first.iter().map(Event::actor_id).collect::<Vec<_>>(),
            [1, 2, 3]
        );

        let rest = sink.drain(10);
        assert_eq!(rest.iter().map(Event::actor_id).collect::<Vec<_>>(), [4, 5]);

        assert!(sink.drain(10).is_empty());
        assert_eq!(sink.history().len(), 5);
    }

    #[test]
    fn tail_does_not_drain() {
        let sink = EventSink::new(Clock::start(), None);

        for n in 1..=4 {
            record(&sink, n);
        }

        let tail = sink.tail(2);
        assert_eq!(tail.iter().map(Event::actor_id).collect::<Vec<_>>(), [3, 4]);
        assert_eq!(sink.drain(usize::MAX).len(), 4);
    }

    #[test]
    fn bounded_history_evicts_oldest() {
        let sink = EventSink::new(Clock::start(), Some(3));

        for n in 1..=2 {
            record(&sink, n);
        }

        assert_eq!(sink.drain(1).len(), 1);

        for n in 3..=6 {
            record(&sink, n);
        }

        let history = sink.history();
        assert_eq!(
            history.iter().map(Event::actor_id).collect::<Vec<_>>(),
            [4, 5, 6]
        );
        // Event 1 had been drained, events 2 and 3 had not.
        assert_eq!(sink.evicted(), 2);
        assert_eq!(
            sink.drain(10).iter().map(Event::actor_id).collect::<Vec<_>>(),
            [4, 5, 6]
        );
    }

    #[test]
    fn bounded_sink_does_not_buffer_without_polling() {
        let sink = EventSink::new(Clock::start(), Some(3));

        for n in 0..10_000 {
            record(&sink, n);
        }

        let buffered = sink
            .shards
            .iter()
            .map(|shard| shard.lock().len())
            .sum::<usize>();

        assert!(buffered <= 3, "buffered = {buffered}");
        assert_eq!(sink.evicted(), 10_000 - 3);
        assert_eq!(
            sink.drain(usize::MAX)
                .iter()
                .map(Event::actor_id)
                .collect::<Vec<_>>(),
            [9_997, 9_998, 9_999]
        );
        assert_eq!(sink.evicted(), 10_000 - 3);
    }

    #[test]
    fn concurrent_records_are_ordered_by_id() {
        let sink = Arc::new(EventSink::new(Clock::start(), None));
        let mut threads = Vec::new();

        for n in 0..4 {
            let sink = sink.clone();

            threads.push(thread::spawn(move || {
                for _ in 0..100 {
                    record(&sink, n);
                }
            }));
        }

        for thread in threads {
            thread.join().unwrap();
        }

        let events = sink.drain(usize::MAX);
        assert_eq!(events.len(), 400);
        assert!(events.windows(2).all(|w| w[0].id() < w[1].id()));
    }

    #[test]
    fn bounded_metrics_drop_instead_of_blocking() {
        let sink = MetricsSink::new(Some(2));

        for timestamp in [3, 1, 2] {
            sink.push(Snapshot {
                timestamp,
                active_readers: 0,
                waiting_writers: 0,
                admitted_writers: 0,
                value: 0,
            });
        }

        let drained = sink.drain();
        assert_eq!(
            drained.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            [1, 3]
        );
        assert_eq!(sink.dropped(), 1);
        assert!(sink.drain().is_empty());
    }
}
