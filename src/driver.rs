//! Workload drivers and the handle of a running simulation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::{SimulationConfig, Timings};
use crate::coordinator::Coordinator;
use crate::error::{Error, Result};
use crate::event::{ActorKind, Event, RunStats, Snapshot};

/// Run state shared between the handle and the drivers.
struct Control {
    // Drivers which have not returned yet.
    running: AtomicUsize,
    // Set once the run has to stop early.
    abort: AtomicBool,
    // First fatal error reported by a driver.
    failure: Mutex<Option<Error>>,
}

impl Control {
    fn fail(&self, error: Error) {
        tracing::error!(%error, "aborting simulation");
        self.abort.store(true, Ordering::Release);
        let mut failure = self.failure.lock();

        if failure.is_none() {
            *failure = Some(error);
        }
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Decrements the running count when a driver returns, including by panic.
struct Running(Arc<Control>);

impl Drop for Running {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A simulation run of reader and writer drivers against one [`Coordinator`].
pub struct Simulation {
    coordinator: Arc<Coordinator>,
    control: Arc<Control>,
    threads: Vec<JoinHandle<()>>,
    deadline: Instant,
}

impl Simulation {
    /// Validate `config` and spawn one thread per reader and per writer.
    ///
    /// Returns immediately, use [`is_finished`] or [`join`] to wait for the
    /// run to end.
    ///
    /// [`is_finished`]: Simulation::is_finished
    /// [`join`]: Simulation::join
    pub fn start(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;

        let coordinator = Arc::new(Coordinator::from_config(config));
        let control = Arc::new(Control {
            running: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
        });

        let deadline = Instant::now() + config.duration();

        tracing::info!(
            readers = config.readers,
            writers = config.writers,
            duration_ms = config.duration_ms,
            "starting simulation"
        );

        let mut simulation = Self {
            coordinator,
            control,
            threads: Vec::with_capacity(config.readers + config.writers),
            deadline,
        };

        let actors = (1..=config.readers)
            .map(|id| (ActorKind::Reader, id))
            .chain((1..=config.writers).map(|id| (ActorKind::Writer, id)));

        for (kind, id) in actors {
            let id = id as u32;

            let driver = Driver {
                kind,
                id,
                coordinator: simulation.coordinator.clone(),
                control: simulation.control.clone(),
                deadline,
                timings: config.timings,
                rng: driver_rng(config.seed, kind, id),
            };

            let name = match kind {
                ActorKind::Reader => format!("reader-{id}"),
                ActorKind::Writer => format!("writer-{id}"),
            };

            simulation.spawn(name, move || driver.run())?;
        }

        Ok(simulation)
    }

    /// Spawn a named thread which counts as running until `f` returns or
    /// unwinds.
    fn spawn<F>(&mut self, name: String, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.control.running.fetch_add(1, Ordering::AcqRel);
        let control = self.control.clone();

        let spawned = thread::Builder::new().name(name).spawn(move || {
            let _running = Running(control);
            f();
        });

        match spawned {
            Ok(thread) => {
                self.threads.push(thread);
                Ok(())
            }
            Err(error) => {
                self.control.running.fetch_sub(1, Ordering::AcqRel);
                self.control.abort.store(true, Ordering::Release);
                Err(error.into())
            }
        }
    }

    /// Pop up to `limit` buffered events in recording order.
    pub fn drain_events(&self, limit: usize) -> Vec<Event> {
        self.coordinator.events().drain(limit)
    }

    /// The last `k` events without draining them.
    pub fn tail_events(&self, k: usize) -> Vec<Event> {
        self.coordinator.events().tail(k)
    }

    /// Every retained event, for export.
    pub fn history(&self) -> Vec<Event> {
        self.coordinator.events().history()
    }

    /// Pop every queued snapshot in timestamp order.
    pub fn drain_metrics(&self) -> Vec<Snapshot> {
        self.coordinator.metrics().drain()
    }

    /// Cumulative counters of the run so far.
    pub fn stats(&self) -> RunStats {
        self.coordinator.stats()
    }

    /// Test if every driver has observed the deadline and returned.
    pub fn is_finished(&self) -> bool {
        self.control.running.load(Ordering::Acquire) == 0
    }

    /// Time left until drivers stop starting new operations.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Ask every driver to stop at its next loop iteration. Operations in
    /// flight run to completion.
    pub fn abort(&self) {
        self.control.abort.store(true, Ordering::Release);
    }

    /// The coordinator the drivers run against.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Wait for every driver to return and report the final counters.
    ///
    /// Fails with the first error reported by a driver, or if the final value
    /// does not account for exactly the writes performed.
    pub fn join(self) -> Result<RunStats> {
        let mut panicked = None;

        for thread in self.threads {
            let name = thread.thread().name().unwrap_or("driver").to_owned();

            if thread.join().is_err() && panicked.is_none() {
                panicked = Some(name);
            }
        }

        if let Some(error) = self.control.failure.lock().take() {
            return Err(error);
        }

        if let Some(name) = panicked {
            return Err(Error::DriverPanicked(name));
        }

        let stats = self.coordinator.stats();
        let value = self.coordinator.value();

        if value != stats.total_writes {
            let counters = self.coordinator.state().counters();

            return Err(Error::InvariantViolation {
                what: "final value does not match the number of writes",
                active_readers: counters.active_readers,
                waiting_writers: counters.waiting_writers,
                value,
            });
        }

        tracing::info!(
            total_reads = stats.total_reads,
            total_writes = stats.total_writes,
            max_concurrent_readers = stats.max_concurrent_readers,
            value,
            "simulation finished"
        );

        Ok(stats)
    }
}

/// A reader or writer loop.
struct Driver {
    kind: ActorKind,
    id: u32,
    coordinator: Arc<Coordinator>,
    control: Arc<Control>,
    deadline: Instant,
    timings: Timings,
    rng: ChaCha8Rng,
}

impl Driver {
    fn run(mut self) {
        tracing::debug!(kind = %self.kind, id = self.id, "driver started");

        while Instant::now() < self.deadline && !self.control.aborted() {
            let (result, think) = match self.kind {
                ActorKind::Reader => {
                    let work = self.timings.read_work.sample(&mut self.rng);
                    let result = self.coordinator.read(self.id, work);
                    (result, self.timings.read_think.sample(&mut self.rng))
                }
                ActorKind::Writer => {
                    let work = self.timings.write_work.sample(&mut self.rng);
                    let result = self.coordinator.write(self.id, work);
                    (result, self.timings.write_think.sample(&mut self.rng))
                }
            };

            if let Err(error) = result {
                self.control.fail(error);
                break;
            }

            // Never sleep past the deadline, so the run ends promptly.
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            thread::sleep(think.min(remaining));
        }

        tracing::debug!(kind = %self.kind, id = self.id, "driver stopped");
    }
}

fn driver_rng(seed: Option<u64>, kind: ActorKind, id: u32) -> ChaCha8Rng {
    let Some(seed) = seed else {
        return ChaCha8Rng::from_entropy();
    };

    let role = match kind {
        ActorKind::Reader => 0u64,
        ActorKind::Writer => 1u64,
    };

    ChaCha8Rng::seed_from_u64(seed ^ ((role << 32) | u64::from(id)))
}
