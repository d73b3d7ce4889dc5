//! A readers-writers engine with writer priority, instrumented to emit a
//! stream of events and state snapshots.
//!
//! Any number of readers may access the shared value concurrently, while a
//! writer requires exclusive access. Once a writer declares its intent to
//! write, no new reader is admitted until that writer, and every writer queued
//! ahead of it, has run.
//!
//! <br>
//!
//! ## Usage
//!
//! Start a simulation and poll it until every driver has returned:
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use rwprio::{Simulation, SimulationConfig};
//!
//! let config = SimulationConfig::new(3, 1, Duration::from_secs(5));
//! let simulation = Simulation::start(&config)?;
//!
//! while !simulation.is_finished() {
//!     for event in simulation.drain_events(64) {
//!         println!("{event}");
//!     }
//!
//!     std::thread::sleep(Duration::from_millis(250));
//! }
//!
//! let history = simulation.history();
//! let stats = simulation.join()?;
//! println!("reads: {}, writes: {}", stats.total_reads, stats.total_writes);
//!
//! rwprio::export::write_csv_path("simulation_logs.csv", &history)?;
//! # Ok::<_, rwprio::Error>(())
//! ```
//!
//! <br>
//!
//! ## How does it work
//!
//! The [`SharedState`] holds two primitives: a guard over the admission
//! counters with two condition variables, and an exclusive resource lock over
//! the value which serializes writers. The [`Coordinator`] wraps the state and
//! records every phase transition into an [`EventSink`] and every state change
//! into a [`MetricsSink`]. Pollers drain the sinks on their own cadence and
//! never touch the state directly.

mod config;
pub use self::config::{DelayRange, SimulationConfig, Timings};

mod coordinator;
pub use self::coordinator::Coordinator;

mod driver;
pub use self::driver::Simulation;

mod error;
pub use self::error::{Error, Result};

mod event;
pub use self::event::{ActorKind, Clock, Event, EventId, Phase, RunStats, Snapshot};

mod sink;
pub use self::sink::{EventSink, MetricsSink};

mod state;
pub use self::state::{Counters, ReadGuard, SharedState, WriteGuard};

pub mod export;
