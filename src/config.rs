//! Simulation parameters.
//!
//! Configuration can be loaded from TOML, every field is optional:
//!
//! ```toml
//! readers = 5
//! writers = 1
//! duration_ms = 10000
//! seed = 42
//!
//! [timings.write_work]
//! min_ms = 100
//! max_ms = 200
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An inclusive range of delays to pick uniformly from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    /// Shortest delay in milliseconds.
    pub min_ms: u64,
    /// Longest delay in milliseconds.
    pub max_ms: u64,
}

impl DelayRange {
    /// Construct a new delay range in milliseconds.
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Pick a delay from the range.
    pub fn sample<R>(&self, rng: &mut R) -> Duration
    where
        R: Rng + ?Sized,
    {
        let min = self.min_ms.saturating_mul(1_000_000);
        let max = self.max_ms.saturating_mul(1_000_000);

        if min >= max {
            return Duration::from_nanos(min);
        }

        Duration::from_nanos(rng.gen_range(min..=max))
    }
}

/// Simulated work and think times of the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Time a reader spends inside the read section.
    pub read_work: DelayRange,
    /// Time a reader sleeps after finishing a read.
    pub read_think: DelayRange,
    /// Time a writer spends holding exclusive access.
    pub write_work: DelayRange,
    /// Time a writer sleeps after finishing a write.
    pub write_think: DelayRange,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            read_work: DelayRange::new(1000, 2000),
            read_think: DelayRange::new(2000, 4000),
            write_work: DelayRange::new(1500, 2500),
            write_think: DelayRange::new(3000, 5000),
        }
    }
}

impl Timings {
    /// Scale every delay by `numerator / denominator`, useful to run the
    /// reference workload faster.
    pub fn scaled(self, numerator: u64, denominator: u64) -> Self {
        let scale = |range: DelayRange| DelayRange {
            min_ms: range.min_ms * numerator / denominator.max(1),
            max_ms: range.max_ms * numerator / denominator.max(1),
        };

        Self {
            read_work: scale(self.read_work),
            read_think: scale(self.read_think),
            write_work: scale(self.write_work),
            write_think: scale(self.write_think),
        }
    }
}

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of reader drivers.
    pub readers: usize,
    /// Number of writer drivers.
    pub writers: usize,
    /// How long drivers keep starting new operations.
    pub duration_ms: u64,
    /// Driver delays.
    pub timings: Timings,
    /// Number of events retained for export, unbounded if not set.
    pub event_capacity: Option<usize>,
    /// Number of snapshots queued between drains, unbounded if not set.
    pub metrics_capacity: Option<usize>,
    /// Seed for deterministic driver delays.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            readers: 3,
            writers: 2,
            duration_ms: 15_000,
            timings: Timings::default(),
            event_capacity: None,
            metrics_capacity: None,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Construct a configuration with the given actor counts and duration,
    /// and default timings.
    pub fn new(readers: usize, writers: usize, duration: Duration) -> Self {
        Self {
            readers,
            writers,
            duration_ms: duration_ms(duration),
            ..Self::default()
        }
    }

    /// Set how long drivers keep starting new operations.
    ///
    /// Durations are stored in whole milliseconds, rounded up so that a
    /// positive duration never becomes zero.
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = duration_ms(duration);
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config = toml::from_str::<Self>(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let input = fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// How long drivers keep starting new operations.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Check that the configuration describes a runnable simulation.
    pub fn validate(&self) -> Result<()> {
        if self.readers == 0 && self.writers == 0 {
            return Err(Error::Configuration(
                "at least one reader or writer is required".into(),
            ));
        }

        if self.duration_ms == 0 {
            return Err(Error::Configuration("duration must be positive".into()));
        }

        if self.event_capacity == Some(0) {
            return Err(Error::Configuration(
                "event capacity must be positive".into(),
            ));
        }

        if self.metrics_capacity == Some(0) {
            return Err(Error::Configuration(
                "metrics capacity must be positive".into(),
            ));
        }

        let ranges = [
            ("read_work", self.timings.read_work),
            ("read_think", self.timings.read_think),
            ("write_work", self.timings.write_work),
            ("write_think", self.timings.write_think),
        ];

        for (name, range) in ranges {
            if range.min_ms > range.max_ms {
                return Err(Error::Configuration(format!(
                    "{name}: min_ms ({}) is greater than max_ms ({})",
                    range.min_ms, range.max_ms
                )));
            }
        }

        Ok(())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    let mut ms = duration.as_millis();

    if duration.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }

    u64::try_from(ms).unwrap_or(u64::MAX)
}
