use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::Parser;
use rwprio::{Simulation, SimulationConfig};
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

/// rwprio: readers-writers simulation with writer priority.
///
/// Runs reader and writer threads against one shared counter and prints the
/// live event log along with periodic state snapshots.
#[derive(Debug, Parser)]
struct Opts {
    /// TOML file with simulation parameters.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Number of reader threads.
    #[clap(short, long)]
    readers: Option<usize>,

    /// Number of writer threads.
    #[clap(short, long)]
    writers: Option<usize>,

    /// How long drivers keep starting operations, in seconds.
    #[clap(short, long)]
    duration: Option<f64>,

    /// Seed for deterministic delays.
    #[clap(long)]
    seed: Option<u64>,

    /// Interval between polls of the event log, in milliseconds.
    #[clap(long, default_value = "500")]
    poll_ms: u64,

    /// Write the full event log as CSV to this path once the run ends.
    #[clap(long)]
    export: Option<PathBuf>,

    /// Write every snapshot as CSV to this path once the run ends.
    #[clap(long)]
    export_metrics: Option<PathBuf>,

    /// Specify the logging level. Accepts rust's envfilter syntax for modular
    /// logging. Examples: ["info", "debug,rwprio=trace"]
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn main() -> rwprio::Result<()> {
    let opts = Opts::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match EnvFilter::try_new(&opts.log_level) {
            Ok(filter) => Ok(filter),
            Err(e) => {
                eprintln!(
                    "invalid log level: {}, using info, err is: {}",
                    opts.log_level, e
                );
                EnvFilter::try_new("info")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
    {
        eprintln!("failed to init logger: {}", e);
    }

    let mut config = match &opts.config {
        Some(path) => SimulationConfig::from_path(path)?,
        None => SimulationConfig::default(),
    };

    if let Some(readers) = opts.readers {
        config.readers = readers;
    }

    if let Some(writers) = opts.writers {
        config.writers = writers;
    }

    if let Some(duration) = opts.duration {
        config.set_duration(parse_duration(duration)?);
    }

    if opts.seed.is_some() {
        config.seed = opts.seed;
    }

    let simulation = Simulation::start(&config)?;
    let poll = Duration::from_millis(opts.poll_ms.max(1));
    let mut snapshots = Vec::new();

    loop {
        // Sample before draining, so the final events are not missed.
        let finished = simulation.is_finished();

        for event in simulation.drain_events(usize::MAX) {
            println!("{event}");
        }

        let drained = simulation.drain_metrics();

        if let Some(latest) = drained.last() {
            println!(
                "-- value = {}, active readers = {}, waiting writers = {}, total writes = {}",
                latest.value,
                latest.active_readers,
                latest.waiting_writers,
                simulation.stats().total_writes,
            );
        }

        snapshots.extend(drained);

        if finished {
            break;
        }

        thread::sleep(poll);
    }

    let history = simulation.history();
    let value = simulation.coordinator().value();
    let stats = simulation.join()?;

    println!();
    println!("Total reads:            {}", stats.total_reads);
    println!("Total writes:           {}", stats.total_writes);
    println!("Max concurrent readers: {}", stats.max_concurrent_readers);
    println!("Final shared value:     {}", value);

    if let Some(path) = &opts.export {
        rwprio::export::write_csv_path(path, &history)?;
        info!("wrote {} events to {}", history.len(), path.display());
    }

    if let Some(path) = &opts.export_metrics {
        let out = std::io::BufWriter::new(std::fs::File::create(path)?);
        rwprio::export::write_metrics_csv(out, &snapshots)?;
        info!("wrote {} snapshots to {}", snapshots.len(), path.display());
    }

    if history.is_empty() {
        warn!("no events were recorded");
    }

    Ok(())
}

/// Convert a `--duration` in seconds, rejecting values which are negative,
/// not finite or too large to represent.
fn parse_duration(secs: f64) -> rwprio::Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        rwprio::Error::Configuration(format!(
            "duration must be a positive number of seconds, got {secs}: {e}"
        ))
    })
}
