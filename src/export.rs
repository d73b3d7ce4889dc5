//! Module to export a recorded run for offline inspection.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::event::{ActorKind, Event, Phase, Snapshot};

/// Characters which would split an event across lines or columns.
const BREAKS: &[char] = &['\t', '\r', '\n'];

#[derive(Serialize)]
struct Row<'a> {
    timestamp_ms: f64,
    actor: ActorKind,
    id: u32,
    phase: Phase,
    detail: &'a str,
}

/// Write one line per event, using the same format as the event's
/// `Display` implementation.
///
/// Tabs and line breaks in details are replaced with spaces, so every event
/// occupies exactly one line.
pub fn write_log<W>(mut out: W, events: &[Event]) -> io::Result<()>
where
    W: Write,
{
    for event in events {
        let line = event.to_string();

        if line.contains(BREAKS) {
            writeln!(out, "{}", line.replace(BREAKS, " "))?;
        } else {
            writeln!(out, "{line}")?;
        }
    }

    out.flush()
}

/// Write events as CSV with the columns
/// `timestamp_ms,actor,id,phase,detail`.
pub fn write_csv<W>(out: W, events: &[Event]) -> Result<()>
where
    W: Write,
{
    let mut writer = csv::Writer::from_writer(out);

    for event in events {
        writer.serialize(Row {
            timestamp_ms: event.timestamp as f64 / 1_000_000.0,
            actor: event.actor,
            id: event.actor_id,
            phase: event.phase,
            detail: &event.detail,
        })?;
    }

    writer.flush()?;
    Ok(())
}

/// Write snapshots as CSV, one row per snapshot.
pub fn write_metrics_csv<W>(out: W, snapshots: &[Snapshot]) -> Result<()>
where
    W: Write,
{
    let mut writer = csv::Writer::from_writer(out);

    for snapshot in snapshots {
        writer.serialize(snapshot)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write events as CSV to the given path.
pub fn write_csv_path<P>(path: P, events: &[Event]) -> Result<()>
where
    P: AsRef<Path>,
{
    let out = BufWriter::new(File::create(path)?);
    write_csv(out, events)
}

#[cfg(test)]
mod tests {
    use crate::event::Clock;
    use crate::sink::EventSink;

    use super::*;

    fn events() -> Vec<Event> {
        let sink = EventSink::new(Clock::start(), None);
        sink.record(
            ActorKind::Writer,
            1,
            Phase::Writing,
            String::from("old = 0, new = 1"),
        );
        sink.record(
            ActorKind::Reader,
            2,
            Phase::Finished,
            String::from("line\tbreak\nhere"),
        );
        sink.history()
    }

    #[test]
    fn log_has_one_line_per_event() {
        let mut out = Vec::new();
        write_log(&mut out, &events()).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("Writer 1 WRITING | old = 0, new = 1"));
        assert!(lines[1].ends_with("Reader 2 finished | line break here"));
    }

    #[test]
    fn csv_quotes_details() {
        let mut out = Vec::new();
        write_csv(&mut out, &events()).unwrap();

        let mut reader = csv::Reader::from_reader(out.as_slice());
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            ["timestamp_ms", "actor", "id", "phase", "detail"]
        );

        let records = reader.records().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][1], "writer");
        assert_eq!(&records[0][3], "writing");
        assert_eq!(&records[0][4], "old = 0, new = 1");
        assert_eq!(&records[1][4], "line\tbreak\nhere");
    }

    #[test]
    fn metrics_csv_has_header() {
        let mut out = Vec::new();
        let snapshot = Snapshot {
            timestamp: 1,
            active_readers: 2,
            waiting_writers: 1,
            admitted_writers: 0,
            value: 3,
        };

        write_metrics_csv(&mut out, &[snapshot]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "timestamp,active_readers,waiting_writers,admitted_writers,value\n1,2,1,0,3\n"
        );
    }

    #[test]
    fn write_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulation_logs.csv");
        write_csv_path(&path, &events()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("timestamp_ms,actor,id,phase,detail\n"));
        assert_eq!(text.lines().count(), 4);
    }
}
