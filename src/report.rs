use std::io::{self, Write};

use anyhow::{Context, Result};
use pacer::{Clock, IntervalStrategy, Outcome, Throttle};
use serde::Serialize;

use crate::cli::OutputFormat;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterReport {
    pub window_ms: u64,
    pub chunks_in_window: usize,
    pub chunks_per_sec: f64,
    pub avg_chunk_bytes: f64,
    pub last_chunk_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelReport {
    pub label: String,
    pub samples: usize,
    pub average: f64,
    pub last: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplesReport {
    pub window_ms: u64,
    pub lines_in_window: usize,
    pub labels: Vec<LabelReport>,
}

pub trait Render: Serialize {
    fn render_text(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl Render for MeterReport {
    fn render_text(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "chunks={}/{}ms ({:.1}/s)\tavg_chunk={:.1}B\tlast_chunk={}B\ttotal={}B",
            self.chunks_in_window,
            self.window_ms,
            self.chunks_per_sec,
            self.avg_chunk_bytes,
            self.last_chunk_bytes,
            self.total_bytes,
        )
    }
}

impl Render for SamplesReport {
    fn render_text(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "lines={}/{}ms", self.lines_in_window, self.window_ms)?;
        for l in &self.labels {
            writeln!(out, "{}\tavg={:.3}\tlast={}\tn={}", l.label, l.average, l.last, l.samples)?;
        }
        Ok(())
    }
}

/// Writes one report in the requested format, one JSON document per line.
pub fn emit<R: Render>(report: &R, format: OutputFormat, out: &mut dyn Write) -> io::Result<()> {
    match format {
        OutputFormat::Text => report.render_text(out)?,
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, report)?;
            writeln!(out)?;
        }
    }
    out.flush()
}

/// Emits the report built by `build` if the throttle lets it through.
///
/// The report is only built when it will be written, since building one
/// flushes expired events.
pub fn emit_throttled<S, C, R, F>(
    throttle: &Throttle<S, C>,
    build: F,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<()>
where
    S: IntervalStrategy,
    C: Clock,
    R: Render,
    F: FnOnce() -> R,
{
    let mut failure = None;
    let outcome = throttle.poll(|| match emit(&build(), format, out) {
        Ok(()) => true,
        Err(e) => {
            failure = Some(e);
            false
        }
    });
    match (outcome, failure) {
        (Outcome::Ran(false), Some(e)) => Err(e).context("Writing report"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meter_report() -> MeterReport {
        MeterReport {
            window_ms: 1_000,
            chunks_in_window: 4,
            chunks_per_sec: 4.0,
            avg_chunk_bytes: 512.0,
            last_chunk_bytes: 100,
            total_bytes: 2_048,
        }
    }

    #[test]
    fn text_meter_line() {
        let mut out = Vec::new();
        emit(&meter_report(), OutputFormat::Text, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "chunks=4/1000ms (4.0/s)\tavg_chunk=512.0B\tlast_chunk=100B\ttotal=2048B\n"
        );
    }

    #[test]
    fn json_is_one_document_per_line() {
        let mut out = Vec::new();
        emit(&meter_report(), OutputFormat::Json, &mut out).unwrap();
        emit(&meter_report(), OutputFormat::Json, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["total_bytes"], 2_048);
        assert_eq!(v["chunks_in_window"], 4);
    }

    #[test]
    fn throttled_emit_writes_once_per_interval() {
        use pacer::ManualClock;

        let clock = ManualClock::new(0);
        let throttle = Throttle::every_millis(clock.clone(), 100, true);
        let mut out = Vec::new();
        for _ in 0..3 {
            emit_throttled(&throttle, meter_report, OutputFormat::Text, &mut out).unwrap();
        }
        clock.advance_millis(101);
        emit_throttled(&throttle, meter_report, OutputFormat::Text, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[test]
    fn throttled_emit_surfaces_write_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let throttle = Throttle::every_millis(pacer::ManualClock::new(0), 100, true);
        let err = emit_throttled(&throttle, meter_report, OutputFormat::Text, &mut Broken).unwrap_err();
        let io = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn text_samples_lists_each_label() {
        let report = SamplesReport {
            window_ms: 500,
            lines_in_window: 3,
            labels: vec![
                LabelReport { label: "a".into(), samples: 1, average: 1.5, last: 1.5 },
                LabelReport { label: "b".into(), samples: 2, average: 2.0, last: 3.0 },
            ],
        };
        let mut out = Vec::new();
        emit(&report, OutputFormat::Text, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "lines=3/500ms\na\tavg=1.500\tlast=1.5\tn=1\nb\tavg=2.000\tlast=3\tn=2\n");
    }
}
