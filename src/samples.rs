use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel as channel;
use pacer::{Clock, ConstantInterval, SystemClock, Throttle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cli::Samples;
use crate::meter::{install_stop_flag, WindowRate, POLL_INTERVAL};
use crate::registry::SampleRegistry;
use crate::report::{emit, emit_throttled, SamplesReport};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleParseError {
    #[error("line {line}: expected `<label> <value>`")]
    MissingValue { line: usize },
    #[error("line {line}: `{value}` is not a finite number")]
    InvalidValue { line: usize, value: String },
    #[error("line {line}: unexpected input after the value")]
    TrailingInput { line: usize },
}

/// Parses one `<label> <value>` line. Blank lines and `#` comments yield `None`.
pub fn parse_sample_line(text: &str, line: usize) -> Result<Option<(&str, f64)>, SampleParseError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }
    let mut fields = text.split_whitespace();
    let (Some(label), Some(raw)) = (fields.next(), fields.next()) else {
        return Err(SampleParseError::MissingValue { line });
    };
    if fields.next().is_some() {
        return Err(SampleParseError::TrailingInput { line });
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some((label, value))),
        _ => Err(SampleParseError::InvalidValue {
            line,
            value: raw.to_owned(),
        }),
    }
}

pub fn run_samples(samples: Samples) -> Result<()> {
    let stop_flag = install_stop_flag();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_samples_with_shutdown(samples, io::stdin(), &mut out, SystemClock, stop_flag)?;
    Ok(())
}

pub(crate) fn run_samples_with_shutdown<R, C>(
    samples: Samples,
    input: R,
    out: &mut dyn Write,
    clock: C,
    stop_flag: Arc<AtomicBool>,
) -> Result<SamplesReport>
where
    R: Read + Send + 'static,
    C: Clock + Clone,
{
    let opts = &samples.report;
    let window_micros = opts.window_micros()?;
    let report_micros = opts.report_micros()?;

    let registry = SampleRegistry::new(opts.capacity);
    let lines = WindowRate::with_window(clock.clone(), window_micros);
    let throttle = Throttle::new(clock, ConstantInterval::from_micros(report_micros), false);

    // - lines: stdin reader -> sample loop
    let (line_tx, line_rx) = channel::bounded::<String>(1024);
    let reader = spawn_line_reader(input, line_tx, stop_flag.clone());
    info!(window_ms = opts.window_ms, report_ms = opts.report_ms, "Averaging samples from stdin");

    let mut line_no = 0usize;
    let drained = loop {
        if stop_flag.load(Ordering::Relaxed) {
            break false;
        }
        match line_rx.recv_timeout(POLL_INTERVAL) {
            Ok(text) => {
                line_no += 1;
                if let Some((label, value)) = parse_sample_line(&text, line_no)? {
                    registry.record(label, value);
                    lines.record_event();
                }
            }
            Err(channel::RecvTimeoutError::Timeout) => {}
            Err(channel::RecvTimeoutError::Disconnected) => break true,
        }
        emit_throttled(
            &throttle,
            || snapshot(&registry, &lines, opts.window_ms),
            opts.format,
            out,
        )?;
    };

    if drained {
        reader
            .join()
            .map_err(|_| anyhow!("stdin reader panicked"))?
            .context("Reading standard input")?;
    } else {
        info!("Stop requested");
    }

    let report = snapshot(&registry, &lines, opts.window_ms);
    emit(&report, opts.format, out).context("Writing final report")?;
    info!(labels = registry.len(), lines = line_no, "Sampling finished");
    Ok(report)
}

fn snapshot<C: Clock>(registry: &SampleRegistry, lines: &WindowRate<C>, window_ms: u64) -> SamplesReport {
    SamplesReport {
        window_ms,
        lines_in_window: lines.get_rate(),
        labels: registry.summary(),
    }
}

fn spawn_line_reader<R>(
    input: R,
    line_tx: channel::Sender<String>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(input).lines() {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            let line = line.map_err(|e| {
                warn!(?e, "Error reading stdin");
                e
            })?;
            if line_tx.send(line).is_err() {
                debug!("Sample loop gone, stopping reader");
                break;
            }
        }
        Ok(())
    })
}
