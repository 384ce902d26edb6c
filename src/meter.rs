use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use crossbeam_channel as channel;
use pacer::{
    Clock, ConstantInterval, EventRateCounter, RollingAverage, SystemClock, Throttle,
    DEFAULT_RATE_WINDOW_MICROS,
};
use tracing::{debug, info, warn};

use crate::cli::Meter;
use crate::report::{emit, emit_throttled, MeterReport};

/// How long the meter loop waits for input before re-checking the stop flag
/// and the report throttle.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CHUNK_SIZE: usize = 4096;

pub(crate) type ChunkSizes = RollingAverage<u64, 32>;
pub(crate) type WindowRate<C> = EventRateCounter<DEFAULT_RATE_WINDOW_MICROS, C>;

/// Stop flag raised by Ctrl-C.
pub(crate) fn install_stop_flag() -> Arc<AtomicBool> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop = stop_flag.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    }) {
        warn!(?e, "Could not install Ctrl-C handler");
    }
    stop_flag
}

pub fn run_meter(meter: Meter) -> Result<()> {
    let stop_flag = install_stop_flag();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_meter_with_shutdown(meter, io::stdin(), &mut out, SystemClock, stop_flag)?;
    Ok(())
}

pub(crate) fn run_meter_with_shutdown<R, C>(
    meter: Meter,
    input: R,
    out: &mut dyn Write,
    clock: C,
    stop_flag: Arc<AtomicBool>,
) -> Result<MeterReport>
where
    R: Read + Send + 'static,
    C: Clock + Clone,
{
    let opts = &meter.report;
    let window_micros = opts.window_micros()?;
    let report_micros = opts.report_micros()?;

    let chunks = WindowRate::with_window(clock.clone(), window_micros);
    let sizes = ChunkSizes::with_capacity(opts.capacity);
    // armed before any input arrives, so the first report waits a full interval
    let throttle = Throttle::new(clock, ConstantInterval::from_micros(report_micros), false);
    let mut total_bytes: u64 = 0;

    // - chunks: stdin reader -> meter loop
    let (chunk_tx, chunk_rx) = channel::bounded::<Bytes>(meter.buffer.max(1));
    let reader = spawn_chunk_reader(input, chunk_tx, stop_flag.clone());
    info!(window_ms = opts.window_ms, report_ms = opts.report_ms, "Metering stdin");

    let drained = loop {
        if stop_flag.load(Ordering::Relaxed) {
            break false;
        }
        match chunk_rx.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                chunks.record_event();
                sizes.push(chunk.len() as u64);
                total_bytes += chunk.len() as u64;
            }
            Err(channel::RecvTimeoutError::Timeout) => {}
            Err(channel::RecvTimeoutError::Disconnected) => break true,
        }
        emit_throttled(
            &throttle,
            || snapshot(&chunks, &sizes, total_bytes, opts.window_ms),
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
        // the reader may be parked in a blocking read; leave it detached
        info!("Stop requested");
    }

    let report = snapshot(&chunks, &sizes, total_bytes, opts.window_ms);
    emit(&report, opts.format, out).context("Writing final report")?;
    info!(total_bytes, "Meter finished");
    Ok(report)
}

fn snapshot<C: Clock>(
    chunks: &WindowRate<C>,
    sizes: &ChunkSizes,
    total_bytes: u64,
    window_ms: u64,
) -> MeterReport {
    MeterReport {
        window_ms,
        chunks_in_window: chunks.get_rate(),
        chunks_per_sec: chunks.rate_per_sec(),
        avg_chunk_bytes: sizes.get_average(),
        last_chunk_bytes: sizes.get_last_value(),
        total_bytes,
    }
}

fn spawn_chunk_reader<R>(
    mut input: R,
    chunk_tx: channel::Sender<Bytes>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        while !stop.load(Ordering::Relaxed) {
            match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    // blocks when the meter falls behind
                    if chunk_tx.send(Bytes::copy_from_slice(&buffer[..n])).is_err() {
                        debug!("Meter loop gone, stopping reader");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(?e, "Error reading stdin");
                    return Err(e);
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{OutputFormat, ReportOpts};
    use pacer::ManualClock;
    use std::io::Cursor;

    fn meter(format: OutputFormat, report_ms: u64) -> Meter {
        Meter {
            report: ReportOpts {
                window_ms: 1_000,
                capacity: 8,
                report_ms,
                format,
            },
            buffer: 16,
        }
    }

    /// Advances the clock before handing out each chunk.
    struct TickingReader {
        chunks: Vec<Vec<u8>>,
        clock: ManualClock,
        step_micros: u64,
    }

    impl Read for TickingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            self.clock.advance(self.step_micros);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn eof_produces_final_report() {
        let clock = ManualClock::new(0);
        let input = Cursor::new(vec![7u8; 10_000]);
        let mut out = Vec::new();
        let stop = Arc::new(AtomicBool::new(false));

        let report =
            run_meter_with_shutdown(meter(OutputFormat::Text, 1_000), input, &mut out, clock, stop).unwrap();

        // 4096 + 4096 + 1808
        assert_eq!(report.total_bytes, 10_000);
        assert_eq!(report.chunks_in_window, 3);
        assert_eq!(report.avg_chunk_bytes, 3_333.0);
        assert_eq!(report.last_chunk_bytes, 1_808);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[test]
    fn reports_are_throttled_while_input_flows() {
        let clock = ManualClock::new(0);
        let input = TickingReader {
            chunks: vec![b"abc".to_vec(), b"defg".to_vec(), b"hi".to_vec()],
            clock: clock.clone(),
            step_micros: 2_000_000,
        };
        let mut out = Vec::new();
        let stop = Arc::new(AtomicBool::new(false));

        let report =
            run_meter_with_shutdown(meter(OutputFormat::Json, 1_000), input, &mut out, clock, stop).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() >= 2, "expected a throttled report plus the final one: {text}");
        let last: serde_json::Value = serde_json::from_str(lines[lines.len() - 1]).unwrap();
        assert_eq!(last["total_bytes"], 9);
        assert_eq!(report.last_chunk_bytes, 2);
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let clock = ManualClock::new(0);
        let input = Cursor::new(vec![1u8; 64]);
        let mut out = Vec::new();
        let stop = Arc::new(AtomicBool::new(true));

        let report =
            run_meter_with_shutdown(meter(OutputFormat::Text, 1_000), input, &mut out, clock, stop).unwrap();
        assert_eq!(report.total_bytes, 0);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }

    #[test]
    fn read_errors_are_io_errors() {
        let mut out = Vec::new();
        let stop = Arc::new(AtomicBool::new(false));
        let err = run_meter_with_shutdown(
            meter(OutputFormat::Text, 1_000),
            FailingReader,
            &mut out,
            ManualClock::new(0),
            stop,
        )
        .unwrap_err();
        assert!(err.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn zero_report_interval_is_rejected() {
        let mut out = Vec::new();
        let stop = Arc::new(AtomicBool::new(false));
        let err = run_meter_with_shutdown(
            meter(OutputFormat::Text, 0),
            Cursor::new(Vec::new()),
            &mut out,
            ManualClock::new(0),
            stop,
        )
        .unwrap_err();
        assert_eq!(err.downcast_ref::<pacer::ConfigError>(), Some(&pacer::ConfigError::ZeroInterval));
    }
}
