use clap::{Args, Parser, Subcommand, ValueEnum};

use pacer::error::{ensure_interval, ensure_window};
use pacer::ConfigError;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Meter the byte stream on stdin: chunk rate and average chunk size
    Meter(Meter),
    /// Average labelled samples read from stdin as `<label> <value>` lines
    Samples(Samples),
}

#[derive(Parser, Clone, Debug)]
pub struct Meter {
    #[command(flatten)]
    pub report: ReportOpts,

    /// Chunks buffered between the stdin reader and the meter
    #[arg(long, default_value_t = 1024)]
    pub buffer: usize,
}

#[derive(Parser, Clone, Debug)]
pub struct Samples {
    #[command(flatten)]
    pub report: ReportOpts,
}

#[derive(Args, Clone, Debug)]
pub struct ReportOpts {
    /// Trailing window for rate counting, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub window_ms: u64,

    /// Samples kept per rolling average
    #[arg(long, default_value_t = 32)]
    pub capacity: usize,

    /// Minimum gap between reports, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub report_ms: u64,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl ReportOpts {
    pub fn window_micros(&self) -> Result<u64, ConfigError> {
        ensure_window(self.window_ms.saturating_mul(1_000))
    }

    pub fn report_micros(&self) -> Result<u64, ConfigError> {
        ensure_interval(self.report_ms.saturating_mul(1_000))
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_defaults() {
        let cli = Cli::try_parse_from(["pacer", "meter"]).unwrap();
        match cli.command {
            Some(Commands::Meter(m)) => {
                assert_eq!(m.buffer, 1024);
                assert_eq!(m.report.window_micros(), Ok(1_000_000));
                assert_eq!(m.report.capacity, 32);
                assert_eq!(m.report.format, OutputFormat::Text);
            }
            _ => panic!("expected meter subcommand"),
        }
    }

    #[test]
    fn samples_options_parse() {
        let cli = Cli::try_parse_from([
            "pacer",
            "samples",
            "--report-ms",
            "250",
            "--format",
            "json",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Samples(s)) => {
                assert_eq!(s.report.report_micros(), Ok(250_000));
                assert_eq!(s.report.format, OutputFormat::Json);
            }
            _ => panic!("expected samples subcommand"),
        }
    }

    #[test]
    fn zero_window_is_a_config_error() {
        let cli = Cli::try_parse_from(["pacer", "meter", "--window-ms", "0"]).unwrap();
        let Some(Commands::Meter(m)) = cli.command else {
            panic!("expected meter subcommand");
        };
        assert_eq!(m.report.window_micros(), Err(ConfigError::ZeroWindow));
    }
}
