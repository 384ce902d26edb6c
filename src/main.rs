mod cli;
mod meter;
mod registry;
mod report;
mod samples;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::meter::run_meter;
use crate::samples::{run_samples, SampleParseError};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Some(Commands::Meter(meter)) => run_meter(meter),
        Some(Commands::Samples(samples)) => run_samples(samples),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: bad configuration, 3: stdin/stdout failure, 4: malformed sample, 1: other
    for cause in err.chain() {
        if cause.is::<pacer::ConfigError>() {
            return 2;
        }
        if cause.is::<std::io::Error>() {
            return 3;
        }
        if cause.is::<SampleParseError>() {
            return 4;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_config_error() {
        let err = anyhow::Error::from(pacer::ConfigError::ZeroWindow);
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_io_error_behind_context() {
        let err = Err::<(), _>(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .context("Writing report")
            .unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
    }

    #[test]
    fn exit_code_sample_error() {
        let err = anyhow::Error::from(SampleParseError::MissingValue { line: 3 });
        assert_eq!(exit_code_for_error(&err), 4);
    }

    #[test]
    fn exit_code_other() {
        let err = anyhow::anyhow!("other");
        assert_eq!(exit_code_for_error(&err), 1);
    }
}
