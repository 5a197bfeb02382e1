//! mcast CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: Validation failure
//! - 5: IaC error

use std::process::ExitCode;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use mcast_iac::IacError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const IAC_ERROR: u8 = 5;
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = init_logging(cli.verbose, cli.quiet);

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            return ExitCode::from(categorize_error(&e));
        }
    };

    if let Some(handle) = filter {
        apply_stack_log_level(&handle, &config.stack_log_level);
    }

    let result = match &cli.command {
        Commands::Synth(args) => commands::synth::execute(args, &config),
        Commands::Validate(args) => commands::validate::execute(args, &config),
        Commands::List(args) => commands::list::execute(args, &config),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Level forced by `--verbose` or `--quiet`, if any.
fn flag_level(verbose: bool, quiet: bool) -> Option<&'static str> {
    if verbose {
        Some("debug")
    } else if quiet {
        Some("error")
    } else {
        None
    }
}

fn log_directives(level: &str) -> String {
    let level = level.to_lowercase();
    format!("mcast={level},mcast_iac={level},warn")
}

/// Install the subscriber before the config is read.
///
/// `RUST_LOG` wins, then the flags. When neither is set the returned handle
/// lets the configured stack log level replace the `info` default.
fn init_logging(verbose: bool, quiet: bool) -> Option<FilterHandle> {
    let (filter, adjustable) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, false),
        Err(_) => match flag_level(verbose, quiet) {
            Some(level) => (EnvFilter::new(log_directives(level)), false),
            None => (EnvFilter::new(log_directives("info")), true),
        },
    };
    let (filter, handle) = reload::Layer::new(filter);

    let log_result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();

    // Logging already initialized, nothing to adjust
    if log_result.is_err() || !adjustable {
        return None;
    }
    Some(handle)
}

fn apply_stack_log_level(handle: &FilterHandle, stack_log_level: &str) {
    match EnvFilter::try_new(log_directives(stack_log_level)) {
        Ok(filter) => {
            if handle.reload(filter).is_err() {
                warn!("Could not apply stack log level {}", stack_log_level);
            }
        }
        Err(_) => warn!("Ignoring unknown stack log level {}", stack_log_level),
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(iac) = e.downcast_ref::<IacError>() {
        return match iac {
            IacError::ValidationFailed(_) => ExitCodes::VALIDATION_FAILURE,
            IacError::Config(_)
            | IacError::Yaml(_)
            | IacError::Toml(_)
            | IacError::InvalidCidr(_) => ExitCodes::INVALID_ARGS,
            _ => ExitCodes::IAC_ERROR,
        };
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("validation") {
        ExitCodes::VALIDATION_FAILURE
    } else if msg.contains("argument") || msg.contains("config") || msg.contains("not found") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
