//! Subscriber setup for the binary.
//!
//! Priority for determining the log filter:
//! 1. `--log-level` CLI flag
//! 2. `KUMITATE_LOG` environment variable, any `EnvFilter` directive
//! 3. `info`
//!
//! Log lines go through the indicatif writer on stderr so they do not tear
//! the task spinners.

use clap::ValueEnum;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable read when no level is passed on the command line.
pub const LOG_ENV: &str = "KUMITATE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Pick the filter without installing anything.
pub fn filter(level: Option<LogLevel>) -> EnvFilter {
    if let Some(level) = level {
        return EnvFilter::new(level.as_directive());
    }

    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("ignoring {LOG_ENV}='{directive}': {e}");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::new("info"),
    }
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(level: Option<LogLevel>) -> anyhow::Result<()> {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter(level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}
