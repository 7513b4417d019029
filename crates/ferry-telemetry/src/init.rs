//! Logging bootstrap for the agent and the `ferry` binary.
//!
//! # Design
//! - One subscriber per process: an `EnvFilter` plus a single stderr fmt layer.
//! - Stdout belongs to task output, so every log line goes to stderr.
//! - `RUST_LOG` overrides the configured level.
//! - The build SHA is fixed by the first initialisation; later values are ignored.

use std::fmt;
use std::io;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing::{Subscriber, debug};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Level directive used when neither configuration nor `RUST_LOG` supplies one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const UNVERSIONED_BUILD: &str = "dev";

static BUILD_SHA: OnceCell<String> = OnceCell::new();

/// Install the process-wide tracing subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::SubscriberInstall`] when a global subscriber is
/// already in place.
pub fn init_logging(config: &LoggingConfig<'_>) -> Result<()> {
    let recorded = BUILD_SHA.set(config.build_sha.to_string()).is_ok();

    tracing_subscriber::registry()
        .with(level_filter(config.level))
        .with(stderr_layer(config.format))
        .try_init()
        .map_err(|source| TelemetryError::SubscriberInstall { source })?;

    if !recorded {
        debug!(
            requested = config.build_sha,
            active = build_sha(),
            "build sha already recorded"
        );
    }
    debug!(format = %config.format, level = config.level, "logging ready");
    Ok(())
}

/// Build SHA stamped on the root span.
///
/// Falls back to `FERRY_BUILD_SHA` from the compile environment, then `dev`.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD_SHA.get().map_or_else(compiled_build_sha, String::as_str)
}

fn compiled_build_sha() -> &'static str {
    option_env!("FERRY_BUILD_SHA").unwrap_or(UNVERSIONED_BUILD)
}

/// Inputs to [`init_logging`].
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Filter directive such as `info` or `ferry_core=debug`.
    pub level: &'a str,
    /// Line format.
    pub format: LogFormat,
    /// Value reported as `build_sha` on the root span.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Log line format, selected by `FERRY_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Human-readable lines.
    Pretty,
}

impl LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    /// Accepts `json`, `pretty`, or `text`, ignoring case and surrounding space.
    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(other.to_string()),
        }
    }
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn stderr_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Pretty => layer.boxed(),
    }
}
