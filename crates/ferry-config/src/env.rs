//! Loading [`AgentConfig`] from environment variables.
//!
//! # Design
//! - Lookup is injected so tests never touch the process environment.
//! - Unset or blank variables fall back to defaults; malformed values are errors.

use std::str::FromStr;
use std::time::Duration;

use ferry_telemetry::LogFormat;
use tracing::debug;
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{AgentConfig, LogSettings};

/// Address of this agent, reported in notifications.
pub const ENV_AGENT_URI: &str = "FERRY_AGENT_URI";
/// Shell used for command tasks.
pub const ENV_SHELL: &str = "FERRY_SHELL";
/// Notification delay in milliseconds.
pub const ENV_NOTIFY_DELAY_MS: &str = "FERRY_NOTIFY_DELAY_MS";
/// Transfer attempts.
pub const ENV_TRANSFER_ATTEMPTS: &str = "FERRY_TRANSFER_ATTEMPTS";
/// Transfer read buffer size.
pub const ENV_COPY_BUFFER_BYTES: &str = "FERRY_COPY_BUFFER_BYTES";
/// SigV4 region.
pub const ENV_S3_REGION: &str = "FERRY_S3_REGION";
/// Multipart part size.
pub const ENV_S3_PART_BYTES: &str = "FERRY_S3_PART_BYTES";
/// HTTP timeout in seconds.
pub const ENV_HTTP_TIMEOUT_SECS: &str = "FERRY_HTTP_TIMEOUT_SECS";
/// Log level directive.
pub const ENV_LOG_LEVEL: &str = "FERRY_LOG_LEVEL";
/// Log format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "FERRY_LOG_FORMAT";

const MAX_TRANSFER_ATTEMPTS: u32 = 10;
const MIN_S3_PART_BYTES: usize = 5 * 1024 * 1024;
const MIN_COPY_BUFFER_BYTES: usize = 512;

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when a variable is set to a value
/// that does not parse or is out of range.
pub fn load_from_env() -> ConfigResult<AgentConfig> {
    load_with(|name| std::env::var(name).ok())
}

/// Load configuration using `lookup` to resolve variable names.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when a variable is set to a value
/// that does not parse or is out of range.
pub fn load_with<F>(lookup: F) -> ConfigResult<AgentConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| {
        lookup(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let defaults = AgentConfig::default();

    let agent_uri = match get(ENV_AGENT_URI) {
        Some(raw) => parse_agent_uri(&raw)?,
        None => defaults.agent_uri,
    };
    let shell = get(ENV_SHELL).unwrap_or(defaults.shell);

    let notify_delay = get(ENV_NOTIFY_DELAY_MS)
        .map(|raw| parse_number::<u64>(ENV_NOTIFY_DELAY_MS, &raw).map(Duration::from_millis))
        .transpose()?
        .unwrap_or(defaults.notify_delay);

    let transfer_attempts = match get(ENV_TRANSFER_ATTEMPTS) {
        Some(raw) => {
            let attempts = parse_number::<u32>(ENV_TRANSFER_ATTEMPTS, &raw)?;
            if !(1..=MAX_TRANSFER_ATTEMPTS).contains(&attempts) {
                return Err(ConfigError::invalid(
                    ENV_TRANSFER_ATTEMPTS,
                    "must be between 1 and 10",
                    raw,
                ));
            }
            attempts
        }
        None => defaults.transfer_attempts,
    };

    let copy_buffer_bytes = match get(ENV_COPY_BUFFER_BYTES) {
        Some(raw) => {
            let bytes = parse_number::<usize>(ENV_COPY_BUFFER_BYTES, &raw)?;
            if bytes < MIN_COPY_BUFFER_BYTES {
                return Err(ConfigError::invalid(
                    ENV_COPY_BUFFER_BYTES,
                    "must be at least 512 bytes",
                    raw,
                ));
            }
            bytes
        }
        None => defaults.copy_buffer_bytes,
    };

    let s3_region = get(ENV_S3_REGION).unwrap_or(defaults.s3_region);

    let s3_part_bytes = match get(ENV_S3_PART_BYTES) {
        Some(raw) => {
            let bytes = parse_number::<usize>(ENV_S3_PART_BYTES, &raw)?;
            if bytes < MIN_S3_PART_BYTES {
                return Err(ConfigError::invalid(
                    ENV_S3_PART_BYTES,
                    "must be at least 5 MiB",
                    raw,
                ));
            }
            bytes
        }
        None => defaults.s3_part_bytes,
    };

    let http_timeout = match get(ENV_HTTP_TIMEOUT_SECS) {
        Some(raw) => {
            let secs = parse_number::<u64>(ENV_HTTP_TIMEOUT_SECS, &raw)?;
            if secs == 0 {
                return Err(ConfigError::invalid(
                    ENV_HTTP_TIMEOUT_SECS,
                    "must be positive",
                    raw,
                ));
            }
            Duration::from_secs(secs)
        }
        None => defaults.http_timeout,
    };

    let log = LogSettings {
        level: get(ENV_LOG_LEVEL).unwrap_or(defaults.log.level),
        format: match get(ENV_LOG_FORMAT) {
            Some(raw) => LogFormat::from_str(&raw)
                .map_err(|_| ConfigError::invalid(ENV_LOG_FORMAT, "expected json or pretty", raw))?,
            None => defaults.log.format,
        },
    };

    let config = AgentConfig {
        agent_uri,
        shell,
        notify_delay,
        transfer_attempts,
        copy_buffer_bytes,
        s3_region,
        s3_part_bytes,
        http_timeout,
        log,
    };
    debug!(
        agent_uri = %config.agent_uri,
        shell = %config.shell,
        transfer_attempts = config.transfer_attempts,
        "loaded agent configuration"
    );
    Ok(config)
}

fn parse_agent_uri(raw: &str) -> ConfigResult<Url> {
    let url = Url::parse(raw)
        .map_err(|_| ConfigError::invalid(ENV_AGENT_URI, "not an absolute url", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            ENV_AGENT_URI,
            "scheme must be http or https",
            raw,
        ));
    }
    Ok(url)
}

fn parse_number<T: FromStr>(field: &'static str, raw: &str) -> ConfigResult<T> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::invalid(field, "not a non-negative integer", raw))
}
