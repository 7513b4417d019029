//! Typed agent settings.
//!
//! # Design
//! - Every field has a default so an empty environment yields a working agent.
//! - Values are validated once at load time; consumers never re-check them.

use std::time::Duration;

use ferry_telemetry::LogFormat;
use url::Url;

/// Default address reported as `source` in completion notifications.
pub const DEFAULT_AGENT_URI: &str = "http://localhost:8887/task";
/// Default shell for command tasks.
pub const DEFAULT_SHELL: &str = "/bin/bash";
/// Default delay before a completion notification fires.
pub const DEFAULT_NOTIFY_DELAY: Duration = Duration::from_millis(1500);
/// Default number of transfer attempts.
pub const DEFAULT_TRANSFER_ATTEMPTS: u32 = 3;
/// Default transfer read buffer.
pub const DEFAULT_COPY_BUFFER_BYTES: usize = 64 * 1024;
/// Default SigV4 region.
pub const DEFAULT_S3_REGION: &str = "us-east-1";
/// Default multipart part size.
pub const DEFAULT_S3_PART_BYTES: usize = 8 * 1024 * 1024;
/// Default HTTP timeout for backends and notifications.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: ferry_telemetry::DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::infer(),
        }
    }
}

/// Settings for one agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// This agent's address.
    pub agent_uri: Url,
    /// Shell that runs command tasks.
    pub shell: String,
    /// Delay before completion notifications.
    pub notify_delay: Duration,
    /// Total transfer attempts.
    pub transfer_attempts: u32,
    /// Read buffer for transfer pipelines.
    pub copy_buffer_bytes: usize,
    /// SigV4 signing region.
    pub s3_region: String,
    /// Multipart part size.
    pub s3_part_bytes: usize,
    /// HTTP timeout for backends and notifications.
    pub http_timeout: Duration,
    /// Logging settings.
    pub log: LogSettings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_uri: Url::parse(DEFAULT_AGENT_URI)
                .unwrap_or_else(|_| unreachable!("default agent uri is valid")),
            shell: DEFAULT_SHELL.to_string(),
            notify_delay: DEFAULT_NOTIFY_DELAY,
            transfer_attempts: DEFAULT_TRANSFER_ATTEMPTS,
            copy_buffer_bytes: DEFAULT_COPY_BUFFER_BYTES,
            s3_region: DEFAULT_S3_REGION.to_string(),
            s3_part_bytes: DEFAULT_S3_PART_BYTES,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            log: LogSettings::default(),
        }
    }
}
