use std::collections::HashMap;
use std::time::Duration;

use ferry_config::env::{
    ENV_AGENT_URI, ENV_LOG_FORMAT, ENV_NOTIFY_DELAY_MS, ENV_S3_PART_BYTES, ENV_SHELL,
    ENV_TRANSFER_ATTEMPTS,
};
use ferry_config::{AgentConfig, ConfigError, load_with};
use ferry_telemetry::LogFormat;

type TestResult<T> = anyhow::Result<T>;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn empty_environment_yields_defaults() -> TestResult<()> {
    let config = load_with(env(&[]))?;
    let defaults = AgentConfig::default();
    assert_eq!(config.agent_uri, defaults.agent_uri);
    assert_eq!(config.transfer_attempts, 3);
    assert_eq!(config.notify_delay, Duration::from_millis(1500));
    Ok(())
}

#[test]
fn overrides_are_applied() -> TestResult<()> {
    let config = load_with(env(&[
        (ENV_AGENT_URI, "https://agent-7.example.com:8443/task"),
        (ENV_SHELL, "/bin/sh"),
        (ENV_NOTIFY_DELAY_MS, "0"),
        (ENV_TRANSFER_ATTEMPTS, "5"),
        (ENV_S3_PART_BYTES, "16777216"),
        (ENV_LOG_FORMAT, "json"),
    ]))?;
    assert_eq!(
        config.agent_uri.as_str(),
        "https://agent-7.example.com:8443/task"
    );
    assert_eq!(config.shell, "/bin/sh");
    assert_eq!(config.notify_delay, Duration::ZERO);
    assert_eq!(config.transfer_attempts, 5);
    assert_eq!(config.s3_part_bytes, 16 * 1024 * 1024);
    assert_eq!(config.log.format, LogFormat::Json);
    Ok(())
}

#[test]
fn attempts_outside_range_are_rejected() {
    for raw in ["0", "11", "three"] {
        let err = load_with(env(&[(ENV_TRANSFER_ATTEMPTS, raw)]))
            .expect_err("attempts should be rejected");
        match err {
            ConfigError::InvalidField { field, value, .. } => {
                assert_eq!(field, ENV_TRANSFER_ATTEMPTS);
                assert_eq!(value, raw);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

#[test]
fn part_size_below_minimum_is_rejected() {
    let err = load_with(env(&[(ENV_S3_PART_BYTES, "1048576")])).expect_err("too small");
    assert!(matches!(
        err,
        ConfigError::InvalidField {
            field: ENV_S3_PART_BYTES,
            reason: "must be at least 5 MiB",
            ..
        }
    ));
}

#[test]
fn unknown_log_format_is_rejected() {
    let err = load_with(env(&[(ENV_LOG_FORMAT, "xml")])).expect_err("bad format");
    assert!(matches!(
        err,
        ConfigError::InvalidField {
            field: ENV_LOG_FORMAT,
            ..
        }
    ));
}
