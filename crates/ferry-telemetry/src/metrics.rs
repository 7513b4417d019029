//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Label values are restricted to task kinds and outcomes so cardinality stays fixed.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Final state of a task as recorded in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Exit code zero.
    Complete,
    /// Non-zero or missing exit code.
    Failed,
}

impl Outcome {
    /// Outcome for an optional exit code.
    #[must_use]
    pub const fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Complete,
            _ => Self::Failed,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Prometheus-backed metrics registry shared across the agent.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    tasks_submitted_total: IntCounterVec,
    tasks_finished_total: IntCounterVec,
    transfer_retries_total: IntCounter,
    transfer_bytes_total: IntCounter,
    active_tasks: IntGauge,
    notifications_failed_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Tasks currently running.
    pub active_tasks: i64,
    /// Transfer attempts that were retried.
    pub transfer_retries_total: u64,
    /// Bytes delivered by transfers.
    pub transfer_bytes_total: u64,
    /// Completion notifications that could not be delivered.
    pub notifications_failed_total: u64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tasks_submitted_total = IntCounterVec::new(
            Opts::new("tasks_submitted_total", "Tasks accepted by kind"),
            &["kind"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "tasks_submitted_total",
            source,
        })?;
        let tasks_finished_total = IntCounterVec::new(
            Opts::new("tasks_finished_total", "Tasks finalized by kind and outcome"),
            &["kind", "outcome"],
        )
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "tasks_finished_total",
            source,
        })?;
        let transfer_retries_total = counter(
            "transfer_retries_total",
            "Transfer attempts that failed and were retried",
        )?;
        let transfer_bytes_total =
            counter("transfer_bytes_total", "Bytes delivered by transfers")?;
        let active_tasks = IntGauge::with_opts(Opts::new("active_tasks", "Tasks currently running"))
            .map_err(|source| TelemetryError::MetricsCollector {
                name: "active_tasks",
                source,
            })?;
        let notifications_failed_total = counter(
            "notifications_failed_total",
            "Completion notifications that could not be delivered",
        )?;

        register(&registry, "tasks_submitted_total", &tasks_submitted_total)?;
        register(&registry, "tasks_finished_total", &tasks_finished_total)?;
        register(&registry, "transfer_retries_total", &transfer_retries_total)?;
        register(&registry, "transfer_bytes_total", &transfer_bytes_total)?;
        register(&registry, "active_tasks", &active_tasks)?;
        register(
            &registry,
            "notifications_failed_total",
            &notifications_failed_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                tasks_submitted_total,
                tasks_finished_total,
                transfer_retries_total,
                transfer_bytes_total,
                active_tasks,
                notifications_failed_total,
            }),
        })
    }

    /// Record an accepted task and count it as active.
    pub fn task_submitted(&self, kind: &str) {
        self.inner
            .tasks_submitted_total
            .with_label_values(&[kind])
            .inc();
        self.inner.active_tasks.inc();
    }

    /// Record a finalized task and release its active slot.
    pub fn task_finished(&self, kind: &str, outcome: Outcome) {
        self.inner
            .tasks_finished_total
            .with_label_values(&[kind, outcome.label()])
            .inc();
        self.inner.active_tasks.dec();
    }

    /// Count one retried transfer attempt.
    pub fn inc_transfer_retry(&self) {
        self.inner.transfer_retries_total.inc();
    }

    /// Add delivered transfer bytes.
    pub fn add_transfer_bytes(&self, bytes: u64) {
        self.inner.transfer_bytes_total.inc_by(bytes);
    }

    /// Count one undelivered completion notification.
    pub fn inc_notification_failure(&self) {
        self.inner.notifications_failed_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_tasks: self.inner.active_tasks.get(),
            transfer_retries_total: self.inner.transfer_retries_total.get(),
            transfer_bytes_total: self.inner.transfer_bytes_total.get(),
            notifications_failed_total: self.inner.notifications_failed_total.get(),
        }
    }
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
