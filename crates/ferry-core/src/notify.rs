//! Completion notification trigger and its HTTP transport.
//!
//! # Design
//! - The trigger is a trait so executors never depend on the transport.
//! - Delivery waits a fixed delay, sends once, and never retries.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Status every task reports leaving.
pub const OLD_STATUS: &str = "RUNNING";

/// Status a finished task reports entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Exit code zero.
    Complete,
    /// Any other exit code, or none.
    Failed,
}

impl CompletionStatus {
    /// Status for an optional exit code.
    #[must_use]
    pub const fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Complete,
            _ => Self::Failed,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        }
    }
}

/// Told when a task has been finalized.
#[async_trait]
pub trait CompletionNotifier: Send + Sync + fmt::Debug {
    /// Report that the task targeting `target` finished with `exit_code`.
    ///
    /// # Errors
    ///
    /// Fails when the notification could not be delivered.
    async fn notify(&self, target: &Url, exit_code: Option<i32>) -> CoreResult<()>;
}

/// Sends the completion GET to the task's notification address.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    source: Url,
    delay: Duration,
}

impl HttpNotifier {
    /// Notifier that reports `source` as this agent's address after `delay`.
    #[must_use]
    pub const fn new(client: reqwest::Client, source: Url, delay: Duration) -> Self {
        Self {
            client,
            source,
            delay,
        }
    }

    /// Notification URL with the completion parameters appended.
    #[must_use]
    pub fn request_url(&self, target: &Url, exit_code: Option<i32>, reference: Uuid) -> Url {
        let mut url = target.clone();
        url.query_pairs_mut()
            .append_pair("source", self.source.as_str())
            .append_pair("oldStatus", OLD_STATUS)
            .append_pair("newStatus", CompletionStatus::from_exit_code(exit_code).as_str())
            .append_pair("reference", &reference.to_string())
            .append_pair("sequence", "0");
        url
    }
}

#[async_trait]
impl CompletionNotifier for HttpNotifier {
    async fn notify(&self, target: &Url, exit_code: Option<i32>) -> CoreResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let url = self.request_url(target, exit_code, Uuid::new_v4());
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| CoreError::Notify {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::NotifyStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(url = %target, status = status.as_u16(), "delivered completion notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_exit_code() {
        assert_eq!(CompletionStatus::from_exit_code(Some(0)), CompletionStatus::Complete);
        assert_eq!(CompletionStatus::from_exit_code(Some(1)), CompletionStatus::Failed);
        assert_eq!(CompletionStatus::from_exit_code(None), CompletionStatus::Failed);
    }

    #[test]
    fn request_url_keeps_existing_query() {
        let notifier = HttpNotifier::new(
            reqwest::Client::new(),
            Url::parse("http://agent:8887/task").expect("url"),
            Duration::ZERO,
        );
        let target = Url::parse("http://orchestrator/callback?job=42").expect("url");
        let url = notifier.request_url(&target, Some(3), Uuid::nil());
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("job".into(), "42".into()));
        assert!(pairs.contains(&("newStatus".into(), "FAILED".into())));
        assert!(pairs.contains(&("oldStatus".into(), "RUNNING".into())));
        assert!(pairs.contains(&("source".into(), "http://agent:8887/task".into())));
        assert!(pairs.contains(&("sequence".into(), "0".into())));
        assert!(pairs.contains(&("reference".into(), Uuid::nil().to_string())));
    }
}
