//! Inbound task requests.

use std::collections::BTreeMap;
use std::fmt;

use ferry_repo::{Credentials, FileRef, Location, RepoKind};
use serde::Deserialize;
use url::Url;

use crate::error::{CoreError, CoreResult};

/// Run a shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// Command text handed to the shell.
    pub cmd: String,
    /// Input written to the process.
    #[serde(default)]
    pub stdin: String,
    /// Completion notification target.
    #[serde(default)]
    pub notification: Option<Url>,
    /// Input artifacts; local entries are refreshed from disk after the command exits.
    #[serde(default)]
    pub files: Vec<FileRef>,
    /// Variables merged over the agent's environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandRequest {
    /// Request for `cmd` with no input.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Self::default()
        }
    }
}

/// One side of a transfer, with credentials already decrypted.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Service endpoint; required for remote kinds.
    #[serde(default)]
    pub address: Option<Url>,
    /// Backend kind name (`File`, `S3`, `S3Standard`, `Swift`).
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Directory, bucket, or container.
    #[serde(default)]
    pub root: String,
    /// Object key.
    pub key: String,
    /// Access key or user name.
    #[serde(default)]
    pub account: String,
    /// Secret key or password.
    #[serde(default)]
    pub secret: String,
}

fn default_kind() -> String {
    RepoKind::S3.as_str().to_string()
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .field("root", &self.root)
            .field("key", &self.key)
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Endpoint {
    /// Local file endpoint.
    #[must_use]
    pub fn local(root: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: RepoKind::File.as_str().to_string(),
            root: root.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    /// Resolve the kind name into a backend address.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownKind`] for kind names no backend handles.
    pub fn to_location(&self, side: &'static str) -> CoreResult<Location> {
        let kind = self
            .kind
            .parse::<RepoKind>()
            .map_err(|_| CoreError::UnknownKind {
                side,
                value: self.kind.clone(),
            })?;
        Ok(Location {
            kind,
            endpoint: self.address.clone(),
            credentials: Credentials::new(self.account.clone(), self.secret.clone()),
            root: self.root.clone(),
            key: self.key.clone(),
        })
    }
}

/// Move one object, archive member, or wildcard set between backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Tag recorded on produced artifacts.
    #[serde(default)]
    pub tag: String,
    /// Description recorded on produced artifacts.
    #[serde(default)]
    pub description: String,
    /// Where to read from.
    pub source: Endpoint,
    /// Where to write to.
    pub destination: Endpoint,
    /// Completion notification target.
    #[serde(default)]
    pub notification: Option<Url>,
    /// Skip the copy when the destination already has the source's length.
    #[serde(default)]
    pub lazy: bool,
}
