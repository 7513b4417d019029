//! Backend kinds and the address tuple that selects one object.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RepoError;

/// Storage providers a transfer can read from or write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepoKind {
    /// Local filesystem.
    #[serde(rename = "File")]
    File,
    /// S3-compatible store using multipart uploads.
    #[serde(rename = "S3")]
    S3,
    /// S3-compatible store using single-request uploads.
    #[serde(rename = "S3Standard")]
    S3Standard,
    /// OpenStack Swift object store.
    #[serde(rename = "Swift")]
    Swift,
}

impl RepoKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "File",
            Self::S3 => "S3",
            Self::S3Standard => "S3Standard",
            Self::Swift => "Swift",
        }
    }

    /// Remote kinds need an endpoint URI.
    #[must_use]
    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::File)
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoKind {
    type Err = RepoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "File" => Ok(Self::File),
            "S3" => Ok(Self::S3),
            "S3Standard" => Ok(Self::S3Standard),
            "Swift" => Ok(Self::Swift),
            other => Err(RepoError::UnknownKind {
                value: other.to_string(),
            }),
        }
    }
}

/// Account and secret for a remote provider, already decrypted.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Credentials {
    /// Access key or user name.
    pub account: String,
    /// Secret key or password.
    pub secret: String,
}

impl Credentials {
    /// Pair an account with its secret.
    #[must_use]
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One object address: provider kind, endpoint, credentials, root, and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Provider kind.
    pub kind: RepoKind,
    /// Service endpoint; required for remote kinds.
    pub endpoint: Option<Url>,
    /// Credentials for remote kinds.
    pub credentials: Credentials,
    /// Directory, bucket, or container.
    pub root: String,
    /// Object key within the root.
    pub key: String,
}

impl Location {
    /// Local file address.
    #[must_use]
    pub fn local(root: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: RepoKind::File,
            endpoint: None,
            credentials: Credentials::default(),
            root: root.into(),
            key: key.into(),
        }
    }

    /// Same location pointing at another key.
    #[must_use]
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..self.clone()
        }
    }

    /// Local root directory; an empty root means the working directory.
    #[must_use]
    pub fn local_root(&self) -> PathBuf {
        if self.root.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.root)
        }
    }

    pub(crate) fn require_endpoint(&self) -> Result<&Url, RepoError> {
        self.endpoint.as_ref().ok_or(RepoError::MissingEndpoint {
            kind: self.kind.as_str(),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}:{}/{}/{}", self.kind, endpoint, self.root, self.key),
            None => write!(f, "{}:{}/{}", self.kind, self.root, self.key),
        }
    }
}

/// Join two key fragments with exactly one `/` between them.
#[must_use]
pub fn combine_keys(head: &str, tail: &str) -> String {
    let head = head.trim();
    if head.is_empty() {
        return tail.to_string();
    }
    if head.ends_with('/') {
        format!("{head}{tail}")
    } else {
        format!("{head}/{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_wire_names() {
        assert_eq!("File".parse::<RepoKind>().ok(), Some(RepoKind::File));
        assert_eq!("S3".parse::<RepoKind>().ok(), Some(RepoKind::S3));
        assert_eq!("S3Standard".parse::<RepoKind>().ok(), Some(RepoKind::S3Standard));
        assert_eq!("Swift".parse::<RepoKind>().ok(), Some(RepoKind::Swift));
        assert!(matches!(
            "Ftp".parse::<RepoKind>(),
            Err(RepoError::UnknownKind { value }) if value == "Ftp"
        ));
    }

    #[test]
    fn kind_serde_uses_wire_names() {
        let json = serde_json::to_string(&RepoKind::S3).expect("serialize");
        assert_eq!(json, "\"S3\"");
        let back: RepoKind = serde_json::from_str("\"Swift\"").expect("deserialize");
        assert_eq!(back, RepoKind::Swift);
    }

    #[test]
    fn variant_names_match_wire_names() -> Result<(), serde_json::Error> {
        for kind in [
            RepoKind::File,
            RepoKind::S3,
            RepoKind::S3Standard,
            RepoKind::Swift,
        ] {
            assert_eq!(format!("{kind:?}"), kind.as_str());
            assert_eq!(serde_json::to_string(&kind)?, format!("\"{kind}\""));
        }
        Ok(())
    }

    #[test]
    fn combine_inserts_single_separator() {
        assert_eq!(combine_keys("out", "a.txt"), "out/a.txt");
        assert_eq!(combine_keys("out/", "a.txt"), "out/a.txt");
        assert_eq!(combine_keys("  out ", "a.txt"), "out/a.txt");
        assert_eq!(combine_keys("", "a.txt"), "a.txt");
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = Credentials::new("AKID", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn empty_local_root_is_working_directory() {
        assert_eq!(Location::local("", "k").local_root(), PathBuf::from("."));
        assert_eq!(Location::local("/data", "k").local_root(), PathBuf::from("/data"));
    }
}
