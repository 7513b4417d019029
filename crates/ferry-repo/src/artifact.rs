//! Descriptors for objects produced by transfers and commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::location::RepoKind;

const CANONICAL_KEY_LIMIT: usize = 255;
const CANONICAL_HASH_CHARS: usize = 16;

/// Metadata for one produced object. Never mutated after creation except when a local
/// manifest entry is refreshed from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Caller-supplied tag.
    pub tag: String,
    /// Caller-supplied description.
    #[serde(default)]
    pub description: String,
    /// Endpoint of the provider holding the object.
    #[serde(default)]
    pub source: Option<Url>,
    /// Directory, bucket, or container.
    pub root: String,
    /// Object key.
    pub key: String,
    /// Provider kind.
    pub kind: RepoKind,
    /// Length in bytes as reported by the provider.
    #[serde(default)]
    pub length: u64,
    /// Modification time as reported by the provider.
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// MIME type, when known.
    #[serde(default)]
    pub content_type: Option<String>,
}

impl FileRef {
    /// Stable identifier derived from source, root, and key, limited to 255 characters.
    ///
    /// Long paths keep their tail behind a hash of the full path.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let source = self.source.as_ref().map(Url::as_str).unwrap_or_default();
        let path = format!(
            "{}/{}/{}",
            source.trim_end_matches('/'),
            self.root,
            self.key
        );
        shorten_key(&path)
    }
}

fn shorten_key(path: &str) -> String {
    let chars: Vec<char> = path.chars().collect();
    if chars.len() <= CANONICAL_KEY_LIMIT {
        return path.to_string();
    }
    let digest = hex::encode(Sha256::digest(path.as_bytes()));
    let hash = &digest[..CANONICAL_HASH_CHARS];
    let keep = CANONICAL_KEY_LIMIT - CANONICAL_HASH_CHARS;
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{hash}{tail}")
}

/// MIME type guessed from the file name extension.
#[must_use]
pub fn guess_content_type(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(key: &str) -> FileRef {
        FileRef {
            tag: "out".to_string(),
            description: "result".to_string(),
            source: Url::parse("http://store.example/").ok(),
            root: "bucket".to_string(),
            key: key.to_string(),
            kind: RepoKind::S3,
            length: 3,
            modified: None,
            content_type: None,
        }
    }

    #[test]
    fn short_keys_are_unchanged() {
        assert_eq!(
            sample("a/b.txt").canonical_key(),
            "http://store.example/bucket/a/b.txt"
        );
    }

    #[test]
    fn long_keys_are_shortened_with_hash_prefix() {
        let long = "x".repeat(400);
        let key = sample(&long).canonical_key();
        assert_eq!(key.chars().count(), CANONICAL_KEY_LIMIT);
        assert!(key.ends_with(&"x".repeat(200)));
        assert_eq!(sample(&long).canonical_key(), key);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(guess_content_type("a/b.txt").as_deref(), Some("text/plain"));
        assert_eq!(guess_content_type("pic.png").as_deref(), Some("image/png"));
        assert_eq!(guess_content_type("noext"), None);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let mut file = sample("k");
        file.content_type = Some("text/plain".to_string());
        let value = serde_json::to_value(&file).expect("serialize");
        assert_eq!(value["contentType"], "text/plain");
        assert_eq!(value["kind"], "S3");
    }
}
