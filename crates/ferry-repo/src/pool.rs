//! Shared HTTP clients and provider sessions.
//!
//! # Design
//! - One pool per process, passed into backend constructors instead of global state.
//! - Clients are keyed by endpoint and credential pair and built on first use.
//! - Every map has its own lock; poisoned locks are recovered and logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, error};
use url::Url;

use crate::error::{RepoError, RepoResult};
use crate::location::Credentials;
use crate::s3::S3Client;
use crate::swift::SwiftSession;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_PART_BYTES: usize = 8 * 1024 * 1024;

/// Tunables applied to every client the pool builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Whole-request timeout for provider calls.
    pub timeout: Duration,
    /// Region used when signing S3 requests.
    pub s3_region: String,
    /// Part size for multipart uploads.
    pub s3_part_bytes: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            s3_region: DEFAULT_REGION.to_string(),
            s3_part_bytes: DEFAULT_PART_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    endpoint: String,
    account: String,
    secret_digest: String,
}

impl ClientKey {
    fn new(endpoint: &Url, credentials: &Credentials) -> Self {
        Self {
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            account: credentials.account.clone(),
            secret_digest: hex::encode(Sha256::digest(credentials.secret.as_bytes())),
        }
    }
}

/// Process-wide cache of provider clients.
#[derive(Debug, Default)]
pub struct ClientPool {
    settings: PoolSettings,
    http: OnceCell<Client>,
    s3: Mutex<HashMap<ClientKey, Arc<S3Client>>>,
    swift: Mutex<HashMap<ClientKey, Arc<SwiftSession>>>,
}

impl ClientPool {
    /// Empty pool using `settings` for every client it builds.
    #[must_use]
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Settings the pool was created with.
    #[must_use]
    pub const fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Shared blocking HTTP client.
    ///
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn http(&self) -> RepoResult<Client> {
        self.http
            .get_or_try_init(|| {
                Client::builder()
                    .timeout(self.settings.timeout)
                    .build()
                    .map_err(|source| RepoError::http("pool.build_client", "", source))
            })
            .cloned()
    }

    /// S3 client for the endpoint and credential pair, built on first use.
    ///
    /// # Errors
    ///
    /// Fails when the shared HTTP client cannot be built.
    pub fn s3(&self, endpoint: &Url, credentials: &Credentials) -> RepoResult<Arc<S3Client>> {
        let key = ClientKey::new(endpoint, credentials);
        let mut clients = lock(&self.s3, "s3");
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(S3Client::new(
            self.http()?,
            endpoint.clone(),
            credentials.clone(),
            self.settings.s3_region.clone(),
        ));
        debug!(endpoint = %endpoint, account = %credentials.account, "created s3 client");
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Authenticated Swift session, built on first use.
    ///
    /// # Errors
    ///
    /// Fails when authentication is rejected or the service cannot be reached.
    pub fn swift(
        &self,
        endpoint: &Url,
        credentials: &Credentials,
    ) -> RepoResult<Arc<SwiftSession>> {
        let key = ClientKey::new(endpoint, credentials);
        if let Some(session) = lock(&self.swift, "swift").get(&key) {
            return Ok(Arc::clone(session));
        }
        let session = Arc::new(SwiftSession::authenticate(
            self.http()?,
            endpoint,
            credentials,
        )?);
        debug!(endpoint = %endpoint, account = %credentials.account, "created swift session");
        let mut sessions = lock(&self.swift, "swift");
        let entry = sessions.entry(key).or_insert(session);
        Ok(Arc::clone(entry))
    }

    /// Forget a Swift session whose token was rejected.
    pub fn evict_swift(&self, endpoint: &Url, credentials: &Credentials) {
        lock(&self.swift, "swift").remove(&ClientKey::new(endpoint, credentials));
    }

    /// Number of cached S3 clients.
    #[must_use]
    pub fn s3_clients(&self) -> usize {
        lock(&self.s3, "s3").len()
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, pool: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!(pool, "client pool mutex poisoned; continuing with recovered state");
            poisoned.into_inner()
        }
    }
}
