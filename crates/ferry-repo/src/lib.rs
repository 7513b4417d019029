//! Storage backends for transfers: local files, S3 (standard and multipart), and Swift.
//!
//! Layout: `repo.rs` (backend contract), `local.rs`, `s3/`, `swift.rs` (providers),
//! `pool.rs` (shared clients), `wildcard.rs` (key patterns), `location.rs` and
//! `artifact.rs` (addresses and produced-object descriptors).
#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(missing_docs, unreachable_pub, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod error;
pub mod local;
pub mod location;
pub mod pool;
pub mod repo;
pub mod s3;
pub mod swift;
pub mod wildcard;

use std::fmt;
use std::sync::Arc;

pub use artifact::{FileRef, guess_content_type};
pub use error::{RepoError, RepoResult};
pub use local::LocalFileRepo;
pub use location::{Credentials, Location, RepoKind, combine_keys};
pub use pool::{ClientPool, PoolSettings};
pub use repo::{ObjectStream, Repo};
pub use s3::{S3LargeRepo, S3StandardRepo};
pub use swift::SwiftRepo;
pub use wildcard::{KeyMatcher, has_wildcard, translate, wildcard_base};

/// Builds backend handles for locations.
pub trait RepoProvider: Send + Sync + fmt::Debug {
    /// Open a handle for `location`; descriptors it produces carry `tag` and `description`.
    ///
    /// # Errors
    ///
    /// Fails when the location is incomplete or the provider cannot be reached.
    fn open(&self, location: Location, tag: &str, description: &str) -> RepoResult<Box<dyn Repo>>;
}

/// The shipped providers, sharing one client pool.
#[derive(Debug, Clone)]
pub struct Backends {
    pool: Arc<ClientPool>,
}

impl Backends {
    /// Providers backed by `pool`.
    #[must_use]
    pub const fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    /// Pool shared by every handle this provider builds.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self::new(Arc::new(ClientPool::default()))
    }
}

impl RepoProvider for Backends {
    fn open(&self, location: Location, tag: &str, description: &str) -> RepoResult<Box<dyn Repo>> {
        let repo: Box<dyn Repo> = match location.kind {
            RepoKind::File => Box::new(LocalFileRepo::new(location, tag, description)),
            RepoKind::S3Standard => Box::new(S3StandardRepo::standard(
                &self.pool,
                location,
                tag,
                description,
            )?),
            RepoKind::S3 => Box::new(S3LargeRepo::large(
                &self.pool,
                location,
                tag,
                description,
            )?),
            RepoKind::Swift => Box::new(SwiftRepo::new(
                Arc::clone(&self.pool),
                location,
                tag,
                description,
            )?),
        };
        Ok(repo)
    }
}
