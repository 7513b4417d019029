//! Moves data between backends for a transfer task.
//!
//! # Design
//! - The mode is chosen from the keys alone: a `.zip/` segment extracts one member, a
//!   `.zip` source into a non-archive destination expands every entry, a wildcard copies
//!   every match, anything else is a plain copy.
//! - Every attempt starts from scratch with fresh handles and an empty manifest.
//! - Attempts are a bounded loop; each failure is logged to the task's stderr.
//! - Runs on a blocking worker: backends use blocking IO.

use std::path::{Component, Path};
use std::sync::Arc;

use ferry_repo::{
    FileRef, Location, Repo, RepoProvider, combine_keys, guess_content_type, has_wildcard,
    wildcard_base,
};
use ferry_telemetry::Metrics;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult, error_chain};
use crate::pipeline::{EntryStream, ReadPipeline, lock_archive};
use crate::progress::{LoggingProgress, ProgressSink};
use crate::request::TransferRequest;
use crate::task::TaskHandle;

const ARCHIVE_SUFFIX: &str = ".zip";
const MEMBER_SEPARATOR: &str = ".zip/";

/// Tuning for transfer attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSettings {
    /// Total attempts before the transfer fails.
    pub attempts: u32,
    /// Read buffer in bytes.
    pub buffer_bytes: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            buffer_bytes: 64 * 1024,
        }
    }
}

/// A transfer request with both backend kinds resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Tag recorded on produced artifacts.
    pub tag: String,
    /// Description recorded on produced artifacts.
    pub description: String,
    /// Where to read from.
    pub source: Location,
    /// Where to write to.
    pub destination: Location,
    /// Skip copies whose destination already has the source length.
    pub lazy: bool,
}

impl TransferPlan {
    /// Resolve the request's backend kinds.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownKind`] when either side names an unknown kind.
    pub fn from_request(request: &TransferRequest) -> CoreResult<Self> {
        Ok(Self {
            tag: request.tag.clone(),
            description: request.description.clone(),
            source: request.source.to_location("source")?,
            destination: request.destination.to_location("destination")?,
            lazy: request.lazy,
        })
    }

    /// Descriptive command vector recorded on the task.
    #[must_use]
    pub fn command(&self) -> Vec<String> {
        vec![
            self.source.to_string(),
            "->".to_string(),
            self.destination.to_string(),
        ]
    }
}

/// How a transfer moves its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMode {
    /// Copy one member out of an archive.
    ExtractOne {
        /// Key of the archive.
        archive: String,
        /// Member path inside the archive.
        member: String,
    },
    /// Write every archive entry as its own object.
    Expand,
    /// Copy every object matching a wildcard key.
    WildcardCopy,
    /// Copy one object.
    Copy,
}

impl TransferMode {
    /// Choose the mode from the source and destination keys.
    #[must_use]
    pub fn select(source_key: &str, destination_key: &str) -> Self {
        match source_key.find(MEMBER_SEPARATOR) {
            Some(index) if index > 0 => {
                return Self::ExtractOne {
                    archive: source_key[..index + ARCHIVE_SUFFIX.len()].to_string(),
                    member: source_key[index + MEMBER_SEPARATOR.len()..].to_string(),
                };
            }
            _ => {}
        }
        if source_key.ends_with(ARCHIVE_SUFFIX) && !destination_key.ends_with(ARCHIVE_SUFFIX) {
            Self::Expand
        } else if has_wildcard(source_key) {
            Self::WildcardCopy
        } else {
            Self::Copy
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::ExtractOne { .. } => "extract_one",
            Self::Expand => "expand",
            Self::WildcardCopy => "wildcard_copy",
            Self::Copy => "copy",
        }
    }
}

/// Outcome of a transfer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// `0` on success, `1` once every attempt failed.
    pub exit_code: i32,
    /// Artifacts delivered by the last attempt.
    pub manifest: Vec<FileRef>,
}

/// Runs transfer plans against a backend provider.
#[derive(Debug, Clone)]
pub struct TransferExecutor {
    provider: Arc<dyn RepoProvider>,
    settings: TransferSettings,
    metrics: Metrics,
}

impl TransferExecutor {
    /// Executor opening handles through `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn RepoProvider>, settings: TransferSettings, metrics: Metrics) -> Self {
        Self {
            provider,
            settings,
            metrics,
        }
    }

    /// Run `plan` for `task`, retrying failed attempts.
    #[must_use]
    pub fn run(&self, task: &Arc<TaskHandle>, plan: &TransferPlan) -> TransferOutcome {
        let mode = TransferMode::select(&plan.source.key, &plan.destination.key);
        let attempts = self.settings.attempts.max(1);
        let sink: Arc<dyn ProgressSink> = Arc::clone(task) as Arc<dyn ProgressSink>;
        let mut manifest = Vec::new();

        for attempt in 1..=attempts {
            manifest.clear();
            sink.update(0);
            debug!(attempt, mode = mode.label(), "starting transfer attempt");
            match self.attempt(plan, &mode, &sink, &mut manifest) {
                Ok(()) => {
                    info!(
                        attempt,
                        mode = mode.label(),
                        files = manifest.len(),
                        "transfer complete"
                    );
                    return TransferOutcome {
                        exit_code: 0,
                        manifest,
                    };
                }
                Err(err) => {
                    let rendered = error_chain(&err);
                    task.append_stderr(&format!("Exception: {rendered}\n"));
                    if attempt < attempts {
                        task.append_stderr(&format!(
                            "Retrying transfer (attempt {} of {attempts})\n",
                            attempt + 1
                        ));
                        self.metrics.inc_transfer_retry();
                        warn!(attempt, error = %rendered, "transfer attempt failed; retrying");
                    } else {
                        error!(attempts, error = %rendered, "transfer failed");
                    }
                }
            }
        }
        TransferOutcome {
            exit_code: 1,
            manifest,
        }
    }

    fn attempt(
        &self,
        plan: &TransferPlan,
        mode: &TransferMode,
        sink: &Arc<dyn ProgressSink>,
        manifest: &mut Vec<FileRef>,
    ) -> CoreResult<()> {
        match mode {
            TransferMode::ExtractOne { archive, member } => {
                self.extract_one(plan, archive, member, sink, manifest)
            }
            TransferMode::Expand => self.expand(plan, sink, manifest),
            TransferMode::WildcardCopy => self.wildcard_copy(plan, sink, manifest),
            TransferMode::Copy => {
                let mut source = self.open(plan.source.clone(), &plan.tag, plan)?;
                let mut destination = self.open(plan.destination.clone(), &plan.tag, plan)?;
                let total = source
                    .total_length()
                    .map_err(|err| CoreError::repo("source_length", err))?;
                self.copy_object(plan, source.as_mut(), destination.as_mut(), sink, total, 0, manifest)?;
                Ok(())
            }
        }
    }

    fn open(&self, location: Location, tag: &str, plan: &TransferPlan) -> CoreResult<Box<dyn Repo>> {
        self.provider
            .open(location, tag, &plan.description)
            .map_err(|err| CoreError::repo("open_backend", err))
    }

    /// Copy the object `source` points at; returns the source length.
    #[allow(clippy::too_many_arguments)]
    fn copy_object(
        &self,
        plan: &TransferPlan,
        source: &mut dyn Repo,
        destination: &mut dyn Repo,
        sink: &Arc<dyn ProgressSink>,
        total: u64,
        offset: u64,
        manifest: &mut Vec<FileRef>,
    ) -> CoreResult<u64> {
        let length = source
            .length()
            .map_err(|err| CoreError::repo("source_length", err))?;
        if plan.lazy && self.destination_current(destination, length)? {
            info!(key = %destination.location().key, length, "destination up to date; skipping copy");
            manifest.push(describe_existing(destination, plan)?);
            return Ok(length);
        }
        if let Some(modified) = source
            .modification_time()
            .map_err(|err| CoreError::repo("source_modified", err))?
        {
            destination.set_modification_time(modified);
        }
        let stream = source
            .open()
            .map_err(|err| CoreError::repo("open_source", err))?;
        let content_type = source
            .content_type()
            .map_err(|err| CoreError::repo("source_content_type", err))?;
        let input = ReadPipeline::from_source(stream)
            .buffered(self.settings.buffer_bytes)
            .tracked_from(Some(Arc::clone(sink)), total, offset)
            .finish();
        let file = destination
            .put(input, Some(length), content_type.as_deref())
            .map_err(|err| CoreError::repo("put_destination", err))?;
        self.record(file, manifest);
        Ok(length)
    }

    fn destination_current(&self, destination: &mut dyn Repo, length: u64) -> CoreResult<bool> {
        let exists = destination
            .exists()
            .map_err(|err| CoreError::repo("destination_exists", err))?;
        if !exists {
            return Ok(false);
        }
        let existing = destination
            .length()
            .map_err(|err| CoreError::repo("destination_length", err))?;
        Ok(existing == length)
    }

    fn wildcard_copy(
        &self,
        plan: &TransferPlan,
        sink: &Arc<dyn ProgressSink>,
        manifest: &mut Vec<FileRef>,
    ) -> CoreResult<()> {
        let mut source = self.open(plan.source.clone(), &plan.tag, plan)?;
        let matches = source
            .list_matching()
            .map_err(|err| CoreError::repo("list_matching", err))?;
        let total = source
            .total_length()
            .map_err(|err| CoreError::repo("source_length", err))?;
        if matches.is_empty() {
            warn!(pattern = %plan.source.key, "wildcard matched no objects");
            return Ok(());
        }
        let base = wildcard_base(&plan.source.key).to_string();
        let mut offset = 0;
        for key in matches {
            source
                .select_next(&key)
                .map_err(|err| CoreError::repo("select_next", err))?;
            let relative = key.strip_prefix(base.as_str()).unwrap_or(&key);
            let target = plan
                .destination
                .with_key(combine_keys(&plan.destination.key, relative));
            let mut destination = self.open(target, &plan.tag, plan)?;
            let length =
                self.copy_object(plan, source.as_mut(), destination.as_mut(), sink, total, offset, manifest)?;
            offset = offset.saturating_add(length);
        }
        Ok(())
    }

    fn extract_one(
        &self,
        plan: &TransferPlan,
        archive: &str,
        member: &str,
        sink: &Arc<dyn ProgressSink>,
        manifest: &mut Vec<FileRef>,
    ) -> CoreResult<()> {
        let mut source = self.open(plan.source.with_key(archive), &plan.tag, plan)?;
        let total = source
            .total_length()
            .map_err(|err| CoreError::repo("source_length", err))?;
        let stream = source
            .open()
            .map_err(|err| CoreError::repo("open_source", err))?;
        let (pipeline, entry) = ReadPipeline::from_source(stream)
            .buffered(self.settings.buffer_bytes)
            .tracked(Some(Arc::clone(sink)), total)
            .zip_member(archive, member)?;
        let mut destination = self.open(plan.destination.clone(), &plan.tag, plan)?;
        let content_type = guess_content_type(member);
        let file = destination
            .put(pipeline.finish(), entry.size(), content_type.as_deref())
            .map_err(|err| CoreError::repo("put_destination", err))?;
        self.record(file, manifest);
        Ok(())
    }

    fn expand(
        &self,
        plan: &TransferPlan,
        sink: &Arc<dyn ProgressSink>,
        manifest: &mut Vec<FileRef>,
    ) -> CoreResult<()> {
        let mut source = self.open(plan.source.clone(), &plan.tag, plan)?;
        let total = source
            .total_length()
            .map_err(|err| CoreError::repo("source_length", err))?;
        let stream = source
            .open()
            .map_err(|err| CoreError::repo("open_source", err))?;
        let archive = ReadPipeline::from_source(stream)
            .buffered(self.settings.buffer_bytes)
            .tracked(Some(Arc::clone(sink)), total)
            .into_archive();
        let entry_tag = format!("{}/", plan.tag);

        loop {
            let next = lock_archive(&archive)
                .next_entry()
                .map_err(|err| CoreError::zip("next_entry", err))?;
            let Some(entry) = next else {
                break;
            };
            if entry.is_dir() {
                continue;
            }
            if escapes_root(entry.name()) {
                warn!(entry = entry.name(), "skipping archive entry outside the destination");
                continue;
            }
            let target = plan
                .destination
                .with_key(combine_keys(&plan.destination.key, entry.name()));
            let mut destination = self.open(target, &entry_tag, plan)?;
            let observer: Arc<dyn ProgressSink> = Arc::new(LoggingProgress::new(entry.name()));
            let input = ReadPipeline::from_source(Box::new(EntryStream::new(Arc::clone(&archive))))
                .tracked(Some(observer), entry.size().unwrap_or(0))
                .finish();
            let content_type = guess_content_type(entry.name());
            let file = destination
                .put(input, entry.size(), content_type.as_deref())
                .map_err(|err| CoreError::repo("put_entry", err))?;
            self.record(file, manifest);
        }
        Ok(())
    }

    fn record(&self, file: FileRef, manifest: &mut Vec<FileRef>) {
        debug!(key = %file.key, length = file.length, "delivered object");
        self.metrics.add_transfer_bytes(file.length);
        manifest.push(file);
    }
}

fn describe_existing(repo: &mut dyn Repo, plan: &TransferPlan) -> CoreResult<FileRef> {
    let length = repo
        .length()
        .map_err(|err| CoreError::repo("destination_length", err))?;
    let modified = repo
        .modification_time()
        .map_err(|err| CoreError::repo("destination_modified", err))?;
    let content_type = repo
        .content_type()
        .map_err(|err| CoreError::repo("destination_content_type", err))?;
    let location = repo.location();
    Ok(FileRef {
        tag: plan.tag.clone(),
        description: plan.description.clone(),
        source: location.endpoint.clone(),
        root: location.root.clone(),
        key: location.key.clone(),
        kind: location.kind,
        length,
        modified,
        content_type,
    })
}

fn escapes_root(name: &str) -> bool {
    Path::new(name)
        .components()
        .any(|part| matches!(part, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}
