//! The tracking engine.
//!
//! [`Tracker`] orchestrates the whole pipeline: for every declared
//! document it fetches the current content, archives it as a snapshot,
//! filters the legal text out, and archives that as a version bound to
//! the snapshot it came from. Documents are processed concurrently by a
//! bounded worker pool; commits on each archive serialize behind the
//! recorder's mutex, so parallelism lives in fetching and filtering.
//!
//! Refiltering reuses the stored snapshots instead of fetching, for when
//! a declaration's selectors or filters changed and versions need to be
//! re-derived.
//!
//! # Failure semantics
//!
//! An unreachable upstream ([`FetchError::InaccessibleContent`]) is
//! reported through the listener and the batch moves on. Any other error
//! aborts the batch: pending work is dropped, in-flight documents finish,
//! the batch resolves to an error, and nothing is published.

pub mod events;

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::declarations::{load_service_declarations, DocumentDeclaration, Service};
use crate::fetcher::{Fetch, FetchError};
use crate::filter::{filter_document, FilterError};
use crate::history::{
    History, HistoryError, RecordOutcome, SnapshotRequest, StorageError, VersionRequest,
};

pub use events::{LoggingListener, TrackingListener};

/// Upper bound on documents tracked concurrently in one batch.
pub const MAX_PARALLEL_TRACKS: usize = 20;

/// Upper bound on documents refiltered concurrently in one batch.
pub const MAX_PARALLEL_REFILTERS: usize = 20;

/// Errors that abort a tracking or refiltering batch.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A batch was requested before `init` loaded the declarations.
    #[error("tracker not initialized, call init first")]
    NotInitialized,

    /// A fetch failed in a way that is not plain inaccessibility.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Filtering failed (bad selector, unsupported content).
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Recording failed.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// An archive read failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A worker task died without reporting a typed error.
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// Which queue a batch drains.
#[derive(Debug, Clone, Copy)]
enum BatchKind {
    Track,
    Refilter,
}

/// One document's work: everything a worker needs, detached from the
/// engine so items move freely into tasks.
#[derive(Debug, Clone)]
struct WorkItem {
    service_id: String,
    document_type: String,
    declaration: DocumentDeclaration,
}

/// Shared state handed to every worker in a batch.
#[derive(Clone)]
struct WorkerCtx {
    history: Arc<History>,
    fetcher: Arc<dyn Fetch>,
    listeners: Arc<Vec<Arc<dyn TrackingListener>>>,
}

impl WorkerCtx {
    fn emit(&self, event: impl Fn(&dyn TrackingListener)) {
        for listener in self.listeners.iter() {
            event(listener.as_ref());
        }
    }
}

/// Orchestrates tracking and refiltering across all declared services.
pub struct Tracker {
    declarations_path: PathBuf,
    history: Arc<History>,
    fetcher: Arc<dyn Fetch>,
    services: Option<Arc<BTreeMap<String, Service>>>,
    listeners: Vec<Arc<dyn TrackingListener>>,
}

impl Tracker {
    /// Creates an engine over the given archives and fetcher. Call
    /// [`Tracker::init`] before running batches.
    pub fn new(declarations_path: PathBuf, history: History, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            declarations_path,
            history: Arc::new(history),
            fetcher,
            services: None,
            listeners: Vec::new(),
        }
    }

    /// Loads the service declarations once. A second call is a no-op;
    /// the in-memory map never changes during a run.
    pub fn init(&mut self) -> anyhow::Result<()> {
        if self.services.is_some() {
            return Ok(());
        }

        let services = load_service_declarations(&self.declarations_path)?;
        tracing::info!("Loaded {} service declarations", services.len());
        self.services = Some(Arc::new(services));
        Ok(())
    }

    /// Registers a listener for lifecycle events.
    pub fn attach(&mut self, listener: Arc<dyn TrackingListener>) {
        self.listeners.push(listener);
    }

    /// The loaded declarations, if `init` ran.
    pub fn services(&self) -> Option<&BTreeMap<String, Service>> {
        self.services.as_deref()
    }

    /// The underlying archives, for read-side tooling.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Fetches and records every declared document of the given services
    /// (all services when `service_ids` is empty), then publishes.
    pub async fn track_changes(&self, service_ids: &[String]) -> Result<(), TrackerError> {
        self.run_batch(BatchKind::Track, service_ids).await
    }

    /// Re-derives versions from the stored snapshots of the given
    /// services (all when empty), then publishes. No fetching happens.
    pub async fn refilter_and_record(&self, service_ids: &[String]) -> Result<(), TrackerError> {
        self.run_batch(BatchKind::Refilter, service_ids).await
    }

    async fn run_batch(
        &self,
        kind: BatchKind,
        service_ids: &[String],
    ) -> Result<(), TrackerError> {
        let services = self.services.as_ref().ok_or(TrackerError::NotInitialized)?;

        let selected: Vec<&Service> = if service_ids.is_empty() {
            services.values().collect()
        } else {
            service_ids
                .iter()
                .filter_map(|id| {
                    let service = services.get(id);
                    if service.is_none() {
                        tracing::warn!("Unknown service id '{id}', skipping");
                    }
                    service
                })
                .collect()
        };

        let mut items = VecDeque::new();
        for service in selected {
            for (document_type, declaration) in &service.documents {
                items.push_back(WorkItem {
                    service_id: service.id.clone(),
                    document_type: document_type.clone(),
                    declaration: declaration.clone(),
                });
            }
        }

        let total = items.len();
        let max_parallel = match kind {
            BatchKind::Track => MAX_PARALLEL_TRACKS,
            BatchKind::Refilter => MAX_PARALLEL_REFILTERS,
        };
        tracing::debug!("Starting {kind:?} batch of {total} documents");

        let queue = Arc::new(Mutex::new(items));
        let ctx = WorkerCtx {
            history: self.history.clone(),
            fetcher: self.fetcher.clone(),
            listeners: Arc::new(self.listeners.clone()),
        };

        let mut workers: JoinSet<Result<(), TrackerError>> = JoinSet::new();
        for _ in 0..max_parallel.min(total) {
            let queue = queue.clone();
            let ctx = ctx.clone();
            workers.spawn(async move {
                loop {
                    let item = { queue.lock().await.pop_front() };
                    let Some(item) = item else {
                        return Ok(());
                    };

                    let result = match kind {
                        BatchKind::Track => track_document(&ctx, &item).await,
                        BatchKind::Refilter => refilter_document(&ctx, &item).await,
                    };

                    if let Err(error) = result {
                        ctx.emit(|l| l.on_error(&error, &item.service_id, &item.document_type));
                        // The batch is failing: drop pending work so the
                        // other workers wind down after their current item.
                        queue.lock().await.clear();
                        return Err(error);
                    }
                }
            });
        }

        let mut failure: Option<TrackerError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
                Err(join_error) => {
                    if failure.is_none() {
                        failure = Some(TrackerError::Worker(join_error.to_string()));
                    }
                }
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        self.history.publish().await?;
        ctx.emit(|l| l.on_records_published());
        Ok(())
    }
}

/// Tracks one document: fetch, snapshot, filter, version.
async fn track_document(ctx: &WorkerCtx, item: &WorkItem) -> Result<(), TrackerError> {
    let fetched = match ctx.fetcher.fetch(&item.declaration.location).await {
        Ok(fetched) => fetched,
        Err(error) if error.is_inaccessible() => {
            ctx.emit(|l| l.on_inaccessible_content(&error, &item.service_id, &item.document_type));
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    if fetched.content.is_empty() {
        tracing::debug!(
            "Empty content for {} {}, skipping",
            item.service_id,
            item.document_type
        );
        return Ok(());
    }

    let snapshot = match ctx
        .history
        .record_snapshot(SnapshotRequest {
            service_id: item.service_id.clone(),
            document_type: item.document_type.clone(),
            content: fetched.content.clone(),
            mime_type: fetched.mime_type.clone(),
        })
        .await?
    {
        RecordOutcome::Unchanged => {
            ctx.emit(|l| l.on_snapshot_not_changed(&item.service_id, &item.document_type));
            return Ok(());
        }
        RecordOutcome::Recorded(record) => record,
    };

    if snapshot.is_first_record {
        ctx.emit(|l| {
            l.on_first_snapshot_recorded(&item.service_id, &item.document_type, &snapshot.id)
        });
    } else {
        ctx.emit(|l| l.on_snapshot_recorded(&item.service_id, &item.document_type, &snapshot.id));
    }

    let cleaned = filter_document(&fetched.content, &fetched.mime_type, &item.declaration)?;

    let outcome = ctx
        .history
        .record_version(VersionRequest {
            service_id: item.service_id.clone(),
            document_type: item.document_type.clone(),
            content: cleaned,
            snapshot_id: snapshot.id.clone(),
            snapshot_date: snapshot.date,
        })
        .await?;

    emit_version_events(ctx, item, outcome);
    Ok(())
}

/// Refilters one document from its stored snapshot.
async fn refilter_document(ctx: &WorkerCtx, item: &WorkItem) -> Result<(), TrackerError> {
    let Some(snapshot) = ctx
        .history
        .get_latest_snapshot(&item.service_id, &item.document_type)
        .await?
    else {
        tracing::debug!(
            "No snapshot of {} {} to refilter, skipping",
            item.service_id,
            item.document_type
        );
        return Ok(());
    };

    let cleaned = filter_document(&snapshot.content, &snapshot.mime_type, &item.declaration)?;

    let outcome = ctx
        .history
        .record_refilter(VersionRequest {
            service_id: item.service_id.clone(),
            document_type: item.document_type.clone(),
            content: cleaned,
            snapshot_id: snapshot.id.clone(),
            snapshot_date: snapshot.date,
        })
        .await?;

    emit_version_events(ctx, item, outcome);
    Ok(())
}

fn emit_version_events(ctx: &WorkerCtx, item: &WorkItem, outcome: RecordOutcome) {
    match outcome {
        RecordOutcome::Unchanged => {
            ctx.emit(|l| l.on_version_not_changed(&item.service_id, &item.document_type));
        }
        RecordOutcome::Recorded(version) => {
            if version.is_first_record {
                ctx.emit(|l| {
                    l.on_first_version_recorded(&item.service_id, &item.document_type, &version.id)
                });
            } else {
                ctx.emit(|l| {
                    l.on_version_recorded(&item.service_id, &item.document_type, &version.id)
                });
            }
        }
    }
}
