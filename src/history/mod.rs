//! Version-controlled document history.
//!
//! Two archives back every tracked document: the snapshots repository
//! holds raw fetched content, the versions repository holds the filtered
//! markdown derived from it. [`History`] composes the two recorders and
//! owns the domain rules that bind them together: commit-message
//! prefixes, first-record detection, and the invariant that a version
//! always names the snapshot it came from.
//!
//! # Submodules
//!
//! - `store` - git working-directory wrapper, commits as record ids
//! - `recorder` - canonical layout and typed record requests

pub mod recorder;
pub mod store;

use chrono::{DateTime, Utc};

use crate::config::HistoryConfig;

pub use recorder::{
    FullRecord, LatestRecord, Record, RecordOutcome, RecordRequest, Recorder,
};
pub use store::{CommitStore, CommitSummary, StorageError};

/// Default extension for snapshot records whose mime type is unknown.
const SNAPSHOT_DEFAULT_EXTENSION: &str = "html";

/// Versions are always markdown.
const VERSION_MIME_TYPE: &str = "text/markdown";
const VERSION_EXTENSION: &str = "md";

/// Errors raised by the history facade.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// A version was submitted without the snapshot it derives from.
    /// This is an internal invariant violation, never a data condition.
    #[error("version for {service_id} {document_type} has no snapshot binding")]
    MissingSnapshotBinding {
        service_id: String,
        document_type: String,
    },

    /// The underlying archive failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A raw snapshot to record.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub service_id: String,
    pub document_type: String,
    pub content: Vec<u8>,
    pub mime_type: String,
}

/// A filtered version to record, bound to its source snapshot.
#[derive(Debug, Clone)]
pub struct VersionRequest {
    pub service_id: String,
    pub document_type: String,
    pub content: String,
    /// Id of the snapshot this version was filtered from.
    pub snapshot_id: String,
    /// The snapshot's commit date; used as the version commit's author
    /// date so both histories line up temporally.
    pub snapshot_date: DateTime<Utc>,
}

/// The two archives plus the rules composing them.
pub struct History {
    snapshots: Recorder,
    versions: Recorder,
    publish_enabled: bool,
    snapshots_base_url: Option<String>,
}

impl History {
    /// Opens (initializing if needed) both archive repositories.
    pub fn open(config: &HistoryConfig) -> Result<Self, StorageError> {
        let snapshots = Recorder::new(
            CommitStore::init_or_open(
                &config.snapshots_path,
                &config.author_name,
                &config.author_email,
            )?,
            SNAPSHOT_DEFAULT_EXTENSION,
        );
        let versions = Recorder::new(
            CommitStore::init_or_open(
                &config.versions_path,
                &config.author_name,
                &config.author_email,
            )?,
            VERSION_EXTENSION,
        );

        Ok(Self {
            snapshots,
            versions,
            publish_enabled: config.publish,
            snapshots_base_url: config.snapshots_base_url.clone(),
        })
    }

    /// Records a raw snapshot.
    pub async fn record_snapshot(
        &self,
        request: SnapshotRequest,
    ) -> Result<RecordOutcome, HistoryError> {
        let is_first = !self
            .snapshots
            .is_tracked(&request.service_id, &request.document_type)
            .await?;
        let changelog = changelog(is_first, false, &request.service_id, &request.document_type);

        let outcome = self
            .snapshots
            .record(RecordRequest {
                service_id: request.service_id,
                document_type: request.document_type,
                content: request.content,
                changelog,
                mime_type: request.mime_type,
                document_date: None,
            })
            .await?;

        Ok(outcome)
    }

    /// Records a filtered version derived from a snapshot.
    pub async fn record_version(
        &self,
        request: VersionRequest,
    ) -> Result<RecordOutcome, HistoryError> {
        self.record_version_inner(request, false).await
    }

    /// Records a version re-produced from an existing snapshot, e.g.
    /// after a declaration's filters changed.
    pub async fn record_refilter(
        &self,
        request: VersionRequest,
    ) -> Result<RecordOutcome, HistoryError> {
        self.record_version_inner(request, true).await
    }

    async fn record_version_inner(
        &self,
        request: VersionRequest,
        refilter: bool,
    ) -> Result<RecordOutcome, HistoryError> {
        if request.snapshot_id.trim().is_empty() {
            return Err(HistoryError::MissingSnapshotBinding {
                service_id: request.service_id,
                document_type: request.document_type,
            });
        }

        let is_first = !self
            .versions
            .is_tracked(&request.service_id, &request.document_type)
            .await?;
        let changelog = format!(
            "{}\n\n{}",
            changelog(is_first, refilter, &request.service_id, &request.document_type),
            self.snapshot_reference(&request.snapshot_id)
        );

        let outcome = self
            .versions
            .record(RecordRequest {
                service_id: request.service_id,
                document_type: request.document_type,
                content: request.content.into_bytes(),
                changelog,
                mime_type: VERSION_MIME_TYPE.to_string(),
                document_date: Some(request.snapshot_date),
            })
            .await?;

        Ok(outcome)
    }

    /// The latest snapshot for a document, if any.
    pub async fn get_latest_snapshot(
        &self,
        service_id: &str,
        document_type: &str,
    ) -> Result<Option<LatestRecord>, StorageError> {
        self.snapshots
            .get_latest_record(service_id, document_type)
            .await
    }

    /// Pushes both archives to their remotes, in parallel.
    ///
    /// A no-op when publication is disabled in the configuration.
    pub async fn publish(&self) -> Result<(), StorageError> {
        if !self.publish_enabled {
            tracing::debug!("Publication disabled, skipping push");
            return Ok(());
        }

        let (snapshots, versions) = tokio::join!(self.snapshots.publish(), self.versions.publish());
        snapshots?;
        versions?;
        Ok(())
    }

    /// The snapshots recorder, for read-side tooling.
    pub fn snapshots(&self) -> &Recorder {
        &self.snapshots
    }

    /// The versions recorder, for read-side tooling.
    pub fn versions(&self) -> &Recorder {
        &self.versions
    }

    /// The reference to a snapshot embedded in version commit messages:
    /// a plain id, or a full URL when publication is configured for it.
    fn snapshot_reference(&self, snapshot_id: &str) -> String {
        let reference = match (&self.snapshots_base_url, self.publish_enabled) {
            (Some(base_url), true) => format!("{base_url}{snapshot_id}"),
            _ => snapshot_id.to_string(),
        };
        format!("This version was recorded after filtering snapshot {reference}")
    }
}

/// Builds the changelog prefix line for a record.
fn changelog(is_first: bool, refilter: bool, service_id: &str, document_type: &str) -> String {
    let prefix = if is_first {
        "Start tracking"
    } else if refilter {
        "Refilter"
    } else {
        "Update"
    };
    format!("{prefix} {service_id} {document_type}")
}
