//! Tracking lifecycle events.
//!
//! The engine reports progress through a [`TrackingListener`] attached
//! before a batch runs. Every method has a no-op default, so listeners
//! implement only what they care about.

use crate::fetcher::FetchError;

use super::TrackerError;

/// Receiver for tracking lifecycle events.
///
/// Events carry the service id and document type they concern; record
/// events additionally carry the new record's id.
pub trait TrackingListener: Send + Sync {
    /// A document's very first snapshot was recorded.
    fn on_first_snapshot_recorded(
        &self,
        _service_id: &str,
        _document_type: &str,
        _snapshot_id: &str,
    ) {
    }

    /// A new snapshot was recorded for an already-tracked document.
    fn on_snapshot_recorded(&self, _service_id: &str, _document_type: &str, _snapshot_id: &str) {}

    /// The fetched content matched the stored snapshot; nothing recorded.
    fn on_snapshot_not_changed(&self, _service_id: &str, _document_type: &str) {}

    /// A document's very first version was recorded.
    fn on_first_version_recorded(
        &self,
        _service_id: &str,
        _document_type: &str,
        _version_id: &str,
    ) {
    }

    /// A new version was recorded for an already-tracked document.
    fn on_version_recorded(&self, _service_id: &str, _document_type: &str, _version_id: &str) {}

    /// The filtered output matched the stored version; nothing recorded.
    fn on_version_not_changed(&self, _service_id: &str, _document_type: &str) {}

    /// Both archives were published after a clean batch.
    fn on_records_published(&self) {}

    /// The upstream service did not hand the document over. The batch
    /// continues without this document.
    fn on_inaccessible_content(
        &self,
        _error: &FetchError,
        _service_id: &str,
        _document_type: &str,
    ) {
    }

    /// A worker hit a fatal error; the batch is aborting.
    fn on_error(&self, _error: &TrackerError, _service_id: &str, _document_type: &str) {}
}

/// Listener that narrates events through `tracing`.
///
/// Attached by the CLI so batch runs are observable without custom
/// listeners.
pub struct LoggingListener;

impl TrackingListener for LoggingListener {
    fn on_first_snapshot_recorded(&self, service_id: &str, document_type: &str, snapshot_id: &str) {
        tracing::info!("Started tracking snapshot of {service_id} {document_type} ({snapshot_id})");
    }

    fn on_snapshot_recorded(&self, service_id: &str, document_type: &str, snapshot_id: &str) {
        tracing::info!("Recorded snapshot of {service_id} {document_type} ({snapshot_id})");
    }

    fn on_snapshot_not_changed(&self, service_id: &str, document_type: &str) {
        tracing::info!("No changes in snapshot of {service_id} {document_type}");
    }

    fn on_first_version_recorded(&self, service_id: &str, document_type: &str, version_id: &str) {
        tracing::info!("Started tracking version of {service_id} {document_type} ({version_id})");
    }

    fn on_version_recorded(&self, service_id: &str, document_type: &str, version_id: &str) {
        tracing::info!("Recorded version of {service_id} {document_type} ({version_id})");
    }

    fn on_version_not_changed(&self, service_id: &str, document_type: &str) {
        tracing::info!("No changes in version of {service_id} {document_type}");
    }

    fn on_records_published(&self) {
        tracing::info!("Records published");
    }

    fn on_inaccessible_content(&self, error: &FetchError, service_id: &str, document_type: &str) {
        tracing::warn!("Could not reach {service_id} {document_type}: {error}");
    }

    fn on_error(&self, error: &TrackerError, service_id: &str, document_type: &str) {
        tracing::error!("Failed tracking {service_id} {document_type}: {error}");
    }
}
