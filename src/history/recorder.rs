//! Typed record persistence over a commit store.
//!
//! A [`Recorder`] owns one archive repository (snapshots or versions),
//! knows the canonical on-disk layout `<service>/<document type>.<ext>`,
//! and turns typed requests into file writes and commits. Recording is
//! idempotent: unchanged content produces no commit.
//!
//! The store is held behind a mutex. Git index and working-tree mutation
//! is a single critical section per repository, so concurrent pipeline
//! workers serialize here while fetching and filtering stay parallel.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::store::{CommitStore, CommitSummary, StorageError};

/// A write request for one record.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub service_id: String,
    pub document_type: String,
    pub content: Vec<u8>,
    /// Commit message for the record.
    pub changelog: String,
    pub mime_type: String,
    /// Author date for the commit; defaults to now.
    pub document_date: Option<DateTime<Utc>>,
}

/// Result of a record attempt.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// The content matched HEAD; no commit was produced.
    Unchanged,
    /// A commit was produced.
    Recorded(Record),
}

/// A freshly created record.
#[derive(Debug, Clone)]
pub struct Record {
    /// Commit hash identifying the record.
    pub id: String,
    /// Whether this was the first record ever for its document.
    pub is_first_record: bool,
    /// The author date the commit was made with.
    pub date: DateTime<Utc>,
}

/// The latest record for a document, with decoded location metadata.
#[derive(Debug, Clone)]
pub struct LatestRecord {
    pub id: String,
    pub content: Vec<u8>,
    pub mime_type: String,
    pub date: DateTime<Utc>,
}

/// A record read back by id.
#[derive(Debug, Clone)]
pub struct FullRecord {
    pub id: String,
    pub date: DateTime<Utc>,
    pub content: Vec<u8>,
    pub mime_type: String,
    pub rel_path: String,
}

/// Records documents of one archive kind into a commit store.
pub struct Recorder {
    store: Arc<Mutex<CommitStore>>,
    default_extension: &'static str,
}

impl Recorder {
    /// Wraps a store, using `default_extension` for mime types the
    /// extension table does not know.
    pub fn new(store: CommitStore, default_extension: &'static str) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            default_extension,
        }
    }

    /// Records one document revision.
    ///
    /// Whether this is the document's first record is decided before
    /// staging, from the file's tracked state at HEAD.
    pub async fn record(&self, request: RecordRequest) -> Result<RecordOutcome, StorageError> {
        let extension =
            extension_for_mime(&request.mime_type).unwrap_or(self.default_extension);
        let rel_path = record_path(&request.service_id, &request.document_type, extension);
        let date = request.document_date.unwrap_or_else(Utc::now);

        let store = self.store.lock().await;

        let pattern = record_pattern(&request.service_id, &request.document_type);
        let is_first_record = !store.is_tracked(&pattern)?;

        store.write_and_stage(&rel_path, &request.content)?;

        match store.commit(&request.changelog, date)? {
            None => Ok(RecordOutcome::Unchanged),
            Some(id) => {
                tracing::info!(
                    "Recorded {} {} as {}",
                    request.service_id,
                    request.document_type,
                    &id[..8.min(id.len())]
                );
                Ok(RecordOutcome::Recorded(Record {
                    id,
                    is_first_record,
                    date,
                }))
            }
        }
    }

    /// Returns the latest record for a document, or `None` if it was
    /// never recorded.
    pub async fn get_latest_record(
        &self,
        service_id: &str,
        document_type: &str,
    ) -> Result<Option<LatestRecord>, StorageError> {
        let store = self.store.lock().await;

        let pattern = record_pattern(service_id, document_type);
        let Some((commit, rel_path)) = store.find_unique(&pattern)? else {
            return Ok(None);
        };

        let content = store.read_file_at(&commit.hash, &rel_path)?;
        Ok(Some(LatestRecord {
            id: commit.hash,
            content,
            mime_type: mime_type_of(&rel_path, self.default_extension),
            date: commit.date,
        }))
    }

    /// Reads a record back by id.
    ///
    /// A record commit touches exactly one file; anything else fails with
    /// [`StorageError::MalformedRecord`].
    pub async fn get_record(&self, id: &str) -> Result<FullRecord, StorageError> {
        let store = self.store.lock().await;

        let CommitSummary {
            hash, date, files, ..
        } = store.summarize(id)?;

        if files.len() != 1 {
            return Err(StorageError::MalformedRecord {
                id: hash,
                count: files.len(),
            });
        }
        let rel_path = files.into_iter().next().unwrap_or_default();

        let content = store.read_file_at(&hash, &rel_path)?;
        Ok(FullRecord {
            id: hash,
            date,
            content,
            mime_type: mime_type_of(&rel_path, self.default_extension),
            rel_path,
        })
    }

    /// Whether the document has ever been recorded.
    pub async fn is_tracked(
        &self,
        service_id: &str,
        document_type: &str,
    ) -> Result<bool, StorageError> {
        let store = self.store.lock().await;
        store.is_tracked(&record_pattern(service_id, document_type))
    }

    /// Lists the record history for a document, newest first.
    pub async fn log(
        &self,
        service_id: &str,
        document_type: &str,
    ) -> Result<Vec<CommitSummary>, StorageError> {
        let store = self.store.lock().await;
        store.log(Some(&record_pattern(service_id, document_type)))
    }

    /// Pushes the archive to its remote.
    pub async fn publish(&self) -> Result<(), StorageError> {
        let store = self.store.lock().await;
        store.push()
    }
}

/// Canonical record file path.
fn record_path(service_id: &str, document_type: &str, extension: &str) -> String {
    format!("{service_id}/{document_type}.{extension}")
}

/// Pattern matching a document's record file regardless of extension.
fn record_pattern(service_id: &str, document_type: &str) -> String {
    format!("{service_id}/{document_type}.*")
}

/// Mime type recovered from a record file's extension.
fn mime_type_of(rel_path: &str, default_extension: &str) -> String {
    let extension = rel_path.rsplit('.').next().unwrap_or(default_extension);
    mime_for_extension(extension)
        .or_else(|| mime_for_extension(default_extension))
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// File extension for a mime type. Parameters are ignored.
pub fn extension_for_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match essence {
        "text/html" | "application/xhtml+xml" => Some("html"),
        "application/pdf" => Some("pdf"),
        "text/markdown" => Some("md"),
        "text/plain" => Some("txt"),
        _ => None,
    }
}

/// Mime type for a file extension.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "html" => Some("text/html"),
        "pdf" => Some("application/pdf"),
        "md" => Some("text/markdown"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_recorder(dir: &std::path::Path, default_extension: &'static str) -> Recorder {
        let store = CommitStore::init_or_open(dir, "Test Bot", "bot@test.local")
            .expect("Failed to open test store");
        Recorder::new(store, default_extension)
    }

    fn request(content: &[u8], changelog: &str, mime_type: &str) -> RecordRequest {
        RecordRequest {
            service_id: "acme".to_string(),
            document_type: "Terms of Service".to_string(),
            content: content.to_vec(),
            changelog: changelog.to_string(),
            mime_type: mime_type.to_string(),
            document_date: None,
        }
    }

    #[tokio::test]
    async fn test_first_record_then_update() {
        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "html");

        let outcome = recorder
            .record(request(b"<html>v1</html>", "Start tracking acme Terms of Service", "text/html"))
            .await
            .unwrap();
        let first = match outcome {
            RecordOutcome::Recorded(record) => record,
            RecordOutcome::Unchanged => panic!("first record should commit"),
        };
        assert!(first.is_first_record);

        let outcome = recorder
            .record(request(b"<html>v2</html>", "Update acme Terms of Service", "text/html"))
            .await
            .unwrap();
        let second = match outcome {
            RecordOutcome::Recorded(record) => record,
            RecordOutcome::Unchanged => panic!("changed record should commit"),
        };
        assert!(!second.is_first_record);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_unchanged_content_is_not_recorded() {
        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "html");

        recorder
            .record(request(b"same", "Start tracking", "text/html"))
            .await
            .unwrap();
        let outcome = recorder
            .record(request(b"same", "Update", "text/html"))
            .await
            .unwrap();

        assert!(matches!(outcome, RecordOutcome::Unchanged));
        assert_eq!(
            recorder.log("acme", "Terms of Service").await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_record_uses_document_date() {
        use chrono::TimeZone;

        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "html");

        let date = chrono::Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        let mut req = request(b"dated", "Start tracking", "text/html");
        req.document_date = Some(date);

        let outcome = recorder.record(req).await.unwrap();
        let record = match outcome {
            RecordOutcome::Recorded(record) => record,
            RecordOutcome::Unchanged => panic!("should commit"),
        };
        assert_eq!(record.date, date);

        let full = recorder.get_record(&record.id).await.unwrap();
        assert_eq!(full.date, date);
    }

    #[tokio::test]
    async fn test_get_latest_record_roundtrip() {
        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "html");

        recorder
            .record(request(b"<html>v1</html>", "Start tracking", "text/html"))
            .await
            .unwrap();
        let outcome = recorder
            .record(request(b"<html>v2</html>", "Update", "text/html"))
            .await
            .unwrap();
        let latest_id = match outcome {
            RecordOutcome::Recorded(record) => record.id,
            RecordOutcome::Unchanged => panic!("should commit"),
        };

        let latest = recorder
            .get_latest_record("acme", "Terms of Service")
            .await
            .unwrap()
            .expect("document is tracked");
        assert_eq!(latest.id, latest_id);
        assert_eq!(latest.content, b"<html>v2</html>");
        assert_eq!(latest.mime_type, "text/html");
    }

    #[tokio::test]
    async fn test_get_latest_record_missing_document() {
        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "html");

        let latest = recorder
            .get_latest_record("acme", "Terms of Service")
            .await
            .unwrap();
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_get_record_by_id() {
        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "md");

        let outcome = recorder
            .record(request(b"# Terms", "Start tracking", "text/markdown"))
            .await
            .unwrap();
        let id = match outcome {
            RecordOutcome::Recorded(record) => record.id,
            RecordOutcome::Unchanged => panic!("should commit"),
        };

        let full = recorder.get_record(&id).await.unwrap();
        assert_eq!(full.id, id);
        assert_eq!(full.content, b"# Terms");
        assert_eq!(full.mime_type, "text/markdown");
        assert_eq!(full.rel_path, "acme/Terms of Service.md");
    }

    #[tokio::test]
    async fn test_get_record_rejects_multi_file_commit() {
        let dir = tempdir().unwrap();
        let store = CommitStore::init_or_open(dir.path(), "Test Bot", "bot@test.local").unwrap();

        // A commit touching two files is not a well-formed record.
        store.write_and_stage("acme/TOS.html", b"a").unwrap();
        store.write_and_stage("acme/PP.html", b"b").unwrap();
        let hash = store.commit("mixed", Utc::now()).unwrap().unwrap();

        let recorder = Recorder::new(store, "html");
        let err = recorder.get_record(&hash).await.unwrap_err();
        assert!(matches!(err, StorageError::MalformedRecord { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_unknown_mime_falls_back_to_default_extension() {
        let dir = tempdir().unwrap();
        let recorder = open_recorder(dir.path(), "html");

        let outcome = recorder
            .record(request(b"???", "Start tracking", "application/x-mystery"))
            .await
            .unwrap();
        let id = match outcome {
            RecordOutcome::Recorded(record) => record.id,
            RecordOutcome::Unchanged => panic!("should commit"),
        };

        let full = recorder.get_record(&id).await.unwrap();
        assert_eq!(full.rel_path, "acme/Terms of Service.html");
    }

    #[test]
    fn test_mime_extension_table() {
        assert_eq!(extension_for_mime("text/html"), Some("html"));
        assert_eq!(extension_for_mime("text/html; charset=utf-8"), Some("html"));
        assert_eq!(extension_for_mime("application/pdf"), Some("pdf"));
        assert_eq!(extension_for_mime("text/markdown"), Some("md"));
        assert_eq!(extension_for_mime("text/plain"), Some("txt"));
        assert_eq!(extension_for_mime("application/x-mystery"), None);

        assert_eq!(mime_for_extension("html"), Some("text/html"));
        assert_eq!(mime_for_extension("pdf"), Some("application/pdf"));
        assert_eq!(mime_for_extension("md"), Some("text/markdown"));
        assert_eq!(mime_for_extension("weird"), None);
    }
}
