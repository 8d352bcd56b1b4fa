//! Integration tests for the tracking engine
//!
//! These tests drive the engine end-to-end through the library surface,
//! with temporary git repositories for both archives and a scripted
//! fetcher standing in for the network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use termwatch::config::HistoryConfig;
use termwatch::fetcher::{Fetch, FetchError, FetchedDocument};
use termwatch::history::History;
use termwatch::tracker::{Tracker, TrackerError, TrackingListener};

// =============================================================================
// Test Helpers
// =============================================================================

/// A scripted response for one location.
#[derive(Clone)]
enum Scripted {
    Page { mime_type: String, content: Vec<u8> },
    Inaccessible { reason: String },
}

/// Fetcher that serves scripted responses instead of hitting the network.
#[derive(Default)]
struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Scripted>>,
}

impl ScriptedFetcher {
    fn set_page(&self, location: &str, mime_type: &str, content: &[u8]) {
        self.responses.lock().unwrap().insert(
            location.to_string(),
            Scripted::Page {
                mime_type: mime_type.to_string(),
                content: content.to_vec(),
            },
        );
    }

    fn set_inaccessible(&self, location: &str, reason: &str) {
        self.responses.lock().unwrap().insert(
            location.to_string(),
            Scripted::Inaccessible {
                reason: reason.to_string(),
            },
        );
    }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
    async fn fetch(&self, location: &str) -> Result<FetchedDocument, FetchError> {
        let scripted = self.responses.lock().unwrap().get(location).cloned();
        match scripted {
            Some(Scripted::Page { mime_type, content }) => {
                Ok(FetchedDocument { mime_type, content })
            }
            Some(Scripted::Inaccessible { reason }) => Err(FetchError::InaccessibleContent {
                location: location.to_string(),
                reason,
            }),
            None => Err(FetchError::InaccessibleContent {
                location: location.to_string(),
                reason: "no scripted response".to_string(),
            }),
        }
    }
}

/// Fetcher that measures how many fetches are in flight at once.
struct CountingFetcher {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl CountingFetcher {
    fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
        }
    }

    fn max_in_flight(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetch for CountingFetcher {
    async fn fetch(&self, location: &str) -> Result<FetchedDocument, FetchError> {
        let in_flight = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(in_flight, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(25)).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(FetchedDocument {
            mime_type: "text/html".to_string(),
            content: format!("<html><main>{location}</main></html>").into_bytes(),
        })
    }
}

/// Listener that records event names and their subjects.
#[derive(Default)]
struct CollectingListener {
    events: Mutex<Vec<String>>,
}

impl CollectingListener {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count_of(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn count_with_prefix(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl TrackingListener for CollectingListener {
    fn on_first_snapshot_recorded(&self, service_id: &str, document_type: &str, _id: &str) {
        self.push(format!("first_snapshot_recorded:{service_id}:{document_type}"));
    }

    fn on_snapshot_recorded(&self, service_id: &str, document_type: &str, _id: &str) {
        self.push(format!("snapshot_recorded:{service_id}:{document_type}"));
    }

    fn on_snapshot_not_changed(&self, service_id: &str, document_type: &str) {
        self.push(format!("snapshot_not_changed:{service_id}:{document_type}"));
    }

    fn on_first_version_recorded(&self, service_id: &str, document_type: &str, _id: &str) {
        self.push(format!("first_version_recorded:{service_id}:{document_type}"));
    }

    fn on_version_recorded(&self, service_id: &str, document_type: &str, _id: &str) {
        self.push(format!("version_recorded:{service_id}:{document_type}"));
    }

    fn on_version_not_changed(&self, service_id: &str, document_type: &str) {
        self.push(format!("version_not_changed:{service_id}:{document_type}"));
    }

    fn on_records_published(&self) {
        self.push("records_published".to_string());
    }

    fn on_inaccessible_content(&self, _error: &FetchError, service_id: &str, document_type: &str) {
        self.push(format!("inaccessible_content:{service_id}:{document_type}"));
    }

    fn on_error(&self, _error: &TrackerError, service_id: &str, document_type: &str) {
        self.push(format!("error:{service_id}:{document_type}"));
    }
}

/// Writes one declaration file per `(service_id, json)` pair.
fn write_declarations(dir: &TempDir, declarations: &[(&str, String)]) {
    let path = dir.path().join("declarations");
    fs::create_dir_all(&path).expect("Failed to create declarations directory");
    for (service_id, json) in declarations {
        fs::write(path.join(format!("{service_id}.json")), json)
            .expect("Failed to write declaration");
    }
}

/// Declaration for a single "Terms of Service" document.
fn tos_declaration(location: &str) -> String {
    format!(
        r#"{{"documents": {{"Terms of Service": {{
            "fetch": "{location}",
            "select": ["main"],
            "remove": [".ad-banner"]
        }}}}}}"#
    )
}

/// Opens an engine over the temp directory's archives and declarations.
///
/// Reopening with the same directory continues the existing archives,
/// which is how the refilter scenarios pick up declaration changes.
fn open_tracker(
    dir: &TempDir,
    publish: bool,
    fetcher: Arc<dyn Fetch>,
) -> (Tracker, Arc<CollectingListener>) {
    let history = History::open(&HistoryConfig {
        snapshots_path: dir.path().join("snapshots"),
        versions_path: dir.path().join("versions"),
        publish,
        snapshots_base_url: None,
        ..Default::default()
    })
    .expect("Failed to open history");

    let mut tracker = Tracker::new(dir.path().join("declarations"), history, fetcher);
    let listener = Arc::new(CollectingListener::default());
    tracker.attach(listener.clone());
    tracker.init().expect("Failed to init tracker");
    (tracker, listener)
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn first_time_tracking_records_snapshot_and_bound_version() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page("http://x/tos", "text/html", b"<html><main>Hello</main></html>");

    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&[]).await.unwrap();

    // One snapshot commit with the start-tracking message.
    let snapshots = tracker
        .history()
        .snapshots()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].message, "Start tracking acme Terms of Service");

    // One version commit whose message binds the snapshot id.
    let versions = tracker
        .history()
        .versions()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(
        versions[0].message,
        format!(
            "Start tracking acme Terms of Service\n\n\
             This version was recorded after filtering snapshot {}",
            snapshots[0].hash
        )
    );

    // The version content is the filtered text.
    let version = tracker
        .history()
        .versions()
        .get_latest_record("acme", "Terms of Service")
        .await
        .unwrap()
        .expect("version recorded");
    assert_eq!(version.content, b"Hello");

    assert_eq!(
        listener.events(),
        vec![
            "first_snapshot_recorded:acme:Terms of Service",
            "first_version_recorded:acme:Terms of Service",
            "records_published",
        ]
    );
}

#[tokio::test]
async fn unchanged_content_produces_no_commits() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page("http://x/tos", "text/html", b"<html><main>Hello</main></html>");

    let (tracker, _) = open_tracker(&dir, true, fetcher.clone());
    tracker.track_changes(&[]).await.unwrap();

    // Second run with identical bytes.
    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&[]).await.unwrap();

    assert_eq!(
        listener.events(),
        vec![
            "snapshot_not_changed:acme:Terms of Service",
            "records_published",
        ]
    );

    let snapshots = tracker
        .history()
        .snapshots()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    let versions = tracker
        .history()
        .versions()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn noise_only_change_records_snapshot_but_not_version() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page(
        "http://x/tos",
        "text/html",
        b"<html><main><p>Terms apply.</p><div class=\"ad-banner\">Ad A</div></main></html>",
    );

    let (tracker, _) = open_tracker(&dir, true, fetcher.clone());
    tracker.track_changes(&[]).await.unwrap();

    // The page changes, but only inside the stripped ad banner.
    fetcher.set_page(
        "http://x/tos",
        "text/html",
        b"<html><main><p>Terms apply.</p><div class=\"ad-banner\">Ad B</div></main></html>",
    );

    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&[]).await.unwrap();

    assert_eq!(
        listener.events(),
        vec![
            "snapshot_recorded:acme:Terms of Service",
            "version_not_changed:acme:Terms of Service",
            "records_published",
        ]
    );

    let snapshots = tracker
        .history()
        .snapshots()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    let versions = tracker
        .history()
        .versions()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(versions.len(), 1);
}

#[tokio::test]
async fn inaccessible_document_does_not_abort_the_batch() {
    let dir = TempDir::new().unwrap();
    write_declarations(
        &dir,
        &[
            ("acme", tos_declaration("http://x/tos")),
            ("beta", tos_declaration("http://beta/tos")),
        ],
    );

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_inaccessible("http://x/tos", "http 503");
    fetcher.set_page(
        "http://beta/tos",
        "text/html",
        b"<html><main>Beta terms</main></html>",
    );

    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&[]).await.unwrap();

    // The unreachable document is reported, the reachable one recorded,
    // and publication happens exactly once.
    assert_eq!(
        listener.count_of("inaccessible_content:acme:Terms of Service"),
        1
    );
    assert_eq!(
        listener.count_of("first_snapshot_recorded:beta:Terms of Service"),
        1
    );
    assert_eq!(
        listener.count_of("first_version_recorded:beta:Terms of Service"),
        1
    );
    assert_eq!(listener.count_of("records_published"), 1);

    // No commits for the unreachable service.
    assert!(tracker
        .history()
        .get_latest_snapshot("acme", "Terms of Service")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn refilter_rebinds_to_the_existing_snapshot() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page(
        "http://x/tos",
        "text/html",
        b"<html><main><p>Terms apply.</p><p class=\"legalese\">Boilerplate.</p></main></html>",
    );

    let (tracker, _) = open_tracker(&dir, true, fetcher.clone());
    tracker.track_changes(&[]).await.unwrap();

    let snapshot = tracker
        .history()
        .get_latest_snapshot("acme", "Terms of Service")
        .await
        .unwrap()
        .expect("snapshot recorded");

    // The declaration drifts: boilerplate is now stripped too.
    write_declarations(
        &dir,
        &[(
            "acme",
            r#"{"documents": {"Terms of Service": {
                "fetch": "http://x/tos",
                "select": ["main"],
                "remove": [".legalese"]
            }}}"#
            .to_string(),
        )],
    );

    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    tracker
        .refilter_and_record(&["acme".to_string()])
        .await
        .unwrap();

    assert_eq!(
        listener.events(),
        vec![
            "version_recorded:acme:Terms of Service",
            "records_published",
        ]
    );

    // No new snapshot; one new version prefixed Refilter and bound to
    // the existing snapshot.
    let snapshots = tracker
        .history()
        .snapshots()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    assert_eq!(snapshots.len(), 1);

    let versions = tracker
        .history()
        .versions()
        .log("acme", "Terms of Service")
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0]
        .message
        .starts_with("Refilter acme Terms of Service"));
    assert!(versions[0].message.contains(&snapshot.id));

    let version = tracker
        .history()
        .versions()
        .get_latest_record("acme", "Terms of Service")
        .await
        .unwrap()
        .expect("version recorded");
    assert_eq!(version.content, b"Terms apply.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_tracking_stays_under_the_cap() {
    let dir = TempDir::new().unwrap();

    let declarations: Vec<(String, String)> = (0..40)
        .map(|i| {
            (
                format!("service{i:02}"),
                tos_declaration(&format!("http://service{i:02}.example/tos")),
            )
        })
        .collect();
    let declaration_refs: Vec<(&str, String)> = declarations
        .iter()
        .map(|(id, json)| (id.as_str(), json.clone()))
        .collect();
    write_declarations(&dir, &declaration_refs);

    let fetcher = Arc::new(CountingFetcher::new());
    let (tracker, listener) = open_tracker(&dir, false, fetcher.clone());
    tracker.track_changes(&[]).await.unwrap();

    assert!(
        fetcher.max_in_flight() <= 20,
        "at most 20 documents may be in flight, saw {}",
        fetcher.max_in_flight()
    );
    assert_eq!(listener.count_with_prefix("first_snapshot_recorded:"), 40);
    assert_eq!(listener.count_with_prefix("first_version_recorded:"), 40);
    assert_eq!(listener.count_of("records_published"), 1);
}

// =============================================================================
// Failure semantics and binding properties
// =============================================================================

#[tokio::test]
async fn fatal_error_aborts_the_batch_without_publishing() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    // PDF content cannot be filtered; that is a bug-class failure, not
    // an inaccessible upstream.
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page("http://x/tos", "application/pdf", b"%PDF-1.4 ...");

    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    let result = tracker.track_changes(&[]).await;

    assert!(matches!(result, Err(TrackerError::Filter(_))));
    assert_eq!(listener.count_of("error:acme:Terms of Service"), 1);
    assert_eq!(listener.count_of("records_published"), 0);
}

#[tokio::test]
async fn empty_fetched_content_is_skipped_silently() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page("http://x/tos", "text/html", b"");

    let (tracker, listener) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&[]).await.unwrap();

    assert_eq!(listener.events(), vec!["records_published"]);
    assert!(tracker
        .history()
        .get_latest_snapshot("acme", "Terms of Service")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn version_author_date_matches_snapshot_date() {
    let dir = TempDir::new().unwrap();
    write_declarations(&dir, &[("acme", tos_declaration("http://x/tos"))]);

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page("http://x/tos", "text/html", b"<html><main>Hello</main></html>");

    let (tracker, _) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&[]).await.unwrap();

    let snapshot = tracker
        .history()
        .get_latest_snapshot("acme", "Terms of Service")
        .await
        .unwrap()
        .expect("snapshot recorded");
    let version = tracker
        .history()
        .versions()
        .get_latest_record("acme", "Terms of Service")
        .await
        .unwrap()
        .expect("version recorded");

    assert_eq!(version.date, snapshot.date);
}

#[tokio::test]
async fn tracking_a_subset_leaves_other_services_untouched() {
    let dir = TempDir::new().unwrap();
    write_declarations(
        &dir,
        &[
            ("acme", tos_declaration("http://x/tos")),
            ("beta", tos_declaration("http://beta/tos")),
        ],
    );

    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.set_page("http://x/tos", "text/html", b"<html><main>Acme</main></html>");
    fetcher.set_page(
        "http://beta/tos",
        "text/html",
        b"<html><main>Beta</main></html>",
    );

    let (tracker, _) = open_tracker(&dir, true, fetcher);
    tracker.track_changes(&["acme".to_string()]).await.unwrap();

    assert!(tracker
        .history()
        .get_latest_snapshot("acme", "Terms of Service")
        .await
        .unwrap()
        .is_some());
    assert!(tracker
        .history()
        .get_latest_snapshot("beta", "Terms of Service")
        .await
        .unwrap()
        .is_none());
}
