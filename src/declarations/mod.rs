//! Service declarations.
//!
//! A declaration describes which documents of an online service are
//! tracked and how their legal text is extracted: the location to fetch,
//! the CSS selectors identifying the relevant content, the selectors for
//! noise to strip, and optional named post-extraction transforms.
//!
//! Declarations live as JSON files in the configured declarations
//! directory, one file per service. The file stem is the service id:
//!
//! ```json
//! {
//!   "name": "Acme",
//!   "documents": {
//!     "Terms of Service": {
//!       "fetch": "https://acme.example/tos",
//!       "select": ["main"],
//!       "remove": [".ad-banner"],
//!       "filter": ["collapse-blank-lines"]
//!     }
//!   }
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::filter::is_known_filter;

/// How a single tracked document is fetched and cleaned.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DocumentDeclaration {
    /// URL the document is fetched from.
    #[serde(rename = "fetch")]
    pub location: String,

    /// CSS selectors identifying the subtrees holding the legal text.
    #[serde(rename = "select", default)]
    pub content_selectors: Vec<String>,

    /// CSS selectors for subtrees stripped before conversion (cookie
    /// banners, ads, navigation).
    #[serde(rename = "remove", default)]
    pub noise_selectors: Vec<String>,

    /// Named transforms applied to the extracted markdown, in order.
    #[serde(rename = "filter", default)]
    pub filters: Vec<String>,
}

/// A service and the documents tracked for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    /// Service identifier, taken from the declaration file stem.
    pub id: String,
    /// Human-readable service name from the declaration.
    pub name: String,
    /// Tracked documents, keyed by document type ("Terms of Service", …).
    pub documents: BTreeMap<String, DocumentDeclaration>,
}

/// Raw on-disk shape of a declaration file.
#[derive(Debug, Deserialize)]
struct ServiceFile {
    #[serde(default)]
    name: Option<String>,
    documents: BTreeMap<String, DocumentDeclaration>,
}

/// Loads all service declarations from a directory.
///
/// Reads every `*.json` file in `path`, keyed by file stem. Declarations
/// referencing unknown filter names are rejected here so a bad name fails
/// the load, not a tracking batch hours later.
///
/// # Errors
///
/// Returns an error if the directory cannot be read, a file cannot be
/// parsed, a document has an empty fetch location, or a filter name is
/// unknown.
pub fn load_service_declarations(path: &Path) -> Result<BTreeMap<String, Service>> {
    let entries = fs::read_dir(path)
        .with_context(|| format!("Failed to read declarations directory: {}", path.display()))?;

    let mut services = BTreeMap::new();

    for entry in entries {
        let entry = entry.with_context(|| {
            format!("Failed to list declarations directory: {}", path.display())
        })?;
        let file_path = entry.path();

        if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let service_id = match file_path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        let service = load_service_file(&service_id, &file_path)?;
        tracing::debug!(
            "Loaded declaration for {} ({} documents)",
            service.id,
            service.documents.len()
        );
        services.insert(service_id, service);
    }

    Ok(services)
}

/// Loads and validates a single declaration file.
fn load_service_file(service_id: &str, path: &Path) -> Result<Service> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read declaration file: {}", path.display()))?;

    let raw: ServiceFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse declaration file: {}", path.display()))?;

    for (document_type, declaration) in &raw.documents {
        if declaration.location.trim().is_empty() {
            bail!(
                "Declaration {} {document_type} has an empty fetch location",
                service_id
            );
        }
        for filter_name in &declaration.filters {
            if !is_known_filter(filter_name) {
                bail!(
                    "Declaration {} {document_type} references unknown filter '{filter_name}'",
                    service_id
                );
            }
        }
    }

    Ok(Service {
        id: service_id.to_string(),
        name: raw.name.unwrap_or_else(|| service_id.to_string()),
        documents: raw.documents,
    })
}
