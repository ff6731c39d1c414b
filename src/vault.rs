/// Vault ingestion: turns the markdown files of a note vault into stored documents.
///
/// A vault root holds two flat directories, `pages/` and `journals/`. Every `*.md`
/// file in them becomes one document whose id is the vault-relative path and whose
/// title is the file stem. Re-ingesting an unchanged file keeps its embedding, and
/// documents whose file is gone from the vault are deleted.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::VaultError;
use crate::store::{DocType, DocumentStore, NewDocument};

const VAULT_DIRS: [(&str, DocType); 2] = [("pages", DocType::Page), ("journals", DocType::Journal)];

/// Documents read from disk, plus the number of files that could not be read.
#[derive(Debug, Default)]
pub struct LoadedVault {
    pub documents: Vec<NewDocument>,
    pub unreadable: usize,
    /// Id of every markdown file present, including unreadable ones
    pub present: Vec<String>,
}

/// Counts for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub pages: usize,
    pub journals: usize,
    pub total: usize,
    /// Files that could not be read or stored
    pub failed: usize,
    /// Stored documents deleted because their file no longer exists
    pub removed: u64,
}

/// Read every `pages/*.md` and `journals/*.md` file under `root`.
///
/// Files are returned in id order. One missing subdirectory counts as empty; a missing
/// root, or a root with neither subdirectory, is an error.
pub fn load_vault(root: &Path) -> Result<LoadedVault, VaultError> {
    if !root.is_dir() {
        return Err(VaultError::validation(
            "path",
            &format!("Vault directory not found: {}", root.display()),
        ));
    }

    let mut loaded = LoadedVault::default();
    let mut found = 0;
    for (dir_name, doc_type) in VAULT_DIRS {
        let dir = root.join(dir_name);
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Vault subdirectory missing, skipping");
            continue;
        }
        found += 1;
        load_dir(&dir, dir_name, doc_type, &mut loaded)?;
    }
    // Ingest deletes whatever the vault lacks, so a wrong path must not look like an empty vault
    if found == 0 {
        return Err(VaultError::validation(
            "path",
            &format!("No pages/ or journals/ directory in {}", root.display()),
        ));
    }

    loaded.documents.sort_by(|a, b| a.id.cmp(&b.id));
    loaded.present.sort();
    Ok(loaded)
}

fn load_dir(
    dir: &Path,
    dir_name: &str,
    doc_type: DocType,
    loaded: &mut LoadedVault,
) -> Result<(), VaultError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        VaultError::validation("path", &format!("Cannot list {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                loaded.unreadable += 1;
                continue;
            }
        };
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let (Some(file_name), Some(title)) = (
            path.file_name().and_then(|n| n.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
        ) else {
            tracing::warn!(file = %path.display(), "Skipping file with a non UTF-8 name");
            loaded.unreadable += 1;
            continue;
        };

        let id = format!("{}/{}", dir_name, file_name);
        loaded.present.push(id.clone());
        match read_markdown(&path) {
            Ok((content, modified_at)) => loaded.documents.push(NewDocument {
                id,
                doc_type,
                title: title.to_string(),
                content,
                modified_at,
            }),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable file");
                loaded.unreadable += 1;
            }
        }
    }
    Ok(())
}

fn read_markdown(path: &Path) -> std::io::Result<(String, DateTime<Utc>)> {
    let content = std::fs::read_to_string(path)?.replace('\0', "");
    let modified_at = std::fs::metadata(path)?
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok((content, modified_at))
}

/// Load the vault at `root`, upsert every document into `store`, then delete stored
/// documents whose file is gone.
///
/// Per-file store errors are counted and logged; losing the store connection
/// aborts the run. Files that exist but could not be read are kept in the store.
pub async fn ingest_vault(store: &dyn DocumentStore, root: &Path) -> Result<IngestReport, VaultError> {
    let loaded = load_vault(root)?;
    let mut report = IngestReport {
        failed: loaded.unreadable,
        ..Default::default()
    };

    let present = loaded.present;
    for doc in loaded.documents {
        let id = doc.id.clone();
        let doc_type = doc.doc_type;
        match store.upsert(doc).await {
            Ok(_) => match doc_type {
                DocType::Page => report.pages += 1,
                DocType::Journal => report.journals += 1,
            },
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(document_id = %id, error = %e, "Failed to store document");
                report.failed += 1;
            }
        }
    }

    report.removed = store.remove_missing(&present).await?;
    report.total = report.pages + report.journals;
    tracing::info!(
        pages = report.pages,
        journals = report.journals,
        failed = report.failed,
        removed = report.removed,
        "Vault ingested"
    );
    Ok(report)
}
