//! Correction log
//!
//! Append-only CSV of items whose enrichment failed. A person fills in the
//! `identifier` column by hand; reconciliation later reads the file back and
//! marks rows it could repair as resolved.

use super::storage::{temp_path, StoreError};
use crate::models::CorrectionEntry;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const HEADER: [&str; 4] = ["title", "artist", "identifier", "resolved"];

/// Older logs name the identifier column after the lookup service
const LEGACY_IDENTIFIER_COLUMN: &str = "track_id";

/// Serialized appender for one correction file
pub struct CorrectionLog {
    path: PathBuf,
    /// Held across each append so rows never interleave
    write_lock: Mutex<()>,
}

impl CorrectionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, creating the file with a header if absent
    pub async fn append(&self, entry: CorrectionEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        let title = entry.title.clone();

        tokio::task::spawn_blocking(move || append_row(&path, &entry))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        debug!(path = %self.path.display(), title = %title, "Appended correction entry");
        Ok(())
    }
}

fn append_row(path: &Path, entry: &CorrectionEntry) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if !is_new && !has_current_header(path)? {
        // Rows must match the header width, so older layouts are upgraded first
        let entries = load_corrections(path)?;
        rewrite(path, &entries)?;
        info!(path = %path.display(), rows = entries.len(), "Upgraded correction log header");
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut writer = csv::Writer::from_writer(file);
    if is_new {
        writer.write_record(HEADER)?;
    }
    writer.write_record(entry_row(entry))?;
    writer.flush()?;
    Ok(())
}

fn entry_row(entry: &CorrectionEntry) -> [String; 4] {
    [
        entry.title.clone(),
        entry.artist.clone(),
        entry.identifier.clone().unwrap_or_default(),
        if entry.resolved { "true" } else { "" }.to_string(),
    ]
}

/// Hand-edited rows may drop trailing fields
fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, StoreError> {
    Ok(csv::ReaderBuilder::new().flexible(true).from_path(path)?)
}

fn has_current_header(path: &Path) -> Result<bool, StoreError> {
    let mut reader = open_reader(path)?;
    Ok(reader.headers()?.iter().map(str::trim).eq(HEADER))
}

/// Replace the whole file, atomically, in the current layout
fn rewrite(path: &Path, entries: &[CorrectionEntry]) -> Result<(), StoreError> {
    let tmp = temp_path(path);
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(HEADER)?;
        for entry in entries {
            writer.write_record(entry_row(entry))?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read every entry; a missing file is an empty log
pub fn load_corrections(path: &Path) -> Result<Vec<CorrectionEntry>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = open_reader(path)?;
    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let title_col = position("title").ok_or_else(|| StoreError::Format {
        path: path.to_path_buf(),
        message: "missing 'title' column".to_string(),
    })?;
    let artist_col = position("artist");
    let identifier_col = position("identifier").or_else(|| position(LEGACY_IDENTIFIER_COLUMN));
    let resolved_col = position("resolved");

    let mut entries = Vec::new();
    for result in reader.records() {
        let row = result?;
        let field = |col: Option<usize>| col.and_then(|i| row.get(i)).map(str::trim).unwrap_or("");

        let title = field(Some(title_col));
        if title.is_empty() {
            continue;
        }
        let identifier = field(identifier_col);

        entries.push(CorrectionEntry {
            title: title.to_string(),
            artist: field(artist_col).to_string(),
            identifier: Some(identifier).filter(|v| !v.is_empty()).map(str::to_string),
            resolved: field(resolved_col).eq_ignore_ascii_case("true"),
        });
    }

    debug!(path = %path.display(), entries = entries.len(), "Loaded correction log");
    Ok(entries)
}

/// Rewrite the log with matching titles marked resolved
///
/// Only rows that carry an identifier are marked. No row is dropped.
/// Returns the number of rows newly marked.
pub fn mark_resolved(path: &Path, titles: &[String]) -> Result<usize, StoreError> {
    if titles.is_empty() || !path.exists() {
        return Ok(0);
    }

    let mut entries = load_corrections(path)?;
    let mut marked = 0;
    for entry in entries.iter_mut() {
        if !entry.resolved && entry.corrected_id().is_some() && titles.contains(&entry.title) {
            entry.resolved = true;
            marked += 1;
        }
    }
    if marked == 0 {
        return Ok(0);
    }

    rewrite(path, &entries)?;
    info!(path = %path.display(), marked, "Marked corrections resolved");
    Ok(marked)
}
