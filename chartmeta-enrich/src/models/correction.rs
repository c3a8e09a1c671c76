//! Correction log entries

use serde::{Deserialize, Serialize};

/// A failed enrichment kept for later reconciliation
///
/// `identifier` stays empty until someone looks the item up by hand and
/// writes the id back into the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub title: String,
    pub artist: String,
    pub identifier: Option<String>,
    /// Set by reconciliation once the entry's record exists
    #[serde(default)]
    pub resolved: bool,
}

impl CorrectionEntry {
    /// Entry for an item whose lookup failed
    pub fn unresolved(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            identifier: None,
            resolved: false,
        }
    }

    /// Corrected identifier, if one was written back
    ///
    /// Accepts bare ids as well as URIs such as `spotify:track:<id>`; the id
    /// is the last `:`-separated segment.
    pub fn corrected_id(&self) -> Option<&str> {
        let raw = self.identifier.as_deref()?.trim();
        let id = raw.rsplit(':').next().unwrap_or(raw).trim();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}
