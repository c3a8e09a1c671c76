//! Seen-set for one chart traversal
//!
//! Claims are atomic check-and-mark operations, so a given identifier is
//! handed out at most once even when several workers ask concurrently.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of one identifier search, carried in checkpoint manifests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub title: String,
    pub artist: String,
    /// `None` when the search failed
    #[serde(default)]
    pub identifier: Option<String>,
}

type SearchKey = (String, String);

/// Tracks identifiers (and identifier searches) already claimed in a run
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
    searched: Mutex<HashMap<SearchKey, Option<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The sets stay consistent even if a holder panicked mid-insert
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-mark identifiers recovered from a checkpoint
    pub fn seed<'a>(&self, identifiers: impl IntoIterator<Item = &'a str>) -> usize {
        let mut seen = lock(&self.seen);
        let before = seen.len();
        seen.extend(
            identifiers
                .into_iter()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        );
        seen.len() - before
    }

    /// Pre-mark searches recovered from a checkpoint, keeping their outcome
    pub fn seed_searches(&self, searches: impl IntoIterator<Item = SearchRecord>) -> usize {
        let mut searched = lock(&self.searched);
        let before = searched.len();
        for record in searches {
            let key = search_key(&record.title, &record.artist);
            if !key.0.is_empty() {
                searched.insert(key, record.identifier);
            }
        }
        searched.len() - before
    }

    /// True exactly once per distinct non-empty identifier
    pub fn should_process(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return false;
        }
        lock(&self.seen).insert(identifier.to_string())
    }

    /// True exactly once per distinct (title, artist), compared case-insensitively
    pub fn should_search(&self, title: &str, artist: &str) -> bool {
        let key = search_key(title, artist);
        if key.0.is_empty() {
            return false;
        }
        let mut searched = lock(&self.searched);
        if searched.contains_key(&key) {
            return false;
        }
        searched.insert(key, None);
        true
    }

    /// Remember what a claimed search resolved to
    pub fn record_search(&self, title: &str, artist: &str, identifier: &str) {
        lock(&self.searched).insert(search_key(title, artist), Some(identifier.to_string()));
    }

    /// Identifier an earlier search for this (title, artist) resolved to
    pub fn searched_identifier(&self, title: &str, artist: &str) -> Option<String> {
        lock(&self.searched)
            .get(&search_key(title, artist))
            .cloned()
            .flatten()
    }

    /// Every search so far, sorted by (title, artist)
    pub fn searches(&self) -> Vec<SearchRecord> {
        let mut records: Vec<SearchRecord> = lock(&self.searched)
            .iter()
            .map(|((title, artist), identifier)| SearchRecord {
                title: title.clone(),
                artist: artist.clone(),
                identifier: identifier.clone(),
            })
            .collect();
        records.sort_by(|a, b| (&a.title, &a.artist).cmp(&(&b.title, &b.artist)));
        records
    }
}

fn search_key(title: &str, artist: &str) -> SearchKey {
    (normalize(title), normalize(artist))
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
