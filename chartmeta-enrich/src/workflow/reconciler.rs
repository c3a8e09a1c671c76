//! Correction reconciliation
//!
//! Re-runs enrichment for correction entries that carry a hand-written
//! identifier and folds the results into an existing dataset. Running it
//! twice against the same log changes nothing the second time.

use super::corrections::{load_corrections, mark_resolved};
use super::storage::{read_dataset, write_dataset};
use crate::error::RunResult;
use crate::models::{ChartItem, CorrectionEntry, Dataset};
use crate::services::{CredentialError, CredentialManager, Enricher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Distinct titles with a corrected identifier
    pub candidates: usize,
    /// Titles enriched and written into the dataset
    pub repaired: Vec<String>,
    /// Titles whose record was already in the dataset
    pub already_present: Vec<String>,
    /// Titles whose enrichment failed again
    pub failed: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.repaired.is_empty()
    }
}

struct Correction<'a> {
    title: &'a str,
    artist: &'a str,
    identifier: &'a str,
}

/// Title → corrected identifier, first-seen title order, later entries win
fn corrections_by_title(entries: &[CorrectionEntry]) -> Vec<Correction<'_>> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, Correction<'_>> = HashMap::new();

    for entry in entries {
        let Some(identifier) = entry.corrected_id() else {
            continue;
        };
        if !latest.contains_key(entry.title.as_str()) {
            order.push(&entry.title);
        }
        latest.insert(
            &entry.title,
            Correction {
                title: &entry.title,
                artist: &entry.artist,
                identifier,
            },
        );
    }

    order
        .into_iter()
        .filter_map(|title| latest.remove(title))
        .collect()
}

pub struct Reconciler {
    enricher: Arc<Enricher>,
    credentials: Arc<CredentialManager>,
}

impl Reconciler {
    pub fn new(enricher: Arc<Enricher>, credentials: Arc<CredentialManager>) -> Self {
        Self {
            enricher,
            credentials,
        }
    }

    /// Repair `dataset` from correction entries
    ///
    /// A title counts as present when the dataset has a complete record with
    /// that title or with the corrected identifier. Only
    /// `CredentialError` is fatal.
    pub async fn reconcile(
        &self,
        dataset: &mut Dataset,
        entries: &[CorrectionEntry],
    ) -> Result<ReconcileReport, CredentialError> {
        let corrections = corrections_by_title(entries);
        let mut report = ReconcileReport {
            candidates: corrections.len(),
            ..Default::default()
        };

        for correction in corrections {
            if dataset.contains(correction.identifier)
                || dataset.find_by_title(correction.title).is_some()
            {
                debug!(title = %correction.title, "Already reconciled");
                report.already_present.push(correction.title.to_string());
                continue;
            }

            let item = ChartItem::new(correction.identifier, correction.title, correction.artist);
            let credential = self.credentials.current().await;

            match self.enricher.enrich(&credential, &item).await {
                Ok(record) => {
                    info!(title = %correction.title, identifier = %record.identifier, "Reconciled");
                    dataset.resolve(correction.title, record);
                    report.repaired.push(correction.title.to_string());
                }
                Err(e) => {
                    warn!(
                        title = %correction.title,
                        identifier = %correction.identifier,
                        error = e.source.code(),
                        "Reconciliation failed: {}",
                        e
                    );
                    report.failed.push(correction.title.to_string());
                    self.credentials.refresh(&credential).await?;
                }
            }
        }

        info!(
            candidates = report.candidates,
            repaired = report.repaired.len(),
            present = report.already_present.len(),
            failed = report.failed.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Reconcile persisted files in place
    ///
    /// The dataset is rewritten only if a record was repaired. Entries whose
    /// record is now present are marked resolved in the correction log.
    pub async fn reconcile_files(
        &self,
        dataset_path: &Path,
        corrections_path: &Path,
    ) -> RunResult<ReconcileReport> {
        let mut dataset = if dataset_path.exists() {
            read_dataset(dataset_path)?
        } else {
            warn!(path = %dataset_path.display(), "Dataset not found, starting empty");
            Dataset::new()
        };
        let entries = load_corrections(corrections_path)?;

        let report = self.reconcile(&mut dataset, &entries).await?;

        if report.changed() {
            write_dataset(dataset_path, &dataset)?;
        }

        let present: Vec<String> = report
            .repaired
            .iter()
            .chain(report.already_present.iter())
            .cloned()
            .collect();
        let marked = mark_resolved(corrections_path, &present)?;
        debug!(marked, "Correction log updated");

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, id: Option<&str>) -> CorrectionEntry {
        CorrectionEntry {
            identifier: id.map(str::to_string),
            ..CorrectionEntry::unresolved(title, "artist")
        }
    }

    #[test]
    fn test_later_entries_win() {
        let entries = vec![
            entry("B", Some("old")),
            entry("C", None),
            entry("D", Some("spotify:track:d1")),
            entry("B", Some("new")),
        ];
        let corrections = corrections_by_title(&entries);
        let flat: Vec<(&str, &str)> = corrections.iter().map(|c| (c.title, c.identifier)).collect();
        assert_eq!(flat, vec![("B", "new"), ("D", "d1")]);
    }

    #[test]
    fn test_entries_without_identifier_ignored() {
        let entries = vec![entry("B", None), entry("C", Some("  "))];
        assert!(corrections_by_title(&entries).is_empty());
    }
}
