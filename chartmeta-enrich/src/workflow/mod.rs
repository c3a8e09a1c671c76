//! Chart traversal workflow
//!
//! The pipeline walks chart snapshots backward, claims each identifier once,
//! enriches claimed items, and on any item failure logs a correction,
//! queues a checkpoint and refreshes the credential before moving on.
//!
//! # Persistence
//!
//! - `storage`: dataset table (also the checkpoint schema)
//! - `checkpoint`: background writer for checkpoint tables plus manifests
//! - `corrections`: append-only correction log
//!
//! The reconciler runs later against the persisted dataset and correction log.

pub mod checkpoint;
pub mod corrections;
pub mod pipeline;
pub mod reconciler;
pub mod storage;

pub use checkpoint::{load_manifest, CheckpointStats, CheckpointWriter};
pub use corrections::{load_corrections, mark_resolved, CorrectionLog};
pub use pipeline::{Pipeline, PipelineConfig};
pub use reconciler::{ReconcileReport, Reconciler};
pub use storage::{read_dataset, write_dataset, StoreError};

use crate::services::{EnrichState, SearchRecord, WalkStart};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resume point written next to every checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Where the original run began
    pub start: WalkStart,
    /// Snapshot being processed when the checkpoint was taken
    pub in_progress: Option<NaiveDate>,
    /// Most recent snapshot whose items were all handled
    pub last_completed: Option<NaiveDate>,
    pub snapshots_requested: u32,
    pub snapshots_completed: u32,
    /// Item failures so far; also the tag of the latest checkpoint
    pub failures: u64,
    /// Identifiers whose enrichment failed; never retried in this run
    #[serde(default)]
    pub failed: Vec<String>,
    /// Identifier searches made so far, with their outcome
    #[serde(default)]
    pub searches: Vec<SearchRecord>,
    /// Checkpoint table this manifest describes
    #[serde(default)]
    pub dataset_path: PathBuf,
    pub written_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn new(start: WalkStart, snapshots_requested: u32) -> Self {
        Self {
            start,
            in_progress: None,
            last_completed: None,
            snapshots_requested,
            snapshots_completed: 0,
            failures: 0,
            failed: Vec::new(),
            searches: Vec::new(),
            dataset_path: PathBuf::new(),
            written_at: Utc::now(),
        }
    }

    /// Where a resumed walk picks up
    ///
    /// A snapshot interrupted mid-way is walked again; identifiers already
    /// in the checkpoint, failed identifiers and past searches are seeded
    /// into the deduplicator, so only its unfinished items are attempted.
    pub fn resume_start(&self) -> WalkStart {
        match (self.in_progress, self.last_completed) {
            (Some(date), _) => WalkStart::At(date),
            (None, Some(date)) => WalkStart::Before(date),
            (None, None) => self.start,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.snapshots_requested.saturating_sub(self.snapshots_completed)
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub snapshots_walked: u32,
    /// Chart entries looked at, duplicates included
    pub items_seen: usize,
    pub enriched: usize,
    pub failed: usize,
    pub duplicates: usize,
    /// Entries by skip-listed artists, or without identifier when search is off
    pub skipped: usize,
    pub checkpoints: u64,
    /// Records in the final dataset, including those carried over on resume
    pub records: usize,
    pub cancelled: bool,
    pub dataset_path: PathBuf,
}

/// Progress events for an optional observer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// Traversal started
    RunStarted {
        start: WalkStart,
        snapshots: u32,
        /// Unix timestamp (seconds since epoch)
        timestamp: i64,
    },

    SnapshotStarted {
        date: NaiveDate,
        items: usize,
    },

    ItemEnriched {
        identifier: String,
        title: String,
        rank: u32,
    },

    ItemFailed {
        title: String,
        artist: String,
        /// Last state reached before failing
        state: EnrichState,
        /// Lookup error code (e.g., "NOT_FOUND")
        error: String,
    },

    /// Checkpoint handed to the background writer
    CheckpointQueued {
        tag: u64,
    },

    SnapshotCompleted {
        date: NaiveDate,
        enriched: usize,
    },

    /// Dataset persisted; always the last event of a successful run
    RunCompleted {
        summary: RunSummary,
    },

    /// Fatal error after the final checkpoint
    RunAborted {
        message: String,
    },
}
