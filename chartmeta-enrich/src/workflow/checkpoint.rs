//! Background checkpoint writer
//!
//! The pipeline hands over a copy of the dataset and returns immediately.
//! One writer task drains the queue in order, so checkpoints never race
//! each other. Each checkpoint is `<prefix>-<tag>.csv` in the dataset schema
//! plus a `<prefix>-<tag>.json` [`RunManifest`].

use super::storage::{temp_path, write_dataset, StoreError};
use super::RunManifest;
use crate::models::Dataset;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

struct CheckpointJob {
    dataset: Dataset,
    manifest: RunManifest,
    tag: u64,
}

/// Outcome of all checkpoint writes for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub written: u64,
    pub failed: u64,
}

/// Handle to the writer task
pub struct CheckpointWriter {
    tx: mpsc::UnboundedSender<CheckpointJob>,
    task: JoinHandle<CheckpointStats>,
}

impl CheckpointWriter {
    /// Start the writer task; must be called inside a tokio runtime
    pub fn spawn(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let dir = dir.into();
        let prefix = prefix.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(dir, prefix, rx));
        Self { tx, task }
    }

    /// Queue a checkpoint; never blocks
    pub fn write(&self, dataset: Dataset, manifest: RunManifest, tag: u64) {
        if self
            .tx
            .send(CheckpointJob {
                dataset,
                manifest,
                tag,
            })
            .is_err()
        {
            error!(tag, "Checkpoint writer is gone, checkpoint dropped");
        }
    }

    /// Wait for every queued checkpoint to land
    pub async fn finish(self) -> CheckpointStats {
        drop(self.tx);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Checkpoint writer task failed: {}", e);
                CheckpointStats::default()
            }
        }
    }
}

fn checkpoint_paths(dir: &Path, prefix: &str, tag: u64) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}-{}.csv", prefix, tag)),
        dir.join(format!("{}-{}.json", prefix, tag)),
    )
}

async fn run_writer(
    dir: PathBuf,
    prefix: String,
    mut rx: mpsc::UnboundedReceiver<CheckpointJob>,
) -> CheckpointStats {
    let mut stats = CheckpointStats::default();

    while let Some(job) = rx.recv().await {
        let tag = job.tag;
        let (table, manifest) = checkpoint_paths(&dir, &prefix, tag);

        let result = tokio::task::spawn_blocking(move || write_checkpoint(&table, &manifest, job))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))
            .and_then(|r| r);

        match result {
            Ok(()) => {
                stats.written += 1;
                debug!(tag, "Checkpoint written");
            }
            Err(e) => {
                // A lost checkpoint must not end the run
                stats.failed += 1;
                error!(tag, "Checkpoint write failed: {}", e);
            }
        }
    }

    info!(written = stats.written, failed = stats.failed, "Checkpoint writer finished");
    stats
}

fn write_checkpoint(table: &Path, manifest_path: &Path, job: CheckpointJob) -> Result<(), StoreError> {
    write_dataset(table, &job.dataset)?;

    let mut manifest = job.manifest;
    manifest.dataset_path = table.to_path_buf();
    manifest.written_at = Utc::now();

    let tmp = temp_path(manifest_path);
    std::fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?)?;
    std::fs::rename(&tmp, manifest_path)?;
    Ok(())
}

/// Read a manifest written next to a checkpoint
pub fn load_manifest(path: &Path) -> Result<RunManifest, StoreError> {
    let bytes = std::fs::read(path)?;
    let mut manifest: RunManifest = serde_json::from_slice(&bytes)?;

    // Manifests copied elsewhere still find their table next to them
    if manifest.dataset_path.as_os_str().is_empty() || !manifest.dataset_path.exists() {
        manifest.dataset_path = path.with_extension("csv");
    }
    Ok(manifest)
}
