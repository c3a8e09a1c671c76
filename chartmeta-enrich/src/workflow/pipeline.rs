//! Pipeline orchestrator
//!
//! Walks chart snapshots and enriches every identifier exactly once.
//!
//! # Per snapshot
//! 1. **Claim**: items are taken in chart order. Skip-listed artists are
//!    dropped, id-less items are searched (once per title/artist), and each
//!    identifier is claimed through the [`Deduplicator`]. Claims are
//!    linearized, so discovery order does not depend on `workers`.
//! 2. **Enrich**: claimed items run through the [`Enricher`], up to
//!    `workers` at a time, with results consumed in claim order.
//!
//! # Error Handling
//! - Item failure: correction entry, checkpoint, credential refresh, next item
//! - `CredentialError` or `ChartError::Unavailable`: final checkpoint, then abort
//! - Cancellation: stop between items, persist what was enriched

use super::checkpoint::CheckpointWriter;
use super::corrections::CorrectionLog;
use super::storage::{write_dataset, StoreError};
use super::{PipelineEvent, RunManifest, RunSummary};
use crate::error::{RunError, RunResult};
use crate::models::{ChartItem, ChartSnapshot, CorrectionEntry, Dataset, EnrichedRecord};
use crate::services::{
    ChartSource, ChartWalker, Credential, CredentialManager, Deduplicator, EnrichError, Enricher,
    WalkStart,
};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Snapshots to walk (must be positive)
    pub weeks: u32,
    /// Concurrent enrichments within one snapshot
    pub workers: usize,
    /// Search identifiers for chart items that carry none
    pub resolve_missing_ids: bool,
    pub start: WalkStart,
    /// Final dataset table
    pub output_path: PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Checkpoints are named `<prefix>-<failure count>`
    pub checkpoint_prefix: String,
}

impl PipelineConfig {
    pub fn new(output_path: impl Into<PathBuf>, checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            weeks: 52,
            workers: 1,
            resolve_missing_ids: true,
            start: WalkStart::Latest,
            output_path: output_path.into(),
            checkpoint_dir: checkpoint_dir.into(),
            checkpoint_prefix: "chart-backup".to_string(),
        }
    }
}

/// Pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    chart_source: Arc<dyn ChartSource>,
    enricher: Arc<Enricher>,
    credentials: Arc<CredentialManager>,
    corrections: Arc<CorrectionLog>,
    deduplicator: Deduplicator,
    dataset: Dataset,
    manifest: RunManifest,
    summary: RunSummary,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        chart_source: Arc<dyn ChartSource>,
        enricher: Arc<Enricher>,
        credentials: Arc<CredentialManager>,
        corrections: Arc<CorrectionLog>,
    ) -> Self {
        let manifest = RunManifest::new(config.start, config.weeks);
        Self {
            config,
            chart_source,
            enricher,
            credentials,
            corrections,
            deduplicator: Deduplicator::new(),
            dataset: Dataset::new(),
            manifest,
            summary: RunSummary::default(),
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Report progress over a channel
    pub fn with_events(mut self, event_tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Continue from a checkpoint instead of starting fresh
    ///
    /// The walk restarts where the manifest says, for the snapshots it has
    /// left. Identifiers already in the dataset or recorded as failed are
    /// never attempted again, and past searches are not repeated.
    pub fn resume(mut self, dataset: Dataset, manifest: RunManifest) -> Self {
        let seeded = self.deduplicator.seed(dataset.identifiers())
            + self.deduplicator.seed(manifest.failed.iter().map(String::as_str));
        let searches = self.deduplicator.seed_searches(manifest.searches.iter().cloned());
        info!(
            records = dataset.len(),
            seeded,
            searches,
            failures = manifest.failures,
            start = ?manifest.resume_start(),
            remaining = manifest.remaining(),
            "Resuming from checkpoint"
        );
        self.dataset = dataset;
        self.manifest = manifest;
        self
    }

    /// Walk, enrich and persist
    pub async fn run(mut self) -> RunResult<RunSummary> {
        if self.config.weeks == 0 || self.manifest.snapshots_requested == 0 {
            return Err(RunError::InvalidInput("snapshot count must be positive".to_string()));
        }
        if self.config.workers == 0 {
            return Err(RunError::InvalidInput("worker count must be positive".to_string()));
        }

        let start = self.manifest.resume_start();
        let remaining = self.manifest.remaining();
        let writer = CheckpointWriter::spawn(&self.config.checkpoint_dir, &self.config.checkpoint_prefix);

        info!(?start, snapshots = remaining, workers = self.config.workers, "Pipeline starting");
        self.emit_event(PipelineEvent::RunStarted {
            start,
            snapshots: remaining,
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await;

        if let Err(e) = self.traverse(start, remaining, &writer).await {
            return Err(self.abort(e, writer).await);
        }

        let stats = writer.finish().await;
        self.summary.checkpoints = stats.written;
        self.summary.records = self.dataset.len();
        self.summary.dataset_path = self.config.output_path.clone();

        let output = self.config.output_path.clone();
        let dataset = std::mem::take(&mut self.dataset);
        tokio::task::spawn_blocking(move || write_dataset(&output, &dataset))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;

        info!(
            snapshots = self.summary.snapshots_walked,
            enriched = self.summary.enriched,
            failed = self.summary.failed,
            duplicates = self.summary.duplicates,
            records = self.summary.records,
            path = %self.config.output_path.display(),
            "Pipeline complete"
        );

        let summary = self.summary.clone();
        self.emit_event(PipelineEvent::RunCompleted {
            summary: summary.clone(),
        })
        .await;
        Ok(summary)
    }

    async fn traverse(
        &mut self,
        start: WalkStart,
        remaining: u32,
        writer: &CheckpointWriter,
    ) -> RunResult<()> {
        if remaining == 0 {
            info!("Checkpoint already covers every requested snapshot");
            return Ok(());
        }

        let walker = ChartWalker::new(Arc::clone(&self.chart_source), start);
        let mut snapshots = walker.walk(remaining);

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => None,
                next = snapshots.next() => next,
            };
            if self.cancel.is_cancelled() {
                warn!("Pipeline cancelled");
                self.summary.cancelled = true;
                return Ok(());
            }

            match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(snapshot)) => self.process_snapshot(snapshot, writer).await?,
            }
        }
    }

    async fn process_snapshot(
        &mut self,
        snapshot: ChartSnapshot,
        writer: &CheckpointWriter,
    ) -> RunResult<()> {
        let date = snapshot.date;
        info!(%date, items = snapshot.items.len(), "Processing snapshot");
        self.manifest.in_progress = Some(date);
        self.emit_event(PipelineEvent::SnapshotStarted {
            date,
            items: snapshot.items.len(),
        })
        .await;

        let enriched_before = self.summary.enriched;
        let claims = self.claim(snapshot.items, writer).await?;
        if self.cancel.is_cancelled() {
            debug!(%date, dropped = claims.len(), "Cancelled before enrichment");
            return Ok(());
        }
        self.enrich_claims(claims, writer).await?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.manifest.in_progress = None;
        self.manifest.last_completed = Some(date);
        self.manifest.snapshots_completed += 1;
        self.summary.snapshots_walked += 1;

        let enriched = self.summary.enriched - enriched_before;
        debug!(%date, enriched, "Snapshot complete");
        self.emit_event(PipelineEvent::SnapshotCompleted { date, enriched })
            .await;
        Ok(())
    }

    /// Decide, in chart order, which items this run enriches
    async fn claim(
        &mut self,
        items: Vec<ChartItem>,
        writer: &CheckpointWriter,
    ) -> RunResult<Vec<ChartItem>> {
        let mut claims = Vec::with_capacity(items.len());

        for item in items {
            if self.cancel.is_cancelled() {
                break;
            }
            self.summary.items_seen += 1;

            if self.enricher.is_skipped_artist(&item.artist) {
                debug!(title = %item.title, artist = %item.artist, "Skipping listed artist");
                self.summary.skipped += 1;
                continue;
            }

            let item = if item.has_identifier() {
                item
            } else if !self.config.resolve_missing_ids {
                debug!(title = %item.title, "No identifier and search disabled, skipping");
                self.summary.skipped += 1;
                continue;
            } else if self.deduplicator.should_search(&item.title, &item.artist) {
                let credential = self.credentials.current().await;
                match self.enricher.resolve_identifier(&credential, &item).await {
                    Ok(identifier) => {
                        self.deduplicator
                            .record_search(&item.title, &item.artist, &identifier);
                        ChartItem { identifier, ..item }
                    }
                    Err(e) => {
                        self.handle_failure(&credential, e, writer).await?;
                        continue;
                    }
                }
            } else if let Some(identifier) =
                self.deduplicator.searched_identifier(&item.title, &item.artist)
            {
                // Searched before; the identifier decides
                ChartItem { identifier, ..item }
            } else {
                self.summary.duplicates += 1;
                continue;
            };

            if self.deduplicator.should_process(&item.identifier) {
                claims.push(item);
            } else {
                self.summary.duplicates += 1;
            }
        }

        Ok(claims)
    }

    async fn enrich_claims(
        &mut self,
        claims: Vec<ChartItem>,
        writer: &CheckpointWriter,
    ) -> RunResult<()> {
        let enricher = Arc::clone(&self.enricher);
        let credentials = Arc::clone(&self.credentials);

        let mut results = futures::stream::iter(claims.into_iter().map(move |item| {
            let enricher = Arc::clone(&enricher);
            let credentials = Arc::clone(&credentials);
            async move {
                let credential = credentials.current().await;
                let result = enricher.enrich(&credential, &item).await;
                (item, credential, result)
            }
        }))
        .buffered(self.config.workers);

        while let Some((item, credential, result)) = results.next().await {
            match result {
                Ok(record) => self.accept(&item, record).await,
                Err(e) => {
                    self.manifest.failed.push(item.identifier.clone());
                    self.handle_failure(&credential, e, writer).await?;
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }
        }
        Ok(())
    }

    async fn accept(&mut self, item: &ChartItem, record: EnrichedRecord) {
        let identifier = record.identifier.clone();
        let title = record.title.clone();

        if self.dataset.insert(record) {
            self.summary.enriched += 1;
            debug!(rank = item.rank, identifier = %identifier, title = %title, "Item enriched");
            self.emit_event(PipelineEvent::ItemEnriched {
                identifier,
                title,
                rank: item.rank,
            })
            .await;
        } else {
            // Only reachable when a resumed dataset already held the record
            self.summary.duplicates += 1;
        }
    }

    /// Log, checkpoint, refresh, move on
    async fn handle_failure(
        &mut self,
        credential: &Credential,
        failure: EnrichError,
        writer: &CheckpointWriter,
    ) -> RunResult<()> {
        warn!(
            title = %failure.title,
            artist = %failure.artist,
            state = ?failure.state,
            error = failure.source.code(),
            "Enrichment failed: {}",
            failure.source
        );
        self.summary.failed += 1;
        self.emit_event(PipelineEvent::ItemFailed {
            title: failure.title.clone(),
            artist: failure.artist.clone(),
            state: failure.state,
            error: failure.source.code().to_string(),
        })
        .await;

        let entry = CorrectionEntry::unresolved(failure.title, failure.artist);
        if let Err(e) = self.corrections.append(entry).await {
            error!("Failed to append correction entry: {}", e);
        }

        self.checkpoint(writer).await;
        self.credentials.refresh(credential).await?;
        Ok(())
    }

    /// Checkpoint for one more item failure
    async fn checkpoint(&mut self, writer: &CheckpointWriter) {
        self.manifest.failures += 1;
        self.queue_checkpoint(writer).await;
    }

    /// Snapshot the current state under the latest failure tag
    async fn queue_checkpoint(&mut self, writer: &CheckpointWriter) {
        let tag = self.manifest.failures;
        self.manifest.searches = self.deduplicator.searches();
        writer.write(self.dataset.clone(), self.manifest.clone(), tag);
        self.emit_event(PipelineEvent::CheckpointQueued { tag }).await;
    }

    /// Final checkpoint, then surface the fatal error
    ///
    /// The final checkpoint replaces the one of the latest failure (tag 0
    /// when nothing failed), so `failures` keeps counting item failures only.
    async fn abort(&mut self, e: RunError, writer: CheckpointWriter) -> RunError {
        error!("Pipeline aborted: {}", e);
        self.queue_checkpoint(&writer).await;
        let stats = writer.finish().await;
        info!(
            checkpoints = stats.written,
            records = self.dataset.len(),
            "Partial dataset checkpointed"
        );

        self.emit_event(PipelineEvent::RunAborted {
            message: e.to_string(),
        })
        .await;
        e
    }

    /// Emit event if channel is available
    async fn emit_event(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
