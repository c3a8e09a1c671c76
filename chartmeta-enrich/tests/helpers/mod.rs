//! Test Helper Utilities
//!
//! Shared utilities for testing chartmeta-enrich

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{date, item, CountingTokens, ScriptedChart, ScriptedLookup, Stage};

use chartmeta_enrich::services::{ChartSource, CredentialManager, Enricher};
use chartmeta_enrich::workflow::CorrectionLog;
use chartmeta_enrich::{Pipeline, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Temp data folder plus the collaborators a pipeline needs
pub struct Harness {
    pub dir: TempDir,
    pub lookup: Arc<ScriptedLookup>,
    pub tokens: Arc<CountingTokens>,
    pub credentials: Arc<CredentialManager>,
    pub enricher: Arc<Enricher>,
    pub corrections: Arc<CorrectionLog>,
}

impl Harness {
    pub async fn new(lookup: ScriptedLookup) -> Self {
        Self::with_tokens(lookup, CountingTokens::new()).await
    }

    pub async fn with_tokens(lookup: ScriptedLookup, tokens: CountingTokens) -> Self {
        let dir = TempDir::new().unwrap();
        let lookup = Arc::new(lookup);
        let tokens = Arc::new(tokens);
        let credentials = Arc::new(CredentialManager::connect(tokens.clone()).await.unwrap());
        let enricher = Arc::new(Enricher::new(lookup.clone()));
        let corrections = Arc::new(CorrectionLog::new(dir.path().join("corrections.csv")));

        Self {
            dir,
            lookup,
            tokens,
            credentials,
            enricher,
            corrections,
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join("dataset.csv")
    }

    pub fn corrections_path(&self) -> PathBuf {
        self.dir.path().join("corrections.csv")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir.path().join("checkpoints")
    }

    pub fn config(&self, weeks: u32) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.output_path(), self.checkpoint_dir());
        config.weeks = weeks;
        config
    }

    pub fn pipeline(&self, chart: ScriptedChart, config: PipelineConfig) -> Pipeline {
        let chart: Arc<dyn ChartSource> = Arc::new(chart);
        Pipeline::new(
            config,
            chart,
            self.enricher.clone(),
            self.credentials.clone(),
            self.corrections.clone(),
        )
    }
}
