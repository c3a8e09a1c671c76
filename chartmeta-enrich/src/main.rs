//! chartmeta-enrich - chart metadata scraper
//!
//! `scrape` walks the weekly chart backward and writes the enriched dataset.
//! `reconcile` repairs the dataset from hand-corrected correction entries.

use anyhow::{Context, Result};
use chartmeta_common::config as common_config;
use chartmeta_enrich::config::resolve_spotify_credentials;
use chartmeta_enrich::services::{
    ClientCredentialsProvider, CredentialManager, Enricher, HotHundredArchive, SpotifyClient,
    WalkStart,
};
use chartmeta_enrich::workflow::{load_manifest, read_dataset, CorrectionLog};
use chartmeta_enrich::{Pipeline, PipelineConfig, PipelineEvent, Reconciler};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DATASET_FILE: &str = "hot100-dataset.csv";
const CORRECTIONS_FILE: &str = "corrections.csv";
const CHECKPOINT_DIR: &str = "checkpoints";

/// Command-line arguments for chartmeta-enrich
#[derive(Parser, Debug)]
#[command(name = "chartmeta-enrich")]
#[command(about = "Enrich weekly chart history with track metadata")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Folder for datasets, checkpoints and the correction log
    #[arg(long, global = true)]
    data_folder: Option<PathBuf>,

    /// Spotify client id
    #[arg(long, global = true)]
    client_id: Option<String>,

    /// Spotify client secret
    #[arg(long, global = true)]
    client_secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the chart backward and build the dataset
    Scrape {
        /// Weekly snapshots to walk
        #[arg(short, long)]
        weeks: Option<u32>,

        /// Chart date to start from (YYYY-MM-DD); latest chart if omitted
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Concurrent enrichments per snapshot
        #[arg(long)]
        workers: Option<usize>,

        /// Dataset output path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resume from a checkpoint manifest (.json)
        #[arg(long)]
        resume: Option<PathBuf>,
    },

    /// Fill in records from corrected entries in the correction log
    Reconcile {
        /// Dataset to repair in place
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Correction log
        #[arg(long)]
        corrections: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = common_config::resolve_config_path(args.config.as_deref());
    let toml_config = common_config::load_toml_config(config_path.as_deref())
        .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&toml_config.logging.level)),
        )
        .init();

    info!("Starting {}", chartmeta_enrich::build_info());
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }
    toml_config.validate()?;

    let data_folder = common_config::resolve_data_folder(args.data_folder.as_deref(), &toml_config);
    common_config::ensure_data_folder(&data_folder)?;
    info!("Data folder: {}", data_folder.display());

    let credentials = resolve_spotify_credentials(
        args.client_id.as_deref(),
        args.client_secret.as_deref(),
        &toml_config,
    )?;
    let provider = Arc::new(ClientCredentialsProvider::new(
        credentials.client_id,
        credentials.client_secret,
    )?);
    let credential_manager = Arc::new(
        CredentialManager::connect(provider)
            .await
            .context("Failed to obtain Spotify access token")?,
    );

    let lookup = Arc::new(SpotifyClient::new()?.with_market(toml_config.spotify.market.clone()));
    let enricher = Arc::new(Enricher::new(lookup).with_skip_artists(&toml_config.run.skip_artists));

    match args.command {
        Command::Scrape {
            weeks,
            start,
            workers,
            output,
            resume,
        } => {
            let mut config = PipelineConfig::new(
                output.unwrap_or_else(|| data_folder.join(DATASET_FILE)),
                data_folder.join(CHECKPOINT_DIR),
            );
            config.weeks = weeks.unwrap_or(toml_config.run.weeks);
            config.workers = workers.unwrap_or(toml_config.run.workers);
            config.resolve_missing_ids = toml_config.run.resolve_missing_ids;
            config.start = start.map(WalkStart::At).unwrap_or(WalkStart::Latest);

            scrape(
                config,
                resume.as_deref(),
                &data_folder,
                enricher,
                credential_manager,
            )
            .await
        }
        Command::Reconcile {
            dataset,
            corrections,
        } => {
            let dataset = dataset.unwrap_or_else(|| data_folder.join(DATASET_FILE));
            let corrections = corrections.unwrap_or_else(|| data_folder.join(CORRECTIONS_FILE));

            let reconciler = Reconciler::new(enricher, credential_manager);
            let report = reconciler.reconcile_files(&dataset, &corrections).await?;
            info!(
                repaired = report.repaired.len(),
                present = report.already_present.len(),
                failed = report.failed.len(),
                "Reconciled {}",
                dataset.display()
            );
            for title in &report.failed {
                warn!("Still unresolved: {}", title);
            }
            Ok(())
        }
    }
}

async fn scrape(
    config: PipelineConfig,
    resume: Option<&Path>,
    data_folder: &Path,
    enricher: Arc<Enricher>,
    credentials: Arc<CredentialManager>,
) -> Result<()> {
    let chart_source = Arc::new(HotHundredArchive::new()?);
    let corrections = Arc::new(CorrectionLog::new(data_folder.join(CORRECTIONS_FILE)));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current item");
            ctrl_c.cancel();
        }
    });

    let (event_tx, event_rx) = mpsc::channel(100);
    let listener = tokio::spawn(listen(event_rx));

    let mut pipeline = Pipeline::new(config, chart_source, enricher, credentials, corrections)
        .with_events(event_tx)
        .with_cancellation(cancel);

    if let Some(manifest_path) = resume {
        let manifest = load_manifest(manifest_path)
            .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
        let dataset = read_dataset(&manifest.dataset_path)
            .with_context(|| format!("Failed to read checkpoint {}", manifest.dataset_path.display()))?;
        pipeline = pipeline.resume(dataset, manifest);
    }

    let result = pipeline.run().await;
    // Pipeline dropped: sender closed, listener drains and exits
    let _ = listener.await;

    match result {
        Ok(summary) => {
            info!(
                records = summary.records,
                failed = summary.failed,
                checkpoints = summary.checkpoints,
                cancelled = summary.cancelled,
                "Dataset written to {}",
                summary.dataset_path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Run failed: {}", e);
            Err(e.into())
        }
    }
}

/// Progress observer; rings the terminal bell when the run completes
async fn listen(mut events: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::SnapshotCompleted { date, enriched } => {
                info!(%date, enriched, "Snapshot done");
            }
            PipelineEvent::RunCompleted { .. } => {
                let mut stderr = std::io::stderr();
                let _ = stderr.write_all(b"\x07");
                let _ = stderr.flush();
            }
            PipelineEvent::RunAborted { message } => {
                error!("Run aborted: {}", message);
            }
            _ => {}
        }
    }
}
