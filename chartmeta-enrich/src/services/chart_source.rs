//! Chart snapshot sources
//!
//! [`HotHundredArchive`] reads the weekly Hot 100 JSON archive:
//! `recent.json` for the latest chart and `date/<YYYY-MM-DD>.json` for a
//! given week. Entries carry title and artist only, so every item comes out
//! with an empty identifier and relies on the identifier search stage.

use crate::models::{ChartItem, ChartSnapshot};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const HOT_100_ARCHIVE_URL: &str =
    "https://raw.githubusercontent.com/mhollingshead/billboard-hot-100/main";
const USER_AGENT: &str = concat!("chartmeta/", env!("CARGO_PKG_VERSION"));

/// Chart source errors
#[derive(Debug, Error)]
pub enum ChartError {
    /// The source could not deliver a snapshot (network, parse, server error)
    #[error("Chart unavailable: {0}")]
    Unavailable(String),

    /// The source has nothing for this date; ends a traversal normally
    #[error("No chart snapshot for {0}")]
    NoMoreSnapshots(NaiveDate),
}

/// Source of dated chart snapshots
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn latest(&self) -> Result<ChartSnapshot, ChartError>;

    async fn snapshot(&self, date: NaiveDate) -> Result<ChartSnapshot, ChartError>;

    /// Date of the snapshot preceding `date`
    async fn previous_date(&self, date: NaiveDate) -> Result<NaiveDate, ChartError>;
}

#[derive(Debug, Deserialize)]
struct ArchiveChart {
    date: NaiveDate,
    data: Vec<ArchiveEntry>,
}

#[derive(Debug, Deserialize)]
struct ArchiveEntry {
    song: String,
    artist: String,
    #[serde(default)]
    this_week: Option<u32>,
}

impl From<ArchiveChart> for ChartSnapshot {
    fn from(chart: ArchiveChart) -> Self {
        let items = chart
            .data
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let rank = entry.this_week.unwrap_or(i as u32 + 1);
                ChartItem::new("", entry.song, entry.artist).at_rank(rank)
            })
            .collect();
        ChartSnapshot::new(chart.date, items)
    }
}

/// Weekly Hot 100 JSON archive
pub struct HotHundredArchive {
    http_client: reqwest::Client,
    base_url: String,
}

impl HotHundredArchive {
    /// First chart in the archive
    pub fn first_chart_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(1958, 8, 4).unwrap_or(NaiveDate::MIN)
    }

    pub fn new() -> Result<Self, ChartError> {
        Self::with_base_url(HOT_100_ARCHIVE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ChartError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ChartError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, path: &str, date: Option<NaiveDate>) -> Result<ChartSnapshot, ChartError> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, "Fetching chart snapshot");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChartError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == 404 {
            if let Some(date) = date {
                return Err(ChartError::NoMoreSnapshots(date));
            }
        }
        if !status.is_success() {
            return Err(ChartError::Unavailable(format!("HTTP {} for {}", status.as_u16(), url)));
        }

        let chart: ArchiveChart = response
            .json()
            .await
            .map_err(|e| ChartError::Unavailable(format!("Parse error for {}: {}", url, e)))?;

        tracing::info!(date = %chart.date, entries = chart.data.len(), "Fetched chart snapshot");
        Ok(chart.into())
    }
}

#[async_trait]
impl ChartSource for HotHundredArchive {
    async fn latest(&self) -> Result<ChartSnapshot, ChartError> {
        self.fetch("recent.json", None).await
    }

    async fn snapshot(&self, date: NaiveDate) -> Result<ChartSnapshot, ChartError> {
        if date < Self::first_chart_date() {
            return Err(ChartError::NoMoreSnapshots(date));
        }
        self.fetch(&format!("date/{}.json", date.format("%Y-%m-%d")), Some(date))
            .await
    }

    async fn previous_date(&self, date: NaiveDate) -> Result<NaiveDate, ChartError> {
        let previous = date - ChronoDuration::days(7);
        if previous < Self::first_chart_date() {
            return Err(ChartError::NoMoreSnapshots(previous));
        }
        Ok(previous)
    }
}
