// Dataset table storage
//
// Row-oriented CSV keyed by identifier. Header lists every record field with
// audio features flattened to named columns. Checkpoints use the same schema.
// Writes go to a sibling temp file and are renamed into place, so a reader
// never sees a half-written table.

use crate::models::{
    AudioFeatures, ChartItem, Dataset, DatasetRow, EnrichedRecord, AUDIO_FEATURE_COLUMNS,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Record columns preceding the audio features, in order
pub const BASE_COLUMNS: [&str; 10] = [
    "identifier",
    "title",
    "artist",
    "album_id",
    "album_name",
    "album_popularity",
    "album_release_date",
    "track_popularity",
    "artist_id",
    "artist_popularity",
];

/// Older tables name the identifier column after the lookup service
const LEGACY_IDENTIFIER_COLUMN: &str = "track_id";

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid table {path}: {message}")]
    Format { path: PathBuf, message: String },
}

/// Full dataset header
pub fn dataset_header() -> Vec<&'static str> {
    BASE_COLUMNS
        .iter()
        .chain(AUDIO_FEATURE_COLUMNS.iter())
        .copied()
        .collect()
}

/// `<path>.tmp` next to the target
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn record_row(record: &EnrichedRecord) -> Vec<String> {
    let mut row = vec![
        record.identifier.clone(),
        record.title.clone(),
        record.artist.clone(),
        record.album_id.clone(),
        record.album_name.clone(),
        record.album_popularity.to_string(),
        record.album_release_date.clone(),
        record.track_popularity.to_string(),
        record.artist_id.clone(),
        record.artist_popularity.to_string(),
    ];
    row.extend(
        AUDIO_FEATURE_COLUMNS
            .iter()
            .map(|name| record.feature(name).map(|v| v.to_string()).unwrap_or_default()),
    );
    row
}

fn unresolved_row(item: &ChartItem) -> Vec<String> {
    let mut row = vec![String::new(); BASE_COLUMNS.len() + AUDIO_FEATURE_COLUMNS.len()];
    row[0] = item.identifier.clone();
    row[1] = item.title.clone();
    row[2] = item.artist.clone();
    row
}

/// Write the dataset atomically
pub fn write_dataset(path: &Path, dataset: &Dataset) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        writer.write_record(dataset_header())?;
        for row in dataset.rows() {
            match row {
                DatasetRow::Record(record) => writer.write_record(record_row(record))?,
                DatasetRow::Unresolved(item) => writer.write_record(unresolved_row(item))?,
            }
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;

    debug!(
        path = %path.display(),
        records = dataset.len(),
        unresolved = dataset.unresolved_count(),
        "Wrote dataset"
    );
    Ok(())
}

/// One CSV row addressed by column name
struct Row<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn get(&self, name: &str) -> &str {
        self.columns
            .get(name)
            .and_then(|&i| self.record.get(i))
            .map(str::trim)
            .unwrap_or("")
    }

    fn identifier(&self) -> &str {
        match self.get("identifier") {
            "" => self.get(LEGACY_IDENTIFIER_COLUMN),
            id => id,
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        Some(self.get(name)).filter(|v| !v.is_empty()).map(str::to_string)
    }

    fn number(&self, name: &str) -> Option<u32> {
        let value = self.get(name);
        // Popularity columns may have passed through a float-typed tool
        value
            .parse::<u32>()
            .ok()
            .or_else(|| value.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u32))
    }

    /// Complete record, or `None` if any enrichment column is blank
    fn to_record(&self) -> Option<EnrichedRecord> {
        let audio_features: AudioFeatures = AUDIO_FEATURE_COLUMNS
            .iter()
            .filter_map(|name| self.get(name).parse::<f64>().ok().map(|v| (name.to_string(), v)))
            .collect();
        if audio_features.is_empty() {
            return None;
        }

        Some(EnrichedRecord {
            identifier: Some(self.identifier()).filter(|v| !v.is_empty())?.to_string(),
            title: self.text("title")?,
            artist: self.text("artist")?,
            album_id: self.text("album_id")?,
            album_name: self.text("album_name")?,
            album_popularity: self.number("album_popularity")?,
            album_release_date: self.text("album_release_date")?,
            track_popularity: self.number("track_popularity")?,
            artist_id: self.text("artist_id")?,
            artist_popularity: self.number("artist_popularity")?,
            audio_features,
        })
    }
}

/// Read a dataset table
///
/// Rows with every enrichment column filled become records; rows with a
/// title but blank enrichment columns become unresolved rows.
pub fn read_dataset(path: &Path) -> Result<Dataset, StoreError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let columns: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_string(), i))
        .collect();

    if !columns.contains_key("title") {
        return Err(StoreError::Format {
            path: path.to_path_buf(),
            message: "missing 'title' column".to_string(),
        });
    }

    let mut dataset = Dataset::new();
    for result in reader.records() {
        let record = result?;
        let row = Row {
            columns: &columns,
            record: &record,
        };

        if row.get("title").is_empty() {
            continue;
        }

        match row.to_record() {
            Some(enriched) => {
                let identifier = enriched.identifier.clone();
                if !dataset.insert(enriched) {
                    warn!(identifier = %identifier, path = %path.display(), "Duplicate identifier in table, keeping first row");
                }
            }
            None => dataset.push_unresolved(ChartItem::new(
                row.identifier(),
                row.get("title"),
                row.get("artist"),
            )),
        }
    }

    info!(
        path = %path.display(),
        records = dataset.len(),
        unresolved = dataset.unresolved_count(),
        "Loaded dataset"
    );
    Ok(dataset)
}
