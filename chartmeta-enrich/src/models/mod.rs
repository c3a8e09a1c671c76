//! Data models for chart enrichment
//!
//! - Chart snapshots and their items
//! - Enriched records and the dataset that owns them
//! - Correction log entries

pub mod chart;
pub mod correction;
pub mod dataset;
pub mod record;

pub use chart::{ChartItem, ChartSnapshot};
pub use correction::CorrectionEntry;
pub use dataset::{Dataset, DatasetRow};
pub use record::{
    AlbumInfo, ArtistInfo, AudioFeatures, EnrichedRecord, MissingStage, TrackInfo,
    AUDIO_FEATURE_COLUMNS,
};
pub(crate) use record::RecordBuilder;
