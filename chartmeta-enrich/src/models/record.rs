//! Enriched record and its stage-by-stage builder
//!
//! An [`EnrichedRecord`] can only be produced by [`RecordBuilder::build`],
//! which refuses to yield a value until every lookup stage has contributed
//! its fields. The builder is crate-private, so a half-filled record is never
//! observable outside the enrichment code.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named audio features persisted as dataset columns, in column order
pub const AUDIO_FEATURE_COLUMNS: [&str; 13] = [
    "danceability",
    "energy",
    "key",
    "loudness",
    "mode",
    "speechiness",
    "acousticness",
    "instrumentalness",
    "liveness",
    "valence",
    "tempo",
    "duration_ms",
    "time_signature",
];

/// Audio feature name → value
pub type AudioFeatures = BTreeMap<String, f64>;

/// Track stage output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Canonical track title
    pub title: String,
    pub track_popularity: u32,
    pub album_id: String,
    pub album_name: String,
    /// Canonical name of the primary artist
    pub artist_name: String,
    pub artist_id: String,
}

/// Album stage output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub album_popularity: u32,
    pub album_release_date: String,
}

/// Artist stage output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistInfo {
    pub artist_popularity: u32,
}

/// Fully enriched chart item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub identifier: String,
    pub title: String,
    pub artist: String,
    pub album_id: String,
    pub album_name: String,
    pub album_popularity: u32,
    pub album_release_date: String,
    pub track_popularity: u32,
    pub artist_id: String,
    pub artist_popularity: u32,
    pub audio_features: AudioFeatures,
}

impl EnrichedRecord {
    /// Value of a named audio feature
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.audio_features.get(name).copied()
    }
}

/// Stage whose fields are still missing when `build` is called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingStage {
    Identifier,
    Track,
    Album,
    Artist,
    AudioFeatures,
}

/// Accumulates stage outputs for one item
#[derive(Debug, Clone)]
pub(crate) struct RecordBuilder {
    identifier: Option<String>,
    title: String,
    artist: String,
    track: Option<TrackInfo>,
    album: Option<AlbumInfo>,
    artist_info: Option<ArtistInfo>,
    audio_features: Option<AudioFeatures>,
}

impl RecordBuilder {
    pub(crate) fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            identifier: None,
            title: title.into(),
            artist: artist.into(),
            track: None,
            album: None,
            artist_info: None,
            audio_features: None,
        }
    }

    pub(crate) fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub(crate) fn album_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.album_id.as_str())
    }

    pub(crate) fn artist_id(&self) -> Option<&str> {
        self.track.as_ref().map(|t| t.artist_id.as_str())
    }

    pub(crate) fn set_identifier(&mut self, identifier: String) {
        self.identifier = Some(identifier);
    }

    pub(crate) fn set_track(&mut self, track: TrackInfo) {
        self.track = Some(track);
    }

    pub(crate) fn set_album(&mut self, album: AlbumInfo) {
        self.album = Some(album);
    }

    pub(crate) fn set_artist(&mut self, artist: ArtistInfo) {
        self.artist_info = Some(artist);
    }

    pub(crate) fn set_audio_features(&mut self, features: AudioFeatures) {
        self.audio_features = Some(features);
    }

    /// Finish the record; title and artist take the canonical track values
    pub(crate) fn build(self) -> Result<EnrichedRecord, MissingStage> {
        let identifier = self
            .identifier
            .filter(|id| !id.trim().is_empty())
            .ok_or(MissingStage::Identifier)?;
        let track = self.track.ok_or(MissingStage::Track)?;
        let album = self.album.ok_or(MissingStage::Album)?;
        let artist = self.artist_info.ok_or(MissingStage::Artist)?;
        let audio_features = self
            .audio_features
            .filter(|f| !f.is_empty())
            .ok_or(MissingStage::AudioFeatures)?;

        let title = if track.title.is_empty() { self.title } else { track.title };
        let artist_name = if track.artist_name.is_empty() {
            self.artist
        } else {
            track.artist_name
        };

        Ok(EnrichedRecord {
            identifier,
            title,
            artist: artist_name,
            album_id: track.album_id,
            album_name: track.album_name,
            album_popularity: album.album_popularity,
            album_release_date: album.album_release_date,
            track_popularity: track.track_popularity,
            artist_id: track.artist_id,
            artist_popularity: artist.artist_popularity,
            audio_features,
        })
    }
}
