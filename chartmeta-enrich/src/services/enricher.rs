//! Four-stage atomic enrichment of one chart item
//!
//! State machine per item:
//!
//! ```text
//! New → IdentifierResolved → TrackResolved → AlbumResolved
//!     → ArtistResolved → AudioFeaturesResolved (success)
//! any non-terminal state → Failed
//! ```
//!
//! `New → IdentifierResolved` searches by title/artist when the item has no
//! identifier and is free otherwise. Each later transition is one lookup
//! call whose output goes into a private [`RecordBuilder`]. On failure the
//! builder is dropped, so no partial record ever leaves this module.

use crate::models::{ChartItem, EnrichedRecord, RecordBuilder};
use crate::services::credential_manager::Credential;
use crate::services::lookup::{LookupError, MetadataLookup};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Enrichment state of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrichState {
    New,
    IdentifierResolved,
    TrackResolved,
    AlbumResolved,
    ArtistResolved,
    AudioFeaturesResolved,
    Failed,
}

impl EnrichState {
    pub fn is_terminal(self) -> bool {
        matches!(self, EnrichState::AudioFeaturesResolved | EnrichState::Failed)
    }
}

/// Failed enrichment: the state the item was in and why it could not advance
#[derive(Debug, Clone, Error)]
#[error("enrichment of '{title}' by '{artist}' failed in state {state:?}: {source}")]
pub struct EnrichError {
    /// Last state reached before failing
    pub state: EnrichState,
    pub title: String,
    pub artist: String,
    #[source]
    pub source: LookupError,
}

/// Runs the lookup stages for one item
pub struct Enricher {
    lookup: Arc<dyn MetadataLookup>,
    skip_artists: Vec<String>,
}

impl Enricher {
    pub fn new(lookup: Arc<dyn MetadataLookup>) -> Self {
        Self {
            lookup,
            skip_artists: Vec::new(),
        }
    }

    /// Artists absent from the lookup service; matched as case-insensitive substrings
    pub fn with_skip_artists(mut self, artists: &[String]) -> Self {
        self.skip_artists = artists
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();
        self
    }

    pub fn is_skipped_artist(&self, artist: &str) -> bool {
        let artist = artist.to_lowercase();
        self.skip_artists.iter().any(|skip| artist.contains(skip.as_str()))
    }

    /// The item's identifier, searching by title/artist when it has none
    pub async fn resolve_identifier(
        &self,
        credential: &Credential,
        item: &ChartItem,
    ) -> Result<String, EnrichError> {
        if item.has_identifier() {
            return Ok(item.identifier.trim().to_string());
        }

        let identifier = self
            .lookup
            .search(credential, &item.title, &item.artist)
            .await
            .map_err(|source| self.failure(item, EnrichState::New, source))?;

        tracing::debug!(title = %item.title, artist = %item.artist, identifier = %identifier, "Resolved identifier by search");
        Ok(identifier)
    }

    /// Run every stage; all succeed or nothing is returned
    pub async fn enrich(
        &self,
        credential: &Credential,
        item: &ChartItem,
    ) -> Result<EnrichedRecord, EnrichError> {
        let mut builder = RecordBuilder::new(item.title.clone(), item.artist.clone());
        let mut state = EnrichState::New;

        while !state.is_terminal() {
            state = match self.advance(credential, item, state, &mut builder).await {
                Ok(next) => next,
                Err(source) => {
                    tracing::debug!(title = %item.title, state = ?state, "Enrichment failed: {}", source);
                    return Err(self.failure(item, state, source));
                }
            };
        }

        builder.build().map_err(|missing| {
            self.failure(
                item,
                EnrichState::AudioFeaturesResolved,
                LookupError::NotFound(format!("incomplete record, missing {:?}", missing)),
            )
        })
    }

    async fn advance(
        &self,
        credential: &Credential,
        item: &ChartItem,
        state: EnrichState,
        builder: &mut RecordBuilder,
    ) -> Result<EnrichState, LookupError> {
        match state {
            EnrichState::New => {
                let identifier = self
                    .resolve_identifier(credential, item)
                    .await
                    .map_err(|e| e.source)?;
                builder.set_identifier(identifier);
                Ok(EnrichState::IdentifierResolved)
            }
            EnrichState::IdentifierResolved => {
                let id = required(builder.identifier(), "identifier")?;
                let track = self.lookup.track(credential, &id).await?;
                builder.set_track(track);
                Ok(EnrichState::TrackResolved)
            }
            EnrichState::TrackResolved => {
                let album_id = required(builder.album_id(), "album id")?;
                let album = self.lookup.album(credential, &album_id).await?;
                builder.set_album(album);
                Ok(EnrichState::AlbumResolved)
            }
            EnrichState::AlbumResolved => {
                let artist_id = required(builder.artist_id(), "artist id")?;
                let artist = self.lookup.artist(credential, &artist_id).await?;
                builder.set_artist(artist);
                Ok(EnrichState::ArtistResolved)
            }
            EnrichState::ArtistResolved => {
                let id = required(builder.identifier(), "identifier")?;
                let features = self.lookup.audio_features(credential, &id).await?;
                builder.set_audio_features(features);
                Ok(EnrichState::AudioFeaturesResolved)
            }
            EnrichState::AudioFeaturesResolved | EnrichState::Failed => Ok(state),
        }
    }

    fn failure(&self, item: &ChartItem, state: EnrichState, source: LookupError) -> EnrichError {
        EnrichError {
            state,
            title: item.title.clone(),
            artist: item.artist.clone(),
            source,
        }
    }
}

fn required(value: Option<&str>, what: &str) -> Result<String, LookupError> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| LookupError::NotFound(format!("{} missing from previous stage", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(EnrichState::AudioFeaturesResolved.is_terminal());
        assert!(EnrichState::Failed.is_terminal());
        assert!(!EnrichState::New.is_terminal());
        assert!(!EnrichState::ArtistResolved.is_terminal());
    }

    #[test]
    fn test_required_rejects_blank() {
        assert_eq!(required(Some("x"), "id").unwrap(), "x");
        assert!(matches!(required(Some(" "), "id"), Err(LookupError::NotFound(_))));
        assert!(matches!(required(None, "id"), Err(LookupError::NotFound(_))));
    }
}
