//! Metadata lookup service interface

use crate::models::{AlbumInfo, ArtistInfo, AudioFeatures, TrackInfo};
use crate::services::credential_manager::Credential;
use async_trait::async_trait;
use thiserror::Error;

/// Lookup errors
///
/// The pipeline treats every variant the same way (log, checkpoint,
/// refresh, skip); the distinction is kept for logging and the run summary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Credential rejected")]
    AuthExpired,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Network error: {0}")]
    TransientNetworkError(String),
}

impl LookupError {
    /// Short machine-friendly label
    pub fn code(&self) -> &'static str {
        match self {
            LookupError::NotFound(_) => "NOT_FOUND",
            LookupError::AuthExpired => "AUTH_EXPIRED",
            LookupError::RateLimited => "RATE_LIMITED",
            LookupError::TransientNetworkError(_) => "NETWORK_ERROR",
        }
    }
}

/// External metadata lookup collaborator
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Identifier of the best match for a title/artist pair
    async fn search(
        &self,
        credential: &Credential,
        title: &str,
        artist: &str,
    ) -> Result<String, LookupError>;

    async fn track(&self, credential: &Credential, track_id: &str)
        -> Result<TrackInfo, LookupError>;

    async fn album(&self, credential: &Credential, album_id: &str)
        -> Result<AlbumInfo, LookupError>;

    async fn artist(&self, credential: &Credential, artist_id: &str)
        -> Result<ArtistInfo, LookupError>;

    async fn audio_features(
        &self,
        credential: &Credential,
        track_id: &str,
    ) -> Result<AudioFeatures, LookupError>;
}
