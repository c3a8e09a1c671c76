//! Spotify Web API client
//!
//! Implements [`MetadataLookup`] against the Web API and [`TokenProvider`]
//! via the OAuth client-credentials flow.
//!
//! HTTP status mapping:
//! - 401 → `AuthExpired`
//! - 404, empty search result, null audio features → `NotFound`
//! - 429 → `RateLimited`
//! - anything else (including transport and parse failures) → `TransientNetworkError`

use crate::models::{AlbumInfo, ArtistInfo, AudioFeatures, TrackInfo};
use crate::services::credential_manager::{Credential, CredentialError, TokenProvider};
use crate::services::lookup::{LookupError, MetadataLookup};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

const SPOTIFY_API_BASE_URL: &str = "https://api.spotify.com/v1";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const USER_AGENT: &str = concat!("chartmeta/", env!("CARGO_PKG_VERSION"));
const REQUESTS_PER_SECOND: u32 = 10;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    items: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TrackResponse {
    name: String,
    popularity: u32,
    album: NamedRef,
    artists: Vec<NamedRef>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumResponse {
    popularity: u32,
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct ArtistResponse {
    popularity: u32,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Chart credits separating the lead artist from guests
/// `&` is left alone; it is part of too many band names
const CREDIT_SEPARATORS: [&str; 6] = [" Featuring ", " featuring ", " Feat. ", " feat. ", " ft. ", " x "];

/// Lead artist of a chart credit such as "Rihanna Featuring Drake"
fn primary_artist(artist: &str) -> &str {
    CREDIT_SEPARATORS
        .iter()
        .filter_map(|sep| artist.find(sep))
        .min()
        .map(|end| &artist[..end])
        .unwrap_or(artist)
        .trim()
}

fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
}

/// Spotify Web API lookup client
pub struct SpotifyClient {
    http_client: reqwest::Client,
    base_url: String,
    market: Option<String>,
    rate_limiter: DefaultDirectRateLimiter,
}

impl SpotifyClient {
    pub fn new() -> Result<Self, LookupError> {
        Self::with_base_url(SPOTIFY_API_BASE_URL)
    }

    /// Client against a different API root (used by tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, LookupError> {
        let http_client =
            http_client().map_err(|e| LookupError::TransientNetworkError(e.to_string()))?;
        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SECOND).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            market: None,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    /// Scope searches to a market (ISO 3166-1 alpha-2)
    pub fn with_market(mut self, market: Option<String>) -> Self {
        self.market = market.filter(|m| !m.trim().is_empty());
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T, LookupError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Querying Spotify API");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&credential.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| LookupError::TransientNetworkError(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            401 => return Err(LookupError::AuthExpired),
            404 => return Err(LookupError::NotFound(what.to_string())),
            429 => return Err(LookupError::RateLimited),
            _ => {}
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LookupError::TransientNetworkError(format!(
                "HTTP {} for {}: {}",
                status.as_u16(),
                what,
                error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LookupError::TransientNetworkError(format!("Parse error for {}: {}", what, e)))
    }
}

#[async_trait]
impl MetadataLookup for SpotifyClient {
    async fn search(
        &self,
        credential: &Credential,
        title: &str,
        artist: &str,
    ) -> Result<String, LookupError> {
        let q = format!("track:{} artist:{}", title, primary_artist(artist));
        let mut query = vec![("q", q.as_str()), ("type", "track"), ("limit", "1")];
        if let Some(market) = &self.market {
            query.push(("market", market.as_str()));
        }

        let what = format!("search '{}' by '{}'", title, artist);
        let response: SearchResponse = self.get_json(credential, "/search", &query, &what).await?;

        response
            .tracks
            .items
            .into_iter()
            .next()
            .map(|t| t.id)
            .ok_or(LookupError::NotFound(what))
    }

    async fn track(&self, credential: &Credential, track_id: &str) -> Result<TrackInfo, LookupError> {
        let what = format!("track {}", track_id);
        let track: TrackResponse = self
            .get_json(credential, &format!("/tracks/{}", track_id), &[], &what)
            .await?;

        let primary = track
            .artists
            .into_iter()
            .next()
            .ok_or_else(|| LookupError::NotFound(format!("artist of {}", what)))?;

        Ok(TrackInfo {
            title: track.name,
            track_popularity: track.popularity,
            album_id: track.album.id,
            album_name: track.album.name,
            artist_name: primary.name,
            artist_id: primary.id,
        })
    }

    async fn album(&self, credential: &Credential, album_id: &str) -> Result<AlbumInfo, LookupError> {
        let what = format!("album {}", album_id);
        let album: AlbumResponse = self
            .get_json(credential, &format!("/albums/{}", album_id), &[], &what)
            .await?;

        Ok(AlbumInfo {
            album_popularity: album.popularity,
            album_release_date: album.release_date,
        })
    }

    async fn artist(&self, credential: &Credential, artist_id: &str) -> Result<ArtistInfo, LookupError> {
        let what = format!("artist {}", artist_id);
        let artist: ArtistResponse = self
            .get_json(credential, &format!("/artists/{}", artist_id), &[], &what)
            .await?;

        Ok(ArtistInfo {
            artist_popularity: artist.popularity,
        })
    }

    async fn audio_features(
        &self,
        credential: &Credential,
        track_id: &str,
    ) -> Result<AudioFeatures, LookupError> {
        let what = format!("audio features {}", track_id);
        let body: Option<serde_json::Map<String, serde_json::Value>> = self
            .get_json(credential, &format!("/audio-features/{}", track_id), &[], &what)
            .await?;

        // Keep every numeric field; ids, uris and hrefs are dropped
        let features: AudioFeatures = body
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name, v)))
            .collect();

        if features.is_empty() {
            return Err(LookupError::NotFound(what));
        }
        Ok(features)
    }
}

/// Client-credentials token provider
pub struct ClientCredentialsProvider {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl ClientCredentialsProvider {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self, CredentialError> {
        Self::with_token_url(SPOTIFY_TOKEN_URL, client_id, client_secret)
    }

    pub fn with_token_url(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let http_client = http_client().map_err(|e| CredentialError::Unavailable(e.to_string()))?;
        Ok(Self {
            http_client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn fetch_token(&self) -> Result<String, CredentialError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("Token request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CredentialError::Unavailable(format!(
                "Token endpoint returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Unavailable(format!("Invalid token response: {}", e)))?;

        if token.access_token.trim().is_empty() {
            return Err(CredentialError::Unavailable("Empty access token".to_string()));
        }
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        assert!(SpotifyClient::new().is_ok());
        assert!(ClientCredentialsProvider::new("id", "secret").is_ok());
    }

    #[test]
    fn test_blank_market_ignored() {
        let client = SpotifyClient::new().unwrap().with_market(Some(" ".to_string()));
        assert!(client.market.is_none());
        let client = SpotifyClient::new().unwrap().with_market(Some("US".to_string()));
        assert_eq!(client.market.as_deref(), Some("US"));
    }

    #[test]
    fn test_primary_artist() {
        assert_eq!(primary_artist("Rihanna Featuring Drake"), "Rihanna");
        assert_eq!(
            primary_artist("Silk Sonic & Bruno Mars feat. Anderson .Paak"),
            "Silk Sonic & Bruno Mars"
        );
        assert_eq!(primary_artist("Earth, Wind & Fire"), "Earth, Wind & Fire");
        assert_eq!(primary_artist("Daryl Hall & John Oates"), "Daryl Hall & John Oates");
        assert_eq!(primary_artist("Adele"), "Adele");
        assert_eq!(primary_artist(" Adele "), "Adele");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = SpotifyClient::with_base_url("http://localhost:1234/").unwrap();
        assert_eq!(client.base_url, "http://localhost:1234");
    }
}
