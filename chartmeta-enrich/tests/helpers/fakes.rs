//! Scripted collaborators: chart source, metadata lookup, token provider

use async_trait::async_trait;
use chartmeta_enrich::models::{
    AlbumInfo, ArtistInfo, AudioFeatures, ChartItem, ChartSnapshot, TrackInfo,
};
use chartmeta_enrich::services::{
    ChartError, ChartSource, Credential, CredentialError, LookupError, MetadataLookup,
    TokenProvider,
};
use chrono::{Duration, NaiveDate};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Chart item by "Artist" with a bare identifier
pub fn item(identifier: &str, title: &str) -> ChartItem {
    ChartItem::new(identifier, title, "Artist")
}

// ============================================================================
// Chart source
// ============================================================================

/// Weekly snapshots, newest first, one week apart
pub struct ScriptedChart {
    snapshots: HashMap<NaiveDate, Vec<ChartItem>>,
    newest: NaiveDate,
    unavailable: HashSet<NaiveDate>,
}

impl ScriptedChart {
    pub fn weekly(newest: NaiveDate, weeks: Vec<Vec<ChartItem>>) -> Self {
        let snapshots = weeks
            .into_iter()
            .enumerate()
            .map(|(i, items)| {
                let ranked = items
                    .into_iter()
                    .enumerate()
                    .map(|(rank, item)| item.at_rank(rank as u32 + 1))
                    .collect();
                (newest - Duration::days(7 * i as i64), ranked)
            })
            .collect();

        Self {
            snapshots,
            newest,
            unavailable: HashSet::new(),
        }
    }

    /// Fail with `Unavailable` when this week is requested
    pub fn unavailable_at(mut self, date: NaiveDate) -> Self {
        self.unavailable.insert(date);
        self
    }

    /// Date of the `index`-th week (0 = newest)
    pub fn week(&self, index: i64) -> NaiveDate {
        self.newest - Duration::days(7 * index)
    }
}

#[async_trait]
impl ChartSource for ScriptedChart {
    async fn latest(&self) -> Result<ChartSnapshot, ChartError> {
        self.snapshot(self.newest).await
    }

    async fn snapshot(&self, date: NaiveDate) -> Result<ChartSnapshot, ChartError> {
        if self.unavailable.contains(&date) {
            return Err(ChartError::Unavailable(format!("scripted outage at {}", date)));
        }
        self.snapshots
            .get(&date)
            .map(|items| ChartSnapshot::new(date, items.clone()))
            .ok_or(ChartError::NoMoreSnapshots(date))
    }

    async fn previous_date(&self, date: NaiveDate) -> Result<NaiveDate, ChartError> {
        Ok(date - Duration::days(7))
    }
}

// ============================================================================
// Metadata lookup
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Search,
    Track,
    Album,
    Artist,
    AudioFeatures,
}

/// Lookup service that knows a fixed set of tracks
///
/// For a known track id `x`, the album id is `album-x` and the artist id is
/// `artist-x`. Unknown ids are `NotFound`. Failures can be scripted per
/// stage and track id.
#[derive(Default)]
pub struct ScriptedLookup {
    tracks: HashMap<String, (String, String)>,
    searches: HashMap<String, String>,
    failures: Mutex<HashMap<(Stage, String), LookupError>>,
    calls: Mutex<Vec<(Stage, String)>>,
    cancel_on: Option<(Stage, String, CancellationToken)>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known track with its canonical title, by "Artist"
    pub fn with_track(mut self, id: &str, title: &str) -> Self {
        self.tracks
            .insert(id.to_string(), (title.to_string(), "Artist".to_string()));
        self
    }

    /// Title search resolves to `id`
    pub fn with_search(mut self, title: &str, id: &str) -> Self {
        self.searches.insert(title.to_lowercase(), id.to_string());
        self
    }

    /// Cancel `token` when this stage is called for `id` (the title, for searches)
    pub fn cancel_on(mut self, stage: Stage, id: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((stage, id.to_string(), token));
        self
    }

    pub fn fail(&self, stage: Stage, id: &str, error: LookupError) {
        self.failures
            .lock()
            .unwrap()
            .insert((stage, id.to_string()), error);
    }

    pub fn calls(&self, stage: Stage) -> usize {
        self.calls.lock().unwrap().iter().filter(|(s, _)| *s == stage).count()
    }

    pub fn calls_for(&self, stage: Stage, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, i)| *s == stage && i == id)
            .count()
    }

    fn record(&self, stage: Stage, id: &str) -> Result<(), LookupError> {
        self.calls.lock().unwrap().push((stage, id.to_string()));
        if let Some((on, target, token)) = &self.cancel_on {
            if *on == stage && target == id {
                token.cancel();
            }
        }
        match self.failures.lock().unwrap().get(&(stage, id.to_string())) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn known(&self, id: &str) -> Result<&(String, String), LookupError> {
        self.tracks
            .get(id)
            .ok_or_else(|| LookupError::NotFound(format!("track {}", id)))
    }
}

#[async_trait]
impl MetadataLookup for ScriptedLookup {
    async fn search(
        &self,
        _credential: &Credential,
        title: &str,
        _artist: &str,
    ) -> Result<String, LookupError> {
        self.record(Stage::Search, title)?;
        self.searches
            .get(&title.to_lowercase())
            .cloned()
            .ok_or_else(|| LookupError::NotFound(format!("search {}", title)))
    }

    async fn track(&self, _credential: &Credential, track_id: &str) -> Result<TrackInfo, LookupError> {
        self.record(Stage::Track, track_id)?;
        let (title, artist) = self.known(track_id)?;
        Ok(TrackInfo {
            title: title.clone(),
            track_popularity: 60,
            album_id: format!("album-{}", track_id),
            album_name: format!("{} (Album)", title),
            artist_name: artist.clone(),
            artist_id: format!("artist-{}", track_id),
        })
    }

    async fn album(&self, _credential: &Credential, album_id: &str) -> Result<AlbumInfo, LookupError> {
        let id = album_id.trim_start_matches("album-");
        self.record(Stage::Album, id)?;
        self.known(id)?;
        Ok(AlbumInfo {
            album_popularity: 40,
            album_release_date: "2001-02-03".to_string(),
        })
    }

    async fn artist(&self, _credential: &Credential, artist_id: &str) -> Result<ArtistInfo, LookupError> {
        let id = artist_id.trim_start_matches("artist-");
        self.record(Stage::Artist, id)?;
        self.known(id)?;
        Ok(ArtistInfo {
            artist_popularity: 80,
        })
    }

    async fn audio_features(
        &self,
        _credential: &Credential,
        track_id: &str,
    ) -> Result<AudioFeatures, LookupError> {
        self.record(Stage::AudioFeatures, track_id)?;
        self.known(track_id)?;
        let mut features = AudioFeatures::new();
        features.insert("danceability".to_string(), 0.75);
        features.insert("energy".to_string(), 0.5);
        features.insert("tempo".to_string(), 118.25);
        features.insert("duration_ms".to_string(), 201000.0);
        Ok(features)
    }
}

// ============================================================================
// Token provider
// ============================================================================

/// Hands out `token-0`, `token-1`, ...; can be told to fail from the n-th call on
#[derive(Default)]
pub struct CountingTokens {
    fetched: AtomicU64,
    fail_from: Option<u64>,
}

impl CountingTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls numbered `n` and later fail (0 is the initial connect)
    pub fn failing_from(n: u64) -> Self {
        Self {
            fetched: AtomicU64::new(0),
            fail_from: Some(n),
        }
    }

    pub fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn fetch_token(&self) -> Result<String, CredentialError> {
        let n = self.fetched.fetch_add(1, Ordering::SeqCst);
        if self.fail_from.is_some_and(|from| n >= from) {
            return Err(CredentialError::Unavailable("token endpoint down".to_string()));
        }
        Ok(format!("token-{}", n))
    }
}
