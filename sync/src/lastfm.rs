use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::backoff::{RetryPolicy, Sleeper, TokioSleeper};
use crate::config::{self, Config, USER_AGENT};
use crate::error::SyncError;
use crate::models::Scrobble;

/// Tracks requested per page; the API maximum.
pub const PAGE_SIZE: u32 = 200;

/// One page of `user.getrecenttracks`, with the track list already
/// normalized to a sequence.
#[derive(Debug, Clone)]
pub struct RecentTracksPage {
    pub total_pages: u32,
    pub tracks: Vec<Value>,
}

/// Anything that can serve pages of a user's recent tracks for a time range.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn recent_tracks_page(&self, from: i64, to: i64, page: u32) -> Result<RecentTracksPage>;
}

#[derive(Debug, Deserialize)]
struct RecentTracksEnvelope {
    recenttracks: RecentTracksBody,
}

#[derive(Debug, Deserialize)]
struct RecentTracksBody {
    #[serde(default)]
    track: Option<OneOrMany>,
    #[serde(rename = "@attr")]
    attr: PageAttr,
}

// A page holding exactly one track carries it as a bare object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

#[derive(Debug, Deserialize)]
struct PageAttr {
    #[serde(rename = "totalPages")]
    total_pages: Lenient,
}

// Last.fm sends most numbers as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lenient {
    Int(i64),
    Str(String),
}

impl Lenient {
    fn as_i64(&self) -> Option<i64> {
        match self {
            Lenient::Int(n) => Some(*n),
            Lenient::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl RecentTracksPage {
    pub fn from_json(json: Value) -> Result<Self> {
        let envelope: RecentTracksEnvelope = serde_json::from_value(json)
            .map_err(|e| SyncError::MalformedResponse(format!("recenttracks page: {e}")))?;

        let total_pages = envelope
            .recenttracks
            .attr
            .total_pages
            .as_i64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| SyncError::MalformedResponse("totalPages is not a number".into()))?;

        let tracks = match envelope.recenttracks.track {
            Some(OneOrMany::Many(tracks)) => tracks,
            Some(OneOrMany::One(track)) => vec![track],
            None => Vec::new(),
        };

        Ok(Self {
            total_pages,
            tracks,
        })
    }
}

/// True only for the placeholder entry of whatever is playing right now.
/// Entries without the marker at all count as history.
pub fn is_now_playing(track: &Value) -> bool {
    track
        .pointer("/@attr/nowplaying")
        .and_then(Value::as_str)
        .map(|v| v == "true")
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct TrackEntry {
    name: String,
    #[serde(default)]
    mbid: Option<String>,
    artist: ArtistEntry,
    #[serde(default)]
    album: Option<AlbumEntry>,
    #[serde(default)]
    loved: Option<Lenient>,
    date: DateEntry,
}

#[derive(Debug, Deserialize)]
struct ArtistEntry {
    // extended=1 uses `name`, the plain form uses `#text`
    #[serde(alias = "#text")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumEntry {
    #[serde(rename = "#text", default)]
    text: Option<String>,
    #[serde(default)]
    mbid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateEntry {
    uts: Lenient,
}

/// Decode a finalized (not now-playing) track entry.
pub fn scrobble_from_track(track: &Value) -> Result<Scrobble> {
    let entry = TrackEntry::deserialize(track)
        .map_err(|e| SyncError::MalformedResponse(format!("track entry: {e}")))?;

    let uts = entry
        .date
        .uts
        .as_i64()
        .ok_or_else(|| SyncError::MalformedResponse("date.uts is not a number".into()))?;

    let (album_name, release_mbid) = match entry.album {
        Some(album) => (
            album.text.unwrap_or_default(),
            album.mbid.unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };

    Ok(Scrobble {
        uts,
        artist_name: entry.artist.name,
        track_name: entry.name,
        album_name,
        recording_mbid: entry.mbid.unwrap_or_default(),
        release_mbid,
        loved: entry.loved.and_then(|l| l.as_i64()).unwrap_or(0) != 0,
    })
}

/// Client for the Last.fm web service. Requests go out one at a time; server
/// errors are retried according to `retry`.
pub struct LastfmClient<Z: Sleeper = TokioSleeper> {
    http: Client,
    api_root: String,
    username: String,
    api_key: String,
    retry: RetryPolicy,
    sleeper: Z,
}

impl LastfmClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            &config.lastfm_api_root,
            config::require(&config.lastfm_username, "LASTFM_USERNAME")?,
            config::require(&config.lastfm_api_key, "LASTFM_API_KEY")?,
            TokioSleeper,
        ))
    }
}

impl<Z: Sleeper> LastfmClient<Z> {
    pub fn new(api_root: &str, username: &str, api_key: &str, sleeper: Z) -> Self {
        Self {
            http: Client::new(),
            api_root: api_root.to_string(),
            username: username.to_string(),
            api_key: api_key.to_string(),
            retry: RetryPolicy::default(),
            sleeper,
        }
    }

    pub fn recent_tracks_url(&self, from: i64, to: i64, page: u32) -> Result<Url> {
        let url = Url::parse_with_params(
            &self.api_root,
            &[
                ("method", "user.getrecenttracks".to_string()),
                ("user", self.username.clone()),
                ("extended", "1".to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("api_key", self.api_key.clone()),
                ("format", "json".to_string()),
                ("page", page.to_string()),
            ],
        )
        .with_context(|| format!("invalid LASTFM_API_ROOT {:?}", self.api_root))?;
        Ok(url)
    }

    /// GET `url` and decode the JSON body, retrying transient server errors.
    pub async fn get_json(&self, url: Url) -> Result<Value> {
        let display_url = redact(&url);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.sleeper.sleep(self.retry.delay_before(attempt)).await;

            let response = self
                .http
                .get(url.clone())
                .header(header::USER_AGENT, USER_AGENT)
                .send()
                .await
                .with_context(|| format!("request to {} failed", display_url))?;

            let status = response.status();

            if self.retry.should_retry(status, attempt) {
                tracing::warn!(
                    "{} returned {}, retrying (attempt {}/{})",
                    display_url,
                    status,
                    attempt,
                    self.retry.max_attempts
                );
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(SyncError::HttpStatus {
                    status,
                    url: display_url,
                    body,
                }
                .into());
            }

            return response
                .json::<Value>()
                .await
                .map_err(|e| SyncError::MalformedResponse(format!("{display_url}: {e}")).into());
        }
    }
}

/// `url` with the `api_key` value masked, for logs and error messages.
fn redact(url: &Url) -> String {
    if url.query().is_none() {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(name, value)| {
            let value = if name == "api_key" {
                "REDACTED".to_string()
            } else {
                value.into_owned()
            };
            (name.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[async_trait]
impl<Z: Sleeper> PageSource for LastfmClient<Z> {
    async fn recent_tracks_page(&self, from: i64, to: i64, page: u32) -> Result<RecentTracksPage> {
        let url = self.recent_tracks_url(from, to, page)?;
        let json = self.get_json(url).await?;
        RecentTracksPage::from_json(json)
    }
}
