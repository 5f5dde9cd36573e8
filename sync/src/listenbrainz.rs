use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::{self, Config, USER_AGENT};
use crate::error::SyncError;
use crate::models::Scrobble;

pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET_IN: &str = "x-ratelimit-reset-in";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenSubmission {
    pub listen_type: &'static str,
    pub payload: Vec<Listen>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listen {
    pub listened_at: i64,
    pub track_metadata: TrackMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackMetadata {
    pub artist_name: String,
    pub track_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    pub additional_info: AdditionalInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdditionalInfo {
    pub submission_client: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastfm_track_mbid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastfm_release_mbid: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl Listen {
    pub fn from_scrobble(scrobble: &Scrobble) -> Self {
        Self {
            listened_at: scrobble.uts,
            track_metadata: TrackMetadata {
                artist_name: scrobble.artist_name.clone(),
                track_name: scrobble.track_name.clone(),
                release_name: non_empty(&scrobble.album_name),
                additional_info: AdditionalInfo {
                    submission_client: USER_AGENT.to_string(),
                    lastfm_track_mbid: non_empty(&scrobble.recording_mbid),
                    lastfm_release_mbid: non_empty(&scrobble.release_mbid),
                },
            },
        }
    }
}

impl ListenSubmission {
    pub fn import(scrobbles: &[Scrobble]) -> Self {
        Self {
            listen_type: "import",
            payload: scrobbles.iter().map(Listen::from_scrobble).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub reset_in: u64,
}

impl RateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, SyncError> {
        Ok(Self {
            remaining: header_u64(headers, RATE_LIMIT_REMAINING)?,
            reset_in: header_u64(headers, RATE_LIMIT_RESET_IN)?,
        })
    }
}

fn header_u64(headers: &HeaderMap, name: &'static str) -> Result<u64, SyncError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or(SyncError::MissingRateLimitHeader(name))
}

/// What the submit endpoint said, whatever the status. Proxies in front of
/// ListenBrainz answer errors without rate-limit headers, so those are only
/// read once the status is known.
#[derive(Debug, Clone)]
pub struct SinkResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl SinkResponse {
    pub fn rate_limit(&self) -> Result<RateLimit, SyncError> {
        RateLimit::from_headers(&self.headers)
    }
}

#[async_trait]
pub trait ListenSink: Send + Sync {
    async fn submit_listens(&self, submission: &ListenSubmission) -> Result<SinkResponse>;
}

pub struct ListenBrainzClient {
    http: Client,
    api_root: String,
    user_token: String,
}

impl ListenBrainzClient {
    pub fn new(api_root: &str, user_token: &str) -> Self {
        Self {
            http: Client::new(),
            api_root: api_root.to_string(),
            user_token: user_token.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            &config.listenbrainz_api_root,
            config::require(&config.listenbrainz_user_token, "LISTENBRAINZ_USER_TOKEN")?,
        ))
    }

    fn submit_url(&self) -> String {
        format!("{}/submit-listens", self.api_root.trim_end_matches('/'))
    }
}

#[async_trait]
impl ListenSink for ListenBrainzClient {
    async fn submit_listens(&self, submission: &ListenSubmission) -> Result<SinkResponse> {
        let url = self.submit_url();
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, format!("Token {}", self.user_token))
            .header(header::CONTENT_TYPE, "application/json; charset=UTF-8")
            .header(header::USER_AGENT, USER_AGENT)
            .body(serde_json::to_vec(submission)?)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .context("failed to read submit-listens response")?;

        Ok(SinkResponse {
            status,
            headers,
            body,
        })
    }
}
