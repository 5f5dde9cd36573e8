#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use lastfm_listenbrainz_sync::backoff::Sleeper;
use lastfm_listenbrainz_sync::db;
use lastfm_listenbrainz_sync::lastfm::{PageSource, RecentTracksPage};
use lastfm_listenbrainz_sync::listenbrainz::{
    ListenSink, ListenSubmission, RateLimit, SinkResponse, RATE_LIMIT_REMAINING,
    RATE_LIMIT_RESET_IN,
};
use lastfm_listenbrainz_sync::Scrobble;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct TestStore {
    pub dir: TempDir,
    pub pool: SqlitePool,
}

pub async fn open_store() -> TestStore {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_db(&dir.path().join("scrobbles.db")).await.unwrap();
    TestStore { dir, pool }
}

pub fn scrobble(uts: i64, artist: &str, track: &str) -> Scrobble {
    Scrobble {
        uts,
        artist_name: artist.to_string(),
        track_name: track.to_string(),
        album_name: String::new(),
        recording_mbid: String::new(),
        release_mbid: String::new(),
        loved: false,
    }
}

pub async fn insert(pool: &SqlitePool, scrobbles: &[Scrobble]) {
    let mut conn = pool.acquire().await.unwrap();
    db::upsert_scrobbles(&mut *conn, scrobbles, 1).await.unwrap();
}

/// A finalized Last.fm track entry as `user.getrecenttracks&extended=1` returns it.
pub fn track_json(uts: i64, artist: &str, track: &str, album: &str) -> Value {
    json!({
        "artist": {"url": format!("https://www.last.fm/music/{artist}"), "name": artist, "mbid": ""},
        "mbid": "",
        "name": track,
        "album": {"mbid": "", "#text": album},
        "loved": "0",
        "date": {"uts": uts.to_string(), "#text": ""}
    })
}

pub fn now_playing_json(artist: &str, track: &str) -> Value {
    json!({
        "artist": {"name": artist, "mbid": ""},
        "mbid": "",
        "name": track,
        "album": {"mbid": "", "#text": ""},
        "loved": "0",
        "@attr": {"nowplaying": "true"}
    })
}

pub fn page_json(tracks: Value, total_pages: u32) -> Value {
    json!({
        "recenttracks": {
            "track": tracks,
            "@attr": {"totalPages": total_pages.to_string(), "page": "1", "perPage": "200"}
        }
    })
}

/// Serves canned pages and records which ones were asked for.
pub struct FakeSource {
    pages: Mutex<Vec<Value>>,
    pub requests: Mutex<Vec<(i64, i64, u32)>>,
}

impl FakeSource {
    pub fn new(pages: Vec<Value>) -> Self {
        Self {
            pages: Mutex::new(pages),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_pages(&self, pages: Vec<Value>) {
        *self.pages.lock().unwrap() = pages;
    }

    pub fn requested_pages(&self) -> Vec<u32> {
        self.requests.lock().unwrap().iter().map(|r| r.2).collect()
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn recent_tracks_page(&self, from: i64, to: i64, page: u32) -> Result<RecentTracksPage> {
        self.requests.lock().unwrap().push((from, to, page));
        let json = self.pages.lock().unwrap()[page as usize - 1].clone();
        RecentTracksPage::from_json(json)
    }
}

/// Answers submissions from a script of responses and keeps what it was sent.
/// A `None` rate limit answers without the rate-limit headers.
pub struct FakeSink {
    responses: Mutex<VecDeque<(StatusCode, Option<RateLimit>)>>,
    pub received: Mutex<Vec<ListenSubmission>>,
}

impl FakeSink {
    pub fn new(responses: Vec<(StatusCode, RateLimit)>) -> Self {
        Self::scripted(
            responses
                .into_iter()
                .map(|(status, limit)| (status, Some(limit)))
                .collect(),
        )
    }

    pub fn scripted(responses: Vec<(StatusCode, Option<RateLimit>)>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn received(&self) -> Vec<ListenSubmission> {
        self.received.lock().unwrap().clone()
    }
}

pub fn limit(remaining: u64, reset_in: u64) -> RateLimit {
    RateLimit {
        remaining,
        reset_in,
    }
}

pub fn rate_limit_headers(limit: RateLimit) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(limit.remaining));
    headers.insert(RATE_LIMIT_RESET_IN, HeaderValue::from(limit.reset_in));
    headers
}

#[async_trait]
impl ListenSink for FakeSink {
    async fn submit_listens(&self, submission: &ListenSubmission) -> Result<SinkResponse> {
        self.received.lock().unwrap().push(submission.clone());
        let (status, rate_limit) = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((StatusCode::OK, Some(limit(100, 60))));
        Ok(SinkResponse {
            status,
            headers: rate_limit.map(rate_limit_headers).unwrap_or_default(),
            body: if status.is_success() {
                r#"{"status": "ok"}"#.to_string()
            } else {
                r#"{"code": 400, "error": "bad"}"#.to_string()
            },
        })
    }
}

/// Clones share one log, so a copy can be handed to a client by value.
#[derive(Default, Clone)]
pub struct RecordingSleeper {
    pub slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn total(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }

    pub fn calls(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// A one-shot-per-connection HTTP server on localhost that answers the n-th
/// request with the n-th canned response and then stops accepting.
pub struct CannedServer {
    pub root: String,
    hits: Arc<AtomicUsize>,
}

impl CannedServer {
    pub async fn start(responses: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            root: format!("http://{addr}/"),
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + body_len {
            return;
        }
    }
}

pub fn http_response(status: u16, reason: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut response = format!("HTTP/1.1 {status} {reason}\r\n");
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str(&format!(
        "content-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    ));
    response
}
