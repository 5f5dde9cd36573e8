use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::PathBuf;

/// Identifies this client to both APIs and tags every submitted listen.
pub const USER_AGENT: &str = "github:mwiencek/lastfm-listenbrainz-sync";

pub const DEFAULT_LASTFM_API_ROOT: &str = "http://ws.audioscrobbler.com/2.0/";
pub const DEFAULT_LISTENBRAINZ_API_ROOT: &str = "https://api.listenbrainz.org/1/";

/// Everything a run needs, read once at startup and passed down by reference.
///
/// Credentials are optional here so that commands which never talk to an API
/// (`migrate`, `status`) can run without them; the API clients refuse to be
/// built when theirs are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub lastfm_username: Option<String>,
    pub lastfm_api_key: Option<String>,
    pub lastfm_first_scrobble_date: Option<NaiveDate>,
    pub lastfm_api_root: String,
    pub listenbrainz_user_token: Option<String>,
    pub listenbrainz_api_root: String,
    pub scrobbles_db_file: PathBuf,
    pub lastfm_data_root: PathBuf,
    pub scrobble_fixes_root: PathBuf,
    pub last_submitted_listen_file: PathBuf,
}

impl Config {
    /// Load from the process environment (after `.env`, if the caller ran
    /// `dotenvy::dotenv()`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let path_or = |name: &str, default: &str| {
            PathBuf::from(non_empty(name).unwrap_or_else(|| default.to_string()))
        };

        let lastfm_first_scrobble_date = non_empty("LASTFM_FIRST_SCROBBLE_DATE")
            .map(|raw| {
                NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").with_context(|| {
                    format!("LASTFM_FIRST_SCROBBLE_DATE must be an ISO date, got {raw:?}")
                })
            })
            .transpose()?;

        Ok(Self {
            lastfm_username: non_empty("LASTFM_USERNAME"),
            lastfm_api_key: non_empty("LASTFM_API_KEY"),
            lastfm_first_scrobble_date,
            lastfm_api_root: non_empty("LASTFM_API_ROOT")
                .unwrap_or_else(|| DEFAULT_LASTFM_API_ROOT.to_string()),
            listenbrainz_user_token: non_empty("LISTENBRAINZ_USER_TOKEN"),
            listenbrainz_api_root: non_empty("LISTENBRAINZ_API_ROOT")
                .unwrap_or_else(|| DEFAULT_LISTENBRAINZ_API_ROOT.to_string()),
            scrobbles_db_file: path_or("SCROBBLES_DB_FILE", "scrobbles.db"),
            lastfm_data_root: path_or("LASTFM_DATA_ROOT", "lastfm_data"),
            scrobble_fixes_root: path_or("SCROBBLE_FIXES_ROOT", "scrobble_fixes"),
            last_submitted_listen_file: path_or(
                "LAST_SUBMITTED_LISTEN_FILE",
                "last_submitted_listen",
            ),
        })
    }

    pub fn first_scrobble_date(&self) -> Result<NaiveDate> {
        self.lastfm_first_scrobble_date
            .context("LASTFM_FIRST_SCROBBLE_DATE is not set")
    }
}

pub(crate) fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("{name} is not set"))
}
