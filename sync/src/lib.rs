pub mod backoff;
pub mod config;
pub mod cursor;
pub mod db;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod lastfm;
pub mod listenbrainz;
pub mod migrations;
pub mod models;
pub mod submit;

pub use config::Config;
pub use error::SyncError;
pub use models::{Scrobble, ScrobbleKey};

/// Parse the optional single ISO date argument the binaries accept.
pub fn parse_iso_date(arg: &str) -> anyhow::Result<chrono::NaiveDate> {
    use anyhow::Context;
    chrono::NaiveDate::parse_from_str(arg, "%Y-%m-%d")
        .with_context(|| format!("Failed to parse {:?}. It must be an ISO date (YYYY-MM-DD).", arg))
}
