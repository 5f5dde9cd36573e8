//! Mirrors Last.fm history into the local store one calendar day at a time.
//!
//! Each day is rewritten wholesale inside a single transaction: existing rows
//! for the day are deleted and the freshly fetched ones inserted, so edits
//! and deletions made on Last.fm show up locally. The before/after diff is
//! logged for every day.

use anyhow::{anyhow, Context, Result};
use chrono::{Days, Local, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::diff::ScrobbleDiff;
use crate::error::SyncError;
use crate::lastfm::{self, LastfmClient, PageSource};
use crate::models::Scrobble;

/// `[start of day, start of next day)` in unix seconds, in `tz`.
pub fn day_range<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> Result<(i64, i64)> {
    let next = day
        .checked_add_days(Days::new(1))
        .ok_or_else(|| anyhow!("{} has no following day", day))?;
    Ok((start_of_day(day, tz)?, start_of_day(next, tz)?))
}

fn start_of_day<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> Result<i64> {
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date {}", day))?;
    // A DST jump can skip or repeat midnight; take the first instant of the day.
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| anyhow!("midnight of {} does not exist in this timezone", day))
}

/// Latest day that already has an archive file, or `first_scrobble_date`,
/// whichever is later.
pub async fn default_start_date(data_root: &Path, first_scrobble_date: NaiveDate) -> Result<NaiveDate> {
    let mut latest = first_scrobble_date;

    let mut entries = match tokio::fs::read_dir(data_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(latest),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", data_root.display())),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
            continue;
        };
        if let Ok(day) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
            latest = latest.max(day);
        }
    }

    Ok(latest)
}

/// Outcome of re-fetching one day.
#[derive(Debug, Clone)]
pub struct DayReport {
    pub day: NaiveDate,
    pub fetched: usize,
    pub diff: ScrobbleDiff,
}

pub struct Fetcher<'a, P, Tz: TimeZone = Local> {
    pool: &'a SqlitePool,
    source: &'a P,
    data_root: PathBuf,
    fixes_root: PathBuf,
    fetched_at: i64,
    tz: Tz,
}

impl<'a, P: PageSource> Fetcher<'a, P> {
    pub fn new(pool: &'a SqlitePool, source: &'a P, data_root: &Path, fixes_root: &Path) -> Self {
        Self {
            pool,
            source,
            data_root: data_root.to_path_buf(),
            fixes_root: fixes_root.to_path_buf(),
            fetched_at: Utc::now().timestamp(),
            tz: Local,
        }
    }
}

impl<'a, P: PageSource, Tz: TimeZone> Fetcher<'a, P, Tz> {
    /// Use `tz` for day boundaries instead of the local timezone.
    pub fn with_timezone<T: TimeZone>(self, tz: T) -> Fetcher<'a, P, T> {
        Fetcher {
            pool: self.pool,
            source: self.source,
            data_root: self.data_root,
            fixes_root: self.fixes_root,
            fetched_at: self.fetched_at,
            tz,
        }
    }

    pub fn archive_path(&self, day: NaiveDate) -> PathBuf {
        self.data_root.join(format!("{}.json", day))
    }

    pub fn fixes_path(&self, day: NaiveDate) -> PathBuf {
        self.fixes_root.join(format!("{}.sql", day))
    }

    /// Every finalized track Last.fm has for `[from, to)`, in canonical order,
    /// each paired with its raw entry.
    async fn fetch_tracks(&self, from: i64, to: i64) -> Result<Vec<(Scrobble, Value)>> {
        let mut tracks = Vec::new();
        let mut page = 1;

        loop {
            let response = self
                .source
                .recent_tracks_page(from, to, page)
                .await
                .with_context(|| format!("failed to fetch page {}", page))?;

            for raw in response.tracks {
                if lastfm::is_now_playing(&raw) {
                    continue;
                }
                tracks.push((lastfm::scrobble_from_track(&raw)?, raw));
            }

            if page >= response.total_pages {
                break;
            }
            page += 1;
        }

        tracks.sort_by(|(a, _), (b, _)| a.key().cmp(&b.key()));
        Ok(tracks)
    }

    async fn write_archive(&self, day: NaiveDate, raw: Vec<Value>) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_root)
            .await
            .with_context(|| format!("failed to create {}", self.data_root.display()))?;

        let path = self.archive_path(day);
        let body = serde_json::to_vec(&json!({ "recenttracks": raw }))?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    async fn read_fixes(&self, day: NaiveDate) -> Result<Option<String>> {
        let path = self.fixes_path(day);
        match tokio::fs::read_to_string(&path).await {
            Ok(script) => Ok(Some(script)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// Re-fetch one day from Last.fm and make the store match it.
    pub async fn sync_day(&self, day: NaiveDate) -> Result<DayReport> {
        info!("Fetching scrobbles for {}", day);

        let (from, to) = day_range(day, &self.tz)?;
        let tracks = self.fetch_tracks(from, to).await?;
        let (scrobbles, raw): (Vec<Scrobble>, Vec<Value>) = tracks.into_iter().unzip();

        self.write_archive(day, raw).await?;
        let fixes = self.read_fixes(day).await?;

        let mut tx = self.pool.begin().await?;

        let before = db::scrobbles_in_range(&mut *tx, from, to).await?;
        db::delete_range(&mut *tx, from, to).await?;
        db::upsert_scrobbles(&mut *tx, &scrobbles, self.fetched_at).await?;

        if let Some(script) = fixes {
            info!("applying scrobble fixes for {}", day);
            let outside = db::outside_range_fingerprint(&mut *tx, from, to).await?;
            sqlx::raw_sql(&script)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("scrobble fixes for {} failed", day))?;
            if db::outside_range_fingerprint(&mut *tx, from, to).await? != outside {
                return Err(SyncError::FixOutOfScope { day }.into());
            }
        }

        let after = db::scrobbles_in_range(&mut *tx, from, to).await?;
        let diff = ScrobbleDiff::between(&before, &after);
        for line in diff.lines() {
            info!("\t{}", line);
        }

        tx.commit().await?;

        Ok(DayReport {
            day,
            fetched: scrobbles.len(),
            diff,
        })
    }

    /// Sync every day from `start` through `end`, inclusive. Returns how many
    /// rows the store gained overall.
    pub async fn sync_range(&self, start: NaiveDate, end: NaiveDate) -> Result<i64> {
        let count_before = db::count_scrobbles(self.pool).await?;

        for day in start.iter_days().take_while(|d| *d <= end) {
            self.sync_day(day).await?;
        }

        let fetched = db::count_scrobbles(self.pool).await? - count_before;
        info!(
            "Fetched {} new scrobble{}",
            fetched,
            if fetched == 1 { "" } else { "s" }
        );
        Ok(fetched)
    }
}

/// Entry point shared by the binaries: one day if given, otherwise everything
/// from the last archived day through today.
pub async fn run(config: &Config, day: Option<NaiveDate>) -> Result<()> {
    let pool = db::init_db(&config.scrobbles_db_file)
        .await
        .context("Failed to initialize database")?;
    let client = LastfmClient::from_config(config)?;
    let fetcher = Fetcher::new(
        &pool,
        &client,
        &config.lastfm_data_root,
        &config.scrobble_fixes_root,
    );

    match day {
        Some(day) => {
            fetcher.sync_day(day).await?;
        }
        None => {
            let start =
                default_start_date(&config.lastfm_data_root, config.first_scrobble_date()?).await?;
            let today = Local::now().date_naive();
            fetcher.sync_range(start, today).await?;
        }
    }

    Ok(())
}
