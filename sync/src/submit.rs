//! Forwards stored scrobbles to ListenBrainz in canonical order.
//!
//! Whole-history runs resume from the cursor file and advance it after each
//! accepted batch, so a killed run re-sends at most the batch in flight.
//! Single-day runs are one-off and leave the cursor alone.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, TimeZone};
use reqwest::StatusCode;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::backoff::{Sleeper, TokioSleeper};
use crate::config::Config;
use crate::cursor::CursorFile;
use crate::db;
use crate::error::SyncError;
use crate::fetch::day_range;
use crate::listenbrainz::{ListenBrainzClient, ListenSink, ListenSubmission};
use crate::models::{Scrobble, ScrobbleKey};

pub const BATCH_SIZE: i64 = 1000;

/// Which scrobbles a submission run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionScope {
    /// `from <= uts < to`; never reads or writes the cursor.
    Range { from: i64, to: i64 },
    /// Everything after the last accepted scrobble.
    Resume(ScrobbleKey),
    /// Everything, nothing having been submitted yet.
    Everything,
}

impl SubmissionScope {
    pub fn day<Tz: TimeZone>(day: NaiveDate, tz: &Tz) -> Result<Self> {
        let (from, to) = day_range(day, tz)?;
        Ok(Self::Range { from, to })
    }

    pub async fn from_cursor(cursor: &CursorFile) -> Result<Self> {
        Ok(match cursor.load().await? {
            Some(key) => Self::Resume(key),
            None => Self::Everything,
        })
    }

    /// Whether accepted batches should move the cursor.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Range { .. })
    }

    fn push_where(&self, query: &mut QueryBuilder<'_, Sqlite>, after: Option<&ScrobbleKey>) {
        query.push(" WHERE 1 = 1");

        if let Self::Range { from, to } = self {
            query.push(" AND uts >= ").push_bind(*from);
            query.push(" AND uts < ").push_bind(*to);
        }

        let lower = match self {
            Self::Resume(cursor) => after.or(Some(cursor)),
            _ => after,
        };
        if let Some(key) = lower {
            query
                .push(" AND (uts, artist_name, track_name) > (")
                .push_bind(key.uts)
                .push(", ")
                .push_bind(key.artist_name.clone())
                .push(", ")
                .push_bind(key.track_name.clone())
                .push(")");
        }
    }

    pub async fn count(&self, pool: &SqlitePool) -> Result<i64> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT count(*) FROM scrobble");
        self.push_where(&mut query, None);
        let count = query
            .build_query_scalar::<i64>()
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

/// Keyset-paginated read of a scope: each pull resumes strictly after the
/// last row the previous pull returned.
pub struct ScrobbleBatches<'a> {
    pool: &'a SqlitePool,
    scope: SubmissionScope,
    after: Option<ScrobbleKey>,
    batch_size: i64,
}

impl<'a> ScrobbleBatches<'a> {
    pub fn new(pool: &'a SqlitePool, scope: SubmissionScope) -> Self {
        Self::with_batch_size(pool, scope, BATCH_SIZE)
    }

    pub fn with_batch_size(pool: &'a SqlitePool, scope: SubmissionScope, batch_size: i64) -> Self {
        Self {
            pool,
            scope,
            after: None,
            batch_size,
        }
    }

    pub async fn next_batch(&mut self) -> Result<Vec<Scrobble>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT uts, artist_name, track_name, album_name, \
             recording_mbid, release_mbid, loved FROM scrobble",
        );
        self.scope.push_where(&mut query, self.after.as_ref());
        query
            .push(" ORDER BY uts, artist_name, track_name LIMIT ")
            .push_bind(self.batch_size);

        let rows = query
            .build_query_as::<Scrobble>()
            .fetch_all(self.pool)
            .await?;
        if let Some(last) = rows.last() {
            self.after = Some(last.key());
        }
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub submitted: usize,
    pub batches: usize,
    pub rate_limited: usize,
}

pub struct Submitter<'a, S, Z = TokioSleeper> {
    sink: &'a S,
    sleeper: &'a Z,
    cursor: Option<&'a CursorFile>,
}

impl<'a, S: ListenSink, Z: Sleeper> Submitter<'a, S, Z> {
    /// `cursor` is advanced after every accepted batch; pass `None` for
    /// one-off submissions.
    pub fn new(sink: &'a S, sleeper: &'a Z, cursor: Option<&'a CursorFile>) -> Self {
        Self {
            sink,
            sleeper,
            cursor,
        }
    }

    pub async fn run(&self, batches: &mut ScrobbleBatches<'_>, total: i64) -> Result<SubmitReport> {
        let mut report = SubmitReport::default();
        let mut rows = batches.next_batch().await?;

        while !rows.is_empty() {
            let submission = ListenSubmission::import(&rows);
            let response = self.sink.submit_listens(&submission).await?;

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                let reset_in = Duration::from_secs(response.rate_limit()?.reset_in);
                report.rate_limited += 1;
                warn!(
                    "rate limited by ListenBrainz, retrying in {}s",
                    reset_in.as_secs()
                );
                self.sleeper.sleep(reset_in).await;
                continue;
            }

            if !response.status.is_success() {
                error!("submit-listens headers: {:?}", response.headers);
                error!("submit-listens body: {}", response.body);
                return Err(SyncError::HttpStatus {
                    status: response.status,
                    url: "submit-listens".to_string(),
                    body: response.body,
                }
                .into());
            }

            if let (Some(cursor), Some(last)) = (self.cursor, rows.last()) {
                cursor
                    .save(&last.key())
                    .await
                    .context("failed to persist submission cursor")?;
            }

            report.submitted += rows.len();
            report.batches += 1;
            info!("[{}/{}] listens submitted", report.submitted, total);

            // the batch is already recorded, so a missing header only stops what follows
            let rate_limit = response.rate_limit()?;

            rows = batches.next_batch().await?;
            if !rows.is_empty() && rate_limit.remaining == 0 {
                info!(
                    "rate limit exhausted, waiting {}s before the next batch",
                    rate_limit.reset_in
                );
                self.sleeper
                    .sleep(Duration::from_secs(rate_limit.reset_in))
                    .await;
            }
        }

        Ok(report)
    }
}

/// Entry point shared by the binaries: one day if given (cursor untouched),
/// otherwise everything after the persisted cursor.
pub async fn run(config: &Config, day: Option<NaiveDate>) -> Result<SubmitReport> {
    let pool = db::init_db(&config.scrobbles_db_file)
        .await
        .context("Failed to initialize database")?;
    let client = ListenBrainzClient::from_config(config)?;
    let cursor_file = CursorFile::new(&config.last_submitted_listen_file);

    let scope = match day {
        Some(day) => SubmissionScope::day(day, &Local)?,
        None => SubmissionScope::from_cursor(&cursor_file).await?,
    };
    let cursor = scope.is_resumable().then_some(&cursor_file);

    let total = scope.count(&pool).await?;
    info!("{} listens to submit", total);

    let mut batches = ScrobbleBatches::new(&pool, scope);
    let report = Submitter::new(&client, &TokioSleeper, cursor)
        .run(&mut batches, total)
        .await?;

    info!(
        "Submitted {} listen{} in {} batch{}",
        report.submitted,
        if report.submitted == 1 { "" } else { "s" },
        report.batches,
        if report.batches == 1 { "" } else { "es" }
    );
    Ok(report)
}
