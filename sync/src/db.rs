use anyhow::{Context, Result};
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqliteConnection};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use crate::migrations;
use crate::models::Scrobble;

/// Open (creating if needed) the scrobble store and migrate it before handing
/// it out. The pool holds a single connection: this process is the only
/// writer and reads never overlap writes.
pub async fn init_db(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    migrations::run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn count_scrobbles<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM scrobble")
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Scrobbles with `from <= uts < to`, in canonical order.
pub async fn scrobbles_in_range<'e, E>(executor: E, from: i64, to: i64) -> Result<Vec<Scrobble>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let scrobbles = sqlx::query_as::<_, Scrobble>(
        r#"
        SELECT uts, artist_name, track_name, album_name,
               recording_mbid, release_mbid, loved
          FROM scrobble
         WHERE uts >= ? AND uts < ?
         ORDER BY uts, artist_name, track_name
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await?;

    Ok(scrobbles)
}

pub async fn delete_range<'e, E>(executor: E, from: i64, to: i64) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM scrobble WHERE uts >= ? AND uts < ?")
        .bind(from)
        .bind(to)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Insert each scrobble, overwriting every non-key column when one with the
/// same (uts, artist_name, track_name) is already stored.
pub async fn upsert_scrobbles(
    conn: &mut SqliteConnection,
    scrobbles: &[Scrobble],
    fetched_at: i64,
) -> Result<()> {
    for scrobble in scrobbles {
        sqlx::query(
            r#"
            INSERT INTO scrobble (uts, artist_name, track_name, album_name,
                                  recording_mbid, release_mbid, loved, fetched_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (uts, artist_name, track_name) DO UPDATE
                    SET album_name = excluded.album_name,
                        recording_mbid = excluded.recording_mbid,
                        release_mbid = excluded.release_mbid,
                        loved = excluded.loved,
                        fetched_at = excluded.fetched_at
            "#,
        )
        .bind(scrobble.uts)
        .bind(&scrobble.artist_name)
        .bind(&scrobble.track_name)
        .bind(&scrobble.album_name)
        .bind(&scrobble.recording_mbid)
        .bind(&scrobble.release_mbid)
        .bind(scrobble.loved)
        .bind(fetched_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!(
                "failed to upsert scrobble {} / {} at {}: {}",
                scrobble.artist_name,
                scrobble.track_name,
                scrobble.uts,
                e
            );
            e
        })?;
    }

    Ok(())
}

/// Row count and order-sensitive hash of a set of scrobbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub rows: u64,
    pub hash: u64,
}

/// Fingerprint of every row outside `[from, to)`, used to confirm that a
/// correction script stayed inside its day. Rows are streamed in canonical
/// order and never held in memory together.
pub async fn outside_range_fingerprint<'e, E>(executor: E, from: i64, to: i64) -> Result<Fingerprint>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut rows = sqlx::query_as::<_, Scrobble>(
        r#"
        SELECT uts, artist_name, track_name, album_name,
               recording_mbid, release_mbid, loved
          FROM scrobble
         WHERE uts < ? OR uts >= ?
         ORDER BY uts, artist_name, track_name
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch(executor);

    let mut hasher = DefaultHasher::new();
    let mut count = 0;
    while let Some(scrobble) = rows.try_next().await? {
        scrobble.hash(&mut hasher);
        count += 1;
    }

    Ok(Fingerprint {
        rows: count,
        hash: hasher.finish(),
    })
}
