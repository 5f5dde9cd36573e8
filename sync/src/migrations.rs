//! Versioned upgrades of the scrobble store.
//!
//! The store records a single integer in `schema_version`. Opening a store
//! brings it from that version up to [`LATEST_SCHEMA_VERSION`] by running each
//! pending script in order. A store from a newer build is refused outright.
//!
//! Scripts are append-only: never edit one that has shipped, add the next
//! number instead and register it in [`MIGRATIONS`].

use anyhow::{Context, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use crate::error::SyncError;

/// A numbered schema change, run as one batch of SQL statements.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub script: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    script: include_str!("../migrations/1.sql"),
}];

pub const LATEST_SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Version recorded in the store, or 0 if it was never migrated.
pub async fn current_version(conn: &mut SqliteConnection) -> Result<i64> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type = 'table' AND name = 'schema_version'
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_optional(&mut *conn)
        .await?;

    Ok(version.unwrap_or(0))
}

/// Bring the store up to date with the built-in migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<i64> {
    upgrade(pool, MIGRATIONS).await
}

/// Apply every migration in `migrations` newer than the stored version, in
/// order, inside one transaction. Returns the version the store ends at.
///
/// `migrations` must be numbered 1..=N without gaps.
pub async fn upgrade(pool: &SqlitePool, migrations: &[Migration]) -> Result<i64> {
    let latest = migrations.len() as i64;
    let mut tx = pool.begin().await?;

    let mut version = current_version(&mut *tx).await?;

    if version > latest {
        return Err(SyncError::SchemaTooNew {
            found: version,
            supported: latest,
        }
        .into());
    }

    if version == latest {
        info!("scrobble store schema is up to date (v{})", version);
        return Ok(version);
    }

    info!("upgrading scrobble store schema: v{} -> v{}", version, latest);

    while version < latest {
        let migration = &migrations[version as usize];
        debug_assert_eq!(migration.version, version + 1);

        sqlx::raw_sql(migration.script)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("migration {} failed", migration.version))?;

        set_version(&mut *tx, migration.version).await?;
        version = migration.version;
        info!("applied schema migration v{}", version);
    }

    tx.commit().await?;
    Ok(version)
}

async fn set_version(conn: &mut SqliteConnection, version: i64) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM schema_version")
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
