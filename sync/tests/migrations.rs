use lastfm_listenbrainz_sync::migrations::{self, Migration, LATEST_SCHEMA_VERSION};
use lastfm_listenbrainz_sync::{db, SyncError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

const THREE_STEPS: &[Migration] = &[
    Migration {
        version: 1,
        script: "CREATE TABLE applied (version INTEGER NOT NULL);
                 INSERT INTO applied (version) VALUES (1);",
    },
    Migration {
        version: 2,
        script: "INSERT INTO applied (version) VALUES (2);",
    },
    Migration {
        version: 3,
        script: "CREATE TABLE extra (id INTEGER PRIMARY KEY);
                 INSERT INTO applied (version) VALUES (3);",
    },
];

async fn raw_pool(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        )
        .await
        .unwrap()
}

async fn stored_version(pool: &SqlitePool) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    migrations::current_version(&mut *conn).await.unwrap()
}

#[tokio::test]
async fn fresh_store_runs_every_migration_once_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let pool = raw_pool(&dir.path().join("store.db")).await;

    assert_eq!(stored_version(&pool).await, 0);

    let version = migrations::upgrade(&pool, THREE_STEPS).await.unwrap();
    assert_eq!(version, 3);
    assert_eq!(stored_version(&pool).await, 3);

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM applied ORDER BY rowid")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(applied, vec![1, 2, 3]);
}

#[tokio::test]
async fn upgrading_an_up_to_date_store_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let pool = raw_pool(&dir.path().join("store.db")).await;

    migrations::upgrade(&pool, THREE_STEPS).await.unwrap();
    migrations::upgrade(&pool, THREE_STEPS).await.unwrap();

    let applied: i64 = sqlx::query_scalar("SELECT count(*) FROM applied")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(applied, 3);
}

#[tokio::test]
async fn partially_migrated_store_only_runs_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let pool = raw_pool(&dir.path().join("store.db")).await;

    migrations::upgrade(&pool, &THREE_STEPS[..1]).await.unwrap();
    assert_eq!(stored_version(&pool).await, 1);

    migrations::upgrade(&pool, THREE_STEPS).await.unwrap();

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM applied ORDER BY rowid")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(applied, vec![1, 2, 3]);
}

#[tokio::test]
async fn newer_store_is_refused_without_changes() {
    let dir = tempfile::tempdir().unwrap();
    let pool = raw_pool(&dir.path().join("store.db")).await;

    sqlx::raw_sql(
        "CREATE TABLE schema_version (version INTEGER NOT NULL);
         INSERT INTO schema_version (version) VALUES (5);",
    )
    .execute(&pool)
    .await
    .unwrap();

    let err = migrations::upgrade(&pool, THREE_STEPS).await.unwrap_err();
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::SchemaTooNew { found, supported }) => {
            assert_eq!(*found, 5);
            assert_eq!(*supported, 3);
        }
        other => panic!("expected SchemaTooNew, got {:?}", other),
    }

    let applied_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'applied')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!applied_exists);
    assert_eq!(stored_version(&pool).await, 5);
}

#[tokio::test]
async fn failing_migration_rolls_back_everything() {
    let dir = tempfile::tempdir().unwrap();
    let pool = raw_pool(&dir.path().join("store.db")).await;

    let broken = [
        THREE_STEPS[0],
        Migration {
            version: 2,
            script: "INSERT INTO no_such_table VALUES (1);",
        },
    ];

    assert!(migrations::upgrade(&pool, &broken).await.is_err());
    assert_eq!(stored_version(&pool).await, 0);
}

#[tokio::test]
async fn init_db_creates_the_scrobble_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("scrobbles.db");

    let pool = db::init_db(&path).await.unwrap();

    assert!(path.exists());
    assert_eq!(stored_version(&pool).await, LATEST_SCHEMA_VERSION);
    assert_eq!(db::count_scrobbles(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn init_db_refuses_a_newer_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scrobbles.db");

    {
        let pool = raw_pool(&path).await;
        sqlx::raw_sql(&format!(
            "CREATE TABLE schema_version (version INTEGER NOT NULL);
             INSERT INTO schema_version (version) VALUES ({});",
            LATEST_SCHEMA_VERSION + 1
        ))
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    let err = db::init_db(&path).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::SchemaTooNew { .. })
    ));
}
