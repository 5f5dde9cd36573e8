use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use lastfm_listenbrainz_sync::cursor::CursorFile;
use lastfm_listenbrainz_sync::{db, fetch, migrations, submit, Config};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lbsync")]
#[command(about = "Mirror Last.fm scrobbles locally and forward them to ListenBrainz", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch scrobbles from Last.fm into the local store
    Fetch {
        /// Only re-fetch this day (YYYY-MM-DD); otherwise every day since the last run
        #[arg(value_name = "DATE")]
        date: Option<NaiveDate>,
    },

    /// Submit stored scrobbles to ListenBrainz
    Submit {
        /// Only submit this day (YYYY-MM-DD), leaving the resume cursor alone
        #[arg(value_name = "DATE")]
        date: Option<NaiveDate>,
    },

    /// Upgrade the local store to the current schema and exit
    Migrate,

    /// Show schema version, scrobble count and the submission cursor
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lbsync=info,lastfm_listenbrainz_sync=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Fetch { date } => fetch::run(&config, date).await,
        Commands::Submit { date } => submit::run(&config, date).await.map(|_| ()),
        Commands::Migrate => handle_migrate(&config).await,
        Commands::Status => handle_status(&config).await,
    }
}

async fn handle_migrate(config: &Config) -> Result<()> {
    db::init_db(&config.scrobbles_db_file)
        .await
        .context("Failed to initialize database")?;
    tracing::info!(
        "{} is at schema version {}",
        config.scrobbles_db_file.display(),
        migrations::LATEST_SCHEMA_VERSION
    );
    Ok(())
}

async fn handle_status(config: &Config) -> Result<()> {
    let pool = db::init_db(&config.scrobbles_db_file)
        .await
        .context("Failed to initialize database")?;

    let mut conn = pool.acquire().await?;
    let version = migrations::current_version(&mut *conn).await?;
    let total = db::count_scrobbles(&mut *conn).await?;
    let cursor = CursorFile::new(&config.last_submitted_listen_file)
        .load()
        .await?;

    println!("store:          {}", config.scrobbles_db_file.display());
    println!("schema version: {}", version);
    println!("scrobbles:      {}", total);
    match cursor {
        Some(key) => println!(
            "last submitted: {} - {} at {}",
            key.artist_name, key.track_name, key.uts
        ),
        None => println!("last submitted: nothing yet"),
    }

    Ok(())
}
