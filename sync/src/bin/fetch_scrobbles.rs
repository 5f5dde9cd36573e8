use anyhow::Context;
use lastfm_listenbrainz_sync::{fetch, parse_iso_date, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetch_scrobbles=info,lastfm_listenbrainz_sync=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: {} [date]", args[0]);
        eprintln!("  [date] - Optional ISO date to re-fetch (if not specified, fetches every day since the last run)");
        anyhow::bail!("Too many arguments");
    }

    let day = args.get(1).map(|arg| parse_iso_date(arg)).transpose()?;
    let config = Config::from_env().context("Failed to load configuration")?;

    fetch::run(&config, day).await
}
