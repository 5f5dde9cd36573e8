use anyhow::Context;
use lastfm_listenbrainz_sync::{parse_iso_date, submit, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "submit_listens=info,lastfm_listenbrainz_sync=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        eprintln!("Usage: {} [date]", args[0]);
        eprintln!("  [date] - Optional ISO date to submit on its own (if not specified, resumes after the last submitted listen)");
        anyhow::bail!("Too many arguments");
    }

    let day = args.get(1).map(|arg| parse_iso_date(arg)).transpose()?;
    let config = Config::from_env().context("Failed to load configuration")?;

    submit::run(&config, day).await?;
    Ok(())
}
