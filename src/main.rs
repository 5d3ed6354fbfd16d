use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

use gig_board::{config::AppConfig, models::ArtistId};

#[derive(Parser, Debug)]
#[command(name = "gig-board")]
#[command(about = "Gig listings built from free-text announcements")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults to <data dir>/config.json when present)
    #[arg(short, long, env = "GIGS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<String>,

    /// Root directory for users.json and per-artist gig documents
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Import a legacy gigs file and exit, e.g. `metro_jethros=_data/gigs.json`
    #[arg(long, value_name = "ARTIST=PATH", value_parser = parse_import)]
    import: Option<(ArtistId, PathBuf)>,
}

fn parse_import(raw: &str) -> Result<(ArtistId, PathBuf), String> {
    let (artist, path) = raw
        .split_once('=')
        .ok_or_else(|| "expected ARTIST=PATH".to_string())?;
    let artist = ArtistId::parse(artist).map_err(|err| err.to_string())?;
    if path.trim().is_empty() {
        return Err("missing PATH".to_string());
    }
    Ok((artist, PathBuf::from(path)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }

    if let Some((artist, path)) = cli.import {
        if !path.exists() {
            return Err(anyhow!("{} does not exist", path.display()));
        }
        gig_board::import_legacy(&config, &artist, &path).await?;
        return Ok(());
    }

    gig_board::run(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_argument_splits_artist_and_path() {
        let (artist, path) = parse_import("Metro-Jethros=_data/gigs.json").unwrap();
        assert_eq!(artist.as_str(), "metro_jethros");
        assert_eq!(path, PathBuf::from("_data/gigs.json"));

        assert!(parse_import("_data/gigs.json").is_err());
        assert!(parse_import("metro_jethros=").is_err());
        assert!(parse_import("bad artist=x.json").is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "gig-board",
            "--bind",
            "0.0.0.0:9000",
            "--import",
            "moon_unit=legacy.json",
        ])
        .unwrap();
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(cli.import.unwrap().0.as_str(), "moon_unit");
    }
}
