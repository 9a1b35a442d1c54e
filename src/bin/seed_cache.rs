use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tiktok_fav_publisher::cache::DedupCache;
use tiktok_fav_publisher::config;
use tiktok_fav_publisher::db::{self, SqliteCache};
use tiktok_fav_publisher::feed::{FeedClient, TikTokClient};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Mark every currently liked video as already published, without sending anything"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only report how many videos would be marked
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let cache = SqliteCache::new(pool);

    let feed = TikTokClient::from_config(&cfg)?;
    let videos = feed.fetch_liked().await?;

    let mut marked = 0usize;
    for video in &videos {
        if cache.exists(&video.id).await? {
            continue;
        }
        if !args.dry_run {
            cache.add(&video.id).await?;
        }
        marked += 1;
    }

    let total = db::count_sent(cache.pool()).await?;
    info!(
        fetched = videos.len(),
        marked,
        dry_run = args.dry_run,
        total_sent = total,
        "seeding finished"
    );
    Ok(())
}
