use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tracing::{error, info};

use tiktok_fav_publisher::config;
use tiktok_fav_publisher::db::{self, SqliteCache};
use tiktok_fav_publisher::delivery::TelegramDelivery;
use tiktok_fav_publisher::feed::TikTokClient;
use tiktok_fav_publisher::worker::Worker;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let feed = TikTokClient::from_config(&cfg)?;
    let delivery = TelegramDelivery::new(Bot::new(cfg.telegram.bot_token.clone()));
    let cache = SqliteCache::new(pool);

    let worker = Worker::new(
        Arc::new(feed),
        Arc::new(delivery),
        Arc::new(cache),
        cfg.worker_settings(),
    );

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl-C, shutting down");
                shutdown.stop();
            }
            Err(err) => error!(?err, "failed to listen for Ctrl-C"),
        }
    });

    info!(sec_uid = %cfg.tiktok.sec_uid, "starting liked-videos publisher");
    worker.run().await
}
