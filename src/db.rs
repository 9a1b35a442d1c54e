//! SQLite-backed dedup record. Survives restarts so nothing already
//! published is sent again after the process comes back up.
use crate::cache::DedupCache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let url = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("invalid database url {url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("failed to open {url}"))?;
    Ok(pool)
}

/// Expands a leading `~/` in a file-backed SQLite URL and creates the parent
/// directory of the database file. In-memory and non-sqlite URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Number of ids recorded as published.
#[instrument(skip_all)]
pub async fn count_sent(pool: &Pool) -> Result<i64> {
    let cnt: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sent_videos")
        .fetch_one(pool)
        .await?;
    Ok(cnt)
}

/// [`DedupCache`] over the `sent_videos` table.
///
/// `INSERT OR IGNORE` keeps `add` idempotent and atomic per id, so several
/// workers may share one database.
#[derive(Debug, Clone)]
pub struct SqliteCache {
    pool: Pool,
}

impl SqliteCache {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl DedupCache for SqliteCache {
    #[instrument(skip_all, fields(id = %id))]
    async fn exists(&self, id: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM sent_videos WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up sent video")?;
        Ok(found.is_some())
    }

    #[instrument(skip_all, fields(id = %id))]
    async fn add(&self, id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO sent_videos (id) VALUES (?)")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to record sent video")?;
        Ok(())
    }
}
