//! Poll loop: fetch liked videos, skip the ones already published, publish the
//! rest, and remember each success in the dedup cache.
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::DedupCache;
use crate::delivery::DeliveryClient;
use crate::feed::FeedClient;
use crate::model::Video;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Destination chat.
    pub chat_id: i64,
    pub poll_interval: Duration,
    /// Pause before each new video, to stay under upstream rate limits.
    pub item_delay: Duration,
    /// Total tries for recording a published id. At least one try is made.
    pub cache_write_attempts: usize,
    pub cache_retry_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            chat_id: 0,
            poll_interval: Duration::from_secs(60),
            item_delay: Duration::from_secs(5),
            cache_write_attempts: 3,
            cache_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Why a single video was not published. The video stays unmarked and is
/// tried again on a later cycle.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("dedup lookup failed: {0:#}")]
    Lookup(anyhow::Error),
    #[error("metadata enrichment failed: {0:#}")]
    Enrich(anyhow::Error),
    #[error("no download link after enrichment")]
    MissingDownloadLink,
    #[error("delivery failed: {0:#}")]
    Delivery(anyhow::Error),
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped: usize,
    pub sent: usize,
    pub failed: usize,
    /// The liked list could not be fetched; nothing else was attempted.
    pub aborted: bool,
    /// Shutdown was requested mid-cycle; the remaining videos were left alone.
    pub interrupted: bool,
}

enum Outcome {
    AlreadySent,
    Published,
}

/// Requests shutdown of a [`Worker`]. Cloneable, never blocks, and may be
/// used any number of times, including after the worker has exited.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`ShutdownHandle::stop`] has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// A worker running on its own task.
#[derive(Debug)]
pub struct WorkerTask {
    shutdown: ShutdownHandle,
    join: JoinHandle<Result<()>>,
}

impl WorkerTask {
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stop(&self) {
        self.shutdown.stop();
    }

    /// Waits until the loop has stopped its timer and the delivery transport.
    pub async fn join(self) -> Result<()> {
        self.join.await.context("worker task panicked")?
    }
}

pub struct Worker {
    feed: Arc<dyn FeedClient>,
    delivery: Arc<dyn DeliveryClient>,
    cache: Arc<dyn DedupCache>,
    settings: WorkerSettings,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        delivery: Arc<dyn DeliveryClient>,
        cache: Arc<dyn DedupCache>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            feed,
            delivery,
            cache,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn spawn(self) -> WorkerTask {
        let shutdown = self.shutdown_handle();
        let join = tokio::spawn(self.run());
        WorkerTask { shutdown, join }
    }

    /// Runs poll cycles every `poll_interval` until shutdown is requested.
    ///
    /// The first cycle starts one interval after the call. A tick that comes
    /// due while a cycle is still running is dropped, not queued. Errors are
    /// returned only when the timer or the delivery transport cannot start.
    #[instrument(skip_all)]
    pub async fn run(self) -> Result<()> {
        if self.settings.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        self.delivery
            .start()
            .await
            .context("failed to start delivery transport")?;

        let mut timer = time::interval(self.settings.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the immediate first tick.
        timer.tick().await;

        info!(
            chat_id = self.settings.chat_id,
            interval_secs = self.settings.poll_interval.as_secs(),
            "worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => {
                    let report = self.poll_once().await;
                    info!(
                        fetched = report.fetched,
                        skipped = report.skipped,
                        sent = report.sent,
                        failed = report.failed,
                        aborted = report.aborted,
                        interrupted = report.interrupted,
                        "poll cycle finished"
                    );
                }
            }
        }

        drop(timer);
        self.delivery.stop().await;
        info!("worker stopped");
        Ok(())
    }

    /// One fetch, filter, publish pass over the liked list.
    pub async fn poll_once(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let videos = match self.feed.fetch_liked().await {
            Ok(videos) => videos,
            Err(err) => {
                error!(?err, "failed to fetch liked videos");
                report.aborted = true;
                return report;
            }
        };
        report.fetched = videos.len();

        for mut video in videos {
            if self.shutdown.is_cancelled() {
                info!(remaining_from = %video.id, "shutdown requested; leaving rest of cycle");
                report.interrupted = true;
                break;
            }

            match self.process(&mut video).await {
                Ok(Outcome::AlreadySent) => report.skipped += 1,
                Ok(Outcome::Published) => {
                    report.sent += 1;
                    self.remember(&video.id).await;
                }
                Err(err) => {
                    report.failed += 1;
                    error!(
                        %err,
                        id = %video.id,
                        url = %video.share_url,
                        download = video.download_url.as_deref().unwrap_or(""),
                        "failed to publish video"
                    );
                }
            }
        }

        report
    }

    async fn process(&self, video: &mut Video) -> Result<Outcome, PublishError> {
        if self
            .cache
            .exists(&video.id)
            .await
            .map_err(PublishError::Lookup)?
        {
            return Ok(Outcome::AlreadySent);
        }

        time::sleep(self.settings.item_delay).await;

        self.feed
            .enrich(video)
            .await
            .map_err(PublishError::Enrich)?;

        info!(
            id = %video.id,
            url = %video.share_url,
            download = video.download_url.as_deref().unwrap_or(""),
            images = video.images.len(),
            "processing video"
        );

        let button = video.link_button();
        let chat_id = self.settings.chat_id;
        if video.is_album() {
            self.delivery
                .send_album(chat_id, &video.album(), &button)
                .await
                .map_err(PublishError::Delivery)?;
        } else {
            let url = video
                .download_url
                .as_deref()
                .ok_or(PublishError::MissingDownloadLink)?;
            self.delivery
                .send_video(chat_id, url, &video.caption(), &button)
                .await
                .map_err(PublishError::Delivery)?;
        }

        Ok(Outcome::Published)
    }

    /// Records `id` as published, retrying a bounded number of times. When all
    /// tries fail the video may be published again on the next cycle.
    async fn remember(&self, id: &str) {
        let retries = self.settings.cache_write_attempts.saturating_sub(1);
        let strategy = FixedInterval::new(self.settings.cache_retry_delay).take(retries);
        let cache = &self.cache;
        let add = move || async move {
            let res = cache.add(id).await;
            if let Err(err) = &res {
                warn!(?err, id, "failed to record sent video");
            }
            res
        };

        match Retry::spawn(strategy, add).await {
            Ok(()) => debug!(id, "sent video"),
            Err(err) => error!(
                ?err,
                id,
                attempts = retries + 1,
                "giving up on recording sent video; it may be delivered again"
            ),
        }
    }
}
