//! Cleanup service for abandoned media drafts and stale rate limit entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use super::media_pipeline::MediaPipeline;
use super::rate_limit::RateLimiter;

/// Configuration for the cleanup service.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Drafts not opened for this many hours are discarded
    pub draft_retention_hours: u64,
    /// How often to run cleanup (in seconds)
    pub interval_secs: u64,
}

impl CleanupConfig {
    pub fn draft_retention(&self) -> Duration {
        Duration::from_secs(self.draft_retention_hours.saturating_mul(3600))
    }
}

/// What one cleanup cycle removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired_sessions: usize,
    pub pruned_addresses: usize,
}

/// Start the cleanup background task.
///
/// Periodically discards form sessions whose drafts have been idle longer
/// than the retention period, deleting the temp uploads they held, and drops
/// rate limit entries with nothing left to enforce.
pub fn start_cleanup_task(
    media: Arc<MediaPipeline>,
    limiter: Arc<RateLimiter>,
    config: CleanupConfig,
) {
    tokio::spawn(async move {
        info!(
            "Starting cleanup service (draft retention: {} hours, interval: {} seconds)",
            config.draft_retention_hours, config.interval_secs
        );

        let mut ticker = interval(Duration::from_secs(config.interval_secs.max(1)));

        loop {
            ticker.tick().await;
            run_cleanup(&media, &limiter, &config).await;
        }
    });
}

/// Run a single cleanup cycle.
pub async fn run_cleanup(
    media: &MediaPipeline,
    limiter: &RateLimiter,
    config: &CleanupConfig,
) -> CleanupReport {
    let report = CleanupReport {
        expired_sessions: media.expire_idle_sessions(config.draft_retention()).await,
        pruned_addresses: limiter.prune(),
    };

    if report == CleanupReport::default() {
        debug!("Cleanup cycle found nothing to remove");
    } else {
        info!(
            "Cleanup complete: {} idle sessions expired, {} rate limit entries pruned",
            report.expired_sessions, report.pruned_addresses
        );
    }
    report
}
