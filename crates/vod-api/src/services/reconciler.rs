//! Background service for reconciling queue and catalog.
//!
//! This service runs periodically to:
//! - Detect media items stuck in processing with no live job
//! - Re-enqueue them so a worker picks them up again
//! - Purge terminal job records past their retention window

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use vod_models::DEFAULT_PRIORITY;
use vod_queue::QueueError;

use crate::metrics;
use crate::state::AppState;

/// Outcome of a single reconciliation pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Media items found stuck in processing
    pub stuck: u32,
    /// Stuck items successfully re-enqueued
    pub requeued: u32,
    /// Terminal job records purged
    pub purged: u64,
}

/// Reconciliation scanner service.
pub struct ReconciliationScanner {
    state: AppState,
    scan_interval: Duration,
    stuck_threshold: Duration,
    terminal_retention: Duration,
    enabled: bool,
}

impl ReconciliationScanner {
    pub fn new(state: AppState) -> Self {
        let enabled = std::env::var("ENABLE_RECONCILER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true); // Enabled by default

        Self {
            scan_interval: state.config.reconcile_interval,
            stuck_threshold: state.config.stuck_threshold,
            terminal_retention: state.config.terminal_retention,
            state,
            enabled,
        }
    }

    /// Start the background reconciliation loop.
    ///
    /// This function runs indefinitely and should be spawned as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Reconciliation scanner is disabled");
            return;
        }

        info!(
            interval_secs = self.scan_interval.as_secs(),
            stuck_threshold_secs = self.stuck_threshold.as_secs(),
            "Starting reconciliation scanner"
        );

        let mut ticker = interval(self.scan_interval);

        loop {
            ticker.tick().await;

            match self.check_once().await {
                Ok(report) => {
                    if report.stuck > 0 || report.purged > 0 {
                        info!(
                            stuck = report.stuck,
                            requeued = report.requeued,
                            purged = report.purged,
                            "Reconciliation pass complete"
                        );
                    }
                }
                Err(e) => error!("Reconciliation pass failed: {}", e),
            }
        }
    }

    /// Run a single reconciliation pass.
    pub async fn check_once(&self) -> anyhow::Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let stuck = self
            .state
            .catalog
            .list_stuck(self.stuck_threshold.as_secs() as i64)
            .await?;

        for record in stuck {
            report.stuck += 1;

            // A live job may still be heartbeating below the catalog's
            // threshold; leave those to the lease reclaimer.
            match self.state.broker.find_active_by_media(&record.media_id).await {
                Ok(Some(job)) => {
                    info!(
                        media_id = %record.media_id,
                        job_id = %job.job_id,
                        "stuck media still has an active job, skipping"
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(media_id = %record.media_id, "active job lookup failed: {}", e);
                    continue;
                }
            }

            warn!(
                media_id = %record.media_id,
                updated_at = %record.updated_at,
                "detected stuck media with no active job, re-enqueueing"
            );

            match self
                .state
                .gateway
                .submit(
                    record.media_id.clone(),
                    record.source_key.clone(),
                    DEFAULT_PRIORITY,
                )
                .await
            {
                Ok(handle) => {
                    report.requeued += 1;
                    metrics::record_reconcile_requeued();
                    info!(
                        media_id = %record.media_id,
                        job_id = %handle.job_id,
                        "stuck media re-enqueued"
                    );
                }
                // Another submitter (or a concurrent pass) won the race.
                Err(QueueError::DuplicateJob(_)) => {}
                Err(e) => {
                    error!(media_id = %record.media_id, "re-enqueue failed: {}", e);
                }
            }
        }

        report.purged = self
            .state
            .broker
            .purge_terminal(self.terminal_retention)
            .await?;
        if report.purged > 0 {
            metrics::record_reconcile_purged(report.purged);
        }

        Ok(report)
    }
}
