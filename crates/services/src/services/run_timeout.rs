//! Background sweep that fails runs left in `pending` or `analyzing` for too long.

use std::time::Duration;

use db::{DBService, models::ad_spy_run::AdSpyRun};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::config::AdSpyConfig;

#[derive(Debug, Error)]
pub enum RunTimeoutError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Background service for detecting abandoned ad spy runs
pub struct RunTimeoutService {
    db: DBService,
    poll_interval: Duration,
    stale_run_minutes: i64,
}

impl RunTimeoutService {
    pub fn new(db: DBService, config: &AdSpyConfig) -> Self {
        Self {
            db,
            poll_interval: config.sweep_interval,
            stale_run_minutes: config.stale_run_minutes,
        }
    }

    /// Spawn the background run timeout service
    pub async fn spawn(db: DBService, config: &AdSpyConfig) -> tokio::task::JoinHandle<()> {
        let service = Self::new(db, config);
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting run timeout service with interval {:?}, stale after {} min",
            self.poll_interval, self.stale_run_minutes
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.sweep_stale_runs().await {
                error!("Error sweeping stale runs: {}", e);
            }
        }
    }

    /// Fail every run that has not reached a terminal state within the timeout.
    /// Returns how many runs were moved to `failed`.
    pub async fn sweep_stale_runs(&self) -> Result<usize, RunTimeoutError> {
        let stale = AdSpyRun::find_stale(&self.db.pool, self.stale_run_minutes).await?;
        if stale.is_empty() {
            debug!("Run timeout: no stale runs");
            return Ok(0);
        }

        let message = format!(
            "run abandoned: no progress for {} minutes",
            self.stale_run_minutes
        );
        let mut swept = 0;
        for run in stale {
            // A run that finished between the query and this update is left alone
            if AdSpyRun::mark_failed(&self.db.pool, run.id, &message).await? {
                info!(
                    run_id = %run.id,
                    account_id = %run.account_id,
                    status = %run.status,
                    started_at = %run.started_at,
                    "Run timeout: marked stale run as failed"
                );
                swept += 1;
            }
        }

        Ok(swept)
    }
}
