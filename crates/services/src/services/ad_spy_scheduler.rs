//! Starts scheduled ad spy runs for accounts whose schedule has come due.

use std::time::Duration;

use db::{
    DBService,
    models::{ad_spy_run::TriggerKind, ad_spy_schedule::AdSpySchedule},
};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ad_spy::{AdSpyService, StartAdSpyRun};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct AdSpySchedulerService {
    db: DBService,
    ad_spy: AdSpyService,
    poll_interval: Duration,
}

impl AdSpySchedulerService {
    pub fn new(db: DBService, ad_spy: AdSpyService) -> Self {
        let poll_interval = ad_spy.config().schedule_poll_interval;
        Self {
            db,
            ad_spy,
            poll_interval,
        }
    }

    /// Spawn the background scheduler
    pub async fn spawn(db: DBService, ad_spy: AdSpyService) -> tokio::task::JoinHandle<()> {
        let service = Self::new(db, ad_spy);
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting ad spy scheduler with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.trigger_due_schedules().await {
                error!("Error triggering scheduled ad spy runs: {}", e);
            }
        }
    }

    /// Start a run for every due schedule and return the ids of the runs created.
    /// A schedule is advanced even when its run is rejected, so a misconfigured
    /// account is retried on its next interval rather than on every poll.
    pub async fn trigger_due_schedules(&self) -> Result<Vec<Uuid>, SchedulerError> {
        let due = AdSpySchedule::find_due(&self.db.pool).await?;
        if due.is_empty() {
            debug!("Ad spy scheduler: no schedules due");
            return Ok(Vec::new());
        }

        let mut started = Vec::with_capacity(due.len());
        for schedule in due {
            AdSpySchedule::mark_triggered(&self.db.pool, schedule.id).await?;

            let request = StartAdSpyRun {
                window_days: Some(schedule.window_days),
                trigger_kind: Some(TriggerKind::Scheduled),
            };
            match self.ad_spy.start_run(schedule.account_id, request).await {
                Ok((run, _handle)) => {
                    info!(
                        run_id = %run.id,
                        account_id = %schedule.account_id,
                        "Ad spy scheduler: started scheduled run"
                    );
                    started.push(run.id);
                }
                Err(e) if e.is_request_validation() => {
                    warn!(
                        account_id = %schedule.account_id,
                        error = %e,
                        "Ad spy scheduler: scheduled run rejected"
                    );
                }
                Err(e) => {
                    error!(
                        account_id = %schedule.account_id,
                        error = %e,
                        "Ad spy scheduler: failed to start scheduled run"
                    );
                }
            }
        }

        Ok(started)
    }
}
