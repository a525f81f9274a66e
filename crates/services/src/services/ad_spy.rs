//! Ad spy run orchestration: fetch metrics, rank creatives, enrich the winners,
//! look up their scripts and generate new iterations.
//!
//! A run is created in `pending` by [`AdSpyService::start_run`] and processed on a
//! background task. Only a metrics fetch failure or an empty ranking fails the run;
//! problems with a single creative are logged and skipped.

use std::sync::Arc;

use chrono::Utc;
use db::models::{
    ad_spy_run::{AdSpyRun, AdSpyRunDetails, CreateAdSpyRun, RunStatus, TriggerKind},
    connected_account::{ConnectedAccount, ConnectionProvider},
    script_iteration::{CreateScriptIteration, ScriptIteration},
    top_performer::{CreateTopPerformer, TopPerformer},
};
use futures::{StreamExt, TryStreamExt, stream};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    ads_platform::{AdsPlatform, AdsPlatformError, CreativeMedia, DateWindow},
    config::AdSpyConfig,
    iteration_generator::IterationGenerator,
    ranking::{RankedCreative, rank_creatives},
    script_source::{ScriptLookup, ScriptSource},
};

#[derive(Debug, Error)]
pub enum AdSpyError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no active ads platform connection for this account")]
    MissingAdsConnection,
    #[error("no active spreadsheet connection for this account")]
    MissingSheetsConnection,
    #[error("window must be between 1 and {max} days, got {requested}")]
    InvalidWindow { requested: i32, max: i32 },
    #[error("metrics fetch failed: {0}")]
    MetricsFetch(#[from] AdsPlatformError),
    #[error("no qualifying ads in window (last {window_days} days)")]
    NoQualifyingAds { window_days: i32 },
    #[error("run {0} is no longer active")]
    RunNotActive(Uuid),
}

impl AdSpyError {
    /// Errors raised before any run record exists
    pub fn is_request_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingAdsConnection | Self::MissingSheetsConnection | Self::InvalidWindow { .. }
        )
    }
}

/// Body of a run request
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct StartAdSpyRun {
    pub window_days: Option<i32>,
    pub trigger_kind: Option<TriggerKind>,
}

/// Connections resolved before a run is accepted
pub struct RunContext {
    pub ads_account_id: String,
    pub ads_token: SecretString,
    pub spreadsheet_id: String,
    pub sheets_token: SecretString,
}

/// What a completed run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub top_performers: usize,
    pub iterations: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
struct ItemOutcome {
    performer_written: bool,
    iteration_written: bool,
    warnings: Vec<String>,
}

/// Runs the ad spy pipeline against the configured external services
#[derive(Clone)]
pub struct AdSpyService {
    pool: SqlitePool,
    ads: Arc<dyn AdsPlatform>,
    scripts: Arc<dyn ScriptSource>,
    generator: Arc<dyn IterationGenerator>,
    config: AdSpyConfig,
}

impl AdSpyService {
    pub fn new(
        pool: SqlitePool,
        ads: Arc<dyn AdsPlatform>,
        scripts: Arc<dyn ScriptSource>,
        generator: Arc<dyn IterationGenerator>,
        config: AdSpyConfig,
    ) -> Self {
        Self {
            pool,
            ads,
            scripts,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &AdSpyConfig {
        &self.config
    }

    /// Validate prerequisites, create the run in `pending` and process it in the
    /// background. The handle is only needed by callers that want to wait.
    pub async fn start_run(
        &self,
        account_id: Uuid,
        request: StartAdSpyRun,
    ) -> Result<(AdSpyRun, JoinHandle<()>), AdSpyError> {
        let (run, context) = self.create_run(account_id, request).await?;

        info!(
            run_id = %run.id,
            account_id = %account_id,
            trigger = %run.trigger_kind,
            window_days = run.window_days,
            "Created ad spy run, starting analysis"
        );

        let service = self.clone();
        let task_run = run.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = service.execute_run(&task_run, context).await {
                error!(run_id = %task_run.id, error = %e, "Ad spy run failed");
            }
        });

        Ok((run, handle))
    }

    /// Request validation plus the `pending` insert. Nothing is written when
    /// validation fails.
    pub async fn create_run(
        &self,
        account_id: Uuid,
        request: StartAdSpyRun,
    ) -> Result<(AdSpyRun, RunContext), AdSpyError> {
        let window_days = request
            .window_days
            .unwrap_or(self.config.default_window_days);
        if !(1..=self.config.max_window_days).contains(&window_days) {
            return Err(AdSpyError::InvalidWindow {
                requested: window_days,
                max: self.config.max_window_days,
            });
        }

        let context = self.resolve_context(account_id).await?;

        let run = AdSpyRun::create(
            &self.pool,
            Uuid::new_v4(),
            account_id,
            &CreateAdSpyRun {
                trigger_kind: request.trigger_kind.unwrap_or_default(),
                window_days,
            },
        )
        .await?;

        Ok((run, context))
    }

    async fn resolve_context(&self, account_id: Uuid) -> Result<RunContext, AdSpyError> {
        let ads =
            ConnectedAccount::find_active(&self.pool, account_id, ConnectionProvider::MetaAds)
                .await?
                .ok_or(AdSpyError::MissingAdsConnection)?;
        let sheets =
            ConnectedAccount::find_active(&self.pool, account_id, ConnectionProvider::GoogleSheets)
                .await?
                .ok_or(AdSpyError::MissingSheetsConnection)?;

        Ok(RunContext {
            ads_account_id: ads.external_id,
            ads_token: SecretString::from(ads.access_token),
            spreadsheet_id: sheets.external_id,
            sheets_token: SecretString::from(sheets.access_token),
        })
    }

    /// Drive a pending run to `completed` or `failed`
    pub async fn execute_run(
        &self,
        run: &AdSpyRun,
        context: RunContext,
    ) -> Result<RunSummary, AdSpyError> {
        if !AdSpyRun::mark_analyzing(&self.pool, run.id).await? {
            warn!(run_id = %run.id, "Run was not pending when processing started, skipping");
            return Err(AdSpyError::RunNotActive(run.id));
        }

        match self.run_analysis(run, &context).await {
            Ok(summary) => {
                if !AdSpyRun::mark_completed(&self.pool, run.id).await? {
                    warn!(run_id = %run.id, "Run left analyzing before completion was recorded");
                    return Err(AdSpyError::RunNotActive(run.id));
                }
                info!(
                    run_id = %run.id,
                    top_performers = summary.top_performers,
                    iterations = summary.iterations,
                    warnings = summary.warnings.len(),
                    "Ad spy run completed"
                );
                Ok(summary)
            }
            Err(e) => {
                AdSpyRun::mark_failed(&self.pool, run.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn run_analysis(
        &self,
        run: &AdSpyRun,
        context: &RunContext,
    ) -> Result<RunSummary, AdSpyError> {
        let window = DateWindow::last_days(Utc::now().date_naive(), run.window_days.unsigned_abs());

        let metrics = self
            .ads
            .fetch_insights(&context.ads_account_id, &context.ads_token, &window)
            .await?;

        let ranked = rank_creatives(&metrics, self.config.top_k);
        info!(
            run_id = %run.id,
            creatives = metrics.len(),
            selected = ranked.len(),
            "Ranked creatives"
        );
        if ranked.is_empty() {
            return Err(AdSpyError::NoQualifyingAds {
                window_days: run.window_days,
            });
        }

        // Ranks are fixed before fan-out, so concurrency cannot reorder them.
        // The first item error stops the remaining items.
        let outcomes: Vec<ItemOutcome> = stream::iter(ranked)
            .map(|item| self.process_item(run, context, item))
            .buffer_unordered(self.config.item_concurrency.max(1))
            .try_collect()
            .await?;

        let mut summary = RunSummary::default();
        for outcome in outcomes {
            summary.top_performers += usize::from(outcome.performer_written);
            summary.iterations += usize::from(outcome.iteration_written);
            summary.warnings.extend(outcome.warnings);
        }
        Ok(summary)
    }

    /// Whether the run is still ours to write to. The stale sweep may have failed it.
    async fn still_analyzing(&self, run_id: Uuid) -> Result<bool, AdSpyError> {
        let run = AdSpyRun::find_by_id(&self.pool, run_id).await?;
        Ok(run.is_some_and(|r| r.status == RunStatus::Analyzing))
    }

    /// Persist one top performer and try to attach an iteration. Only a failed
    /// performer write is an error; a missing iteration is a warning.
    async fn process_item(
        &self,
        run: &AdSpyRun,
        context: &RunContext,
        item: RankedCreative,
    ) -> Result<ItemOutcome, AdSpyError> {
        let mut outcome = ItemOutcome::default();
        let creative_id = item.metric.creative_id.as_str();
        let creative_name = item.metric.creative_name.as_str();

        if !self.still_analyzing(run.id).await? {
            warn!(run_id = %run.id, creative_id, "Run is no longer analyzing, skipping creative");
            outcome
                .warnings
                .push(format!("creative {creative_id}: skipped, run no longer analyzing"));
            return Ok(outcome);
        }

        let media = match self
            .ads
            .fetch_creative_media(creative_id, &context.ads_token)
            .await
        {
            Ok(media) => media,
            Err(e) => {
                warn!(run_id = %run.id, creative_id, error = %e, "Creative media lookup failed");
                outcome
                    .warnings
                    .push(format!("creative {creative_id}: media lookup failed: {e}"));
                CreativeMedia::default()
            }
        };

        let performer = match TopPerformer::create(
            &self.pool,
            Uuid::new_v4(),
            run.id,
            &CreateTopPerformer {
                creative_id: creative_id.to_string(),
                creative_name: creative_name.to_string(),
                ads_account_id: context.ads_account_id.clone(),
                thumbnail_ref: media.thumbnail_ref,
                video_ref: media.video_ref,
                metrics: item.snapshot(),
                rank: item.rank,
            },
        )
        .await
        {
            Ok(performer) => performer,
            Err(e) => {
                error!(run_id = %run.id, creative_id, error = %e, "Failed to save top performer");
                return Err(e.into());
            }
        };
        outcome.performer_written = true;

        let original = match self
            .scripts
            .lookup_by_creative_name(&context.spreadsheet_id, &context.sheets_token, creative_name)
            .await
        {
            ScriptLookup::Found(record) => record,
            ScriptLookup::NotFound => {
                warn!(
                    run_id = %run.id,
                    creative_id,
                    creative_name,
                    "No script found for creative, skipping iteration"
                );
                outcome
                    .warnings
                    .push(format!("creative {creative_id}: no script found for \"{creative_name}\""));
                return Ok(outcome);
            }
        };

        let Some(generated) = self
            .generator
            .generate_iteration(&original, &performer.metrics)
            .await
        else {
            outcome
                .warnings
                .push(format!("creative {creative_id}: iteration generation failed"));
            return Ok(outcome);
        };

        let data = CreateScriptIteration {
            original_script: original.script,
            original_hooks: original.hooks,
            original_cta: original.cta,
            new_script: generated.script,
            new_hooks: generated.hooks,
            new_cta: generated.cta,
            rationale: generated.rationale,
        };
        if !self.still_analyzing(run.id).await? {
            warn!(
                run_id = %run.id,
                creative_id,
                "Run left analyzing during generation, dropping iteration"
            );
            outcome
                .warnings
                .push(format!("creative {creative_id}: iteration dropped, run no longer analyzing"));
            return Ok(outcome);
        }
        match ScriptIteration::create(&self.pool, Uuid::new_v4(), performer.id, &data).await {
            Ok(_) => outcome.iteration_written = true,
            Err(e) => {
                error!(run_id = %run.id, creative_id, error = %e, "Failed to save script iteration");
                outcome
                    .warnings
                    .push(format!("creative {creative_id}: could not save iteration: {e}"));
            }
        }

        Ok(outcome)
    }

    pub async fn get_details(
        pool: &SqlitePool,
        run_id: Uuid,
    ) -> Result<Option<AdSpyRunDetails>, AdSpyError> {
        Ok(AdSpyRunDetails::load(pool, run_id).await?)
    }

    pub async fn list_runs(
        pool: &SqlitePool,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AdSpyRun>, AdSpyError> {
        Ok(AdSpyRun::find_by_account_id(pool, account_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation_errors() {
        assert!(AdSpyError::MissingAdsConnection.is_request_validation());
        assert!(AdSpyError::MissingSheetsConnection.is_request_validation());
        assert!(
            AdSpyError::InvalidWindow {
                requested: 0,
                max: 365
            }
            .is_request_validation()
        );
        assert!(!AdSpyError::NoQualifyingAds { window_days: 7 }.is_request_validation());
    }

    #[test]
    fn test_no_qualifying_ads_message() {
        let message = AdSpyError::NoQualifyingAds { window_days: 7 }.to_string();
        assert!(message.contains("no qualifying ads"));
    }

    #[test]
    fn test_metrics_fetch_error_keeps_status_and_body() {
        let err = AdSpyError::from(AdsPlatformError::Http {
            status: 400,
            body: "{\"error\":\"bad token\"}".to_string(),
        });
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("bad token"));
    }
}
