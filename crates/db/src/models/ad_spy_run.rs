use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::{
    script_iteration::ScriptIteration,
    top_performer::TopPerformer,
};

/// Lifecycle of an ad spy run: pending -> analyzing -> completed | failed.
/// Transitions are enforced by the guarded `mark_*` updates below.
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "run_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Analyzing,
    Completed,
    Failed,
}

/// What started a run
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "trigger_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TriggerKind {
    #[default]
    Manual,
    Scheduled,
}

/// One execution of the ad performance analysis pipeline
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AdSpyRun {
    pub id: Uuid,
    pub account_id: Uuid,
    pub trigger_kind: TriggerKind,
    pub window_days: i32,
    pub status: RunStatus,
    pub error_message: Option<String>, // Set iff status is failed
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateAdSpyRun {
    pub trigger_kind: TriggerKind,
    pub window_days: i32,
}

/// A top performer together with its iteration, if one was generated
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct TopPerformerWithIteration {
    #[serde(flatten)]
    #[ts(flatten)]
    pub performer: TopPerformer,
    pub iteration: Option<ScriptIteration>,
}

/// Everything the dashboard shows for a single run
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct AdSpyRunDetails {
    pub run: AdSpyRun,
    pub top_performers: Vec<TopPerformerWithIteration>,
}

const RUN_COLUMNS: &str = r#"id, account_id, trigger_kind, window_days, status, error_message,
    started_at, completed_at"#;

impl AdSpyRun {
    pub async fn create(
        pool: &SqlitePool,
        id: Uuid,
        account_id: Uuid,
        data: &CreateAdSpyRun,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, AdSpyRun>(&format!(
            r#"INSERT INTO ad_spy_runs (id, account_id, trigger_kind, window_days, status)
               VALUES ($1, $2, $3, $4, 'pending')
               RETURNING {RUN_COLUMNS}"#
        ))
        .bind(id)
        .bind(account_id)
        .bind(data.trigger_kind)
        .bind(data.window_days)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AdSpyRun>(&format!(
            "SELECT {RUN_COLUMNS} FROM ad_spy_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_account_id(
        pool: &SqlitePool,
        account_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AdSpyRun>(&format!(
            r#"SELECT {RUN_COLUMNS}
               FROM ad_spy_runs
               WHERE account_id = $1
               ORDER BY started_at DESC
               LIMIT $2"#
        ))
        .bind(account_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// pending -> analyzing. Returns false if the run was not pending.
    pub async fn mark_analyzing(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE ad_spy_runs
               SET status = 'analyzing'
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// analyzing -> completed. Returns false if the run was not analyzing.
    pub async fn mark_completed(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE ad_spy_runs
               SET status = 'completed',
                   error_message = NULL,
                   completed_at = datetime('now', 'subsec')
               WHERE id = $1 AND status = 'analyzing'"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// pending | analyzing -> failed. Returns false if the run was already terminal.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: Uuid,
        error_message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE ad_spy_runs
               SET status = 'failed',
                   error_message = $2,
                   completed_at = datetime('now', 'subsec')
               WHERE id = $1 AND status IN ('pending', 'analyzing')"#,
        )
        .bind(id)
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Runs still pending/analyzing whose start is older than the timeout
    pub async fn find_stale(
        pool: &SqlitePool,
        timeout_minutes: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let timeout_str = format!("-{} minutes", timeout_minutes);
        sqlx::query_as::<_, AdSpyRun>(&format!(
            r#"SELECT {RUN_COLUMNS}
               FROM ad_spy_runs
               WHERE status IN ('pending', 'analyzing')
                 AND datetime(started_at) < datetime('now', $1)
               ORDER BY started_at ASC"#
        ))
        .bind(timeout_str)
        .fetch_all(pool)
        .await
    }
}

impl AdSpyRunDetails {
    pub async fn load(pool: &SqlitePool, run_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let Some(run) = AdSpyRun::find_by_id(pool, run_id).await? else {
            return Ok(None);
        };

        let performers = TopPerformer::find_by_run_id(pool, run_id).await?;
        let mut iterations = ScriptIteration::find_by_run_id(pool, run_id).await?;

        let top_performers = performers
            .into_iter()
            .map(|performer| {
                let iteration = iterations
                    .iter()
                    .position(|it| it.top_performer_id == performer.id)
                    .map(|idx| iterations.swap_remove(idx));
                TopPerformerWithIteration {
                    performer,
                    iteration,
                }
            })
            .collect();

        Ok(Some(Self {
            run,
            top_performers,
        }))
    }
}
