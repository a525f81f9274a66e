use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Recurring ad spy settings for an account
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AdSpySchedule {
    pub id: Uuid,
    pub account_id: Uuid,
    pub enabled: bool,
    pub window_days: i32,
    pub interval_hours: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpsertAdSpySchedule {
    pub enabled: bool,
    pub window_days: i32,
    pub interval_hours: i32,
}

const SCHEDULE_COLUMNS: &str = r#"id, account_id, enabled, window_days, interval_hours,
    last_triggered_at, created_at, updated_at"#;

impl AdSpySchedule {
    pub async fn find_by_account_id(
        pool: &SqlitePool,
        account_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AdSpySchedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM ad_spy_schedules WHERE account_id = $1"
        ))
        .bind(account_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn upsert(
        pool: &SqlitePool,
        account_id: Uuid,
        data: &UpsertAdSpySchedule,
    ) -> Result<Self, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query_as::<_, AdSpySchedule>(&format!(
            r#"INSERT INTO ad_spy_schedules (id, account_id, enabled, window_days, interval_hours)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT(account_id) DO UPDATE SET
                   enabled = excluded.enabled,
                   window_days = excluded.window_days,
                   interval_hours = excluded.interval_hours,
                   updated_at = datetime('now', 'subsec')
               RETURNING {SCHEDULE_COLUMNS}"#
        ))
        .bind(id)
        .bind(account_id)
        .bind(data.enabled)
        .bind(data.window_days)
        .bind(data.interval_hours)
        .fetch_one(pool)
        .await
    }

    pub async fn set_enabled(
        pool: &SqlitePool,
        account_id: Uuid,
        enabled: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, AdSpySchedule>(&format!(
            r#"UPDATE ad_spy_schedules
               SET enabled = $2,
                   updated_at = datetime('now', 'subsec')
               WHERE account_id = $1
               RETURNING {SCHEDULE_COLUMNS}"#
        ))
        .bind(account_id)
        .bind(enabled)
        .fetch_optional(pool)
        .await
    }

    /// Enabled schedules never triggered, or last triggered at least `interval_hours` ago
    pub async fn find_due(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AdSpySchedule>(&format!(
            r#"SELECT {SCHEDULE_COLUMNS}
               FROM ad_spy_schedules
               WHERE enabled = 1
                 AND (last_triggered_at IS NULL
                      OR datetime(last_triggered_at)
                         <= datetime('now', '-' || interval_hours || ' hours'))
               ORDER BY last_triggered_at ASC"#
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn mark_triggered(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE ad_spy_schedules
               SET last_triggered_at = datetime('now', 'subsec')
               WHERE id = $1"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
