use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// Performance numbers captured for a creative at ranking time
#[derive(Debug, Clone, Default, PartialEq, FromRow, Serialize, Deserialize, TS)]
pub struct MetricsSnapshot {
    pub impressions: i64,
    pub clicks: i64,
    pub click_rate: f64,
    pub conversions: f64,
    pub spend: f64,
    pub efficiency: f64, // conversions / spend, 0 when spend is 0
    pub reach: i64,
}

/// One of the K best creatives selected for a run. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct TopPerformer {
    pub id: Uuid,
    pub run_id: Uuid,
    pub creative_id: String,
    pub creative_name: String,
    pub ads_account_id: String,
    pub thumbnail_ref: Option<String>,
    pub video_ref: Option<String>,
    #[sqlx(flatten)]
    pub metrics: MetricsSnapshot,
    pub rank: i32, // 1-based, unique within a run
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateTopPerformer {
    pub creative_id: String,
    pub creative_name: String,
    pub ads_account_id: String,
    pub thumbnail_ref: Option<String>,
    pub video_ref: Option<String>,
    pub metrics: MetricsSnapshot,
    pub rank: i32,
}

const PERFORMER_COLUMNS: &str = r#"id, run_id, creative_id, creative_name, ads_account_id,
    thumbnail_ref, video_ref, impressions, clicks, click_rate, conversions, spend,
    efficiency, reach, rank, created_at"#;

impl TopPerformer {
    pub async fn create(
        pool: &SqlitePool,
        id: Uuid,
        run_id: Uuid,
        data: &CreateTopPerformer,
    ) -> Result<Self, sqlx::Error> {
        let m = &data.metrics;
        sqlx::query_as::<_, TopPerformer>(&format!(
            r#"INSERT INTO ad_spy_top_performers (
                   id, run_id, creative_id, creative_name, ads_account_id,
                   thumbnail_ref, video_ref, impressions, clicks, click_rate,
                   conversions, spend, efficiency, reach, rank)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
               RETURNING {PERFORMER_COLUMNS}"#
        ))
        .bind(id)
        .bind(run_id)
        .bind(&data.creative_id)
        .bind(&data.creative_name)
        .bind(&data.ads_account_id)
        .bind(&data.thumbnail_ref)
        .bind(&data.video_ref)
        .bind(m.impressions)
        .bind(m.clicks)
        .bind(m.click_rate)
        .bind(m.conversions)
        .bind(m.spend)
        .bind(m.efficiency)
        .bind(m.reach)
        .bind(data.rank)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_run_id(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TopPerformer>(&format!(
            r#"SELECT {PERFORMER_COLUMNS}
               FROM ad_spy_top_performers
               WHERE run_id = $1
               ORDER BY rank ASC"#
        ))
        .bind(run_id)
        .fetch_all(pool)
        .await
    }

    pub async fn count_by_run_id(pool: &SqlitePool, run_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ad_spy_top_performers WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_one(pool)
        .await
    }
}
