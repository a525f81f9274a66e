use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use ts_rs::TS;
use uuid::Uuid;

/// AI-generated variant of a top performer's script. At most one per performer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ScriptIteration {
    pub id: Uuid,
    pub top_performer_id: Uuid,
    pub original_script: String,
    #[ts(type = "Array<string>")]
    pub original_hooks: Json<Vec<String>>,
    pub original_cta: String,
    pub new_script: String,
    #[ts(type = "Array<string>")]
    pub new_hooks: Json<Vec<String>>,
    pub new_cta: String,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateScriptIteration {
    pub original_script: String,
    pub original_hooks: Vec<String>,
    pub original_cta: String,
    pub new_script: String,
    pub new_hooks: Vec<String>,
    pub new_cta: String,
    pub rationale: String,
}

const ITERATION_COLUMNS: &str = r#"id, top_performer_id, original_script, original_hooks,
    original_cta, new_script, new_hooks, new_cta, rationale, created_at"#;

impl ScriptIteration {
    pub async fn create(
        pool: &SqlitePool,
        id: Uuid,
        top_performer_id: Uuid,
        data: &CreateScriptIteration,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ScriptIteration>(&format!(
            r#"INSERT INTO ad_spy_script_iterations (
                   id, top_performer_id, original_script, original_hooks, original_cta,
                   new_script, new_hooks, new_cta, rationale)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING {ITERATION_COLUMNS}"#
        ))
        .bind(id)
        .bind(top_performer_id)
        .bind(&data.original_script)
        .bind(Json(&data.original_hooks))
        .bind(&data.original_cta)
        .bind(&data.new_script)
        .bind(Json(&data.new_hooks))
        .bind(&data.new_cta)
        .bind(&data.rationale)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_run_id(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ScriptIteration>(
            r#"SELECT si.id, si.top_performer_id, si.original_script, si.original_hooks,
                      si.original_cta, si.new_script, si.new_hooks, si.new_cta,
                      si.rationale, si.created_at
               FROM ad_spy_script_iterations si
               JOIN ad_spy_top_performers tp ON si.top_performer_id = tp.id
               WHERE tp.run_id = $1
               ORDER BY tp.rank ASC"#,
        )
        .bind(run_id)
        .fetch_all(pool)
        .await
    }
}
