use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// External system an account can be connected to
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display)]
#[sqlx(type_name = "connection_provider", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionProvider {
    MetaAds,
    GoogleSheets,
}

/// A caller's connection to an ads account or a script spreadsheet
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ConnectedAccount {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: ConnectionProvider,
    pub external_id: String, // ads account id or spreadsheet id
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub access_token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateConnectedAccount {
    pub provider: ConnectionProvider,
    pub external_id: String,
    pub access_token: String,
}

const CONNECTION_COLUMNS: &str =
    "id, account_id, provider, external_id, access_token, is_active, created_at, updated_at";

impl ConnectedAccount {
    pub async fn create(
        pool: &SqlitePool,
        id: Uuid,
        account_id: Uuid,
        data: &CreateConnectedAccount,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, ConnectedAccount>(&format!(
            r#"INSERT INTO connected_accounts (id, account_id, provider, external_id, access_token)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING {CONNECTION_COLUMNS}"#
        ))
        .bind(id)
        .bind(account_id)
        .bind(data.provider)
        .bind(&data.external_id)
        .bind(&data.access_token)
        .fetch_one(pool)
        .await
    }

    /// Most recently created active connection for the provider
    pub async fn find_active(
        pool: &SqlitePool,
        account_id: Uuid,
        provider: ConnectionProvider,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, ConnectedAccount>(&format!(
            r#"SELECT {CONNECTION_COLUMNS}
               FROM connected_accounts
               WHERE account_id = $1 AND provider = $2 AND is_active = 1
               ORDER BY created_at DESC
               LIMIT 1"#
        ))
        .bind(account_id)
        .bind(provider)
        .fetch_optional(pool)
        .await
    }

    pub async fn set_active(pool: &SqlitePool, id: Uuid, is_active: bool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE connected_accounts
               SET is_active = $2,
                   updated_at = datetime('now', 'subsec')
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(is_active)
        .execute(pool)
        .await?;
        Ok(())
    }
}
