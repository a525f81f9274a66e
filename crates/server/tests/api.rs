use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use db::{
    DBService,
    models::{
        ad_spy_run::AdSpyRun,
        connected_account::{ConnectedAccount, ConnectionProvider, CreateConnectedAccount},
        top_performer::MetricsSnapshot,
    },
};
use secrecy::SecretString;
use serde_json::{Value, json};
use server::{AppState, app};
use services::services::{
    ad_spy::AdSpyService,
    ads_platform::{AdsPlatform, AdsPlatformError, CreativeMedia, CreativeMetric, DateWindow},
    config::AdSpyConfig,
    iteration_generator::{GeneratedIteration, IterationGenerator},
    script_source::{ScriptLookup, ScriptRecord, ScriptSource},
};
use tower::ServiceExt;
use uuid::Uuid;

struct EmptyAds;

#[async_trait]
impl AdsPlatform for EmptyAds {
    async fn fetch_insights(
        &self,
        _ads_account_id: &str,
        _credential: &SecretString,
        _window: &DateWindow,
    ) -> Result<Vec<CreativeMetric>, AdsPlatformError> {
        Ok(Vec::new())
    }

    async fn fetch_creative_media(
        &self,
        _creative_id: &str,
        _credential: &SecretString,
    ) -> Result<CreativeMedia, AdsPlatformError> {
        Ok(CreativeMedia::default())
    }
}

struct NoScripts;

#[async_trait]
impl ScriptSource for NoScripts {
    async fn lookup_by_creative_name(
        &self,
        _spreadsheet_id: &str,
        _credential: &SecretString,
        _creative_name: &str,
    ) -> ScriptLookup {
        ScriptLookup::NotFound
    }
}

struct NoGenerator;

#[async_trait]
impl IterationGenerator for NoGenerator {
    async fn generate_iteration(
        &self,
        _original: &ScriptRecord,
        _metrics: &MetricsSnapshot,
    ) -> Option<GeneratedIteration> {
        None
    }
}

async fn test_app() -> (Router, DBService) {
    let db = DBService::new_in_memory().await.unwrap();
    let ad_spy = AdSpyService::new(
        db.pool.clone(),
        Arc::new(EmptyAds),
        Arc::new(NoScripts),
        Arc::new(NoGenerator),
        AdSpyConfig::default(),
    );
    (app(AppState::new(db.clone(), ad_spy)), db)
}

async fn connect(db: &DBService, account_id: Uuid) {
    for provider in [ConnectionProvider::MetaAds, ConnectionProvider::GoogleSheets] {
        ConnectedAccount::create(
            &db.pool,
            Uuid::new_v4(),
            account_id,
            &CreateConnectedAccount {
                provider,
                external_id: "ext".to_string(),
                access_token: "token".to_string(),
            },
        )
        .await
        .unwrap();
    }
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn start_run_without_connections_is_rejected() {
    let (app, db) = test_app().await;
    let account_id = Uuid::new_v4();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/accounts/{account_id}/ad-spy/runs"),
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("ads platform"));
    assert!(
        AdSpyRun::find_by_account_id(&db.pool, account_id, 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn start_run_returns_pending_run_id() {
    let (app, db) = test_app().await;
    let account_id = Uuid::new_v4();
    connect(&db, account_id).await;

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/accounts/{account_id}/ad-spy/runs"),
        Some(json!({ "window_days": 14 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    let run_id = body["data"]["run_id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/api/ad-spy/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["run"]["id"], run_id.as_str());
    assert_eq!(body["data"]["run"]["window_days"], 14);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/accounts/{account_id}/ad-spy/runs"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let (app, _db) = test_app().await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/ad-spy/runs/{}", Uuid::new_v4()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn schedule_can_be_saved_and_disabled() {
    let (app, _db) = test_app().await;
    let account_id = Uuid::new_v4();
    let uri = format!("/api/accounts/{account_id}/ad-spy/schedule");

    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    let (status, _) = send(
        &app,
        Method::PUT,
        &uri,
        Some(json!({ "enabled": true, "window_days": 0, "interval_hours": 24 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::PUT,
        &uri,
        Some(json!({ "enabled": true, "window_days": 7, "interval_hours": 24 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], true);

    let (status, body) = send(&app, Method::POST, &format!("{uri}/disable"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(body["data"]["interval_hours"], 24);
}

#[tokio::test]
async fn disabling_missing_schedule_is_not_found() {
    let (app, _db) = test_app().await;

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/accounts/{}/ad-spy/schedule/disable", Uuid::new_v4()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
