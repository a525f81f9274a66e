use db::{
    DBService,
    models::{
        ad_spy_run::{AdSpyRun, AdSpyRunDetails, CreateAdSpyRun, RunStatus, TriggerKind},
        ad_spy_schedule::{AdSpySchedule, UpsertAdSpySchedule},
        connected_account::{ConnectedAccount, ConnectionProvider, CreateConnectedAccount},
        script_iteration::{CreateScriptIteration, ScriptIteration},
        top_performer::{CreateTopPerformer, MetricsSnapshot, TopPerformer},
    },
};
use uuid::Uuid;

async fn create_run(db: &DBService, account_id: Uuid) -> AdSpyRun {
    AdSpyRun::create(
        &db.pool,
        Uuid::new_v4(),
        account_id,
        &CreateAdSpyRun {
            trigger_kind: TriggerKind::Manual,
            window_days: 7,
        },
    )
    .await
    .unwrap()
}

fn performer(rank: i32, creative_id: &str) -> CreateTopPerformer {
    CreateTopPerformer {
        creative_id: creative_id.to_string(),
        creative_name: format!("Creative {creative_id}"),
        ads_account_id: "act_1".to_string(),
        thumbnail_ref: None,
        video_ref: None,
        metrics: MetricsSnapshot {
            impressions: 100,
            clicks: 10,
            click_rate: 10.0,
            conversions: 4.0,
            spend: 2.0,
            efficiency: 2.0,
            reach: 80,
        },
        rank,
    }
}

#[tokio::test]
async fn test_run_starts_pending_without_error() {
    let db = DBService::new_in_memory().await.unwrap();
    let run = create_run(&db, Uuid::new_v4()).await;

    assert_eq!(run.status, RunStatus::Pending);
    assert!(run.error_message.is_none());
    assert!(run.completed_at.is_none());
    assert_eq!(run.window_days, 7);
}

#[tokio::test]
async fn test_status_updates_are_monotonic() {
    let db = DBService::new_in_memory().await.unwrap();
    let run = create_run(&db, Uuid::new_v4()).await;

    // Cannot complete straight from pending
    assert!(!AdSpyRun::mark_completed(&db.pool, run.id).await.unwrap());
    assert!(AdSpyRun::mark_analyzing(&db.pool, run.id).await.unwrap());
    assert!(!AdSpyRun::mark_analyzing(&db.pool, run.id).await.unwrap());
    assert!(AdSpyRun::mark_completed(&db.pool, run.id).await.unwrap());

    // Terminal states stay put
    assert!(!AdSpyRun::mark_failed(&db.pool, run.id, "late failure").await.unwrap());

    let run = AdSpyRun::find_by_id(&db.pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.error_message.is_none());
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_failed_run_carries_error_message() {
    let db = DBService::new_in_memory().await.unwrap();
    let run = create_run(&db, Uuid::new_v4()).await;
    AdSpyRun::mark_analyzing(&db.pool, run.id).await.unwrap();
    assert!(AdSpyRun::mark_failed(&db.pool, run.id, "boom").await.unwrap());

    let run = AdSpyRun::find_by_id(&db.pool, run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("boom"));
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn test_find_stale_only_returns_old_active_runs() {
    let db = DBService::new_in_memory().await.unwrap();
    let account_id = Uuid::new_v4();
    let stale = create_run(&db, account_id).await;
    let fresh = create_run(&db, account_id).await;
    let finished = create_run(&db, account_id).await;

    AdSpyRun::mark_analyzing(&db.pool, stale.id).await.unwrap();
    AdSpyRun::mark_analyzing(&db.pool, finished.id).await.unwrap();
    AdSpyRun::mark_completed(&db.pool, finished.id).await.unwrap();

    sqlx::query(
        "UPDATE ad_spy_runs SET started_at = datetime('now', '-2 hours') WHERE id IN ($1, $2)",
    )
    .bind(stale.id)
    .bind(finished.id)
    .execute(&db.pool)
    .await
    .unwrap();

    let found = AdSpyRun::find_stale(&db.pool, 30).await.unwrap();
    let ids: Vec<Uuid> = found.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![stale.id]);
    assert!(!ids.contains(&fresh.id));
}

#[tokio::test]
async fn test_rank_is_unique_per_run() {
    let db = DBService::new_in_memory().await.unwrap();
    let run = create_run(&db, Uuid::new_v4()).await;

    TopPerformer::create(&db.pool, Uuid::new_v4(), run.id, &performer(1, "A"))
        .await
        .unwrap();
    let duplicate =
        TopPerformer::create(&db.pool, Uuid::new_v4(), run.id, &performer(1, "B")).await;
    assert!(duplicate.is_err());

    // Same rank in a different run is fine
    let other = create_run(&db, Uuid::new_v4()).await;
    TopPerformer::create(&db.pool, Uuid::new_v4(), other.id, &performer(1, "B"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_details_join_performers_and_iterations() {
    let db = DBService::new_in_memory().await.unwrap();
    let run = create_run(&db, Uuid::new_v4()).await;

    let first = TopPerformer::create(&db.pool, Uuid::new_v4(), run.id, &performer(1, "A"))
        .await
        .unwrap();
    let second = TopPerformer::create(&db.pool, Uuid::new_v4(), run.id, &performer(2, "B"))
        .await
        .unwrap();

    let iteration = CreateScriptIteration {
        original_script: "old".to_string(),
        original_hooks: vec!["h1".to_string()],
        original_cta: "Buy".to_string(),
        new_script: "new".to_string(),
        new_hooks: vec!["n1".to_string(), "n2".to_string(), "n3".to_string()],
        new_cta: "Shop now".to_string(),
        rationale: "sharper hook".to_string(),
    };
    ScriptIteration::create(&db.pool, Uuid::new_v4(), second.id, &iteration)
        .await
        .unwrap();

    // One iteration per performer
    assert!(
        ScriptIteration::create(&db.pool, Uuid::new_v4(), second.id, &iteration)
            .await
            .is_err()
    );

    let details = AdSpyRunDetails::load(&db.pool, run.id).await.unwrap().unwrap();
    assert_eq!(details.top_performers.len(), 2);
    assert_eq!(details.top_performers[0].performer.id, first.id);
    assert!(details.top_performers[0].iteration.is_none());
    let stored = details.top_performers[1].iteration.as_ref().unwrap();
    assert_eq!(stored.new_hooks.0.len(), 3);
    assert_eq!(stored.original_hooks.0, vec!["h1".to_string()]);
    assert_eq!(details.top_performers[1].performer.metrics.efficiency, 2.0);
}

#[tokio::test]
async fn test_find_active_connection_ignores_inactive() {
    let db = DBService::new_in_memory().await.unwrap();
    let account_id = Uuid::new_v4();
    let connection = ConnectedAccount::create(
        &db.pool,
        Uuid::new_v4(),
        account_id,
        &CreateConnectedAccount {
            provider: ConnectionProvider::MetaAds,
            external_id: "act_123".to_string(),
            access_token: "token".to_string(),
        },
    )
    .await
    .unwrap();

    let found = ConnectedAccount::find_active(&db.pool, account_id, ConnectionProvider::MetaAds)
        .await
        .unwrap();
    assert_eq!(found.map(|c| c.external_id), Some("act_123".to_string()));

    let sheets =
        ConnectedAccount::find_active(&db.pool, account_id, ConnectionProvider::GoogleSheets)
            .await
            .unwrap();
    assert!(sheets.is_none());

    ConnectedAccount::set_active(&db.pool, connection.id, false)
        .await
        .unwrap();
    let found = ConnectedAccount::find_active(&db.pool, account_id, ConnectionProvider::MetaAds)
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_schedule_due_until_triggered() {
    let db = DBService::new_in_memory().await.unwrap();
    let account_id = Uuid::new_v4();
    let schedule = AdSpySchedule::upsert(
        &db.pool,
        account_id,
        &UpsertAdSpySchedule {
            enabled: true,
            window_days: 14,
            interval_hours: 24,
        },
    )
    .await
    .unwrap();

    let due = AdSpySchedule::find_due(&db.pool).await.unwrap();
    assert_eq!(due.len(), 1);

    AdSpySchedule::mark_triggered(&db.pool, schedule.id).await.unwrap();
    assert!(AdSpySchedule::find_due(&db.pool).await.unwrap().is_empty());

    sqlx::query(
        "UPDATE ad_spy_schedules SET last_triggered_at = datetime('now', '-25 hours') WHERE id = $1",
    )
    .bind(schedule.id)
    .execute(&db.pool)
    .await
    .unwrap();
    assert_eq!(AdSpySchedule::find_due(&db.pool).await.unwrap().len(), 1);

    AdSpySchedule::set_enabled(&db.pool, account_id, false).await.unwrap();
    assert!(AdSpySchedule::find_due(&db.pool).await.unwrap().is_empty());
}
