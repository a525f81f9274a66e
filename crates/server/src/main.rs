use std::sync::Arc;

use anyhow::Context;
use db::DBService;
use server::{AppState, app};
use services::services::{
    ad_spy::AdSpyService, ad_spy_scheduler::AdSpySchedulerService, ads_platform::MetaAdsClient,
    claude_api::ClaudeApiClient, config::AdSpyConfig,
    iteration_generator::ClaudeIterationGenerator, run_timeout::RunTimeoutService,
    script_source::GoogleSheetsClient,
};
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AdSpyConfig::from_env();
    let database_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "ad_spy.db".to_string());
    let db = DBService::new(&database_path)
        .await
        .with_context(|| format!("opening database at {database_path}"))?;

    let ads = MetaAdsClient::new(std::env::var("META_GRAPH_API_VERSION").ok())?;
    let scripts = GoogleSheetsClient::new(config.script_sheet_range.clone())?;
    let claude = ClaudeApiClient::from_env().context("configuring the iteration generator")?;
    let generator = ClaudeIterationGenerator::new(claude);

    let ad_spy = AdSpyService::new(
        db.pool.clone(),
        Arc::new(ads),
        Arc::new(scripts),
        Arc::new(generator),
        config.clone(),
    );

    RunTimeoutService::spawn(db.clone(), &config).await;
    AdSpySchedulerService::spawn(db.clone(), ad_spy.clone()).await;

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = match std::env::var("PORT") {
        Ok(port) => port.parse().context("PORT must be a number")?,
        Err(_) => 3000,
    };
    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app(AppState::new(db, ad_spy)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
    info!("Shutting down");
}
