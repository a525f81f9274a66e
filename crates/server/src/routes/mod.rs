use axum::{Router, routing::get};

use crate::AppState;

pub mod ad_spy;

pub fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(ad_spy::router(state))
}

async fn health() -> &'static str {
    "ok"
}
