use axum::Router;
use db::DBService;
use services::services::ad_spy::AdSpyService;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod error;
pub mod routes;

/// Shared handles for route handlers
#[derive(Clone)]
pub struct AppState {
    db: DBService,
    ad_spy: AdSpyService,
}

impl AppState {
    pub fn new(db: DBService, ad_spy: AdSpyService) -> Self {
        Self { db, ad_spy }
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn ad_spy(&self) -> &AdSpyService {
        &self.ad_spy
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", routes::router(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
