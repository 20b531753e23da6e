use crate::config::Config;
use crate::db::connection::DbPool;
use crate::polls::{create_poll, get_poll, get_results, vote_on_poll};
use axum::{
    Json, Router,
    extract::Extension,
    handler::HandlerWithoutStateExt,
    http::{
        Method, StatusCode,
        header::{ACCEPT, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Self {
        AppState {
            db,
            config: Arc::new(config),
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    let public_dir = Path::new(&app_state.config.public_dir).to_path_buf();
    let static_files =
        ServeDir::new(&public_dir).not_found_service(handler_404.into_service());

    Router::new()
        .route("/api/polls", post(create_poll))
        .route("/api/polls/:id", get(get_poll))
        .route("/api/polls/:id/vote", post(vote_on_poll))
        .route("/api/polls/:id/results", get(get_results))
        .route_service("/", ServeFile::new(public_dir.join("index.html")))
        .route_service("/poll/:id", ServeFile::new(public_dir.join("poll.html")))
        .route_service("/results/:id", ServeFile::new(public_dir.join("results.html")))
        .fallback_service(static_files)
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, ACCEPT]),
        )
        .layer(TraceLayer::new_for_http())
}

async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "Not found",
        })),
    )
}
