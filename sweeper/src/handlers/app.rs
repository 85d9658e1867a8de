use axum::{routing, Router};
use pagecast_common::metrics::setup_metrics_router;

pub fn app() -> Router {
    Router::new()
        .route("/", routing::get(index))
        .merge(setup_metrics_router())
}

pub async fn index() -> &'static str {
    "pagecast sweeper"
}
