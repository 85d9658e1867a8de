use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;

use pagecast_api::config::Config;
use pagecast_api::handlers::{self, AppState};
use pagecast_common::queue::{JobConfig, Queue};
use pagecast_common::render::RenderMode;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let queue = Arc::new(
        Queue::new(&config.database_url())
            .await
            .expect("failed to initialize queue"),
    );

    let default_render_mode =
        RenderMode::from_str(&config.default_render_mode).unwrap_or(RenderMode::PrintToPdf);

    let state = AppState {
        queue,
        defaults: JobConfig {
            render_mode: default_render_mode,
            navigation_timeout_s: config.navigation_timeout_seconds,
            job_timeout_s: config.job_timeout_seconds,
            max_domain_wait_s: config.max_domain_wait_seconds,
            max_retries: config.max_retries,
        },
        pdf_storage_path: config.pdf_storage_path.clone().into(),
        worker_id: config.worker_id.clone(),
    };

    let app = handlers::add_routes(Router::new(), state, config.max_body_size);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start pagecast-api http server, {}", e),
    }
}
