use std::time::Duration;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;

use cleanup::Cleaner;
use config::Config;

mod cleanup;
mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

async fn cleanup_loop(cleaner: Cleaner, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        let deleted = cleaner.sweep().await;
        if deleted > 0 {
            tracing::info!(deleted, "sweep complete");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let cleaner = Cleaner::new(
        config.pdf_storage_path.clone(),
        Duration::from_secs(config.cleanup_file_age_seconds),
    );

    let cleanup_loop = cleanup_loop(cleaner, config.cleanup_interval_seconds);
    let app = handlers::app();
    let http_server = listen(app, config.bind());

    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                tracing::error!("failed to start pagecast-sweeper http server, {}", e);
            }
        }
        _ = cleanup_loop => {
            tracing::error!("pagecast-sweeper cleanup task exited");
        }
    }
}
