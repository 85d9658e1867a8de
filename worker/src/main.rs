//! Claims queued render jobs and drives them to completion.
use std::sync::atomic::Ordering;
use std::sync::Arc;

use envconfig::Envconfig;

use pagecast_common::health::HealthRegistry;
use pagecast_common::queue::Queue;
use pagecast_worker::config::Config;
use pagecast_worker::error::WorkerError;
use pagecast_worker::renderer::ChromiumRenderer;
use pagecast_worker::worker::PdfWorker;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    std::fs::create_dir_all(&config.pdf_storage_path)?;

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("worker".to_string(), time::Duration::seconds(30))
        .await;

    let queue = Arc::new(Queue::new(&config.database_url()).await?);
    let renderer = Arc::new(ChromiumRenderer::new("chromium"));

    let worker = PdfWorker::new(
        config.worker_id.as_str().to_owned(),
        queue,
        renderer,
        config.pdf_storage_path.clone().into(),
        config.poll_interval.0,
        worker_liveness,
    );

    worker.reconcile_on_startup().await?;

    let stop = worker.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            stop.store(true, Ordering::Relaxed);
        }
    });

    let worker = Arc::new(worker);
    let heartbeat_worker = worker.clone();
    let heartbeat_task = tokio::spawn(async move { heartbeat_worker.run_heartbeat_loop().await });

    worker.run_claim_loop().await;
    worker.shutdown().await;
    heartbeat_task.abort();

    Ok(())
}
