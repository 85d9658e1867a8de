use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pagecast_common::health::HealthHandle;
use pagecast_common::queue::{JobOutcome, Queue};
use pagecast_common::render::{RenderError, RenderMode, Renderer};
use pagecast_common::retry::{self, ErrorCode};
use pagecast_common::ssrf;

use crate::error::WorkerError;

/// Drives the claim loop, heartbeat loop, and graceful shutdown for a
/// single logical worker.
///
/// Rendering is deliberately sequential: the browser process is owned
/// by this worker and serialized, one rendering context at a time.
pub struct PdfWorker {
    worker_id: String,
    queue: Arc<Queue>,
    renderer: Arc<dyn Renderer>,
    pdf_storage_path: PathBuf,
    poll_interval: Duration,
    liveness: HealthHandle,
    stop: Arc<AtomicBool>,
    current_job: Arc<Mutex<Option<String>>>,
}

impl PdfWorker {
    pub fn new(
        worker_id: String,
        queue: Arc<Queue>,
        renderer: Arc<dyn Renderer>,
        pdf_storage_path: PathBuf,
        poll_interval: Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            worker_id,
            queue,
            renderer,
            pdf_storage_path,
            poll_interval,
            liveness,
            stop: Arc::new(AtomicBool::new(false)),
            current_job: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a clone of the cooperative stop flag so a signal
    /// handler task can request shutdown.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Startup reconciliation: any job left `RUNNING` under this
    /// worker identity survived a prior crash.
    pub async fn reconcile_on_startup(&self) -> Result<(), WorkerError> {
        let reconciled = self.queue.reconcile_crashed(&self.worker_id).await?;
        for job_id in reconciled {
            tracing::warn!(job_id, worker_id = %self.worker_id, "reconciled job left RUNNING by a prior crash");
        }
        Ok(())
    }

    /// Run the heartbeat loop: writes `WorkerHeartbeat` every 10s
    /// until the stop flag is set, reporting the job currently in
    /// flight (if any) rather than unconditionally marking the worker
    /// idle.
    pub async fn run_heartbeat_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            let current_job_id = self.current_job.lock().unwrap().clone();
            let status = if current_job_id.is_some() {
                "working"
            } else {
                "idle"
            };
            if let Err(error) = self
                .queue
                .heartbeat(&self.worker_id, status, current_job_id.as_deref())
                .await
            {
                tracing::warn!(%error, "failed to write worker heartbeat");
            }
        }
    }

    /// Run the claim loop until the stop flag is set.
    pub async fn run_claim_loop(&self) {
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            self.liveness.report_healthy().await;

            if self.stop.load(Ordering::Relaxed) {
                tracing::info!("stop requested, exiting claim loop");
                return;
            }

            match self.queue.claim_next(&self.worker_id).await {
                Ok(Some(job)) => self.process_claimed_job(job).await,
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(%error, "claim_next failed, will retry next poll");
                }
            }
        }
    }

    async fn process_claimed_job(&self, job: pagecast_common::queue::Job) {
        *self.current_job.lock().unwrap() = Some(job.job_id.clone());

        let _ = self
            .queue
            .heartbeat(&self.worker_id, "working", Some(&job.job_id))
            .await;

        let output_path = self.pdf_storage_path.join(format!("{}.pdf", job.job_id));

        let render_outcome = self.render_with_deadline(&job, &output_path).await;

        match render_outcome {
            Ok(()) => {
                if let Err(error) = self
                    .queue
                    .complete(&job.job_id, JobOutcome::Success)
                    .await
                {
                    tracing::warn!(job_id = %job.job_id, %error, "failed to mark job succeeded");
                }
                metrics::counter!("pdf_jobs_succeeded_total").increment(1);
                tracing::info!(job_id = %job.job_id, "job succeeded");
            }
            Err((code, message)) => {
                self.finish_with_error(&job, code, message).await;
            }
        }

        *self.current_job.lock().unwrap() = None;
    }

    /// Runs pre-render redirect validation, then renders under the
    /// job's outer `job_timeout_s` deadline.
    async fn render_with_deadline(
        &self,
        job: &pagecast_common::queue::Job,
        output_path: &std::path::Path,
    ) -> Result<(), (ErrorCode, String)> {
        let final_url = ssrf::validate_redirects(&job.normalized_url, 10)
            .await
            .map_err(|error| (ErrorCode::SsrfBlocked, error.to_string()))?;

        let navigation_timeout = Duration::from_secs(job.config.navigation_timeout_s as u64);
        let job_timeout = Duration::from_secs(job.config.job_timeout_s as u64);

        let render_future = self.renderer.render(
            &final_url,
            job.config.render_mode,
            navigation_timeout,
            output_path,
        );

        match tokio::time::timeout(job_timeout, render_future).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(render_error)) => Err(map_render_error(render_error)),
            Err(_elapsed) => Err((
                ErrorCode::JobTimeout,
                format!("render exceeded job_timeout of {job_timeout:?}"),
            )),
        }
    }

    async fn finish_with_error(
        &self,
        job: &pagecast_common::queue::Job,
        code: ErrorCode,
        message: String,
    ) {
        match retry::classify(code, job.attempts, job.config.max_retries) {
            retry::Outcome::Requeue => {
                metrics::counter!("pdf_jobs_requeued_total").increment(1);
                tracing::info!(job_id = %job.job_id, %code, "render failed, requeueing");
                if let Err(error) = self.queue.requeue(&job.job_id).await {
                    tracing::warn!(job_id = %job.job_id, %error, "failed to requeue job");
                }
            }
            retry::Outcome::Complete => {
                metrics::counter!("pdf_jobs_failed_total").increment(1);
                tracing::info!(job_id = %job.job_id, %code, "render failed terminally");
                if let Err(error) = self
                    .queue
                    .complete(
                        &job.job_id,
                        JobOutcome::Failure {
                            code: code.to_string(),
                            message,
                        },
                    )
                    .await
                {
                    tracing::warn!(job_id = %job.job_id, %error, "failed to mark job failed");
                }
            }
        }
    }

    /// Release browser resources held by the render collaborator.
    pub async fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.renderer.close().await;
    }
}

fn map_render_error(error: RenderError) -> (ErrorCode, String) {
    match error {
        RenderError::SsrfBlocked(msg) => (ErrorCode::SsrfBlocked, msg),
        RenderError::Http4xx(msg) => (ErrorCode::Http4xx, msg),
        RenderError::CaptchaDetected => (
            ErrorCode::CaptchaDetected,
            "anti-bot challenge detected".to_owned(),
        ),
        RenderError::Other(msg) => (ErrorCode::RenderFailed, msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pagecast_common::health::HealthRegistry;
    use pagecast_common::queue::JobConfig;
    use std::sync::Mutex;

    struct FakeRenderer {
        result: Mutex<Option<Result<(), RenderError>>>,
    }

    impl FakeRenderer {
        fn always_succeeds() -> Self {
            Self {
                result: Mutex::new(Some(Ok(()))),
            }
        }

        fn always_fails(error: RenderError) -> Self {
            Self {
                result: Mutex::new(Some(Err(error))),
            }
        }
    }

    #[async_trait]
    impl Renderer for FakeRenderer {
        async fn render(
            &self,
            _url: &str,
            _mode: RenderMode,
            _navigation_timeout: Duration,
            output_path: &std::path::Path,
        ) -> Result<(), RenderError> {
            let outcome = self.result.lock().unwrap().take().unwrap();
            if outcome.is_ok() {
                std::fs::write(output_path, b"%PDF-1.4 fake").unwrap();
            }
            outcome
        }

        async fn close(&self) {}
    }

    async fn test_worker(
        renderer: Arc<dyn Renderer>,
    ) -> (PdfWorker, Arc<Queue>, tempfile::TempDir) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../common/migrations").run(&pool).await.unwrap();
        let queue = Arc::new(Queue::new_from_pool(pool));

        let registry = HealthRegistry::new("liveness");
        let liveness = registry
            .register("worker".to_string(), time::Duration::seconds(60))
            .await;

        let tmp = tempfile::tempdir().unwrap();

        let worker = PdfWorker::new(
            "worker-1".to_owned(),
            queue.clone(),
            renderer,
            tmp.path().to_path_buf(),
            Duration::from_millis(10),
            liveness,
        );

        (worker, queue, tmp)
    }

    fn default_config() -> JobConfig {
        JobConfig {
            render_mode: RenderMode::PrintToPdf,
            navigation_timeout_s: 5,
            job_timeout_s: 5,
            max_domain_wait_s: 60,
            max_retries: 2,
        }
    }

    #[tokio::test]
    async fn successful_render_completes_the_job() {
        let (worker, queue, _tmp) = test_worker(Arc::new(FakeRenderer::always_succeeds())).await;
        let (job, _) = queue
            .submit("https://example.com/a", default_config(), None)
            .await
            .unwrap();

        let claimed = queue.claim_next("worker-1").await.unwrap().unwrap();
        worker.process_claimed_job(claimed).await;

        let after = queue.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(after.status, pagecast_common::queue::JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn retryable_failure_requeues_the_job() {
        let (worker, queue, _tmp) = test_worker(Arc::new(FakeRenderer::always_fails(
            RenderError::Other("boom".to_owned()),
        )))
        .await;
        let (job, _) = queue
            .submit("https://example.com/a", default_config(), None)
            .await
            .unwrap();

        let claimed = queue.claim_next("worker-1").await.unwrap().unwrap();
        worker.process_claimed_job(claimed).await;

        let after = queue.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(after.status, pagecast_common::queue::JobStatus::Queued);
    }

    #[tokio::test]
    async fn terminal_failure_completes_the_job_as_failed() {
        let (worker, queue, _tmp) = test_worker(Arc::new(FakeRenderer::always_fails(
            RenderError::CaptchaDetected,
        )))
        .await;
        let (job, _) = queue
            .submit("https://example.com/a", default_config(), None)
            .await
            .unwrap();

        let claimed = queue.claim_next("worker-1").await.unwrap().unwrap();
        worker.process_claimed_job(claimed).await;

        let after = queue.get(&job.job_id).await.unwrap().unwrap();
        assert_eq!(after.status, pagecast_common::queue::JobStatus::Failed);
        assert_eq!(after.error_code.as_deref(), Some("CAPTCHA_DETECTED"));
    }
}
