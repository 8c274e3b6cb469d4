//! Job executor: consumes analyze jobs from the queue and drives the runner.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vab_media::detect::DetectorRegistry;
use vab_queue::{AnalyzeJob, JobQueue, JobTable};
use vab_store::VideoStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::gpu_pool::GpuPool;
use crate::scheduler::JobRunner;
use crate::vl::VlClient;

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    job_semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
    runner: Arc<JobRunner>,
}

impl JobExecutor {
    /// Create a new job executor with the standard detector registry.
    pub fn new(config: WorkerConfig, queue: JobQueue, table: JobTable) -> WorkerResult<Self> {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        let analysis_cfg = vab_models::AnalysisConfig::from_env();
        let runner = JobRunner::new(
            VideoStore::from_env(),
            Arc::new(table),
            DetectorRegistry::standard(),
            VlClient::from_env(),
            GpuPool::new(analysis_cfg.runtime.gpu_semaphore),
            config.clone(),
        );

        Ok(Self {
            config,
            queue: Arc::new(queue),
            job_semaphore,
            shutdown,
            consumer_name,
            runner: Arc::new(runner),
        })
    }

    /// Start the executor.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically claim jobs orphaned by crashed workers.
        let queue_clone = Arc::clone(&self.queue);
        let runner_clone = Arc::clone(&self.runner);
        let semaphore_clone = Arc::clone(&self.job_semaphore);
        let consumer_name = self.consumer_name.clone();
        let claim_interval = self.config.claim_interval;
        let claim_min_idle = self.config.claim_min_idle.as_millis() as u64;
        let shutdown_tx = self.shutdown.clone();
        let mut shutdown_rx_claim = self.shutdown.subscribe();

        let claim_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx_claim.changed() => {
                        if *shutdown_rx_claim.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        match queue_clone.claim_pending(&consumer_name, claim_min_idle, 5).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("Claimed {} pending jobs", jobs.len());
                                for (message_id, job) in jobs {
                                    let Ok(permit) =
                                        Arc::clone(&semaphore_clone).acquire_owned().await
                                    else {
                                        break;
                                    };
                                    let runner = Arc::clone(&runner_clone);
                                    let queue = Arc::clone(&queue_clone);
                                    let shutdown = shutdown_tx.subscribe();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        Self::execute_job(runner, queue, message_id, job, shutdown)
                                            .await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("Failed to claim pending jobs: {}", e);
                            }
                        }
                    }
                }
            }
        });

        // Main job consumption loop.
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let _ = tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Job executor stopped");
        Ok(())
    }

    /// Consume and dispatch jobs from the queue.
    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            // All slots busy, wait a bit
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let runner = Arc::clone(&self.runner);
            let queue = Arc::clone(&self.queue);
            let shutdown = self.shutdown.subscribe();
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::job_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(runner, queue, message_id, job, shutdown).await;
            });
        }

        Ok(())
    }

    /// Execute a single job with retry and DLQ handling.
    async fn execute_job(
        runner: Arc<JobRunner>,
        queue: Arc<JobQueue>,
        message_id: String,
        job: AnalyzeJob,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let job_id = job.job_id.clone();
        info!("Executing job {}", job_id);

        match runner.run(&job, shutdown).await {
            Ok(()) => {
                info!("Job {} completed", job_id);
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job_id, e);
                }
                // Clear dedup so a later re-analyze of a failed run is possible.
                if let Err(e) = queue.clear_dedup(&job).await {
                    warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                }
            }
            Err(WorkerError::Aborted) => {
                // Leave the message pending: it will be reclaimed after the
                // idle timeout when a worker comes back.
                warn!("Job {} aborted by shutdown, leaving for reclaim", job_id);
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);

                let retry_count = queue.increment_retry(&message_id).await.unwrap_or(999);
                let max_retries = queue.max_retries();

                if retry_count >= max_retries {
                    warn!(
                        "Job {} exceeded max retries ({}), moving to DLQ",
                        job_id, max_retries
                    );
                    if let Err(dlq_err) = queue.dlq(&message_id, &job, &e.to_string()).await {
                        error!("Failed to move job {} to DLQ: {}", job_id, dlq_err);
                    }
                    if let Err(e) = queue.clear_dedup(&job).await {
                        warn!("Failed to clear dedup key for job {}: {}", job_id, e);
                    }
                } else {
                    info!(
                        "Job {} will be retried (attempt {}/{})",
                        job_id, retry_count, max_retries
                    );
                    // Redelivered after the visibility timeout.
                }
            }
        }
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            if self.job_semaphore.available_permits() == self.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
