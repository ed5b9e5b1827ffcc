use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::time;

use crate::backoff::calculate_backoff;
use crate::errors::Result;
use crate::job::Job;
use crate::processor::Processor;
use crate::queue::Shared;
use crate::store::FinishedKind;
use crate::utils::{now_millis, try_now_millis};

/// What happened to a claimed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Processor succeeded
    Completed,
    /// Attempt failed and the job was put back in the store
    Retried { delay_ms: u64 },
    /// Attempt budget exhausted
    Failed,
    /// No processor registered for the job type
    Dropped,
    /// Another loop in this process is already running the job
    Skipped,
}

/// One worker loop. Claims ready jobs from the store until its run flag is cleared.
pub struct Worker {
    id: usize,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn new(id: usize, shared: Arc<Shared>, running: Arc<AtomicBool>) -> Self {
        Worker {
            id,
            shared,
            running,
        }
    }

    /// Run until stopped. In-flight jobs are always finished before the flag is checked again.
    pub async fn run(self) {
        info!(
            "Worker {} started on queue '{}'",
            self.id, self.shared.config.queue_name
        );

        while self.running.load(Ordering::SeqCst) {
            match self.claim_next().await {
                Ok(Some(job)) => {
                    self.handle(job).await;
                }
                Ok(None) => {
                    time::sleep(self.shared.config.poll_interval()).await;
                }
                Err(e) => {
                    error!("Worker {} failed to claim next job: {}", self.id, e);
                    time::sleep(self.shared.config.error_backoff()).await;
                }
            }
        }

        info!("Worker {} stopped", self.id);
    }

    /// Take the earliest ready job out of the store
    async fn claim_next(&self) -> Result<Option<Job>> {
        let now = try_now_millis()?;
        match self.shared.store.claim(now).await? {
            Some(raw) => match Job::decode(&raw) {
                Ok(job) => Ok(Some(job)),
                Err(e) => {
                    error!("Discarding undecodable job record {}: {}", raw, e);
                    Err(e)
                }
            },
            None => Ok(None),
        }
    }

    /// Execute a claimed job under the processing-set guard
    pub(crate) async fn handle(&self, job: Job) -> ExecutionOutcome {
        let job_id = job.id.clone();
        {
            let mut active = self.shared.active_jobs.write().await;
            if active.contains_key(&job_id) {
                warn!(
                    "Worker {} skipping job {}: already being processed",
                    self.id, job_id
                );
                return ExecutionOutcome::Skipped;
            }
            active.insert(job_id.clone(), job.clone());
        }

        // the processing-set entry must go even if execution unwinds
        let outcome = match AssertUnwindSafe(self.execute(job)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    "Worker {} panicked while handling job {}: {}",
                    self.id,
                    job_id,
                    panic_message(panic.as_ref())
                );
                ExecutionOutcome::Failed
            }
        };

        self.shared.active_jobs.write().await.remove(&job_id);
        outcome
    }

    async fn execute(&self, mut job: Job) -> ExecutionOutcome {
        let processor = match self.shared.registry.read().await.get(&job.job_type) {
            Some(processor) => processor,
            None => {
                error!(
                    "No processor registered for job type '{}', dropping job {}",
                    job.job_type, job.id
                );
                return ExecutionOutcome::Dropped;
            }
        };

        job.mark_as_processing();
        if let Some(entry) = self.shared.active_jobs.write().await.get_mut(&job.id) {
            *entry = job.clone();
        }

        debug!(
            "Worker {} processing job {} ({}), attempt {}/{}",
            self.id, job.id, job.job_type, job.attempts, job.max_attempts
        );

        match run_processor(processor.as_ref(), &job).await {
            Ok(result) => self.complete(processor.as_ref(), job, result).await,
            Err(message) => self.fail(processor.as_ref(), job, message).await,
        }
    }

    async fn complete(
        &self,
        processor: &dyn Processor,
        mut job: Job,
        result: Value,
    ) -> ExecutionOutcome {
        job.mark_as_completed(result);
        self.shared.counters.record_completed();
        debug!("Job {} completed after {} attempt(s)", job.id, job.attempts);

        self.record_history(FinishedKind::Completed, &job).await;

        if let Some(result) = job.result.as_ref() {
            run_hook("on_success", &job.id, processor.on_success(&job, result)).await;
        }
        ExecutionOutcome::Completed
    }

    async fn fail(
        &self,
        processor: &dyn Processor,
        mut job: Job,
        message: String,
    ) -> ExecutionOutcome {
        if job.can_retry() {
            let delay_ms = calculate_backoff(&self.shared.config.backoff(), job.attempts);
            let ready_at = now_millis().saturating_add(delay_ms);
            job.mark_for_retry(&message, ready_at);

            match self.reschedule(&job, ready_at).await {
                Ok(()) => {
                    warn!(
                        "Job {} ({}) failed attempt {}/{}: {}; retrying in {}ms",
                        job.id, job.job_type, job.attempts, job.max_attempts, message, delay_ms
                    );
                    run_hook("on_retry", &job.id, processor.on_retry(&job, &message)).await;
                    return ExecutionOutcome::Retried { delay_ms };
                }
                Err(e) => {
                    error!("Failed to reschedule job {}: {}", job.id, e);
                    let message = format!("{} (reschedule failed: {})", message, e);
                    return self.fail_permanently(processor, job, message).await;
                }
            }
        }

        self.fail_permanently(processor, job, message).await
    }

    async fn fail_permanently(
        &self,
        processor: &dyn Processor,
        mut job: Job,
        message: String,
    ) -> ExecutionOutcome {
        job.mark_as_failed(&message);
        self.shared.counters.record_failed();
        error!(
            "Job {} ({}) failed permanently after {} attempt(s): {}",
            job.id, job.job_type, job.attempts, message
        );

        self.record_history(FinishedKind::Failed, &job).await;

        run_hook("on_failure", &job.id, processor.on_failure(&job, &message)).await;
        ExecutionOutcome::Failed
    }

    async fn reschedule(&self, job: &Job, ready_at: u64) -> Result<()> {
        let raw = job.encode()?;
        self.shared.store.push(&raw, ready_at).await
    }

    async fn record_history(&self, kind: FinishedKind, job: &Job) {
        let keep = match kind {
            FinishedKind::Completed => self.shared.config.keep_completed,
            FinishedKind::Failed => self.shared.config.keep_failed,
        };
        let result = match job.encode() {
            Ok(raw) => self.shared.store.record_finished(kind, &raw, keep).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failed to record job {} in {:?} history: {}", job.id, kind, e);
        }
    }
}

/// Run the processor, turning errors and panics into a failure message
async fn run_processor(
    processor: &dyn Processor,
    job: &Job,
) -> std::result::Result<Value, String> {
    match AssertUnwindSafe(processor.process(job)).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{:#}", err)),
        Err(panic) => Err(format!(
            "processor panicked: {}",
            panic_message(panic.as_ref())
        )),
    }
}

/// Run a processor hook. A panicking hook is logged and does not affect the job.
async fn run_hook<F>(hook: &str, job_id: &str, fut: F)
where
    F: Future<Output = ()>,
{
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        error!(
            "{} hook panicked for job {}: {}",
            hook,
            job_id,
            panic_message(panic.as_ref())
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
