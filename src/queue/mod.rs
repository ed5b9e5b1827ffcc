use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::errors::{JobRsError, Result};
use crate::job::{Job, JobOptions};
use crate::processor::{Processor, ProcessorRegistry};
use crate::store::{FinishedKind, JobStore};
use crate::worker::Worker;

/// Limit used when a full scan of the pending set is needed
const SCAN_ALL: usize = i64::MAX as usize;

/// Best-effort counters, reset with the process
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub(crate) fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// State shared between the dispatcher and its worker loops
pub(crate) struct Shared {
    pub(crate) config: QueueConfig,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) registry: RwLock<ProcessorRegistry>,
    /// Jobs currently being executed in this process, by id
    pub(crate) active_jobs: RwLock<HashMap<String, Job>>,
    pub(crate) counters: QueueCounters,
}

impl Shared {
    pub(crate) fn new(
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        registry: ProcessorRegistry,
    ) -> Self {
        Shared {
            config,
            store,
            registry: RwLock::new(registry),
            active_jobs: RwLock::new(HashMap::new()),
            counters: QueueCounters::default(),
        }
    }
}

/// Snapshot of queue counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries waiting in the store, including delayed ones
    pub pending: usize,
    /// Jobs being executed by this process
    pub processing: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Builder that registers processors before the queue exists
pub struct JobQueueBuilder {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    registry: ProcessorRegistry,
}

impl JobQueueBuilder {
    /// Register a processor for a job type
    pub fn processor(mut self, job_type: &str, processor: Arc<dyn Processor>) -> Self {
        self.registry.register(job_type, processor);
        self
    }

    pub fn build(self) -> Result<JobQueue> {
        self.config.validate()?;
        Ok(JobQueue {
            shared: Arc::new(Shared::new(self.config, self.store, self.registry)),
            run_flag: StdMutex::new(Arc::new(AtomicBool::new(false))),
            workers: Mutex::new(Vec::new()),
        })
    }
}

/// The job dispatcher: accepts jobs, owns the processor registry and the worker pool
pub struct JobQueue {
    shared: Arc<Shared>,
    /// Flag of the current worker generation; replaced on every start
    run_flag: StdMutex<Arc<AtomicBool>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create a queue with no processors registered
    pub fn new(config: QueueConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        Self::builder(config, store).build()
    }

    pub fn builder(config: QueueConfig, store: Arc<dyn JobStore>) -> JobQueueBuilder {
        JobQueueBuilder {
            config,
            store,
            registry: ProcessorRegistry::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    fn current_flag(&self) -> Arc<AtomicBool> {
        self.run_flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether worker loops have been started and not stopped
    pub fn is_running(&self) -> bool {
        self.current_flag().load(Ordering::SeqCst)
    }

    /// Register a processor for a job type. Last registration wins.
    /// Registration is closed once processing has started.
    pub async fn register_processor(
        &self,
        job_type: &str,
        processor: Arc<dyn Processor>,
    ) -> Result<()> {
        if self.is_running() {
            return Err(JobRsError::QueueRunning);
        }
        self.shared.registry.write().await.register(job_type, processor);
        Ok(())
    }

    /// Add a job to the store. Returns its id as soon as the store accepted it.
    pub async fn add_job(
        &self,
        job_type: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<String> {
        if job_type.is_empty() {
            return Err(JobRsError::InvalidArgument(
                "job type must not be empty".to_string(),
            ));
        }
        if options.max_attempts == Some(0) {
            return Err(JobRsError::InvalidArgument(
                "max attempts must be at least 1".to_string(),
            ));
        }

        let job = Job::new(
            Uuid::new_v4().to_string(),
            job_type.to_string(),
            payload,
            options,
            self.shared.config.max_attempts,
        );

        let raw = job.encode()?;
        self.shared.store.push(&raw, job.ready_at()).await?;

        debug!(
            "Added job {} ({}) ready at {}",
            job.id,
            job.job_type,
            job.ready_at()
        );
        Ok(job.id)
    }

    /// Spawn `concurrency` worker loops. A second call while running only logs a warning.
    pub async fn start_processing(&self) {
        let flag = {
            let mut current = self
                .run_flag
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if current.load(Ordering::SeqCst) {
                warn!(
                    "Queue '{}' is already processing",
                    self.shared.config.queue_name
                );
                return;
            }
            let flag = Arc::new(AtomicBool::new(true));
            *current = flag.clone();
            flag
        };

        let job_types = self.shared.registry.read().await.job_types();
        if job_types.is_empty() {
            warn!(
                "Queue '{}' has no processors registered; claimed jobs will be dropped",
                self.shared.config.queue_name
            );
        }

        let mut workers = self.workers.lock().await;
        workers.retain(|handle| !handle.is_finished());

        for id in 0..self.shared.config.concurrency {
            let worker = Worker::new(id, self.shared.clone(), flag.clone());
            workers.push(tokio::spawn(worker.run()));
        }

        info!(
            "Started {} workers on queue '{}' for job types {:?}",
            self.shared.config.concurrency, self.shared.config.queue_name, job_types
        );
    }

    /// Ask all worker loops to stop after their current job
    pub fn stop_processing(&self) {
        if self.current_flag().swap(false, Ordering::SeqCst) {
            info!(
                "Stopping workers on queue '{}'",
                self.shared.config.queue_name
            );
        }
    }

    /// Stop processing and wait for every worker loop to exit
    pub async fn shutdown(&self) {
        self.stop_processing();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
    }

    /// Number of worker tasks that have not exited yet
    pub async fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Current counts
    pub async fn get_stats(&self) -> Result<QueueStats> {
        let pending = self.shared.store.len().await?;
        let processing = self.shared.active_jobs.read().await.len();
        let counters = &self.shared.counters;

        Ok(QueueStats {
            pending,
            processing,
            completed: counters.completed(),
            failed: counters.failed(),
            cancelled: counters.cancelled(),
        })
    }

    /// Pending jobs in ready-time order, delayed ones included
    pub async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let entries = self.shared.store.range(None, limit).await?;
        Ok(decode_all(entries.iter().map(|(raw, _)| raw.as_str())))
    }

    /// Pending jobs carrying `tag`
    pub async fn get_pending_jobs_by_tag(&self, tag: &str) -> Result<Vec<Job>> {
        let mut jobs = self.get_pending_jobs(SCAN_ALL).await?;
        jobs.retain(|job| job.has_tag(tag));
        Ok(jobs)
    }

    /// Jobs being executed by this process right now
    pub async fn get_active_jobs(&self) -> Vec<Job> {
        self.shared.active_jobs.read().await.values().cloned().collect()
    }

    /// Most recently completed jobs, newest first
    pub async fn get_completed_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let raw = self.shared.store.finished(FinishedKind::Completed, limit).await?;
        Ok(decode_all(raw.iter().map(String::as_str)))
    }

    /// Most recently failed or cancelled jobs, newest first
    pub async fn get_failed_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let raw = self.shared.store.finished(FinishedKind::Failed, limit).await?;
        Ok(decode_all(raw.iter().map(String::as_str)))
    }

    /// Look a job up by id: active first, then pending, then history
    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        if let Some(job) = self.shared.active_jobs.read().await.get(job_id) {
            return Ok(Some(job.clone()));
        }

        if let Some((_, job)) = self.find_pending(job_id).await? {
            return Ok(Some(job));
        }

        let config = &self.shared.config;
        for job in self.get_completed_jobs(config.keep_completed).await? {
            if job.id == job_id {
                return Ok(Some(job));
            }
        }
        for job in self.get_failed_jobs(config.keep_failed).await? {
            if job.id == job_id {
                return Ok(Some(job));
            }
        }

        Ok(None)
    }

    /// Cancel a job that has not been claimed yet.
    /// Returns false if no pending job has that id.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        let (raw, mut job) = match self.find_pending(job_id).await? {
            Some(found) => found,
            None => return Ok(false),
        };

        if !self.shared.store.remove(&raw).await? {
            // claimed between the scan and the removal
            return Ok(false);
        }

        job.mark_as_cancelled();
        self.shared.counters.record_cancelled();
        info!("Cancelled job {} ({})", job.id, job.job_type);

        let recorded = match job.encode() {
            Ok(raw) => {
                self.shared
                    .store
                    .record_finished(FinishedKind::Failed, &raw, self.shared.config.keep_failed)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            warn!("Failed to record cancelled job {}: {}", job.id, e);
        }

        Ok(true)
    }

    /// Remove every pending and finished record of this queue
    pub async fn obliterate(&self) -> Result<()> {
        if self.is_running() {
            return Err(JobRsError::QueueRunning);
        }
        self.shared.store.clear().await?;
        info!("Obliterated queue '{}'", self.shared.config.queue_name);
        Ok(())
    }

    async fn find_pending(&self, job_id: &str) -> Result<Option<(String, Job)>> {
        for (raw, _) in self.shared.store.range(None, SCAN_ALL).await? {
            match Job::decode(&raw) {
                Ok(job) if job.id == job_id => return Ok(Some((raw, job))),
                Ok(_) => {}
                Err(e) => warn!("Skipping undecodable pending record: {}", e),
            }
        }
        Ok(None)
    }
}

fn decode_all<'a>(records: impl Iterator<Item = &'a str>) -> Vec<Job> {
    records
        .filter_map(|raw| match Job::decode(raw) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("Skipping undecodable job record: {}", e);
                None
            }
        })
        .collect()
}
