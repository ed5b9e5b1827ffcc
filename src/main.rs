use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use serde_json::{json, Value};

use jobrs::utils::mask_redis_url;
use jobrs::{processor_fn, Job, JobQueue, QueueConfig, RedisStore};

/// Processor that logs the job payload and echoes it back
async fn log_job(job: Job) -> anyhow::Result<Value> {
    info!("[{}] {} payload: {}", job.job_type, job.id, job.payload);
    Ok(json!({ "logged": true }))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let config = QueueConfig::from_env().context("invalid queue configuration")?;
    info!(
        "jobrs worker: queue '{}' on {} (concurrency={}, retry_delay={}ms, max_attempts={})",
        config.queue_name,
        mask_redis_url(&config.redis_url),
        config.concurrency,
        config.retry_delay_ms,
        config.max_attempts
    );

    let store = RedisStore::from_config(&config).context("invalid Redis URL")?;
    let queue = JobQueue::builder(config, Arc::new(store))
        .processor("log", processor_fn(log_job))
        .build()?;

    match queue.get_stats().await {
        Ok(stats) => info!("Pending jobs at startup: {}", stats.pending),
        Err(e) => error!("Redis is not reachable yet: {}", e),
    }

    queue.start_processing().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for in-flight jobs");
    queue.shutdown().await;

    match queue.get_stats().await {
        Ok(stats) => info!(
            "Final stats: pending={} completed={} failed={} cancelled={}",
            stats.pending, stats.completed, stats.failed, stats.cancelled
        ),
        Err(e) => error!("Could not read final stats: {}", e),
    }

    Ok(())
}
