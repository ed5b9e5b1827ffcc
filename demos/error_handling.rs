use async_trait::async_trait;
use jobrs::{Job, JobOptions, JobQueue, MemoryStore, Processor, QueueConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Fails until the attempt named in the payload, with hooks that report each step
struct RetryingProcessor;

#[async_trait]
impl Processor for RetryingProcessor {
    async fn process(&self, job: &Job) -> anyhow::Result<Value> {
        let succeed_on = job
            .payload
            .get("succeed_on_attempt")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;

        println!(
            "Processing job ID: {} (attempt {}/{})",
            job.id, job.attempts, job.max_attempts
        );

        if job.attempts < succeed_on {
            println!("  This attempt will fail!");
            anyhow::bail!("simulated failure on attempt {}", job.attempts);
        }

        println!("  Job processed successfully!");
        Ok(json!({ "success": true }))
    }

    async fn on_success(&self, job: &Job, result: &Value) {
        println!("  on_success: {} -> {}", job.id, result);
    }

    async fn on_retry(&self, job: &Job, error: &str) {
        let wait = job
            .scheduled_for
            .unwrap_or(0)
            .saturating_sub(job.started_at.unwrap_or(0));
        println!("  on_retry: {} ({}), next attempt in ~{}ms", job.id, error, wait);
    }

    async fn on_failure(&self, job: &Job, error: &str) {
        println!("  on_failure: {} gave up after {} attempts: {}", job.id, job.attempts, error);
    }
}

/// This example demonstrates error handling and automatic retry behavior
/// with exponential backoff.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = QueueConfig {
        queue_name: "retry-queue".to_string(),
        concurrency: 1,
        retry_delay_ms: 500,
        poll_interval_ms: 100,
        ..Default::default()
    };

    let queue = JobQueue::builder(config, Arc::new(MemoryStore::new()))
        .processor("flaky", Arc::new(RetryingProcessor))
        .build()?;

    println!("Adding jobs with retry configuration...");
    let recovers = queue
        .add_job(
            "flaky",
            json!({ "succeed_on_attempt": 3 }),
            JobOptions {
                max_attempts: Some(3),
                ..Default::default()
            },
        )
        .await?;
    let gives_up = queue
        .add_job(
            "flaky",
            json!({ "succeed_on_attempt": 10 }),
            JobOptions {
                max_attempts: Some(2),
                ..Default::default()
            },
        )
        .await?;
    println!("Added jobs {} and {}", recovers, gives_up);

    queue.start_processing().await;

    // 500ms + 1000ms of backoff plus polling
    println!("Waiting for job processing and retries...");
    sleep(Duration::from_secs(3)).await;
    queue.shutdown().await;

    println!("\nJob processing results:");
    for job in queue.get_completed_jobs(10).await? {
        println!("  Job {} completed after {} attempts", job.id, job.attempts);
    }
    for job in queue.get_failed_jobs(10).await? {
        println!(
            "  Job {} failed after {} attempts: {}",
            job.id,
            job.attempts,
            job.error.unwrap_or_default()
        );
    }

    let stats = queue.get_stats().await?;
    println!("\nQueue statistics: {:?}", stats);

    Ok(())
}
