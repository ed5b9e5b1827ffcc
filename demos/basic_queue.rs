use jobrs::{processor_fn, JobOptions, JobQueue, JobStore, MemoryStore, QueueConfig, RedisStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// This example demonstrates the basic usage of JobRs
/// with a simple producer-consumer pattern.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = QueueConfig {
        queue_name: "example-queue".to_string(),
        concurrency: 2,
        ..Default::default()
    };

    // Use Redis when it is reachable, otherwise fall back to the in-memory store
    let redis = RedisStore::from_config(&config)?;
    let store: Arc<dyn JobStore> = match redis.len().await {
        Ok(_) => {
            println!("Using Redis at {}", config.redis_url);
            Arc::new(redis)
        }
        Err(e) => {
            println!("Could not connect to Redis ({}), using in-memory store", e);
            Arc::new(MemoryStore::new())
        }
    };

    // Consumer: a processor for the "example-job" type
    let queue = JobQueue::builder(config, store)
        .processor(
            "example-job",
            processor_fn(|job| async move {
                println!("Processing job ID: {}", job.id);
                println!("Job data: {}", job.payload);

                // Simulate some work
                sleep(Duration::from_millis(500)).await;

                Ok(json!({
                    "processed": true,
                    "result": format!("Completed job {}", job.id)
                }))
            }),
        )
        .build()?;

    // Producer: Add jobs to the queue
    println!("Adding jobs to the queue...");
    for i in 1..=5 {
        let id = queue
            .add_job(
                "example-job",
                json!({
                    "job_index": i,
                    "message": format!("This is job number {}", i)
                }),
                JobOptions::default(),
            )
            .await?;
        println!("Added job with ID: {}", id);
    }

    println!("\nStarting workers to process jobs...");
    queue.start_processing().await;

    println!("Waiting for jobs to be processed...");
    sleep(Duration::from_secs(5)).await;

    let stats = queue.get_stats().await?;
    println!("\nQueue statistics:");
    println!("  Pending: {}", stats.pending);
    println!("  Processing: {}", stats.processing);
    println!("  Completed: {}", stats.completed);
    println!("  Failed: {}", stats.failed);

    queue.shutdown().await;
    println!("Workers stopped");

    Ok(())
}
