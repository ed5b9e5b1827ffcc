use jobrs::{processor_fn, JobOptions, JobPriority, JobQueue, MemoryStore, QueueConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// This example shows delayed jobs, tags and cancelling a pending job.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = QueueConfig {
        queue_name: "delayed-queue".to_string(),
        poll_interval_ms: 100,
        ..Default::default()
    };

    let queue = JobQueue::builder(config, Arc::new(MemoryStore::new()))
        .processor(
            "reminder",
            processor_fn(|job| async move {
                println!(
                    "Reminder {} ({:?}) fired: {}",
                    job.id, job.priority, job.payload["text"]
                );
                Ok(json!(null))
            }),
        )
        .build()?;

    for (delay, text) in [(1500, "stretch"), (500, "drink water"), (0, "start working")] {
        queue
            .add_job(
                "reminder",
                json!({ "text": text }),
                JobOptions {
                    delay: Some(delay),
                    tags: vec!["daily".to_string()],
                    ..Default::default()
                },
            )
            .await?;
    }

    let cancelled = queue
        .add_job(
            "reminder",
            json!({ "text": "never shown" }),
            JobOptions {
                delay: Some(1000),
                priority: Some(JobPriority::Low),
                ..Default::default()
            },
        )
        .await?;

    println!("Pending jobs:");
    for job in queue.get_pending_jobs(10).await? {
        println!("  {} ready at {} tags={:?}", job.id, job.ready_at(), job.tags);
    }
    println!(
        "Tagged 'daily': {}",
        queue.get_pending_jobs_by_tag("daily").await?.len()
    );

    println!("Cancelled {}: {}", cancelled, queue.cancel_job(&cancelled).await?);

    queue.start_processing().await;
    sleep(Duration::from_secs(2)).await;
    queue.shutdown().await;

    println!("\nQueue statistics: {:?}", queue.get_stats().await?);
    Ok(())
}
