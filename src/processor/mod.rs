//! Processor capability and the per-queue registry of processors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::job::Job;

/// Executes jobs of one type.
///
/// `process` returning `Err` counts as a failed attempt. The hooks are
/// optional and run after the job's state has been updated.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Run one attempt of the job
    async fn process(&self, job: &Job) -> anyhow::Result<Value>;

    /// Called once the job has completed
    async fn on_success(&self, _job: &Job, _result: &Value) {}

    /// Called once the job has exhausted its attempts
    async fn on_failure(&self, _job: &Job, _error: &str) {}

    /// Called after a failed attempt has been rescheduled
    async fn on_retry(&self, _job: &Job, _error: &str) {}
}

/// Adapter turning an async closure into a [`Processor`] without hooks
pub struct FnProcessor<F> {
    func: F,
}

impl<F, Fut> FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    pub fn new(func: F) -> Self {
        FnProcessor { func }
    }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn process(&self, job: &Job) -> anyhow::Result<Value> {
        (self.func)(job.clone()).await
    }
}

/// Wrap an async closure as a shareable processor
pub fn processor_fn<F, Fut>(func: F) -> Arc<dyn Processor>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnProcessor::new(func))
}

/// Mapping from job type to its processor. Last registration wins.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor, returning the one it replaced
    pub fn register(
        &mut self,
        job_type: &str,
        processor: Arc<dyn Processor>,
    ) -> Option<Arc<dyn Processor>> {
        let previous = self.processors.insert(job_type.to_string(), processor);
        if previous.is_some() {
            log::warn!("Replaced processor for job type '{}'", job_type);
        } else {
            log::info!("Registered processor for job type '{}'", job_type);
        }
        previous
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(job_type).cloned()
    }

    /// Registered job types, sorted
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use serde_json::json;

    fn job(job_type: &str) -> Job {
        Job::new("1".to_string(), job_type.to_string(), json!(2), JobOptions::default(), 1)
    }

    #[tokio::test]
    async fn test_fn_processor_runs_closure() {
        let processor = processor_fn(|job: Job| async move {
            let n = job.payload.as_i64().unwrap_or(0);
            Ok(json!(n * 10))
        });

        let result = processor.process(&job("double")).await.unwrap();
        assert_eq!(result, json!(20));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = ProcessorRegistry::new();
        assert!(registry.is_empty());

        registry.register("t", processor_fn(|_| async { Ok(json!("first")) }));
        let previous = registry.register("t", processor_fn(|_| async { Ok(json!("second")) }));

        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.job_types(), vec!["t".to_string()]);
        assert!(registry.get("missing").is_none());

        let processor = registry.get("t").unwrap();
        assert_eq!(processor.process(&job("t")).await.unwrap(), json!("second"));
    }

    #[test]
    fn test_job_types_sorted() {
        let mut registry = ProcessorRegistry::new();
        registry.register("b", processor_fn(|_| async { Ok(Value::Null) }));
        registry.register("a", processor_fn(|_| async { Ok(Value::Null) }));
        assert_eq!(registry.job_types(), vec!["a".to_string(), "b".to_string()]);
    }
}
