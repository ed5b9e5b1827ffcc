use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{JobRsError, Result};
use crate::utils::now_millis;

/// Current version of the serialized job record
pub const JOB_RECORD_VERSION: u32 = 1;

fn default_record_version() -> u32 {
    1
}

/// Job status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Job priority levels. Advisory only: the store orders by ready time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// Job options for creating a new job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Optional job priority
    pub priority: Option<JobPriority>,
    /// Optional delay in milliseconds
    pub delay: Option<u64>,
    /// Optional attempt budget, overriding the queue default
    pub max_attempts: Option<u32>,
    /// Labels for filtering
    pub tags: Vec<String>,
}

/// Job structure representing one unit of deferred work.
///
/// This is also the wire format of a pending entry in the store, so field
/// names and timestamp encoding (epoch milliseconds) are part of the contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Record schema version
    #[serde(rename = "v", default = "default_record_version")]
    pub version: u32,
    /// Unique job ID
    pub id: String,
    /// Job type, selects the processor
    #[serde(rename = "type")]
    pub job_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Opaque payload handed to the processor
    #[serde(default)]
    pub payload: Value,
    /// Number of attempts started so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: u64,
    /// Ready time; `None` means ready since `created_at`
    #[serde(default)]
    pub scheduled_for: Option<u64>,
    #[serde(default)]
    pub started_at: Option<u64>,
    #[serde(default)]
    pub completed_at: Option<u64>,
    /// Last failure message
    #[serde(default)]
    pub error: Option<String>,
    /// Result of the last successful run
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Job {
    /// Create a new pending job
    pub fn new(
        id: String,
        job_type: String,
        payload: Value,
        opts: JobOptions,
        default_max_attempts: u32,
    ) -> Self {
        let now = now_millis();
        let scheduled_for = opts.delay.filter(|d| *d > 0).map(|d| now.saturating_add(d));

        Job {
            version: JOB_RECORD_VERSION,
            id,
            job_type,
            priority: opts.priority.unwrap_or_default(),
            status: JobStatus::Pending,
            payload,
            attempts: 0,
            max_attempts: opts.max_attempts.unwrap_or(default_max_attempts),
            created_at: now,
            scheduled_for,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            tags: opts.tags,
        }
    }

    /// Score of this job in the store: its ready time
    pub fn ready_at(&self) -> u64 {
        self.scheduled_for.unwrap_or(self.created_at)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Start a new attempt
    pub fn mark_as_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now_millis());
        self.attempts += 1;
    }

    /// Mark the job as completed
    pub fn mark_as_completed(&mut self, result: Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now_millis());
    }

    /// Reschedule the job for another attempt at `scheduled_for`
    pub fn mark_for_retry(&mut self, err: &str, scheduled_for: u64) {
        self.status = JobStatus::Pending;
        self.error = Some(err.to_string());
        self.scheduled_for = Some(scheduled_for);
    }

    /// Mark the job as permanently failed
    pub fn mark_as_failed(&mut self, err: &str) {
        self.status = JobStatus::Failed;
        self.error = Some(err.to_string());
        self.completed_at = Some(now_millis());
    }

    /// Mark the job as cancelled
    pub fn mark_as_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now_millis());
    }

    /// Check if a failed attempt leaves budget for another one
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Serialize the job into its store representation
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a job from its store representation
    pub fn decode(data: &str) -> Result<Self> {
        let job: Job = serde_json::from_str(data)?;
        if job.version > JOB_RECORD_VERSION {
            return Err(JobRsError::UnsupportedVersion(job.version));
        }
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_job(opts: JobOptions) -> Job {
        Job::new(
            "test_id".to_string(),
            "send-email".to_string(),
            json!({"to": "a@example.com"}),
            opts,
            3,
        )
    }

    #[test]
    fn test_job_creation() {
        let job = test_job(JobOptions::default());

        assert_eq!(job.id, "test_id");
        assert_eq!(job.job_type, "send-email");
        assert_eq!(job.payload, json!({"to": "a@example.com"}));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, JobPriority::Normal);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.scheduled_for.is_none());
        assert_eq!(job.ready_at(), job.created_at);
    }

    #[test]
    fn test_job_options_applied() {
        let job = test_job(JobOptions {
            priority: Some(JobPriority::Urgent),
            delay: Some(5000),
            max_attempts: Some(7),
            tags: vec!["billing".to_string()],
        });

        assert_eq!(job.priority, JobPriority::Urgent);
        assert_eq!(job.max_attempts, 7);
        assert_eq!(job.scheduled_for, Some(job.created_at + 5000));
        assert_eq!(job.ready_at(), job.created_at + 5000);
        assert!(job.has_tag("billing"));
        assert!(!job.has_tag("email"));
    }

    #[test]
    fn test_zero_delay_is_immediate() {
        let job = test_job(JobOptions {
            delay: Some(0),
            ..Default::default()
        });
        assert!(job.scheduled_for.is_none());
    }

    #[test]
    fn test_job_state_transitions() {
        let mut job = test_job(JobOptions {
            max_attempts: Some(2),
            ..Default::default()
        });

        job.mark_as_processing();
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.started_at.is_some());
        assert_eq!(job.attempts, 1);
        assert!(job.can_retry());

        job.mark_for_retry("boom", 42);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.ready_at(), 42);

        job.mark_as_processing();
        assert_eq!(job.attempts, 2);
        assert!(!job.can_retry());

        job.mark_as_failed("boom again");
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at.is_some());

        let mut job = test_job(JobOptions::default());
        job.mark_as_processing();
        job.mark_as_completed(json!("sent"));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!("sent")));
    }

    #[test]
    fn test_wire_format_field_names() {
        let job = test_job(JobOptions {
            delay: Some(10),
            ..Default::default()
        });
        let value: Value = serde_json::from_str(&job.encode().unwrap()).unwrap();

        assert_eq!(value["v"], json!(1));
        assert_eq!(value["type"], json!("send-email"));
        assert_eq!(value["status"], json!("PENDING"));
        assert_eq!(value["priority"], json!("NORMAL"));
        assert_eq!(value["maxAttempts"], json!(3));
        assert!(value["scheduledFor"].is_u64());
        assert!(value["createdAt"].is_u64());
    }

    #[test]
    fn test_decode_without_version_defaults_to_v1() {
        let raw = r#"{"id":"a","type":"t","priority":"LOW","status":"PENDING",
            "payload":null,"attempts":0,"maxAttempts":1,"createdAt":5}"#;
        let job = Job::decode(raw).unwrap();
        assert_eq!(job.version, 1);
        assert_eq!(job.priority, JobPriority::Low);
        assert!(job.tags.is_empty());
    }

    #[test]
    fn test_decode_rejects_newer_version() {
        let mut job = test_job(JobOptions::default());
        job.version = JOB_RECORD_VERSION + 1;
        let raw = serde_json::to_string(&job).unwrap();
        assert!(matches!(
            Job::decode(&raw),
            Err(JobRsError::UnsupportedVersion(2))
        ));
        assert!(matches!(
            Job::decode("not json"),
            Err(JobRsError::SerializationError(_))
        ));
    }
}
