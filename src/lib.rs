pub mod config;
pub mod errors;
pub mod utils;

// Core modules
pub mod backoff;
pub mod job;
pub mod processor;
pub mod queue;
pub mod store;
pub(crate) mod worker;

// Re-export main components for easier access
pub use backoff::{BackoffOptions, BackoffStrategy};
pub use config::QueueConfig;
pub use errors::{JobRsError, Result};
pub use job::{Job, JobOptions, JobPriority, JobStatus};
pub use processor::{processor_fn, FnProcessor, Processor, ProcessorRegistry};
pub use queue::{JobQueue, JobQueueBuilder, QueueStats};
pub use store::{FinishedKind, JobStore, MemoryStore, RedisStore};
