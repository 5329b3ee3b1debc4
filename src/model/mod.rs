pub mod assignment;
pub mod job;
pub mod queue;
pub mod spec;
pub mod worker;

pub use assignment::QueueWorkerAssignment;
pub use job::{Job, JobStatus};
pub use queue::{Queue, QueuePriority, QueueState, QueueStrategy};
pub use spec::JobSpecification;
pub use worker::{SshAuthMethod, SshCredentials, Worker, WorkerState, WorkerStatus, WorkerType};
