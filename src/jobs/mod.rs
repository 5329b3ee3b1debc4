//! Job state transitions, cancel/retry/move, and the per-job log ingestor
//! that bridges a dispatched job's SSE feed back into the repository and
//! event bus (spec.md §4.3).

pub mod controller;
pub mod log_ingestor;

pub use controller::JobLifecycleController;
pub use log_ingestor::JobLogIngestor;
