//! Orchestrator -> worker wire client (spec.md §4.4).
//!
//! HTTP for the request/response surface (`execute`, `cancel`, `status`,
//! `health`) and SSE for the job log stream. Grounded on the teacher's
//! `kernel::firecrawl_client::FirecrawlClient` (reqwest client wrapper with
//! a `post`/`get` helper and `anyhow::Context`), generalized with the
//! retry/backoff/deadline policy spec.md names explicitly.

pub mod client;
pub mod wire;

pub use client::{TransportError, WorkerTransportClient};
pub use wire::{CancelResponse, ExecuteRequest, WorkerLogEvent, WorkerStatusResponse};
