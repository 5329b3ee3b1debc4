//! Dispatcher core: the queue/worker state machines, job lifecycle, worker
//! transport, remote provisioning, and live event fan-out that sit behind
//! the HTTP/SSE surface in `api`.
//!
//! This crate owns orchestration only. It depends on storage only through
//! `repository::Repository`, and on worker processes only through the wire
//! contract in `transport`.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod jobs;
pub mod model;
pub mod provisioning;
pub mod queues;
pub mod repository;
pub mod transport;
pub mod workers;

pub use config::Config;
pub use error::{DispatchError, DispatchResult};
