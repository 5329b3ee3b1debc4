//! One module per REST/SSE route group, mirroring the teacher's
//! `server/routes/*.rs` layout.

pub mod auth;
pub mod db;
pub mod health;
pub mod jobs;
pub mod logs;
pub mod queues;
pub mod realtime;
pub mod specs;
pub mod workers;
