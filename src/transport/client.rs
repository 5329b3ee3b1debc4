//! HTTP+SSE client the orchestrator uses to talk to worker processes.
//!
//! Retry policy (spec.md §4.4): 3 attempts with 250 ms / 1 s / 4 s backoff
//! on transient errors (connection refused, 5xx); no retry on 4xx; 10 s
//! overall deadline for non-streaming calls. Streaming calls (the log
//! tail) have no total deadline but close after 5 minutes of no bytes.

use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::ids::JobId;
use crate::model::Worker;

use super::wire::{CancelResponse, ExecuteRequest, WorkerLogEvent, WorkerStatusResponse};

const RETRY_BACKOFFS: [Duration; 3] = [
    Duration::from_millis(250),
    Duration::from_secs(1),
    Duration::from_secs(4),
];
const NON_STREAMING_DEADLINE: Duration = Duration::from_secs(10);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("worker unreachable: {0}")]
    Unreachable(String),
    #[error("worker rejected request: {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("worker response malformed: {0}")]
    Malformed(String),
}

impl TransportError {
    /// 4xx responses are not retried — the request itself is wrong.
    fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Rejected { status, .. } if status.is_client_error())
    }
}

#[derive(Clone)]
pub struct WorkerTransportClient {
    http: Client,
}

impl WorkerTransportClient {
    pub fn new() -> Self {
        Self {
            http: Client::builder()
                .timeout(NON_STREAMING_DEADLINE)
                .build()
                .expect("reqwest client configuration is static and valid"),
        }
    }

    fn base_url(worker: &Worker) -> String {
        let host = worker
            .ip_address
            .clone()
            .unwrap_or_else(|| worker.hostname.clone());
        format!("http://{host}:{}", worker.port)
    }

    /// Runs `attempt` up to 3 times with the spec's backoff schedule,
    /// stopping early on a non-retryable (4xx) error.
    async fn with_retry<T, F, Fut>(&self, mut attempt: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, TransportError>>,
    {
        let mut last_err = None;
        for (i, backoff) in std::iter::once(Duration::ZERO)
            .chain(RETRY_BACKOFFS)
            .enumerate()
        {
            if i > 0 {
                tokio::time::sleep(backoff).await;
            }
            match attempt().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => last_err = Some(e),
            }
            if i == RETRY_BACKOFFS.len() {
                break;
            }
        }
        Err(last_err.expect("loop runs at least once"))
    }

    pub async fn execute(
        &self,
        worker: &Worker,
        job_id: JobId,
        command: String,
        runtime_args: serde_json::Value,
    ) -> Result<(), TransportError> {
        let url = format!("{}/execute", Self::base_url(worker));
        self.with_retry(|| {
            let url = url.clone();
            let body = ExecuteRequest {
                job_id,
                command: command.clone(),
                runtime_args: runtime_args.clone(),
            };
            async move {
                let resp = self
                    .http
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| TransportError::Unreachable(e.to_string()))?;
                Self::check_status(resp).await.map(|_| ())
            }
        })
        .await
    }

    pub async fn cancel(&self, worker: &Worker, job_id: JobId) -> Result<CancelResponse, TransportError> {
        let url = format!("{}/cancel/{job_id}", Self::base_url(worker));
        self.with_retry(|| {
            let url = url.clone();
            async move {
                let resp = self
                    .http
                    .post(&url)
                    .send()
                    .await
                    .map_err(|e| TransportError::Unreachable(e.to_string()))?;
                Self::parse_json(resp).await
            }
        })
        .await
        .or_else(|e| {
            // Cancel is documented idempotent: "200 if accepted or already
            // gone" — treat an unreachable worker as already-gone rather
            // than a hard failure so callers don't retry forever.
            if matches!(e, TransportError::Unreachable(_)) {
                Ok(CancelResponse { accepted: false })
            } else {
                Err(e)
            }
        })
    }

    pub async fn status(&self, worker: &Worker) -> Result<WorkerStatusResponse, TransportError> {
        let url = format!("{}/status", Self::base_url(worker));
        self.with_retry(|| {
            let url = url.clone();
            async move {
                let resp = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| TransportError::Unreachable(e.to_string()))?;
                Self::parse_json(resp).await
            }
        })
        .await
    }

    /// Cheap liveness probe used by the health monitor; does not retry —
    /// the monitor itself runs on a period and treats one failed probe as
    /// one miss (spec.md §4.2).
    pub async fn health(&self, worker: &Worker) -> bool {
        let url = format!("{}/health", Self::base_url(worker));
        matches!(
            self.http.get(&url).timeout(Duration::from_secs(5)).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    /// Streams `WorkerLogEvent`s from a worker's SSE log feed. No overall
    /// deadline, but the stream ends if no bytes arrive for 5 minutes.
    pub fn log_stream(
        &self,
        worker: &Worker,
        job_id: JobId,
    ) -> impl Stream<Item = Result<WorkerLogEvent, TransportError>> + Send {
        let url = format!("{}/logs/{job_id}/stream", Self::base_url(worker));
        let http = self.http.clone();

        async_stream::stream! {
            let resp = match http
                .get(&url)
                .timeout(Duration::MAX)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(TransportError::Unreachable(e.to_string()));
                    return;
                }
            };
            if !resp.status().is_success() {
                yield Err(TransportError::Rejected {
                    status: resp.status(),
                    body: resp.text().await.unwrap_or_default(),
                });
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut buf = Vec::new();
            loop {
                let chunk = match tokio::time::timeout(STREAM_IDLE_TIMEOUT, byte_stream.next()).await {
                    Ok(Some(Ok(bytes))) => bytes,
                    Ok(Some(Err(e))) => {
                        yield Err(TransportError::Unreachable(e.to_string()));
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        yield Err(TransportError::Unreachable("idle timeout".to_string()));
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<u8>>();
                    if let Some(event) = parse_sse_frame(&frame) {
                        yield event;
                    }
                }
            }
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(TransportError::Rejected { status, body })
        }
    }

    async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TransportError> {
        let resp = Self::check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

impl Default for WorkerTransportClient {
    fn default() -> Self {
        Self::new()
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_sse_frame(frame: &[u8]) -> Option<Result<WorkerLogEvent, TransportError>> {
    let text = String::from_utf8_lossy(frame);
    let mut data = String::new();
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push_str(rest.trim_start());
        }
    }
    if data.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<WorkerLogEvent>(&data)
            .map_err(|e| TransportError::Malformed(e.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_log_sse_frame() {
        let frame = b"event: log\ndata: {\"event\":\"log\",\"line\":\"hi\"}\n\n";
        let parsed = parse_sse_frame(frame).unwrap().unwrap();
        match parsed {
            WorkerLogEvent::Log { line } => assert_eq!(line, "hi"),
            _ => panic!("expected Log variant"),
        }
    }

    #[test]
    fn ignores_frames_with_no_data_field() {
        let frame = b": heartbeat\n\n";
        assert!(parse_sse_frame(frame).is_none());
    }

    #[test]
    fn four_xx_is_not_retryable() {
        let err = TransportError::Rejected {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn five_xx_is_retryable() {
        let err = TransportError::Rejected {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(err.is_retryable());
    }
}
