//! SSE stream construction shared by the list-realtime and per-entity
//! log-stream routes (spec.md §4.5, §5, §6).
//!
//! Grounded on the teacher's `kernel::sse::stream_handler`
//! (`BroadcastStream` -> `Sse`), generalized with the coalescing window,
//! heartbeat, and idle-close behavior spec.md names explicitly — the
//! teacher's version forwards every message uncoalesced with a bare
//! `KeepAlive::default()`.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// List-stream coalescing window (spec.md §4.5: "at most every 500 ms").
const COALESCE_INTERVAL: Duration = Duration::from_millis(500);
/// List-stream heartbeat cadence (spec.md §4.5).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
/// List-stream idle close (spec.md §4.5).
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Grace period after a job's terminal `job_status` event before a log
/// stream closes, so the last SSE frame has time to flush (spec.md §4.5).
const LOG_TERMINAL_GRACE: Duration = Duration::from_secs(1);

fn event(name: &'static str, seq: Option<u64>, data: Value) -> Result<Event, Infallible> {
    let mut ev = Event::default().event(name).data(data.to_string());
    if let Some(seq) = seq {
        ev = ev.id(seq.to_string());
    }
    Ok(ev)
}

/// Builds a coalesced SSE stream for one of the three list topics
/// (`jobs-list`, `workers-list`, `queues-list`). Emits an initial snapshot,
/// then at most one `event_name` frame per `COALESCE_INTERVAL`, a
/// `heartbeat` every `HEARTBEAT_INTERVAL` of inactivity, and closes with
/// `idle_timeout` + `close` after `IDLE_TIMEOUT` with no delivered update.
pub fn list_stream(
    mut rx: broadcast::Receiver<Value>,
    event_name: &'static str,
    snapshot: Value,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        yield event(event_name, Some(0), snapshot);

        let mut pending: Option<Value> = None;
        let mut last_activity = Instant::now();
        let mut last_heartbeat = Instant::now();
        let mut last_emit = Instant::now();

        loop {
            let wait = if pending.is_some() {
                COALESCE_INTERVAL.saturating_sub(last_emit.elapsed())
            } else {
                COALESCE_INTERVAL
            };

            match tokio::time::timeout(wait, rx.recv()).await {
                Ok(Ok(v)) => pending = Some(v),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    yield event("close", None, serde_json::json!({}));
                    return;
                }
                Err(_elapsed) => {}
            }

            // Drain whatever else is already queued, keeping only the most
            // recent envelope, so a burst collapses into one frame.
            loop {
                match rx.try_recv() {
                    Ok(v) => pending = Some(v),
                    Err(_) => break,
                }
            }

            if pending.is_some() {
                if last_emit.elapsed() < COALESCE_INTERVAL {
                    // Window not elapsed yet; loop again and wait out the remainder.
                    continue;
                }
                let envelope = pending.take().expect("checked Some above");
                last_activity = Instant::now();
                last_heartbeat = Instant::now();
                last_emit = Instant::now();
                let seq = envelope.get("seq").and_then(|s| s.as_u64());
                yield event(event_name, seq, envelope);
                continue;
            }

            if last_activity.elapsed() >= IDLE_TIMEOUT {
                yield event("idle_timeout", None, serde_json::json!({}));
                yield event("close", None, serde_json::json!({}));
                return;
            }

            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                last_heartbeat = Instant::now();
                yield event("heartbeat", None, serde_json::json!({}));
            }
        }
    }
}

/// One frame of a per-entity log stream: either a buffered/live log line or
/// the terminal status marking the stream's end.
pub enum LogFrame {
    Line { seq: u64, line: String },
    Terminal { status: String, error_message: Option<String> },
}

/// Builds the per-entity log stream (spec.md §4.5): replays `tail`, then
/// forwards live lines from `rx` until either the channel closes or a
/// `terminal` predicate (checked against each live envelope) fires, at
/// which point a `job_status` event is sent and the stream closes after a
/// short grace period.
pub fn log_stream(
    tail: Vec<(u64, String)>,
    mut rx: broadcast::Receiver<Value>,
    already_terminal: Option<(String, Option<String>)>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        for (seq, line) in tail {
            yield event("log", Some(seq), serde_json::json!({ "line": line }));
        }

        // The job may already have reached a terminal state before this
        // subscriber connected, in which case the broadcast channel will
        // never carry the `job_status` frame — emit it from the entity's
        // current persisted state instead of waiting forever.
        if let Some((status, error_message)) = already_terminal {
            yield event("job_status", None, serde_json::json!({
                "status": status,
                "error_message": error_message,
            }));
            tokio::time::sleep(LOG_TERMINAL_GRACE).await;
            return;
        }

        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let seq = envelope.get("seq").and_then(|s| s.as_u64());
                    if envelope["data"]["terminal"].as_bool() == Some(true) {
                        let status = envelope["data"]["job_status"].as_str().unwrap_or("unknown").to_string();
                        let error_message = envelope["data"]["error_message"].as_str().map(str::to_string);
                        yield event("job_status", seq, serde_json::json!({
                            "status": status,
                            "error_message": error_message,
                        }));
                        tokio::time::sleep(LOG_TERMINAL_GRACE).await;
                        return;
                    }
                    if let Some(line) = envelope["data"]["line"].as_str() {
                        yield event("log", seq, serde_json::json!({ "line": line }));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// A frame variant kept for callers that want to branch on the parsed
/// shape instead of re-inspecting raw JSON (currently used only in tests).
#[cfg(test)]
pub fn classify(envelope: &Value) -> LogFrame {
    if envelope["data"]["terminal"].as_bool() == Some(true) {
        LogFrame::Terminal {
            status: envelope["data"]["job_status"].as_str().unwrap_or("unknown").to_string(),
            error_message: envelope["data"]["error_message"].as_str().map(str::to_string),
        }
    } else {
        LogFrame::Line {
            seq: envelope["seq"].as_u64().unwrap_or(0),
            line: envelope["data"]["line"].as_str().unwrap_or("").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_terminal_envelope() {
        let envelope = serde_json::json!({
            "seq": 3,
            "data": { "job_status": "Completed", "error_message": null, "terminal": true },
        });
        match classify(&envelope) {
            LogFrame::Terminal { status, .. } => assert_eq!(status, "Completed"),
            _ => panic!("expected terminal frame"),
        }
    }

    #[test]
    fn classifies_log_line_envelope() {
        let envelope = serde_json::json!({ "seq": 1, "data": { "line": "hi" } });
        match classify(&envelope) {
            LogFrame::Line { line, .. } => assert_eq!(line, "hi"),
            _ => panic!("expected log line frame"),
        }
    }
}
