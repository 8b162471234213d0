//! Device error log ingestion.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use crate::rate_limit::ClientIp;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LogRequest {
    #[serde(default)]
    pub logs: Vec<String>,
}

/// `POST /v1/log`. Always 200; over-limit or unreadable batches are dropped.
pub async fn submit(State(state): State<AppState>, client: ClientIp, body: Bytes) -> StatusCode {
    let key = client.key();
    let req: LogRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(client = %key, error = %e, "Dropping unreadable device log batch");
            return StatusCode::OK;
        }
    };
    if !state.log_limiter.check(&key) {
        tracing::warn!(client = %key, lines = req.logs.len(), "Dropping rate limited device logs");
        return StatusCode::OK;
    }

    if req.logs.len() > state.max_log_lines {
        tracing::warn!(
            client = %key,
            lines = req.logs.len(),
            kept = state.max_log_lines,
            "Truncating device log batch"
        );
    }
    for line in req.logs.iter().take(state.max_log_lines) {
        tracing::warn!(target: "device_log", client = %key, "{}", line);
    }
    StatusCode::OK
}
