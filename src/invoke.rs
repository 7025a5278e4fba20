use opentelemetry::KeyValue;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{classify_upstream, is_dialect_mismatch, map_upstream_error, AppError, ErrorKind};
use crate::models::{CanonicalRequest, ModelProfile, UpstreamAttempt, UpstreamPayload};
use crate::state::AppState;
use crate::translate::{completion_fallback, translate};

/// Upstream bodies recorded in the attempt trail are capped at this length.
const ATTEMPT_BODY_LIMIT: usize = 2048;

pub enum UpstreamReply {
    /// Fully buffered upstream body.
    Buffered { raw: String },
    /// Live response handle, body unread.
    Stream(reqwest::Response),
}

/// Invokes the upstream for each candidate id in order, stopping at the
/// first success or the first terminal failure. 404 advances to the next
/// candidate; an exhausted list surfaces the full attempt report. Retries
/// and candidate fallback are strictly sequential, so at most one upstream
/// call is in flight per inbound request.
pub async fn invoke(
    state: &AppState,
    req: &CanonicalRequest,
    profile: &ModelProfile,
    request_id: &str,
    attempts: &mut Vec<UpstreamAttempt>,
) -> Result<UpstreamReply, AppError> {
    let candidates: Vec<&str> = profile.candidates().collect();
    for candidate in &candidates {
        match try_candidate(state, req, profile, candidate, request_id, attempts).await {
            Ok(reply) => return Ok(reply),
            Err(err) if err.kind == ErrorKind::ModelNotFound => {
                warn!(
                    request_id = %request_id,
                    candidate = %candidate,
                    "candidate not found, advancing to next"
                );
            }
            Err(err) => return Err(err),
        }
    }
    let report =
        serde_json::to_string(attempts).unwrap_or_else(|_| "[unserializable]".to_string());
    Err(AppError::new(
        ErrorKind::ModelNotFound,
        format!("all {} model candidates exhausted", candidates.len()),
    )
    .with_detail(report))
}

async fn try_candidate(
    state: &AppState,
    req: &CanonicalRequest,
    profile: &ModelProfile,
    candidate: &str,
    request_id: &str,
    attempts: &mut Vec<UpstreamAttempt>,
) -> Result<UpstreamReply, AppError> {
    let payload = translate(req, profile, candidate);
    let url = render_endpoint(&profile.endpoint_template, candidate);
    let max_attempts = state.config.upstream.max_attempts;

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = send_once(state, &url, &payload, profile, req.stream).await;
        match outcome {
            Ok((status, reply)) => {
                record(attempts, profile, candidate, Some(status), None);
                return Ok(reply);
            }
            Err(SendFailure::Transport(message)) => {
                record(attempts, profile, candidate, None, Some(&message));
                if attempt < max_attempts {
                    backoff(state, request_id, attempt).await;
                    continue;
                }
                return Err(AppError::upstream_unavailable(format!(
                    "upstream request failed after {} attempts: {}",
                    attempt, message
                )));
            }
            Err(SendFailure::Status { status, body }) => {
                record(attempts, profile, candidate, Some(status), Some(&body));
                if is_dialect_mismatch(status, &body) && payload.is_chat() {
                    info!(
                        request_id = %request_id,
                        candidate = %candidate,
                        "upstream rejected chat payload, retrying as raw completion"
                    );
                    return completion_retry(state, req, profile, candidate, &url, attempts)
                        .await;
                }
                let kind = classify_upstream(status, &body);
                if kind.retryable() && attempt < max_attempts {
                    backoff(state, request_id, attempt).await;
                    continue;
                }
                return Err(map_upstream_error(status, &body));
            }
        }
    }
}

/// One raw-completion invocation of the same candidate, classified exactly
/// like the attempt it replaces.
async fn completion_retry(
    state: &AppState,
    req: &CanonicalRequest,
    profile: &ModelProfile,
    candidate: &str,
    chat_url: &str,
    attempts: &mut Vec<UpstreamAttempt>,
) -> Result<UpstreamReply, AppError> {
    let payload = completion_fallback(req, candidate);
    let url = completion_endpoint(chat_url);
    match send_once(state, &url, &payload, profile, req.stream).await {
        Ok((status, reply)) => {
            record(attempts, profile, candidate, Some(status), None);
            Ok(reply)
        }
        Err(SendFailure::Transport(message)) => {
            record(attempts, profile, candidate, None, Some(&message));
            Err(AppError::upstream_unavailable(format!(
                "completion fallback failed: {}",
                message
            )))
        }
        Err(SendFailure::Status { status, body }) => {
            record(attempts, profile, candidate, Some(status), Some(&body));
            Err(map_upstream_error(status, &body))
        }
    }
}

enum SendFailure {
    /// Connect error, read error, or request timeout. Fatal for the
    /// attempt, eligible for retry.
    Transport(String),
    Status { status: u16, body: String },
}

async fn send_once(
    state: &AppState,
    url: &str,
    payload: &UpstreamPayload,
    profile: &ModelProfile,
    wants_stream: bool,
) -> Result<(u16, UpstreamReply), SendFailure> {
    // the stream client carries no read timeout; a relayed body may
    // legitimately outlive any fixed deadline
    let client = if wants_stream {
        &state.stream_client
    } else {
        &state.client
    };
    let mut request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .json(payload);
    if profile.requires_auth_header {
        request = request.header(
            AUTHORIZATION,
            format!("Bearer {}", state.config.upstream.api_key),
        );
    }
    let resp = request
        .send()
        .await
        .map_err(|e| SendFailure::Transport(e.to_string()))?;

    let status = resp.status().as_u16();
    if resp.status().is_success() {
        if wants_stream {
            return Ok((status, UpstreamReply::Stream(resp)));
        }
        let raw = resp
            .text()
            .await
            .map_err(|e| SendFailure::Transport(format!("body read failed: {}", e)))?;
        return Ok((status, UpstreamReply::Buffered { raw }));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SendFailure::Status { status, body })
}

async fn backoff(state: &AppState, request_id: &str, attempt: u32) {
    let delay = state.config.upstream.backoff_base_ms * 2u64.pow(attempt - 1);
    state
        .metrics
        .retries
        .add(1, &[KeyValue::new("attempt", attempt as i64)]);
    info!(
        request_id = %request_id,
        attempt = attempt,
        delay_ms = delay,
        "transient upstream failure, backing off"
    );
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

fn record(
    attempts: &mut Vec<UpstreamAttempt>,
    profile: &ModelProfile,
    candidate: &str,
    http_status: Option<u16>,
    raw_body: Option<&str>,
) {
    attempts.push(UpstreamAttempt {
        candidate_id: candidate.to_string(),
        dialect: profile.dialect,
        http_status,
        raw_body: raw_body.map(truncate_body),
    });
}

fn truncate_body(body: &str) -> String {
    if body.len() <= ATTEMPT_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ATTEMPT_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

fn render_endpoint(template: &str, candidate: &str) -> String {
    template.replace("{model}", candidate)
}

/// Chat endpoints conventionally live at `.../chat/completions`; the
/// legacy completion endpoint drops the `chat/` segment.
fn completion_endpoint(chat_url: &str) -> String {
    chat_url.replace("chat/completions", "completions")
}
