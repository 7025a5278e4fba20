use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use opentelemetry::global;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::KeyValue;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

use crate::audit_log::{now_ms, AuditRecord};
use crate::auth::{require_token, AUTH_HEADER};
use crate::error::AppError;
use crate::extract::normalize_response;
use crate::invoke::{invoke, UpstreamReply};
use crate::models::{ModelProfile, UpstreamAttempt};
use crate::normalize::normalize_request;
use crate::state::{AppState, InflightGuard};
use crate::streaming::relay_stream;

/// The full request pipeline: auth, normalize, resolve, translate+invoke,
/// then relay or normalize the response. Steps run strictly sequentially;
/// auth and shape validation reject locally before any network call.
pub async fn post_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request_id = next_request_id();
    let start = Instant::now();
    let ts_start = now_ms();
    let guard = InflightGuard::new(state.inflight_count.clone());

    let token = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    require_token(token, &state.config.auth.hmac_secret)
        .map_err(|err| fail(&state, &request_id, "-", start, err))?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::invalid_request(format!("body is not valid JSON: {}", e)))
        .map_err(|err| fail(&state, &request_id, "-", start, err))?;

    let canonical = normalize_request(&payload, &state.config.models.default)
        .map_err(|err| fail(&state, &request_id, "-", start, err))?;
    let profile = state.models.resolve(&canonical.model_key).clone();

    state.metrics.requests.add(
        1,
        &[KeyValue::new("stream", bool_label(canonical.stream))],
    );
    let mut span = start_trace_span(&request_id, &canonical.model_key, &profile);

    let mut attempts = Vec::new();
    let result = invoke(&state, &canonical, &profile, &request_id, &mut attempts).await;

    match result {
        Ok(UpstreamReply::Stream(upstream)) => {
            info!(
                request_id = %request_id,
                model = %canonical.model_key,
                upstream_id = %profile.upstream_id,
                "stream accepted"
            );
            push_audit(&state, &request_id, &canonical.model_key, &profile, true, 200, None, attempts, ts_start).await;
            span.end();
            Ok(relay_stream(&state, upstream, guard, request_id, start))
        }
        Ok(UpstreamReply::Buffered { raw }) => {
            if state.config.observability.dump_upstream {
                info!(request_id = %request_id, "upstream response: {}", raw);
            }
            let response_value = normalize_response(&raw, profile.dialect);
            let raw_value: Value =
                serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw));

            state.metrics.latency_ms.record(
                start.elapsed().as_millis() as f64,
                &[KeyValue::new("stream", "false")],
            );
            info!(
                request_id = %request_id,
                model = %canonical.model_key,
                latency_ms = start.elapsed().as_millis(),
                status = 200,
                "request completed"
            );
            push_audit(&state, &request_id, &canonical.model_key, &profile, false, 200, None, attempts, ts_start).await;
            span.end();
            Ok(Json(json!({ "response": response_value, "raw": raw_value })).into_response())
        }
        Err(err) => {
            span.set_attribute(KeyValue::new("error.type", err.kind.code()));
            span.end();
            push_audit(
                &state,
                &request_id,
                &canonical.model_key,
                &profile,
                canonical.stream,
                err.kind.status().as_u16(),
                Some(err.kind.code()),
                attempts,
                ts_start,
            )
            .await;
            Err(fail(&state, &request_id, &canonical.model_key, start, err))
        }
    }
}

/// CORS preflight for the single endpoint.
pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", "POST, OPTIONS"),
            ("access-control-allow-headers", "Content-Type, X-Auth-Token"),
            ("access-control-max-age", "86400"),
        ],
    )
}

pub async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok"
    }))
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("req-{}-{}", ts, seq)
}

/// Counts and logs a failed request, then hands the error back for the
/// response body.
fn fail(state: &AppState, request_id: &str, model: &str, start: Instant, err: AppError) -> AppError {
    state
        .metrics
        .errors
        .add(1, &[KeyValue::new("type", err.kind.code())]);
    info!(
        request_id = %request_id,
        model = %model,
        latency_ms = start.elapsed().as_millis(),
        status = err.kind.status().as_u16(),
        error_code = err.kind.code(),
        retryable = err.retryable(),
        "request failed"
    );
    err
}

#[allow(clippy::too_many_arguments)]
async fn push_audit(
    state: &AppState,
    request_id: &str,
    model_key: &str,
    profile: &ModelProfile,
    stream: bool,
    status: u16,
    error_code: Option<&'static str>,
    attempts: Vec<UpstreamAttempt>,
    ts_start_ms: u128,
) {
    let Some(logger) = &state.audit_logger else {
        return;
    };
    logger
        .push(AuditRecord {
            ts_start_ms,
            ts_end_ms: now_ms(),
            request_id: request_id.to_string(),
            model_key: model_key.to_string(),
            upstream_id: profile.upstream_id.clone(),
            dialect: profile.dialect,
            stream,
            status,
            error_code,
            attempts,
        })
        .await;
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn start_trace_span(
    request_id: &str,
    model: &str,
    profile: &ModelProfile,
) -> opentelemetry::global::BoxedSpan {
    let tracer = global::tracer("chat-gateway");
    let mut span = tracer.start("gateway.request");
    span.set_attribute(KeyValue::new("request.id", request_id.to_string()));
    span.set_attribute(KeyValue::new("model", model.to_string()));
    span.set_attribute(KeyValue::new("upstream.id", profile.upstream_id.clone()));
    span
}
