use axum::{
    body::Bytes,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use opentelemetry::KeyValue;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::state::{AppState, InflightGuard};

/// Relays an upstream byte stream to the caller verbatim and unbuffered.
///
/// No interpretation of the stream framing happens here; malformed upstream
/// framing is the caller's problem to detect. A failed channel send means
/// the client connection is gone, which drops the upstream response and
/// cancels the in-flight read.
pub fn relay_stream(
    state: &AppState,
    upstream: reqwest::Response,
    guard: InflightGuard,
    request_id: String,
    start: Instant,
) -> Response {
    let mut stream = upstream.bytes_stream();
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::convert::Infallible>>(64);
    let metrics = state.metrics.clone();

    tokio::spawn(async move {
        let _guard = guard;
        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        request_id = %request_id,
                        "upstream stream error: {}",
                        err
                    );
                    metrics
                        .errors
                        .add(1, &[KeyValue::new("type", "UpstreamUnavailable")]);
                    return;
                }
            };
            if tx.send(Ok(bytes)).await.is_err() {
                tracing::debug!(
                    request_id = %request_id,
                    "client disconnected, dropping upstream stream"
                );
                return;
            }
        }
        metrics.latency_ms.record(
            start.elapsed().as_millis() as f64,
            &[KeyValue::new("stream", "true")],
        );
        tracing::info!(
            request_id = %request_id,
            latency_ms = start.elapsed().as_millis(),
            "stream completed"
        );
    });

    let body = axum::body::Body::from_stream(ReceiverStream::new(rx));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
