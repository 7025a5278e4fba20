use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::audit_log::AuditLogger;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::resolve::ModelTable;

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub stream_client: reqwest::Client,
    pub config: Config,
    pub models: Arc<ModelTable>,
    pub inflight_count: Arc<AtomicU64>,
    pub metrics: Metrics,
    pub audit_logger: Option<AuditLogger>,
    pub _tracer_provider: opentelemetry_sdk::trace::SdkTracerProvider,
}

/// Feeds the inflight gauge; purely observational, never admission control.
pub struct InflightGuard {
    counter: Arc<AtomicU64>,
}

impl InflightGuard {
    pub fn new(counter: Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
