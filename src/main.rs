mod audit_log;
mod auth;
mod config;
mod error;
mod extract;
mod handlers;
mod invoke;
mod metrics;
mod models;
mod normalize;
mod resolve;
mod state;
mod streaming;
mod tracing_otlp;
mod translate;

use axum::{
    routing::{get, post},
    Router,
};
use handlers::{health, post_chat, preflight};
use metrics::{init_metrics, init_metrics_noop};
use tracing_otlp::{init_tracer_grpc, init_tracer_noop, spawn_tracer_watchdog};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::audit_log::AuditLogger;
use crate::config::Config;
use crate::resolve::ModelTable;
use crate::state::AppState;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

fn parse_level(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

fn open_log_file(path: &str) -> Option<std::fs::File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            eprintln!("log file create dir error: {}", err);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("log file open error: {}", err);
            None
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("config error: {}", err);
            std::process::exit(1);
        }
    };

    let inflight_count = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let metrics = if config.observability.exporters.metrics == "noop" {
        init_metrics_noop(inflight_count.clone())
    } else {
        match init_metrics(
            config.observability.service_name.clone(),
            config.observability.otlp_grpc.endpoint.clone(),
            config.observability.otlp_grpc.timeout_ms,
            inflight_count.clone(),
        ) {
            Ok(m) => m,
            Err(err) => {
                eprintln!("metrics init error (fallback to noop): {}", err);
                init_metrics_noop(inflight_count.clone())
            }
        }
    };

    let tracer_provider = if config.observability.exporters.tracing == "noop" {
        init_tracer_noop(config.observability.service_name.clone())
    } else {
        match init_tracer_grpc(
            config.observability.otlp_grpc.endpoint.clone(),
            config.observability.service_name.clone(),
            config.observability.otlp_grpc.timeout_ms,
        ) {
            Ok(provider) => provider,
            Err(err) => {
                eprintln!("tracing init error (fallback to noop): {}", err);
                init_tracer_noop(config.observability.service_name.clone())
            }
        }
    };

    let log_level = parse_level(config.observability.logging.level.as_str());
    let file_writer = config
        .observability
        .logging
        .file
        .as_deref()
        .and_then(open_log_file)
        .map(Arc::new);

    let writer = match (config.observability.logging.stdout, file_writer) {
        (true, Some(file)) => BoxMakeWriter::new(std::io::stdout.and(file)),
        (true, None) => BoxMakeWriter::new(std::io::stdout),
        (false, Some(file)) => BoxMakeWriter::new(file),
        (false, None) => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_filter(log_level);

    let telemetry = tracing_opentelemetry::layer();
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(telemetry)
        .init();

    let _tracer_watchdog = spawn_tracer_watchdog(tracer_provider.clone());

    let models = Arc::new(ModelTable::from_config(&config.models));

    let state = AppState {
        client: reqwest::Client::builder()
            .pool_max_idle_per_host(config.upstream.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .unwrap_or_else(|e| {
                eprintln!("client build error: {}", e);
                std::process::exit(1);
            }),
        stream_client: reqwest::Client::builder()
            .pool_max_idle_per_host(config.upstream.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|e| {
                eprintln!("stream client build error: {}", e);
                std::process::exit(1);
            }),
        config: config.clone(),
        models,
        inflight_count,
        metrics,
        audit_logger: if config.observability.audit_log.enabled {
            match config.observability.audit_log.path.as_deref() {
                Some(path) => AuditLogger::new(
                    path.to_string(),
                    config.observability.audit_log.max_file_bytes,
                )
                .ok(),
                None => None,
            }
        } else {
            None
        },
        _tracer_provider: tracer_provider,
    };

    let app = Router::new()
        .route("/", post(post_chat).options(preflight))
        .route("/health", get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("bind error: {}", e);
            std::process::exit(1);
        });

    tracing::info!("listening on {}", config.server.bind_addr);
    axum::serve(listener, app).await.unwrap();
}
