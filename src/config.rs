use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub upstream: UpstreamConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuthConfig {
    /// Shared HMAC-SHA256 secret for caller tokens. Overridable via
    /// GATEWAY_HMAC_SECRET.
    #[serde(default)]
    pub hmac_secret: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    /// Bearer credential sent to upstream providers. Overridable via
    /// UPSTREAM_API_KEY.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ModelsConfig {
    /// Logical key unknown or absent model names degrade to.
    pub default: String,
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProfileConfig {
    pub upstream_id: String,
    /// URL template; `{model}` is substituted with the candidate id.
    pub endpoint: String,
    /// "chat_json" or "raw_template". Inferred from the upstream id shape
    /// when absent.
    #[serde(default)]
    pub dialect: Option<String>,
    #[serde(default = "default_requires_auth_header")]
    pub requires_auth_header: bool,
    #[serde(default)]
    pub fallback_ids: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub dump_upstream: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otlp_grpc: OtlpGrpcConfig,
    #[serde(default)]
    pub exporters: ExportersConfig,
    #[serde(default)]
    pub audit_log: AuditLogConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            dump_upstream: false,
            logging: LoggingConfig::default(),
            otlp_grpc: OtlpGrpcConfig::default(),
            exporters: ExportersConfig::default(),
            audit_log: AuditLogConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtlpGrpcConfig {
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otlp_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OtlpGrpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_otlp_endpoint(),
            timeout_ms: default_otlp_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExportersConfig {
    #[serde(default = "default_exporter_kind")]
    pub tracing: String,
    #[serde(default = "default_exporter_kind")]
    pub metrics: String,
}

impl Default for ExportersConfig {
    fn default() -> Self {
        Self {
            tracing: default_exporter_kind(),
            metrics: default_exporter_kind(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AuditLogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_audit_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            max_file_bytes: default_audit_max_file_bytes(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
            file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let path = std::env::var("CONFIG_PATH")
            .map_err(|_| "CONFIG_PATH is required (strict YAML)".to_string())?;
        let content =
            fs::read_to_string(&path).map_err(|e| format!("CONFIG_PATH read error: {}", e))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .map_err(|e| format!("CONFIG_PATH invalid yaml: {}", e))?;
        if let Ok(secret) = std::env::var("GATEWAY_HMAC_SECRET") {
            config.auth.hmac_secret = secret;
        }
        if let Ok(key) = std::env::var("UPSTREAM_API_KEY") {
            config.upstream.api_key = key;
        }
        config.normalize()?;
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream.read_timeout_ms)
    }

    fn normalize(&mut self) -> Result<(), String> {
        if self.auth.hmac_secret.trim().is_empty() {
            return Err("auth.hmac_secret is required".to_string());
        }
        if self.upstream.api_key.trim().is_empty() {
            return Err("upstream.api_key is required".to_string());
        }
        if self.upstream.max_attempts == 0 {
            return Err("upstream.max_attempts must be at least 1".to_string());
        }
        if !self.models.profiles.contains_key(&self.models.default) {
            return Err(format!(
                "models.default \"{}\" has no profile",
                self.models.default
            ));
        }
        for (key, profile) in &self.models.profiles {
            if let Some(dialect) = &profile.dialect {
                match dialect.as_str() {
                    "chat_json" | "raw_template" => {}
                    other => {
                        return Err(format!("models.profiles.{}.dialect invalid: {}", key, other))
                    }
                }
            }
        }
        self.observability.logging.level = self.observability.logging.level.to_lowercase();
        match self.observability.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(format!("logging.level invalid: {}", other)),
        }
        Ok(())
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    60000
}

fn default_pool_max_idle_per_host() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_requires_auth_header() -> bool {
    true
}

fn default_service_name() -> String {
    "chat-gateway".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otlp_timeout_ms() -> u64 {
    3000
}

fn default_exporter_kind() -> String {
    "otlp_grpc".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_stdout() -> bool {
    true
}

fn default_audit_max_file_bytes() -> u64 {
    64 * 1024 * 1024
}
