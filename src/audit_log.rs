use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::models::{Dialect, UpstreamAttempt};

/// Async JSONL audit writer. One record per inbound request, carrying the
/// ordered sequence of upstream attempts so a failed request can be
/// diagnosed without replaying it.
#[derive(Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<AuditRecord>,
}

impl AuditLogger {
    pub fn new(base_path: String, max_file_bytes: u64) -> Result<Self, String> {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(256);
        tokio::spawn(async move {
            let mut current_path = build_log_path(&base_path);
            let mut file = match open_log_file(&current_path).await {
                Ok(file) => file,
                Err(err) => {
                    tracing::error!("audit log open error: {}", err);
                    return;
                }
            };
            let mut current_size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
            while let Some(record) = rx.recv().await {
                let Ok(line) = serde_json::to_string(&record) else {
                    continue;
                };
                if current_size + line.len() as u64 + 1 > max_file_bytes {
                    current_path = build_log_path(&base_path);
                    match open_log_file(&current_path).await {
                        Ok(new_file) => {
                            file = new_file;
                            current_size = 0;
                        }
                        Err(err) => {
                            tracing::error!("audit log rotate error: {}", err);
                            // keep writing to the old file, but with an
                            // accurate size so the next record re-attempts
                            // rotation from real numbers
                            current_size =
                                file.metadata().await.map(|m| m.len()).unwrap_or(0);
                        }
                    }
                }
                if file.write_all(line.as_bytes()).await.is_err()
                    || file.write_all(b"\n").await.is_err()
                {
                    tracing::error!("audit log write error");
                    continue;
                }
                current_size += line.len() as u64 + 1;
            }
        });
        Ok(Self { sender: tx })
    }

    pub async fn push(&self, record: AuditRecord) {
        let _ = self.sender.send(record).await;
    }
}

#[derive(Clone, Serialize)]
pub struct AuditRecord {
    pub ts_start_ms: u128,
    pub ts_end_ms: u128,
    pub request_id: String,
    pub model_key: String,
    pub upstream_id: String,
    pub dialect: Dialect,
    pub stream: bool,
    pub status: u16,
    pub error_code: Option<&'static str>,
    pub attempts: Vec<UpstreamAttempt>,
}

pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn build_log_path(base: &str) -> String {
    let ts = now_ms();
    if let Some(stripped) = base.strip_suffix(".jsonl") {
        format!("{}.{}.jsonl", stripped, ts)
    } else {
        format!("{}.{}", base, ts)
    }
}

async fn open_log_file(path: &str) -> Result<tokio::fs::File, std::io::Error> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(request_id: &str) -> AuditRecord {
        AuditRecord {
            ts_start_ms: 0,
            ts_end_ms: 1,
            request_id: request_id.to_string(),
            model_key: "chat-default".to_string(),
            upstream_id: "gpt-4o-mini".to_string(),
            dialect: Dialect::ChatJson,
            stream: false,
            status: 200,
            error_code: None,
            attempts: vec![],
        }
    }

    #[tokio::test]
    async fn rotates_when_size_cap_reached() {
        let dir = std::env::temp_dir().join(format!("gateway-audit-test-{}", now_ms()));
        let base = dir.join("audit.jsonl").to_string_lossy().to_string();
        let logger = AuditLogger::new(base, 200).expect("logger");
        for i in 0..4 {
            logger.push(record(&format!("req-{}", i))).await;
            // rotation names files by millisecond; keep them distinct
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let files: Vec<_> = std::fs::read_dir(&dir).expect("audit dir").flatten().collect();
        assert!(
            files.len() >= 2,
            "expected rotation to produce multiple files, got {}",
            files.len()
        );
        for entry in &files {
            let len = entry.metadata().expect("metadata").len();
            assert!(len <= 400, "file grew well past the cap: {} bytes", len);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
