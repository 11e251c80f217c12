use std::path::PathBuf;

use async_trait::async_trait;
use nearby_core::RequestLogEntry;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::StorageError;

/// Append-only analytics sink. Callers treat failures as non-fatal.
#[async_trait]
pub trait RequestLog: Send + Sync {
    async fn log_request(&self, entry: &RequestLogEntry) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct NoopRequestLog;

#[async_trait]
impl RequestLog for NoopRequestLog {
    async fn log_request(&self, _entry: &RequestLogEntry) -> Result<(), StorageError> {
        Ok(())
    }
}

/// One JSON object per line, appended to a single file.
#[derive(Debug)]
pub struct JsonlRequestLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRequestLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RequestLog for JsonlRequestLog {
    async fn log_request(&self, entry: &RequestLogEntry) -> Result<(), StorageError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
