//! Optional append-only prediction log
//!
//! Each successful prediction becomes one JSON line. The submitted text is
//! never written. Write failures mark the log disconnected and are
//! reported to the caller, which logs and moves on. Async callers go
//! through [`PredictionLog::record`], which writes on the blocking pool.

use chrono::{DateTime, Utc};
use medtriage_core::ClassificationResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Prediction log errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("prediction log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prediction log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("prediction log writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// One line of the prediction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub predicted_class: String,
    pub confidence: f64,
    pub source: String,
    pub latency_ms: f64,
}

impl PredictionRecord {
    pub fn new(result: &ClassificationResult, latency: Duration) -> Self {
        Self {
            id: format!("pred_{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            predicted_class: result.predicted_class.as_str().to_string(),
            confidence: result.confidence,
            source: result.source.as_str().to_string(),
            latency_ms: latency.as_secs_f64() * 1000.0,
        }
    }
}

/// JSON-lines prediction log
pub struct PredictionLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    connected: AtomicBool,
}

impl PredictionLog {
    /// Open (or create) the log file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Prediction log opened at {}", path.display());
        metrics::gauge!(crate::metrics::STORAGE_CONNECTED).set(1.0);

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            connected: AtomicBool::new(true),
        })
    }

    /// Append one record and flush it
    pub fn append(&self, record: &PredictionRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;

        let outcome = {
            let mut writer = self.writer.lock();
            writeln!(writer, "{}", line).and_then(|_| writer.flush())
        };

        match outcome {
            Ok(()) => {
                if !self.connected.swap(true, Ordering::Relaxed) {
                    info!("Prediction log writable again");
                    metrics::gauge!(crate::metrics::STORAGE_CONNECTED).set(1.0);
                }
                Ok(())
            }
            Err(e) => {
                if self.connected.swap(false, Ordering::Relaxed) {
                    warn!(error = %e, "Prediction log write failed");
                    metrics::gauge!(crate::metrics::STORAGE_CONNECTED).set(0.0);
                }
                Err(e.into())
            }
        }
    }

    /// Append one record without blocking the async runtime
    pub async fn record(self: Arc<Self>, record: PredictionRecord) -> Result<(), SinkError> {
        tokio::task::spawn_blocking(move || self.append(&record)).await?
    }

    /// Whether the last write succeeded
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medtriage_core::Category;

    #[test]
    fn test_append_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/predictions.jsonl");
        let log = PredictionLog::open(&path).unwrap();

        let result = ClassificationResult::from_rule(Category::Cancers, 0.85);
        log.append(&PredictionRecord::new(&result, Duration::from_millis(3)))
            .unwrap();
        log.append(&PredictionRecord::new(&result, Duration::from_millis(4)))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: PredictionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record.predicted_class, "Cancers");
        assert_eq!(record.source, "rules");
        assert!(record.id.starts_with("pred_"));
        assert!(log.is_connected());
    }

    #[tokio::test]
    async fn test_record_from_async_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.jsonl");
        let log = Arc::new(PredictionLog::open(&path).unwrap());

        let result = ClassificationResult::from_rule(Category::CardiovascularDiseases, 0.8);
        let record = PredictionRecord::new(&result, Duration::from_millis(2));
        log.clone().record(record).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let record: PredictionRecord = serde_json::from_str(content.trim_end()).unwrap();
        assert_eq!(record.predicted_class, "Cardiovascular Diseases");
        assert!(log.is_connected());
    }
}
