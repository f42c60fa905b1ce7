//! Durable audit spool
//!
//! Wraps a backend audit log with a local JSON-lines file. A record the
//! backend refuses is appended to the spool and replayed later, giving
//! at-least-once delivery. Backends ignore replays of an id they already hold.

use crate::audit::{AuditLog, AuditQuery, AuditRecord};
use crate::error::AppError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of one replay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub remaining: usize,
    pub dropped: usize,
}

pub struct SpooledAuditLog {
    inner: Arc<dyn AuditLog>,
    path: PathBuf,
    /// Guards every read or write of the spool file
    spool: Mutex<()>,
}

impl SpooledAuditLog {
    pub fn new(inner: Arc<dyn AuditLog>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            spool: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &AuditRecord) -> Result<(), AppError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.spool.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| spool_error("open", &self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| spool_error("append to", &self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| spool_error("sync", &self.path, e))?;
        Ok(())
    }

    /// Replay spooled records into the backend
    pub async fn flush(&self) -> Result<FlushReport, AppError> {
        let _guard = self.spool.lock().await;

        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FlushReport::default()),
            Err(e) => return Err(spool_error("read", &self.path, e)),
        };

        let mut report = FlushReport::default();
        let mut kept = String::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let record: AuditRecord = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    error!("Dropping unreadable audit spool line: {}", e);
                    report.dropped += 1;
                    continue;
                }
            };
            match self.inner.record(record).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("Audit backend still unavailable: {}", e);
                    kept.push_str(line);
                    kept.push('\n');
                    report.remaining += 1;
                }
            }
        }

        if report.remaining == 0 {
            fs::remove_file(&self.path)
                .await
                .map_err(|e| spool_error("remove", &self.path, e))?;
        } else {
            let tmp = self.path.with_extension("jsonl.tmp");
            fs::write(&tmp, kept.as_bytes())
                .await
                .map_err(|e| spool_error("write", &tmp, e))?;
            fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| spool_error("replace", &self.path, e))?;
        }

        if report.delivered > 0 {
            info!(
                "Replayed {} spooled audit record(s), {} still pending",
                report.delivered, report.remaining
            );
        }
        Ok(report)
    }

    /// Periodically replay the spool until the returned task is aborted
    pub fn spawn_flusher(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.flush().await {
                    error!("Audit spool flush failed: {}", e);
                }
            }
        })
    }
}

fn spool_error(op: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::Internal(format!(
        "Failed to {} audit spool {}: {}",
        op,
        path.display(),
        e
    ))
}

#[async_trait]
impl AuditLog for SpooledAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError> {
        match self.inner.record(record.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    "Audit backend rejected record {} ({}), spooling locally",
                    record.id, e
                );
                self.append(&record).await
            }
        }
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AppError> {
        if let Err(e) = self.flush().await {
            warn!("Audit spool flush before query failed: {}", e);
        }
        self.inner.query(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, InMemoryAuditLog};
    use crate::change::ActorRef;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that can be switched offline
    struct FlakyAuditLog {
        online: AtomicBool,
        inner: InMemoryAuditLog,
    }

    #[async_trait]
    impl AuditLog for FlakyAuditLog {
        async fn record(&self, record: AuditRecord) -> Result<(), AppError> {
            if !self.online.load(Ordering::SeqCst) {
                return Err(AppError::Internal("backend offline".to_string()));
            }
            self.inner.record(record).await
        }

        async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AppError> {
            self.inner.query(query).await
        }
    }

    fn record(id: &str) -> AuditRecord {
        AuditRecord::new("connection", id, AuditAction::Created, &ActorRef::new("u1", "bob"))
    }

    #[tokio::test]
    async fn test_offline_backend_spools_then_replays() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FlakyAuditLog {
            online: AtomicBool::new(false),
            inner: InMemoryAuditLog::new(),
        });
        let spooled = SpooledAuditLog::new(backend.clone(), dir.path().join("audit.jsonl"));

        tokio_test::assert_ok!(spooled.record(record("c1")).await);
        tokio_test::assert_ok!(spooled.record(record("c2")).await);
        assert!(spooled.path().exists());

        let report = spooled.flush().await.unwrap();
        assert_eq!(report, FlushReport { delivered: 0, remaining: 2, dropped: 0 });

        backend.online.store(true, Ordering::SeqCst);
        let report = spooled.flush().await.unwrap();
        assert_eq!(report.delivered, 2);
        assert!(!spooled.path().exists());

        let stored = spooled.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let good = serde_json::to_string(&record("c1")).unwrap();
        std::fs::write(&path, format!("{{not json\n{}\n", good)).unwrap();

        let spooled = SpooledAuditLog::new(Arc::new(InMemoryAuditLog::new()), &path);
        let report = spooled.flush().await.unwrap();
        assert_eq!(report, FlushReport { delivered: 1, remaining: 0, dropped: 1 });
    }
}
