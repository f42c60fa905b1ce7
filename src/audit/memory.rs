//! In-memory audit log

use crate::audit::{AuditLog, AuditQuery, AuditRecord};
use crate::error::AppError;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in insertion order
    pub async fn snapshot(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> Result<(), AppError> {
        let mut records = self.records.write().await;
        if records.iter().any(|r| r.id == record.id) {
            return Ok(());
        }
        records.push(record);
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, AppError> {
        let records = self.records.read().await;
        let mut matching: Vec<(usize, &AuditRecord)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| query.matches(r))
            .collect();

        // newest first, later insertion wins a timestamp tie
        matching.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ib.cmp(ia)));

        Ok(matching
            .into_iter()
            .take(query.limit)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::change::ActorRef;
    use chrono::{Duration, Utc};

    fn actor() -> ActorRef {
        ActorRef::new("u1", "alice")
    }

    #[tokio::test]
    async fn test_query_is_newest_first_and_filtered() {
        let log = InMemoryAuditLog::new();
        let base = Utc::now();
        log.record(AuditRecord::new("connection", "c1", AuditAction::Created, &actor()).at(base))
            .await
            .unwrap();
        log.record(
            AuditRecord::new("connection", "c1", AuditAction::Updated, &actor())
                .at(base + Duration::seconds(1)),
        )
        .await
        .unwrap();
        log.record(AuditRecord::new("connection", "c2", AuditAction::Created, &actor()).at(base))
            .await
            .unwrap();

        let history = log.query(&AuditQuery::for_entity("connection", "c1")).await.unwrap();
        let actions: Vec<_> = history.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AuditAction::Updated, AuditAction::Created]);

        let all = log.query(&AuditQuery { limit: 2, ..AuditQuery::default() }).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, AuditAction::Updated);
    }

    #[tokio::test]
    async fn test_replayed_record_is_not_duplicated() {
        let log = InMemoryAuditLog::new();
        let record = AuditRecord::new("pending_change", "p1", AuditAction::Proposed, &actor());
        log.record(record.clone()).await.unwrap();
        log.record(record).await.unwrap();
        assert_eq!(log.snapshot().await.len(), 1);
    }
}
