//! In-memory version store for tests and development

use crate::entity::Document;
use crate::error::AppError;
use crate::versioning::{
    checksum, render_snapshot, snapshot_filename, CommitLogEntry, SnapshotFile, VersionStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Repo {
    files: BTreeMap<String, String>,
    commits: Vec<CommitLogEntry>,
}

#[derive(Default)]
pub struct InMemoryVersionStore {
    repo: RwLock<Repo>,
    unavailable: AtomicBool,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `ExternalStoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::ExternalStoreUnavailable(
                "version store is offline".to_string(),
            ));
        }
        Ok(())
    }
}

fn record_commit(repo: &mut Repo, message: &str) -> String {
    let hash = Uuid::new_v4().simple().to_string();
    repo.commits.push(CommitLogEntry {
        commit_hash: hash.clone(),
        author: "in-memory".to_string(),
        email: "in-memory@localhost".to_string(),
        date: Utc::now().to_rfc2822(),
        message: message.to_string(),
    });
    hash
}

fn snapshot(filename: &str, content: &str) -> Result<SnapshotFile, AppError> {
    Ok(SnapshotFile {
        filename: filename.to_string(),
        entity_id: filename.trim_end_matches(".json").to_string(),
        checksum: checksum(content),
        content: serde_json::from_str(content)?,
    })
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn commit(
        &self,
        entity_id: &str,
        body: &Document,
        message: &str,
    ) -> Result<Option<String>, AppError> {
        self.ensure_available()?;
        let filename = snapshot_filename(entity_id)?;
        let content = render_snapshot(body)?;

        let mut repo = self.repo.write().await;
        if repo.files.get(&filename) == Some(&content) {
            return Ok(None);
        }
        repo.files.insert(filename, content);
        Ok(Some(record_commit(&mut repo, message)))
    }

    async fn remove(&self, entity_id: &str, message: &str) -> Result<Option<String>, AppError> {
        self.ensure_available()?;
        let filename = snapshot_filename(entity_id)?;

        let mut repo = self.repo.write().await;
        if repo.files.remove(&filename).is_none() {
            return Ok(None);
        }
        Ok(Some(record_commit(&mut repo, message)))
    }

    async fn push(&self) -> Result<String, AppError> {
        self.ensure_available()?;
        Ok("Everything up-to-date".to_string())
    }

    async fn pull(&self) -> Result<String, AppError> {
        self.ensure_available()?;
        Ok("Already up to date.".to_string())
    }

    async fn log(&self, limit: usize) -> Result<Vec<CommitLogEntry>, AppError> {
        self.ensure_available()?;
        let repo = self.repo.read().await;
        Ok(repo.commits.iter().rev().take(limit).cloned().collect())
    }

    async fn list(&self) -> Result<Vec<SnapshotFile>, AppError> {
        self.ensure_available()?;
        let repo = self.repo.read().await;
        repo.files
            .iter()
            .map(|(name, content)| snapshot(name, content))
            .collect()
    }

    async fn read(&self, entity_id: &str) -> Result<SnapshotFile, AppError> {
        self.ensure_available()?;
        let filename = snapshot_filename(entity_id)?;
        let repo = self.repo.read().await;
        let content = repo
            .files
            .get(&filename)
            .ok_or_else(|| AppError::NotFound(format!("Snapshot {} not found", filename)))?;
        snapshot(&filename, content)
    }

    async fn status(&self) -> Result<String, AppError> {
        self.ensure_available()?;
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_commit_is_noop() {
        let store = InMemoryVersionStore::new();
        let doc = body(json!({"id": "c1", "endpoint_name": "X"}));
        assert!(store.commit("c1", &doc, "Create").await.unwrap().is_some());
        assert!(store.commit("c1", &doc, "Again").await.unwrap().is_none());
        assert_eq!(store.log(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_read() {
        let store = InMemoryVersionStore::new();
        store
            .commit("c1", &body(json!({"id": "c1"})), "Create")
            .await
            .unwrap();
        assert_eq!(store.read("c1").await.unwrap().content["id"], "c1");

        assert!(store.remove("c1", "Delete").await.unwrap().is_some());
        assert!(store.remove("c1", "Delete").await.unwrap().is_none());
        assert!(matches!(store.read("c1").await, Err(AppError::NotFound(_))));

        let log = store.log(10).await.unwrap();
        assert_eq!(log[0].message, "Delete");
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemoryVersionStore::new();
        store.set_unavailable(true);
        let err = store.commit("c1", &Document::new(), "x").await.unwrap_err();
        assert!(matches!(err, AppError::ExternalStoreUnavailable(_)));
    }
}
