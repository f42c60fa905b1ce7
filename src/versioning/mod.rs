//! Version store
//!
//! Keeps one pretty-printed JSON snapshot per applied entity under a
//! versioned root, so that every approved change leaves a commit behind.
//! The store may lag the entity repository when it is unavailable.

mod git;
mod memory;

pub use git::GitVersionStore;
pub use memory::InMemoryVersionStore;

use crate::entity::Document;
use crate::error::AppError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

static SNAPSHOT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid snapshot id pattern"));

/// Default number of commits returned by `log`
pub const DEFAULT_LOG_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitLogEntry {
    pub commit_hash: String,
    pub author: String,
    pub email: String,
    pub date: String,
    pub message: String,
}

/// One stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotFile {
    pub filename: String,
    pub entity_id: String,
    pub checksum: String,
    pub content: Value,
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Write and commit the snapshot of an entity.
    ///
    /// Returns the new commit id, or `None` when the content was unchanged.
    async fn commit(
        &self,
        entity_id: &str,
        body: &Document,
        message: &str,
    ) -> Result<Option<String>, AppError>;

    /// Remove the snapshot of an entity. `None` if there was nothing to remove.
    async fn remove(&self, entity_id: &str, message: &str) -> Result<Option<String>, AppError>;

    async fn push(&self) -> Result<String, AppError>;

    async fn pull(&self) -> Result<String, AppError>;

    /// Commits, newest first
    async fn log(&self, limit: usize) -> Result<Vec<CommitLogEntry>, AppError>;

    async fn list(&self) -> Result<Vec<SnapshotFile>, AppError>;

    async fn read(&self, entity_id: &str) -> Result<SnapshotFile, AppError>;

    /// Short working tree status
    async fn status(&self) -> Result<String, AppError>;
}

/// File name of an entity snapshot, rejecting ids unsafe as path components
pub fn snapshot_filename(entity_id: &str) -> Result<String, AppError> {
    if !SNAPSHOT_ID.is_match(entity_id) {
        return Err(AppError::Validation(format!(
            "Entity id '{}' cannot be used as a snapshot name",
            entity_id
        )));
    }
    Ok(format!("{}.json", entity_id))
}

/// Pretty-printed snapshot content, newline terminated
pub fn render_snapshot(body: &Document) -> Result<String, AppError> {
    let mut rendered = serde_json::to_string_pretty(body)?;
    rendered.push('\n');
    Ok(rendered)
}

pub fn checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_filename() {
        assert_eq!(
            snapshot_filename("0b6c1a52-5f0e-4f7c-9a3e-0c1d2e3f4a5b").unwrap(),
            "0b6c1a52-5f0e-4f7c-9a3e-0c1d2e3f4a5b.json"
        );
        assert!(snapshot_filename("../etc/passwd").is_err());
        assert!(snapshot_filename("").is_err());
        assert!(snapshot_filename(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(checksum("abc"), checksum("abc"));
        assert_eq!(checksum("abc").len(), 64);
        assert_ne!(checksum("abc"), checksum("abd"));
    }
}
