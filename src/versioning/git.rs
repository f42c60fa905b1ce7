//! Git-backed version store
//!
//! Shells out to the `git` binary. Every invocation is bounded by the
//! configured timeout and every mutating sequence runs under one write lock
//! per repository root. The remote is only touched by explicit push/pull, and
//! the access token reaches git through a per-invocation credential helper so
//! it is never written into `.git/config`.

use crate::config::VersionStoreConfig;
use crate::entity::Document;
use crate::error::AppError;
use crate::versioning::{
    checksum, render_snapshot, snapshot_filename, CommitLogEntry, SnapshotFile, VersionStore,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use url::Url;

const REMOTE_NAME: &str = "origin";

/// Env var the credential helper reads the token from
const TOKEN_ENV: &str = "SWITCHGATE_GIT_TOKEN";

/// Answers git's `get` request with the token from `TOKEN_ENV`
const CREDENTIAL_HELPER: &str = "credential.helper=!f() { if test \"$1\" = get; then \
     printf 'username=x-access-token\\npassword=%s\\n' \"$SWITCHGATE_GIT_TOKEN\"; fi; }; f";

pub struct GitVersionStore {
    config: VersionStoreConfig,
    initialized: OnceCell<()>,
    remote: OnceCell<()>,
    write_lock: Mutex<()>,
    /// Set when a git process was killed on timeout and may have left `index.lock`
    timed_out: AtomicBool,
}

impl GitVersionStore {
    pub fn new(config: VersionStoreConfig) -> Self {
        Self {
            config,
            initialized: OnceCell::new(),
            remote: OnceCell::new(),
            write_lock: Mutex::new(()),
            timed_out: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Path {
        &self.config.repo_path
    }

    fn path_of(&self, filename: &str) -> PathBuf {
        self.config.repo_path.join(filename)
    }

    /// Run git and return its raw output, whatever the exit status
    async fn run(&self, args: &[&str]) -> Result<Output, AppError> {
        self.run_with_env(args, &[]).await
    }

    async fn run_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<Output, AppError> {
        debug!("git {}", subcommand(args));
        let child = Command::new("git")
            .args(args)
            .envs(envs.iter().copied())
            .current_dir(&self.config.repo_path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", &self.config.author_name)
            .env("GIT_AUTHOR_EMAIL", &self.config.author_email)
            .env("GIT_COMMITTER_NAME", &self.config.author_name)
            .env("GIT_COMMITTER_EMAIL", &self.config.author_email)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("failed to run git: {}", e)))?;

        match tokio::time::timeout(self.config.timeout(), child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| unavailable(format!("failed to run git: {}", e))),
            Err(_) => {
                // the child is killed on drop, possibly while holding index.lock
                self.timed_out.store(true, Ordering::SeqCst);
                Err(unavailable(format!(
                    "git {} timed out after {}s",
                    subcommand(args),
                    self.config.timeout_secs
                )))
            }
        }
    }

    /// Run git and require success, returning stdout
    async fn git(&self, args: &[&str]) -> Result<String, AppError> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(unavailable(format!(
                "git {} failed: {}",
                subcommand(args),
                self.scrub(String::from_utf8_lossy(&output.stderr).trim())
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Drop an `index.lock` left behind by a git process we killed on timeout.
    /// Callers hold `write_lock`, so no git process of ours owns the lock.
    async fn clear_stale_index_lock(&self) {
        if !self.timed_out.swap(false, Ordering::SeqCst) {
            return;
        }
        let lock = self.config.repo_path.join(".git").join("index.lock");
        match fs::remove_file(&lock).await {
            Ok(()) => warn!("Removed stale {} left by a timed out git command", lock.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove stale {}: {}", lock.display(), e),
        }
    }

    /// Put the index entry for `filename` back to HEAD after a failed commit,
    /// so the change is not swept into the next unrelated commit.
    async fn unstage(&self, filename: &str) {
        self.clear_stale_index_lock().await;
        let result = match self.has_commits().await {
            Ok(true) => self.git(&["reset", "--quiet", "--", filename]).await,
            Ok(false) => {
                self.git(&["rm", "--quiet", "--cached", "--ignore-unmatch", "--", filename])
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Could not unstage {} after a failed commit: {}", filename, e);
        }
    }

    /// Commit whatever is staged for `filename`, or nothing if it is unchanged
    async fn commit_path(&self, filename: &str, message: &str) -> Result<Option<String>, AppError> {
        if self.staged_clean(filename).await? {
            return Ok(None);
        }
        self.commit_staged(message).await.map(Some)
    }

    async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.initialized
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.config.repo_path)
                    .await
                    .map_err(|e| unavailable(format!("cannot create repository root: {}", e)))?;

                if !self.config.repo_path.join(".git").exists() {
                    self.git(&["init", "--quiet"]).await?;
                    let head = format!("refs/heads/{}", self.config.branch);
                    self.git(&["symbolic-ref", "HEAD", &head]).await?;
                    info!("Initialized version store at {}", self.root().display());
                }
                self.git(&["config", "user.name", &self.config.author_name]).await?;
                self.git(&["config", "user.email", &self.config.author_email]).await?;
                Ok::<(), AppError>(())
            })
            .await
            .map(|_| ())
    }

    /// Remote URL as stored in the repository config, without credentials
    fn remote_url(&self) -> Result<String, AppError> {
        let raw = self
            .config
            .remote_url
            .as_deref()
            .ok_or_else(|| unavailable("no remote configured (GIT_REMOTE_URL)".to_string()))?;
        let url = Url::parse(raw).map_err(|e| AppError::Config(format!("Invalid GIT_REMOTE_URL: {}", e)))?;
        Ok(url.to_string())
    }

    /// Leading `-c` options that hand the token to git for one invocation
    fn credential_args(&self) -> Vec<&'static str> {
        match self.token() {
            // the empty helper resets any helper configured elsewhere
            Some(_) => vec!["-c", "credential.helper=", "-c", CREDENTIAL_HELPER],
            None => Vec::new(),
        }
    }

    fn token(&self) -> Option<&str> {
        self.config.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Run a remote operation with the token supplied through the environment
    async fn run_remote(&self, args: &[&str]) -> Result<Output, AppError> {
        let mut full: Vec<&str> = self.credential_args();
        full.extend_from_slice(args);
        match self.token() {
            Some(token) => self.run_with_env(&full, &[(TOKEN_ENV, token)]).await,
            None => self.run(&full).await,
        }
    }

    async fn ensure_remote(&self) -> Result<(), AppError> {
        let url = self.remote_url()?;
        self.remote
            .get_or_try_init(|| async {
                let existing = self.run(&["remote", "get-url", REMOTE_NAME]).await?;
                if existing.status.success() {
                    self.git(&["remote", "set-url", REMOTE_NAME, &url]).await?;
                } else {
                    self.git(&["remote", "add", REMOTE_NAME, &url]).await?;
                }
                info!("Configured version store remote");
                Ok::<(), AppError>(())
            })
            .await
            .map(|_| ())
    }

    /// True when nothing is staged for `filename`
    async fn staged_clean(&self, filename: &str) -> Result<bool, AppError> {
        let output = self
            .run(&["diff", "--cached", "--quiet", "--", filename])
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(unavailable(format!(
                "git diff failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn commit_staged(&self, message: &str) -> Result<String, AppError> {
        self.git(&["-c", "commit.gpgsign=false", "commit", "--quiet", "-m", message])
            .await?;
        let hash = self.git(&["rev-parse", "HEAD"]).await?;
        Ok(hash.trim().to_string())
    }

    async fn has_commits(&self) -> Result<bool, AppError> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"]).await?;
        Ok(output.status.success())
    }

    /// Hide the token in anything surfaced to callers or logs
    fn scrub(&self, text: &str) -> String {
        match self.token() {
            Some(token) => text.replace(token, "***"),
            None => text.to_string(),
        }
    }

    fn combined_output(&self, output: &str, stderr: &str) -> String {
        let text = format!("{}{}", output, stderr);
        self.scrub(text.trim())
    }
}

/// First real git subcommand, skipping leading `-c key=value` options
fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        return arg;
    }
    ""
}

fn unavailable(message: String) -> AppError {
    AppError::ExternalStoreUnavailable(message)
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AppError {
    unavailable(format!("cannot {} {}: {}", action, path.display(), e))
}

fn parse_log_line(line: &str) -> Option<CommitLogEntry> {
    let mut parts = line.splitn(5, '|');
    Some(CommitLogEntry {
        commit_hash: parts.next()?.to_string(),
        author: parts.next()?.to_string(),
        email: parts.next()?.to_string(),
        date: parts.next()?.to_string(),
        message: parts.next().unwrap_or_default().to_string(),
    })
}

fn parse_snapshot(filename: &str, content: &str) -> Result<SnapshotFile, serde_json::Error> {
    Ok(SnapshotFile {
        filename: filename.to_string(),
        entity_id: filename.trim_end_matches(".json").to_string(),
        checksum: checksum(content),
        content: serde_json::from_str(content)?,
    })
}

#[async_trait]
impl VersionStore for GitVersionStore {
    async fn commit(
        &self,
        entity_id: &str,
        body: &Document,
        message: &str,
    ) -> Result<Option<String>, AppError> {
        let filename = snapshot_filename(entity_id)?;
        let content = render_snapshot(body)?;
        self.ensure_initialized().await?;

        let _guard = self.write_lock.lock().await;
        self.clear_stale_index_lock().await;
        let path = self.path_of(&filename);
        fs::write(&path, content)
            .await
            .map_err(|e| io_error("write", &path, e))?;

        let staged = match self.git(&["add", "--", &filename]).await {
            Ok(_) => self.commit_path(&filename, message).await,
            Err(e) => Err(e),
        };
        match staged {
            Ok(Some(hash)) => {
                info!("Committed {} as {}", filename, hash);
                Ok(Some(hash))
            }
            Ok(None) => {
                debug!("Snapshot {} unchanged, nothing to commit", filename);
                Ok(None)
            }
            Err(e) => {
                self.unstage(&filename).await;
                Err(e)
            }
        }
    }

    async fn remove(&self, entity_id: &str, message: &str) -> Result<Option<String>, AppError> {
        let filename = snapshot_filename(entity_id)?;
        self.ensure_initialized().await?;

        let _guard = self.write_lock.lock().await;
        self.clear_stale_index_lock().await;
        let path = self.path_of(&filename);
        self.git(&["rm", "--quiet", "--cached", "--ignore-unmatch", "--", &filename])
            .await?;
        let removed = match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        };

        let staged = match removed {
            Ok(()) => self.commit_path(&filename, message).await,
            Err(e) => Err(e),
        };
        match staged {
            Ok(Some(hash)) => {
                info!("Removed {} in {}", filename, hash);
                Ok(Some(hash))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.unstage(&filename).await;
                Err(e)
            }
        }
    }

    async fn push(&self) -> Result<String, AppError> {
        self.ensure_initialized().await?;
        self.ensure_remote().await?;

        let _guard = self.write_lock.lock().await;
        let output = self
            .run_remote(&["push", "--set-upstream", REMOTE_NAME, &self.config.branch])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(unavailable(format!("git push failed: {}", self.scrub(stderr.trim()))));
        }
        info!("Pushed version store to remote");
        Ok(self.combined_output(&stdout, &stderr))
    }

    async fn pull(&self) -> Result<String, AppError> {
        self.ensure_initialized().await?;
        self.ensure_remote().await?;

        let _guard = self.write_lock.lock().await;
        self.clear_stale_index_lock().await;
        let output = self
            .run_remote(&["pull", "--ff-only", REMOTE_NAME, &self.config.branch])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(unavailable(format!("git pull failed: {}", self.scrub(stderr.trim()))));
        }
        info!("Pulled version store from remote");
        Ok(self.combined_output(&stdout, &stderr))
    }

    async fn log(&self, limit: usize) -> Result<Vec<CommitLogEntry>, AppError> {
        self.ensure_initialized().await?;
        if !self.has_commits().await? {
            return Ok(Vec::new());
        }

        let limit = format!("-{}", limit);
        let stdout = self
            .git(&["log", &limit, "--pretty=format:%H|%an|%ae|%ad|%s"])
            .await?;
        Ok(stdout.lines().filter_map(parse_log_line).collect())
    }

    async fn list(&self) -> Result<Vec<SnapshotFile>, AppError> {
        self.ensure_initialized().await?;

        let root = self.root();
        let mut dir = fs::read_dir(root)
            .await
            .map_err(|e| io_error("read", root, e))?;
        let mut files = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error("read", root, e))?
        {
            let filename = entry.file_name().to_string_lossy().to_string();
            if !filename.ends_with(".json") {
                continue;
            }
            let content = match fs::read_to_string(entry.path()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("Skipping unreadable snapshot {}: {}", filename, e);
                    continue;
                }
            };
            match parse_snapshot(&filename, &content) {
                Ok(snapshot) => files.push(snapshot),
                Err(e) => warn!("Skipping corrupt snapshot {}: {}", filename, e),
            }
        }
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }

    async fn read(&self, entity_id: &str) -> Result<SnapshotFile, AppError> {
        let filename = snapshot_filename(entity_id)?;
        let path = self.path_of(&filename);
        let content = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Snapshot {} not found", filename)));
            }
            Err(e) => return Err(io_error("read", &path, e)),
        };
        parse_snapshot(&filename, &content).map_err(|e| {
            AppError::Internal(format!("Snapshot {} is not valid JSON: {}", filename, e))
        })
    }

    async fn status(&self) -> Result<String, AppError> {
        self.ensure_initialized().await?;
        // status refreshes the index, so it takes the write lock too
        let _guard = self.write_lock.lock().await;
        self.clear_stale_index_lock().await;
        self.git(&["status", "--short"]).await
    }
}
