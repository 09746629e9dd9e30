// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session Workspace Manager
//!
//! Materializes one isolated git checkout per (project, session), cut from a
//! base branch onto a session branch, and tracks session metadata in memory.
//!
//! The in-memory map is a cache of what is on disk. After a restart it is
//! empty; [`SessionWorkspaceManager::adopt`] re-registers a workspace that
//! still validates.
//!
//! Operations that change a workspace directory run under a per-session
//! lock, so two callers racing on one session never clone over each other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::git::{GitWorkspace, sanitize_remote_url};
use crate::session::{SessionMetadata, SessionStatus, session_branch_name, session_segment};

/// Placeholder replaced by the project id in [`WorkspaceManagerConfig::remote_template`].
pub const PROJECT_ID_PLACEHOLDER: &str = "{project_id}";

/// Configuration for the session workspace manager.
#[derive(Debug, Clone)]
pub struct WorkspaceManagerConfig {
    /// Root directory holding `project-{id}/session-{id}` checkouts.
    pub workspaces_dir: PathBuf,
    /// Remote URL template, e.g. `https://github.com/acme/project-{project_id}.git`.
    pub remote_template: Option<String>,
    /// Token injected into HTTPS remotes for clone/fetch/push.
    pub token: Option<String>,
}

impl Default for WorkspaceManagerConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: PathBuf::from(".data/workspaces"),
            remote_template: None,
            token: None,
        }
    }
}

type SessionKey = (u64, String);

/// Creates, validates and tears down per-session git workspaces.
pub struct SessionWorkspaceManager {
    config: WorkspaceManagerConfig,
    git: GitWorkspace,
    sessions: RwLock<HashMap<SessionKey, SessionMetadata>>,
    locks: Mutex<HashMap<SessionKey, Arc<Mutex<()>>>>,
}

/// Outcome of [`SessionWorkspaceManager::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A valid workspace was already on disk.
    Reused,
    /// The workspace was cloned (replacing anything invalid at the path).
    Created,
}

impl SessionWorkspaceManager {
    /// Create a manager. A relative `workspaces_dir` is resolved against the
    /// current directory so recorded paths are absolute.
    pub fn new(mut config: WorkspaceManagerConfig, git: GitWorkspace) -> Self {
        if config.workspaces_dir.is_relative()
            && let Ok(cwd) = std::env::current_dir()
        {
            config.workspaces_dir = cwd.join(&config.workspaces_dir);
        }
        Self {
            config,
            git,
            sessions: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Git service used for all workspace operations.
    pub fn git(&self) -> &GitWorkspace {
        &self.git
    }

    /// Token for remote operations, if configured.
    pub fn token(&self) -> Option<&str> {
        self.config.token.as_deref()
    }

    /// Remote URL for a project (without credentials).
    pub fn remote_url(&self, project_id: u64) -> Result<String> {
        let template = self
            .config
            .remote_template
            .as_deref()
            .ok_or_else(|| Error::NoRemote(format!("project {project_id}")))?;
        Ok(template.replace(PROJECT_ID_PLACEHOLDER, &project_id.to_string()))
    }

    /// Workspace directory for a session. Pure path composition.
    pub fn path_for(&self, project_id: u64, session_id: &str) -> PathBuf {
        self.config
            .workspaces_dir
            .join(format!("project-{project_id}"))
            .join(format!("session-{}", session_segment(session_id)))
    }

    /// Exclusive hold on one session's workspace directory.
    pub async fn lock_session(&self, project_id: u64, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .await
            .entry((project_id, session_id.to_string()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Reuse the session's workspace if it validates, otherwise clean the
    /// path and create it from `base_branch`. Concurrent calls for one
    /// session run one at a time; later callers reuse what the first built.
    pub async fn ensure(
        &self,
        project_id: u64,
        session_id: &str,
        base_branch: &str,
    ) -> Result<(PathBuf, EnsureOutcome)> {
        let _guard = self.lock_session(project_id, session_id).await;

        if self.validate(project_id, session_id).await {
            let meta = self.adopt(project_id, session_id, base_branch).await?;
            return Ok((meta.workspace_path, EnsureOutcome::Reused));
        }

        if self.cleanup_unlocked(project_id, session_id).await? {
            warn!(
                project_id,
                session_id = %session_id,
                "Replaced invalid session workspace"
            );
        }
        let path = self
            .create_unlocked(project_id, session_id, base_branch)
            .await?;
        Ok((path, EnsureOutcome::Created))
    }

    /// Clone the project, cut the session branch from `base_branch` and record it.
    ///
    /// A missing base branch only produces a warning; the session branch is
    /// then cut from whatever the clone checked out. On any failure the
    /// partially built directory is removed before the error is returned.
    pub async fn create(
        &self,
        project_id: u64,
        session_id: &str,
        base_branch: &str,
    ) -> Result<PathBuf> {
        let _guard = self.lock_session(project_id, session_id).await;
        self.create_unlocked(project_id, session_id, base_branch)
            .await
    }

    async fn create_unlocked(
        &self,
        project_id: u64,
        session_id: &str,
        base_branch: &str,
    ) -> Result<PathBuf> {
        let path = self.path_for(project_id, session_id);
        let remote = self.remote_url(project_id)?;

        if path.exists() {
            warn!(
                project_id,
                session_id = %session_id,
                path = %path.display(),
                "Removing stale workspace directory before create"
            );
            remove_dir_if_exists(&path).await?;
        }

        let branch = session_branch_name(session_id);
        if let Err(e) = self
            .materialize(&remote, &path, base_branch, &branch)
            .await
        {
            if let Err(cleanup_err) = remove_dir_if_exists(&path).await {
                warn!(
                    path = %path.display(),
                    error = %cleanup_err,
                    "Failed to remove partial workspace"
                );
            }
            return Err(e);
        }

        let metadata = SessionMetadata {
            project_id,
            session_id: session_id.to_string(),
            workspace_path: path.clone(),
            branch: branch.clone(),
            base_branch: base_branch.to_string(),
            created_at: Utc::now(),
            status: SessionStatus::Active,
        };
        self.sessions
            .write()
            .await
            .insert((project_id, session_id.to_string()), metadata);

        info!(
            project_id,
            session_id = %session_id,
            branch = %branch,
            remote = %sanitize_remote_url(&remote),
            path = %path.display(),
            "Created session workspace"
        );

        Ok(path)
    }

    async fn materialize(
        &self,
        remote: &str,
        path: &Path,
        base_branch: &str,
        branch: &str,
    ) -> Result<()> {
        self.git
            .clone_repository(remote, self.token(), path)
            .await?;

        if let Err(e) = self.git.checkout_branch(path, base_branch).await {
            warn!(
                base_branch = %base_branch,
                error = %e,
                "Base branch missing, using clone default"
            );
        }

        self.git.create_branch(path, branch).await
    }

    /// Directory exists and is a git repository.
    pub async fn validate(&self, project_id: u64, session_id: &str) -> bool {
        let path = self.path_for(project_id, session_id);
        self.git.is_repository(&path).await
    }

    /// Delete the workspace directory and mark the session cleaned.
    ///
    /// Idempotent: a missing directory is not an error. Returns whether a
    /// directory was actually removed.
    pub async fn cleanup(&self, project_id: u64, session_id: &str) -> Result<bool> {
        let _guard = self.lock_session(project_id, session_id).await;
        self.cleanup_unlocked(project_id, session_id).await
    }

    async fn cleanup_unlocked(&self, project_id: u64, session_id: &str) -> Result<bool> {
        let path = self.path_for(project_id, session_id);
        let removed = remove_dir_if_exists(&path).await?;

        if let Some(meta) = self
            .sessions
            .write()
            .await
            .get_mut(&(project_id, session_id.to_string()))
        {
            meta.status = SessionStatus::Cleaned;
        }

        info!(
            project_id,
            session_id = %session_id,
            removed,
            "Cleaned up session workspace"
        );
        Ok(removed)
    }

    /// Mark a session ended without touching the filesystem.
    pub async fn end(&self, project_id: u64, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let meta = sessions
            .get_mut(&(project_id, session_id.to_string()))
            .ok_or_else(|| Error::SessionNotFound {
                project_id,
                session_id: session_id.to_string(),
            })?;
        meta.status = SessionStatus::Ended;
        debug!(project_id, session_id = %session_id, "Session ended");
        Ok(())
    }

    /// Register metadata for a workspace that already exists on disk.
    pub async fn adopt(
        &self,
        project_id: u64,
        session_id: &str,
        base_branch: &str,
    ) -> Result<SessionMetadata> {
        let path = self.path_for(project_id, session_id);
        if !self.git.is_repository(&path).await {
            return Err(Error::InvalidWorkspace(path));
        }

        let key = (project_id, session_id.to_string());
        if let Some(existing) = self.sessions.read().await.get(&key)
            && existing.status == SessionStatus::Active
        {
            return Ok(existing.clone());
        }

        let branch = self
            .git
            .current_branch(&path)
            .await
            .unwrap_or_else(|| session_branch_name(session_id));
        let metadata = SessionMetadata {
            project_id,
            session_id: session_id.to_string(),
            workspace_path: path,
            branch,
            base_branch: base_branch.to_string(),
            created_at: Utc::now(),
            status: SessionStatus::Active,
        };
        self.sessions.write().await.insert(key, metadata.clone());
        debug!(project_id, session_id = %session_id, "Adopted existing workspace");
        Ok(metadata)
    }

    /// Snapshot of one session's metadata.
    pub async fn get(&self, project_id: u64, session_id: &str) -> Option<SessionMetadata> {
        self.sessions
            .read()
            .await
            .get(&(project_id, session_id.to_string()))
            .cloned()
    }

    /// Snapshot of all tracked sessions.
    pub async fn list(&self) -> Vec<SessionMetadata> {
        self.sessions.read().await.values().cloned().collect()
    }
}

/// Remove a directory tree; `Ok(false)` if it was not there.
async fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(root: &Path) -> SessionWorkspaceManager {
        SessionWorkspaceManager::new(
            WorkspaceManagerConfig {
                workspaces_dir: root.to_path_buf(),
                remote_template: Some("https://example.com/acme/project-{project_id}.git".into()),
                token: None,
            },
            GitWorkspace::default(),
        )
    }

    #[test]
    fn test_path_for_is_namespaced_by_project() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());

        let a = mgr.path_for(1, "abc");
        let b = mgr.path_for(2, "abc");

        assert_eq!(a, tmp.path().join("project-1").join("session-abc"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_for_sanitizes_session_id() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());

        let path = mgr.path_for(7, "../../etc/passwd");
        assert_eq!(path.parent().unwrap(), tmp.path().join("project-7"));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("session-etc-passwd-"), "{name}");
    }

    #[test]
    fn test_path_for_keeps_lossy_ids_apart() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());

        assert_ne!(mgr.path_for(7, "abc"), mgr.path_for(7, "ABC"));
        assert_ne!(mgr.path_for(7, "chat one"), mgr.path_for(7, "chat-one"));
        assert_eq!(mgr.path_for(7, "ABC"), mgr.path_for(7, "ABC"));
    }

    #[test]
    fn test_remote_url_template() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());
        assert_eq!(
            mgr.remote_url(7).unwrap(),
            "https://example.com/acme/project-7.git"
        );
    }

    #[test]
    fn test_remote_url_missing_template() {
        let mgr = SessionWorkspaceManager::new(
            WorkspaceManagerConfig::default(),
            GitWorkspace::default(),
        );
        assert!(matches!(mgr.remote_url(1), Err(Error::NoRemote(_))));
    }

    #[test]
    fn test_relative_root_is_made_absolute() {
        let mgr = SessionWorkspaceManager::new(
            WorkspaceManagerConfig::default(),
            GitWorkspace::default(),
        );
        assert!(mgr.path_for(1, "a").is_absolute());
    }

    #[tokio::test]
    async fn test_cleanup_missing_directory_is_ok() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());

        let removed = mgr.cleanup(1, "nothing-here").await.unwrap();
        assert!(!removed);
    }

    #[tokio::test]
    async fn test_validate_plain_directory_fails() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());
        tokio::fs::create_dir_all(mgr.path_for(1, "abc")).await.unwrap();

        assert!(!mgr.validate(1, "abc").await);
    }

    #[tokio::test]
    async fn test_end_untracked_session() {
        let tmp = TempDir::new().unwrap();
        let mgr = manager(tmp.path());

        let result = mgr.end(1, "ghost").await;
        assert!(matches!(result, Err(Error::SessionNotFound { .. })));
    }
}
