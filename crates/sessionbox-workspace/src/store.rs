// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File-backed project store.
//!
//! The preview orchestrator only needs "make sure this session has files";
//! the rest of the trait serves the file API that running previews talk to.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::manager::{EnsureOutcome, SessionWorkspaceManager};

/// Storage for a project's files, scoped per session.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Make sure the session has a workspace, copying it from the project's
    /// main branch the first time. Returns the workspace path.
    async fn initialize_session_from_main(&self, project_id: u64, session_id: &str)
    -> Result<PathBuf>;

    /// Relative paths of all files in the session workspace.
    async fn list_files(&self, project_id: u64, session_id: &str) -> Result<Vec<String>>;

    /// Read one file.
    async fn read_file(&self, project_id: u64, session_id: &str, path: &str) -> Result<Vec<u8>>;

    /// Write one file, creating parent directories.
    async fn write_file(
        &self,
        project_id: u64,
        session_id: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<()>;

    /// Pull the session's base branch from the remote.
    async fn sync_from_remote(&self, project_id: u64, session_id: &str) -> Result<()>;
}

/// [`ProjectStore`] backed by per-session git workspaces.
pub struct GitProjectStore {
    manager: Arc<SessionWorkspaceManager>,
    base_branch: String,
}

impl GitProjectStore {
    /// Create a store that cuts new sessions from `base_branch`.
    pub fn new(manager: Arc<SessionWorkspaceManager>, base_branch: impl Into<String>) -> Self {
        Self {
            manager,
            base_branch: base_branch.into(),
        }
    }

    /// Underlying workspace manager.
    pub fn manager(&self) -> &Arc<SessionWorkspaceManager> {
        &self.manager
    }

    async fn workspace(&self, project_id: u64, session_id: &str) -> Result<PathBuf> {
        let path = self.manager.path_for(project_id, session_id);
        if !self.manager.validate(project_id, session_id).await {
            return Err(Error::InvalidWorkspace(path));
        }
        Ok(path)
    }
}

#[async_trait]
impl ProjectStore for GitProjectStore {
    async fn initialize_session_from_main(
        &self,
        project_id: u64,
        session_id: &str,
    ) -> Result<PathBuf> {
        let (path, outcome) = self
            .manager
            .ensure(project_id, session_id, &self.base_branch)
            .await?;
        match outcome {
            EnsureOutcome::Reused => {
                debug!(project_id, session_id = %session_id, "Reusing session workspace")
            }
            EnsureOutcome::Created => {
                info!(project_id, session_id = %session_id, "Initialized session from main")
            }
        }
        Ok(path)
    }

    async fn list_files(&self, project_id: u64, session_id: &str) -> Result<Vec<String>> {
        let root = self.workspace(project_id, session_id).await?;
        let files = tokio::task::spawn_blocking(move || collect_files(&root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(files)
    }

    async fn read_file(&self, project_id: u64, session_id: &str, path: &str) -> Result<Vec<u8>> {
        let root = self.workspace(project_id, session_id).await?;
        let full = resolve_relative(&root, path)?;
        Ok(tokio::fs::read(full).await?)
    }

    async fn write_file(
        &self,
        project_id: u64,
        session_id: &str,
        path: &str,
        contents: &[u8],
    ) -> Result<()> {
        let root = self.workspace(project_id, session_id).await?;
        let full = resolve_relative(&root, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, contents).await?;
        debug!(project_id, session_id = %session_id, path = %path, "Wrote file");
        Ok(())
    }

    async fn sync_from_remote(&self, project_id: u64, session_id: &str) -> Result<()> {
        let _guard = self.manager.lock_session(project_id, session_id).await;
        let root = self.workspace(project_id, session_id).await?;
        let git = self.manager.git();
        git.fetch(&root, self.manager.token()).await?;
        git.pull(&root, &self.base_branch, self.manager.token())
            .await?;
        info!(project_id, session_id = %session_id, "Synced workspace from remote");
        Ok(())
    }
}

/// Join a caller-supplied relative path onto `root`, refusing anything that
/// could escape it or touch `.git`.
fn resolve_relative(root: &Path, path: &str) -> Result<PathBuf> {
    let rel = Path::new(path);
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                if depth == 0 && part == ".git" {
                    return Err(Error::InvalidPath(path.to_string()));
                }
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return Err(Error::InvalidPath(path.to_string())),
        }
    }
    if depth == 0 {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(out)
}

fn collect_files(root: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || e.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(root) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_accepts_nested_paths() {
        let root = Path::new("/ws");
        assert_eq!(
            resolve_relative(root, "src/app.tsx").unwrap(),
            PathBuf::from("/ws/src/app.tsx")
        );
        assert_eq!(
            resolve_relative(root, "./README.md").unwrap(),
            PathBuf::from("/ws/README.md")
        );
    }

    #[test]
    fn test_resolve_relative_rejects_escapes() {
        let root = Path::new("/ws");
        assert!(resolve_relative(root, "../secret").is_err());
        assert!(resolve_relative(root, "src/../../x").is_err());
        assert!(resolve_relative(root, "/etc/passwd").is_err());
        assert!(resolve_relative(root, ".git/config").is_err());
        assert!(resolve_relative(root, "").is_err());
    }

    #[test]
    fn test_collect_files_skips_git_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git/objects")).unwrap();
        std::fs::write(tmp.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src/main.ts"), "x").unwrap();
        std::fs::write(tmp.path().join("package.json"), "{}").unwrap();

        let files = collect_files(tmp.path()).unwrap();
        assert_eq!(files, vec!["package.json", "src/main.ts"]);
    }
}
