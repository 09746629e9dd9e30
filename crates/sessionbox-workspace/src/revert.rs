// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Revert a session workspace to an earlier commit, optionally saving pending
//! edits in a backup commit first.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::manager::SessionWorkspaceManager;

/// Result of a revert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertOutcome {
    /// Full SHA HEAD points at after the revert.
    pub reverted_to_commit: String,
    /// Commit holding the edits that were pending before the revert, if any.
    pub backup_commit: Option<String>,
}

/// Revert the session workspace to `commit_sha` (detached).
pub async fn revert(
    manager: &SessionWorkspaceManager,
    project_id: u64,
    session_id: &str,
    commit_sha: &str,
    create_backup: bool,
) -> Result<RevertOutcome> {
    let _guard = manager.lock_session(project_id, session_id).await;
    let path = manager.path_for(project_id, session_id);
    if !manager.validate(project_id, session_id).await {
        return Err(Error::InvalidWorkspace(path));
    }
    let git = manager.git();

    let backup_commit = if create_backup {
        let message = format!(
            "sessionbox: backup before revert to {}",
            short_sha(commit_sha)
        );
        git.create_backup_commit(&path, &message).await?
    } else {
        None
    };

    if !git.checkout(&path, commit_sha).await {
        return Err(Error::CheckoutFailed {
            commit: commit_sha.to_string(),
            path,
        });
    }

    let reverted_to_commit = git
        .current_commit(&path)
        .await
        .unwrap_or_else(|| commit_sha.to_string());

    info!(
        project_id,
        session_id = %session_id,
        commit = %reverted_to_commit,
        backup = ?backup_commit,
        "Reverted session workspace"
    );

    Ok(RevertOutcome {
        reverted_to_commit,
        backup_commit,
    })
}

fn short_sha(sha: &str) -> &str {
    sha.get(..12).unwrap_or(sha)
}
