// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for sessionbox-workspace.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Workspace errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A git subprocess exited with a non-zero status.
    #[error("git {command} failed in {}: {stderr}", path.display())]
    Git {
        /// Git subcommand that failed (e.g. "clone", "checkout").
        command: String,
        /// Directory the command ran in.
        path: PathBuf,
        /// Captured stderr, with credentials stripped.
        stderr: String,
    },

    /// A git subprocess did not finish in time.
    #[error("git {command} timed out after {after:?}")]
    Timeout {
        /// Git subcommand that timed out.
        command: String,
        /// Configured limit.
        after: Duration,
    },

    /// The workspace directory is missing or is not a git repository.
    #[error("Invalid workspace: {}", .0.display())]
    InvalidWorkspace(PathBuf),

    /// No session metadata is tracked for this key.
    #[error("Session not found: project {project_id}, session {session_id}")]
    SessionNotFound {
        /// Project identifier.
        project_id: u64,
        /// Session identifier.
        session_id: String,
    },

    /// A file path escapes the workspace root.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Checking out the requested commit did not succeed.
    #[error("Checkout of {commit} failed in {}", path.display())]
    CheckoutFailed {
        /// Requested commit.
        commit: String,
        /// Workspace directory.
        path: PathBuf,
    },

    /// No remote URL is configured for the project.
    #[error("No remote configured: {0}")]
    NoRemote(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type using workspace Error.
pub type Result<T> = std::result::Result<T, Error>;
