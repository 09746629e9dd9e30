// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for sessionbox-environment.

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A container runtime call failed.
    #[error("{operation} failed for project {project_id} session {session_id}: {source}")]
    Runtime {
        /// Orchestrator step that made the call.
        operation: &'static str,
        /// Project id.
        project_id: u64,
        /// Session id.
        session_id: String,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// A runtime call not tied to one session failed.
    #[error("{operation} failed: {source}")]
    Engine {
        /// Runtime operation.
        operation: &'static str,
        /// Underlying runtime error.
        #[source]
        source: RuntimeError,
    },

    /// The container name stayed taken after the recovery retry.
    #[error("Container name {0} is held by a container that could not be recovered")]
    NameConflict(String),

    /// Workspace or git operation failed.
    #[error("Workspace error: {0}")]
    Workspace(#[from] sessionbox_workspace::Error),

    /// No preview is registered or recoverable for this session.
    #[error("No preview for project {project_id} session {session_id}")]
    PreviewNotFound {
        /// Project id.
        project_id: u64,
        /// Session id.
        session_id: String,
    },

    /// A required builder component was not supplied.
    #[error("{0} is required")]
    MissingComponent(&'static str),
}

impl Error {
    /// Wrap a runtime error with orchestration context.
    pub fn runtime(
        operation: &'static str,
        project_id: u64,
        session_id: &str,
        source: RuntimeError,
    ) -> Self {
        Error::Runtime {
            operation,
            project_id,
            session_id: session_id.to_string(),
            source,
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;
