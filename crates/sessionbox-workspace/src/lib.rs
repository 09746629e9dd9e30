// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sessionbox Workspace - per-session git checkouts
//!
//! Every chat/work session on a project gets its own clone of the project
//! repository, on its own branch, under
//! `{workspaces_dir}/project-{id}/session-{session}`. This crate creates those
//! checkouts, tracks them, serves their files, and reverts them.
//!
//! # Session Status State Machine
//!
//! ```text
//!   create ──► ACTIVE ──end──► ENDED
//!                │               │
//!                └───cleanup─────┴──► CLEANED
//! ```
//!
//! Tracking is memory-only. The checkout on disk is the durable state, and
//! a manager that restarts re-learns sessions through
//! [`SessionWorkspaceManager::adopt`] or
//! [`ProjectStore::initialize_session_from_main`].
//!
//! # Modules
//!
//! - [`git`]: git subprocess wrapper (checkout, backup commits, remote auth)
//! - [`manager`]: session workspace creation, validation, cleanup
//! - [`session`]: session metadata and naming
//! - [`store`]: file-backed project store over session workspaces
//! - [`revert`]: backup-then-checkout revert
//! - [`error`]: error types

#![deny(missing_docs)]

/// Error types for workspace operations.
pub mod error;

/// Git subprocess wrapper.
pub mod git;

/// Session workspace manager.
pub mod manager;

/// Revert support.
pub mod revert;

/// Session metadata and naming helpers.
pub mod session;

/// File-backed project store.
pub mod store;

pub use error::{Error, Result};
pub use git::{GitConfig, GitIdentity, GitWorkspace};
pub use manager::{EnsureOutcome, SessionWorkspaceManager, WorkspaceManagerConfig};
pub use revert::{RevertOutcome, revert};
pub use session::{SessionMetadata, SessionStatus};
pub use store::{GitProjectStore, ProjectStore};
