// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session metadata tracked by the workspace manager.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest sanitized id kept in a segment before the digest suffix.
const MAX_SEGMENT: usize = 40;

/// Lifecycle of a session workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Workspace exists and is a valid repository.
    Active,
    /// Session finished; workspace left on disk.
    Ended,
    /// Workspace directory removed.
    Cleaned,
}

impl SessionStatus {
    /// Get the status string
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Cleaned => "cleaned",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked session workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Project identifier.
    pub project_id: u64,
    /// Session identifier as supplied by the caller.
    pub session_id: String,
    /// Absolute path of the checkout.
    pub workspace_path: PathBuf,
    /// Branch created for this session.
    pub branch: String,
    /// Branch the session was cut from.
    pub base_branch: String,
    /// When the workspace was materialized.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: SessionStatus,
}

/// Reduce a session id to characters safe for branch names and directories.
///
/// Lowercases, maps anything outside `[a-z0-9-_]` to `-`, collapses runs of
/// `-` and trims them from both ends. An id with nothing usable left becomes
/// `"session"`.
pub fn sanitize_session_id(session_id: &str) -> String {
    let mut out = String::with_capacity(session_id.len());
    let mut last_dash = true;
    for c in session_id.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "session".to_string()
    } else {
        out
    }
}

/// Directory and branch segment for a session.
///
/// An id that is already sanitized is used as-is. Anything else keeps its
/// sanitized form plus 8 hex digits of a SHA-256 of the raw id, so ids that
/// differ only in case or punctuation never share a workspace.
pub fn session_segment(session_id: &str) -> String {
    let sanitized = sanitize_session_id(session_id);
    if sanitized == session_id && sanitized.len() <= MAX_SEGMENT {
        return sanitized;
    }

    let mut segment = sanitized;
    segment.truncate(MAX_SEGMENT);
    while segment.ends_with('-') {
        segment.pop();
    }
    let digest = Sha256::digest(session_id.as_bytes());
    let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{segment}-{suffix}")
}

/// Branch name for a session.
pub fn session_branch_name(session_id: &str) -> String {
    format!("session/{}", session_segment(session_id))
}
