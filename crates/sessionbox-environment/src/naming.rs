// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain and container naming.
//!
//! Pure functions: the same inputs always give the same name, and nothing
//! here fails. Input that cannot be used is sanitized away.

use sha2::{Digest, Sha256};

/// Longest branch segment allowed in a subdomain label.
pub const MAX_BRANCH_LABEL: usize = 20;

/// Branch segment used when nothing survives sanitization.
const EMPTY_BRANCH_FALLBACK: &str = "preview";

/// Prefix for every preview container name.
pub const CONTAINER_PREFIX: &str = "sessionbox";

/// Longest session segment kept verbatim in a container name.
const MAX_SESSION_SEGMENT: usize = 40;

/// Lowercase `input`, replace anything outside `[a-z0-9]` with `-`, collapse
/// runs of `-`, and trim it from both ends.
pub fn sanitize_label(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Sanitized branch segment, at most [`MAX_BRANCH_LABEL`] characters.
pub fn branch_label(branch_name: &str) -> String {
    let mut label = sanitize_label(branch_name);
    label.truncate(MAX_BRANCH_LABEL);
    while label.ends_with('-') {
        label.pop();
    }
    if label.is_empty() {
        EMPTY_BRANCH_FALLBACK.to_string()
    } else {
        label
    }
}

/// `project-{id}-{branch}.{base_domain}`
pub fn subdomain_for(project_id: u64, branch_name: &str, base_domain: &str) -> String {
    format!(
        "project-{project_id}-{}.{}",
        branch_label(branch_name),
        base_domain.trim_matches('.')
    )
}

/// Deterministic container name for a (project, session) pair.
///
/// Session ids that are already plain `[a-z0-9-]` are used as-is. Anything
/// else is sanitized and suffixed with a short digest of the raw id, so two
/// ids that sanitize to the same text still get different names.
pub fn container_name(project_id: u64, session_id: &str) -> String {
    let sanitized = sanitize_label(session_id);
    if sanitized == session_id && !sanitized.is_empty() && sanitized.len() <= MAX_SESSION_SEGMENT
    {
        return format!("{CONTAINER_PREFIX}-{project_id}-{sanitized}");
    }

    let mut segment = sanitized;
    segment.truncate(MAX_SESSION_SEGMENT);
    while segment.ends_with('-') {
        segment.pop();
    }
    let digest = short_digest(session_id);
    if segment.is_empty() {
        format!("{CONTAINER_PREFIX}-{project_id}-{digest}")
    } else {
        format!("{CONTAINER_PREFIX}-{project_id}-{segment}-{digest}")
    }
}

fn short_digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hash.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
