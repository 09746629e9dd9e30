// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Preview Registry
//!
//! In-memory map of live previews keyed by (project id, session id). It is a
//! cache of what the container runtime knows: a miss is repaired by looking
//! the container up by name, never taken as proof of absence.
//!
//! Lock guards are never held across an await; every method takes the lock,
//! copies in or out, and releases it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreviewKey {
    /// Project id.
    pub project_id: u64,
    /// Session id.
    pub session_id: String,
}

impl PreviewKey {
    /// Build a key.
    pub fn new(project_id: u64, session_id: impl Into<String>) -> Self {
        Self {
            project_id,
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for PreviewKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project_id, self.session_id)
    }
}

/// Preview lifecycle while registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewState {
    /// Container is up; the app has not answered a probe yet.
    Starting,
    /// The app answered a probe.
    Running,
    /// The app stopped answering, or never did within the monitor window.
    Degraded,
}

/// One live preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewDescriptor {
    /// Project id.
    pub project_id: u64,
    /// Session id.
    pub session_id: String,
    /// Runtime container id.
    pub container_id: String,
    /// Deterministic container name.
    pub container_name: String,
    /// Externally reachable URL.
    pub url: String,
    /// Host port, or the fixed app port when proxy-routed.
    pub port: u16,
    /// Set once the compilation monitor sees the app respond.
    pub compilation_complete: bool,
    /// Lifecycle state.
    pub state: PreviewState,
    /// Last known git sync status of the session workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
    /// Adopted from an existing container rather than created.
    pub recovered: bool,
    /// When this descriptor was registered.
    pub created_at: DateTime<Utc>,
}

impl PreviewDescriptor {
    /// Registry key of this descriptor.
    pub fn key(&self) -> PreviewKey {
        PreviewKey::new(self.project_id, self.session_id.clone())
    }
}

/// Shared in-memory preview registry.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    entries: Arc<RwLock<HashMap<PreviewKey, PreviewDescriptor>>>,
}

impl PreviewRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one descriptor.
    pub async fn get(&self, key: &PreviewKey) -> Option<PreviewDescriptor> {
        self.entries.read().await.get(key).cloned()
    }

    /// Register `descriptor` unless the key is already taken.
    ///
    /// Returns the descriptor that ends up registered and whether it is the
    /// one passed in.
    pub async fn insert_if_absent(&self, descriptor: PreviewDescriptor) -> (PreviewDescriptor, bool) {
        let mut entries = self.entries.write().await;
        match entries.get(&descriptor.key()) {
            Some(existing) => (existing.clone(), false),
            None => {
                entries.insert(descriptor.key(), descriptor.clone());
                (descriptor, true)
            }
        }
    }

    /// Drop a descriptor.
    pub async fn remove(&self, key: &PreviewKey) -> Option<PreviewDescriptor> {
        self.entries.write().await.remove(key)
    }

    /// Whether `key` is registered for exactly `container_id`.
    pub async fn holds(&self, key: &PreviewKey, container_id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|d| d.container_id == container_id)
    }

    /// Mark the app as compiled. Ignored when the key now belongs to another
    /// container.
    pub async fn mark_compiled(&self, key: &PreviewKey, container_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(d) if d.container_id == container_id => {
                d.compilation_complete = true;
                d.state = PreviewState::Running;
                true
            }
            _ => false,
        }
    }

    /// Update the lifecycle state for `container_id`.
    pub async fn set_state(&self, key: &PreviewKey, container_id: &str, state: PreviewState) {
        let mut entries = self.entries.write().await;
        if let Some(d) = entries.get_mut(key)
            && d.container_id == container_id
        {
            d.state = state;
        }
    }

    /// Record the workspace sync status.
    pub async fn set_sync_status(&self, key: &PreviewKey, status: Option<String>) {
        if let Some(d) = self.entries.write().await.get_mut(key) {
            d.sync_status = status;
        }
    }

    /// All registered keys, sorted.
    pub async fn keys(&self) -> Vec<PreviewKey> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// All descriptors, sorted by key.
    pub async fn list(&self) -> Vec<PreviewDescriptor> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        all.sort_by_key(|d| d.key());
        all
    }

    /// Number of registered previews.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(session: &str, container_id: &str) -> PreviewDescriptor {
        PreviewDescriptor {
            project_id: 7,
            session_id: session.to_string(),
            container_id: container_id.to_string(),
            container_name: format!("sessionbox-7-{session}"),
            url: "http://localhost:3100".to_string(),
            port: 3100,
            compilation_complete: false,
            state: PreviewState::Starting,
            sync_status: None,
            recovered: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let registry = PreviewRegistry::new();

        let (first, inserted) = registry.insert_if_absent(descriptor("abc", "c1")).await;
        assert!(inserted);
        assert_eq!(first.container_id, "c1");

        let (kept, inserted) = registry.insert_if_absent(descriptor("abc", "c2")).await;
        assert!(!inserted);
        assert_eq!(kept.container_id, "c1");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_mark_compiled_ignores_replaced_container() {
        let registry = PreviewRegistry::new();
        let key = PreviewKey::new(7, "abc");
        registry.insert_if_absent(descriptor("abc", "c1")).await;

        assert!(!registry.mark_compiled(&key, "old").await);
        assert!(!registry.get(&key).await.unwrap().compilation_complete);

        assert!(registry.mark_compiled(&key, "c1").await);
        let d = registry.get(&key).await.unwrap();
        assert!(d.compilation_complete);
        assert_eq!(d.state, PreviewState::Running);
    }

    #[tokio::test]
    async fn test_keys_sorted_and_remove() {
        let registry = PreviewRegistry::new();
        registry.insert_if_absent(descriptor("b", "c2")).await;
        registry.insert_if_absent(descriptor("a", "c1")).await;

        assert_eq!(
            registry.keys().await,
            vec![PreviewKey::new(7, "a"), PreviewKey::new(7, "b")]
        );

        assert!(registry.remove(&PreviewKey::new(7, "a")).await.is_some());
        assert!(registry.remove(&PreviewKey::new(7, "a")).await.is_none());
        assert!(!registry.is_empty().await);
    }
}
