// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runtime trait definitions.
//!
//! Defines the abstract interface to the engine that runs preview containers.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from container runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// The engine could not be reached at all.
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    /// No container (or image) with the given reference.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A container with the requested name already exists.
    #[error("Container name already in use: {0}")]
    NameConflict(String),

    /// The call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Runtime operation that timed out.
        operation: &'static str,
        /// Limit that elapsed.
        after: Duration,
    },

    /// The engine rejected the request.
    #[error("Runtime API error: {0}")]
    Api(String),
}

impl RuntimeError {
    /// Whether a recovery lookup should treat this as "no such container".
    pub fn is_absent(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_) | RuntimeError::Timeout { .. })
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Lifecycle state reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Created, never started.
    Created,
    /// Running.
    Running,
    /// Paused.
    Paused,
    /// Restarting.
    Restarting,
    /// Exited (stopped or crashed).
    Exited,
    /// Dead.
    Dead,
    /// Anything the runtime reports that is not listed above.
    Unknown,
}

impl ContainerState {
    /// Parse the runtime's state string.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    /// Whether the container is serving.
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

/// What to create. There are deliberately no volume mounts: workloads reach
/// project files over the callback API only.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name (the mutual-exclusion key on the runtime).
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Container port to host port.
    pub published_ports: BTreeMap<u16, u16>,
    /// Network to attach to.
    pub network: Option<String>,
}

/// Snapshot of an existing container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Runtime container id.
    pub id: String,
    /// Container name without the leading `/`.
    pub name: String,
    /// Current state.
    pub state: ContainerState,
    /// Labels.
    pub labels: BTreeMap<String, String>,
    /// Container port to published host port.
    pub published_ports: BTreeMap<u16, u16>,
}

impl ContainerInfo {
    /// Host port published for `container_port`, if any.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.published_ports.get(&container_port).copied()
    }
}

/// Trait for container runtimes.
///
/// Implementations only talk to the engine. Timeouts and concurrency limits
/// are applied by the caller through [`super::RuntimeGate`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock")
    fn runtime_type(&self) -> &'static str;

    /// Check the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Make sure `image` is present locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create and start a container. Returns the container id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start an existing container. Starting a running container succeeds.
    async fn start(&self, id: &str) -> Result<()>;

    /// Stop a container, waiting up to `grace` before it is killed.
    async fn stop(&self, id: &str, grace: Duration) -> Result<()>;

    /// Remove a container.
    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Inspect a container by name or id. `Ok(None)` when it does not exist.
    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>>;

    /// List containers (running or not) that carry `label` set to `value`.
    async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>>;

    /// Last `tail` log lines, stdout and stderr interleaved.
    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>>;
}
