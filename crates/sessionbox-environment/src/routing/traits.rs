// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Routing strategy trait definitions.
//!
//! A routing strategy decides how a preview container is reached from the
//! outside: which ports get published, which labels go on the container, and
//! which URL the caller gets back.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::runtime::ContainerInfo;

/// Label marking containers owned by sessionbox.
pub const LABEL_MANAGED: &str = "sessionbox.managed";
/// Project id label.
pub const LABEL_PROJECT_ID: &str = "sessionbox.project_id";
/// Session id label (raw, unsanitized).
pub const LABEL_SESSION_ID: &str = "sessionbox.session_id";
/// Session git branch label.
pub const LABEL_BRANCH: &str = "sessionbox.branch";
/// Routing variant label (`port` or `proxy`).
pub const LABEL_ROUTING: &str = "sessionbox.routing";
/// Port recorded at creation (host port, or app port behind the proxy).
pub const LABEL_PORT: &str = "sessionbox.port";

/// Which routing variant is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    /// Publish a host port directly.
    PortMapping,
    /// Virtual-host routing through a reverse proxy.
    ReverseProxy,
}

impl RoutingKind {
    /// Short name used in configuration and container env.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKind::PortMapping => "port",
            RoutingKind::ReverseProxy => "proxy",
        }
    }
}

impl std::fmt::Display for RoutingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "port" | "ports" | "port-mapping" | "direct" => Ok(RoutingKind::PortMapping),
            "proxy" | "reverse-proxy" | "traefik" => Ok(RoutingKind::ReverseProxy),
            other => Err(format!("unknown routing mode '{other}'")),
        }
    }
}

/// How one container is exposed. Computed per creation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Container port to host port.
    pub published_ports: BTreeMap<u16, u16>,
    /// Labels to attach (identity plus any proxy directives).
    pub labels: BTreeMap<String, String>,
    /// URL the preview is reachable at.
    pub external_url: String,
    /// Host port for direct mapping, the fixed app port behind a proxy.
    pub port: u16,
    /// Port the application listens on inside the container.
    pub app_port: u16,
    /// Network to attach the container to, if any.
    pub network: Option<String>,
}

/// Route recovered from a container that already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredRoute {
    /// URL the preview is reachable at.
    pub external_url: String,
    /// Port in the same sense as [`RoutingConfig::port`].
    pub port: u16,
}

/// Strategy for exposing preview containers.
///
/// One implementation is chosen at startup; the orchestrator never branches
/// on which one it holds.
pub trait RoutingStrategy: Send + Sync {
    /// Variant identifier.
    fn kind(&self) -> RoutingKind;

    /// Compute ports, labels and URL for a container about to be created.
    fn prepare(&self, project_id: u64, session_id: &str, container_name: &str) -> RoutingConfig;

    /// Derive the route of an existing container from what the runtime
    /// reports for it. `None` means the container is not reachable the way
    /// this strategy expects and should not be adopted.
    fn recover(&self, info: &ContainerInfo) -> Option<RecoveredRoute>;
}

/// Labels every preview container carries regardless of routing.
pub fn identity_labels(
    kind: RoutingKind,
    project_id: u64,
    session_id: &str,
    port: u16,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
        (LABEL_SESSION_ID.to_string(), session_id.to_string()),
        (
            LABEL_BRANCH.to_string(),
            sessionbox_workspace::session::session_branch_name(session_id),
        ),
        (LABEL_ROUTING.to_string(), kind.as_str().to_string()),
        (LABEL_PORT.to_string(), port.to_string()),
    ])
}

/// Read (project id, session id) back from identity labels.
pub fn identity_from_labels(labels: &BTreeMap<String, String>) -> Option<(u64, String)> {
    let project_id = labels.get(LABEL_PROJECT_ID)?.parse().ok()?;
    let session_id = labels.get(LABEL_SESSION_ID)?.clone();
    Some((project_id, session_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_kind_parse() {
        assert_eq!("port".parse::<RoutingKind>(), Ok(RoutingKind::PortMapping));
        assert_eq!(" Proxy ".parse::<RoutingKind>(), Ok(RoutingKind::ReverseProxy));
        assert!("mesh".parse::<RoutingKind>().is_err());
    }

    #[test]
    fn test_identity_labels_roundtrip_identity() {
        let labels = identity_labels(RoutingKind::PortMapping, 7, "Chat One", 3100);
        assert_eq!(labels.get(LABEL_MANAGED).map(String::as_str), Some("true"));
        assert_eq!(
            labels.get(LABEL_BRANCH).map(String::as_str),
            Some("session/chat-one")
        );
        assert_eq!(
            identity_from_labels(&labels),
            Some((7, "Chat One".to_string()))
        );
    }

    #[test]
    fn test_identity_from_foreign_labels() {
        let labels = BTreeMap::from([("com.example".to_string(), "x".to_string())]);
        assert_eq!(identity_from_labels(&labels), None);
    }
}
