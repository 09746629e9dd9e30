// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sessionbox Environment - session-scoped preview containers
//!
//! Each (project, session) pair gets one preview container serving that
//! session's workspace. This crate names the container, decides how it is
//! reached, creates or recovers it on the container runtime, and watches it
//! until the app inside answers.
//!
//! # Architecture
//!
//! ```text
//!                         PreviewOrchestrator
//!      ┌───────────────┬───────────┼───────────────┬───────────────┐
//!      ▼               ▼           ▼               ▼               ▼
//!  RuntimeGate   RoutingStrategy  PreviewRegistry  CompilationMonitor  ProjectStore
//!  (permits,                                       │
//!   timeouts)                                      ▼
//!      │                                      HealthProbe
//!      ▼
//!  ContainerRuntime (DockerRuntime over bollard, or MockRuntime)
//! ```
//!
//! # Preview State Machine
//!
//! ```text
//!   absent ──start──► STARTING ──probe ok──► RUNNING
//!                        │                    │  ▲
//!                        └──window elapsed──► DEGRADED
//!   any ──stop──► absent
//! ```
//!
//! There is no restart-on-crash; a crashed preview shows up through
//! `status` and is restarted in place by the next `start`.
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`naming`] | subdomain and container names |
//! | [`routing`] | port-mapping and reverse-proxy strategies |
//! | [`runtime`] | runtime trait, Docker and mock backends, call gate |
//! | [`registry`] | in-memory preview registry |
//! | [`health_monitor`] | background compilation monitor |
//! | [`orchestrator`] | start / stop / status / stop_all |
//! | [`config`] | environment configuration |

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Error types.
pub mod error;

/// Background compilation monitor and health probes.
pub mod health_monitor;

/// Domain and container naming.
pub mod naming;

/// Preview orchestration.
pub mod orchestrator;

/// In-memory preview registry.
pub mod registry;

/// Routing strategies.
pub mod routing;

/// Container runtime abstraction.
pub mod runtime;

pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use health_monitor::{HealthProbe, HttpHealthProbe, MonitorConfig};
pub use orchestrator::{
    OrchestratorConfig, PreviewOrchestrator, PreviewStatus, StartOrigin, StartResult,
    StopAllReport,
};
pub use registry::{PreviewDescriptor, PreviewKey, PreviewState};
pub use routing::{PortMappingRouting, ReverseProxyRouting, RoutingKind, RoutingStrategy};
pub use runtime::{ContainerRuntime, DockerRuntime, MockRuntime};
