// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background compilation monitor.
//!
//! After a preview container is registered, a detached task polls its URL
//! until the app answers with 200 or the overall window elapses. Success sets
//! `compilation_complete`; a timeout is logged and leaves the flag false.
//! Callers can always re-probe through `status`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{PreviewKey, PreviewRegistry, PreviewState};

/// Liveness probe for a preview URL.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the app at `url` answers successfully. Never fails.
    async fn is_responding(&self, url: &str) -> bool;
}

/// HTTP probe: one GET per call, success only on status 200.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Create a probe where each request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_responding(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Configuration for the compilation monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Overall wall-clock window.
    pub timeout: Duration,
    /// Delay between probes.
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }
    }
}

/// How a monitor task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// The app answered; `compilation_complete` is set.
    Ready,
    /// The window elapsed without a successful probe.
    TimedOut,
    /// The preview was stopped or replaced while polling.
    Superseded,
}

/// Spawns one polling task per preview.
#[derive(Clone)]
pub struct CompilationMonitor {
    registry: PreviewRegistry,
    probe: Arc<dyn HealthProbe>,
    config: MonitorConfig,
}

impl CompilationMonitor {
    /// Create a monitor writing into `registry`.
    pub fn new(registry: PreviewRegistry, probe: Arc<dyn HealthProbe>, config: MonitorConfig) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start polling `url` for the preview `key` backed by `container_id`.
    pub fn spawn(&self, key: PreviewKey, container_id: String, url: String) -> JoinHandle<MonitorOutcome> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.watch(key, container_id, url).await })
    }

    /// Poll until ready, superseded or timed out.
    pub async fn watch(&self, key: PreviewKey, container_id: String, url: String) -> MonitorOutcome {
        info!(
            preview = %key,
            url = %url,
            timeout_secs = self.config.timeout.as_secs(),
            "Compilation monitor started"
        );

        let started = tokio::time::Instant::now();
        let polling = async {
            loop {
                if !self.registry.holds(&key, &container_id).await {
                    return MonitorOutcome::Superseded;
                }
                if self.probe.is_responding(&url).await {
                    return if self.registry.mark_compiled(&key, &container_id).await {
                        MonitorOutcome::Ready
                    } else {
                        MonitorOutcome::Superseded
                    };
                }
                tokio::time::sleep(self.config.interval).await;
            }
        };

        let outcome = tokio::time::timeout(self.config.timeout, polling)
            .await
            .unwrap_or(MonitorOutcome::TimedOut);

        match outcome {
            MonitorOutcome::Ready => info!(
                preview = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Preview compiled and responding"
            ),
            MonitorOutcome::TimedOut => {
                self.registry
                    .set_state(&key, &container_id, PreviewState::Degraded)
                    .await;
                warn!(
                    preview = %key,
                    timeout_secs = self.config.timeout.as_secs(),
                    "Preview did not respond within the monitor window"
                );
            }
            MonitorOutcome::Superseded => debug!(preview = %key, "Compilation monitor superseded"),
        }
        outcome
    }
}
