// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded, time-limited access to the container runtime.
//!
//! Every call takes a permit from a shared semaphore and runs under its own
//! timeout, so a slow engine call for one session never queues the others
//! indefinitely and never hangs its caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use super::traits::*;

/// Per-operation time limits.
#[derive(Debug, Clone)]
pub struct RuntimeTimeouts {
    /// Inspect, list and ping.
    pub inspect: Duration,
    /// Create and start.
    pub start: Duration,
    /// Stop and remove.
    pub stop: Duration,
    /// One-time image pull.
    pub pull: Duration,
    /// Log retrieval.
    pub logs: Duration,
}

impl Default for RuntimeTimeouts {
    fn default() -> Self {
        Self {
            inspect: Duration::from_secs(5),
            start: Duration::from_secs(30),
            stop: Duration::from_secs(30),
            pull: Duration::from_secs(300),
            logs: Duration::from_secs(10),
        }
    }
}

/// Grace period given to a container before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Runtime handle with a concurrency bound and timeouts.
#[derive(Clone)]
pub struct RuntimeGate {
    runtime: Arc<dyn ContainerRuntime>,
    permits: Arc<Semaphore>,
    timeouts: RuntimeTimeouts,
}

impl RuntimeGate {
    /// Wrap `runtime`, allowing at most `max_calls` calls in flight.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        max_calls: usize,
        timeouts: RuntimeTimeouts,
    ) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_calls.max(1))),
            timeouts,
        }
    }

    /// Underlying runtime type.
    pub fn runtime_type(&self) -> &'static str {
        self.runtime.runtime_type()
    }

    /// Configured limits.
    pub fn timeouts(&self) -> &RuntimeTimeouts {
        &self.timeouts
    }

    async fn call<T, F>(&self, operation: &'static str, limit: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| RuntimeError::Unavailable("runtime gate closed".into()))?;
            fut.await
        };
        match tokio::time::timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_secs = limit.as_secs_f64(), "Runtime call timed out");
                Err(RuntimeError::Timeout {
                    operation,
                    after: limit,
                })
            }
        }
    }

    /// Check the engine is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.call("ping", self.timeouts.inspect, self.runtime.ping())
            .await
    }

    /// Pull the image if missing.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        self.call("pull", self.timeouts.pull, self.runtime.ensure_image(image))
            .await
    }

    /// Create and start a container.
    pub async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        self.call(
            "create",
            self.timeouts.start,
            self.runtime.create_and_start(spec),
        )
        .await
    }

    /// Start an existing container.
    pub async fn start(&self, id: &str) -> Result<()> {
        self.call("start", self.timeouts.start, self.runtime.start(id))
            .await
    }

    /// Stop a container with the standard grace period.
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.call("stop", self.timeouts.stop, self.runtime.stop(id, STOP_GRACE))
            .await
    }

    /// Remove a container.
    pub async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.call("remove", self.timeouts.stop, self.runtime.remove(id, force))
            .await
    }

    /// Inspect a container.
    pub async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
        self.call("inspect", self.timeouts.inspect, self.runtime.inspect(name_or_id))
            .await
    }

    /// List containers carrying `label=value`.
    pub async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>> {
        self.call("list", self.timeouts.inspect, self.runtime.list(label, value))
            .await
    }

    /// Fetch recent log lines.
    pub async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        self.call("logs", self.timeouts.logs, self.runtime.logs(id, tail))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let mock = Arc::new(MockRuntime::new());
        mock.set_delay(Some(Duration::from_secs(60))).await;
        let gate = RuntimeGate::new(mock, 2, RuntimeTimeouts::default());

        let result = gate.inspect("anything").await;

        match result {
            Err(RuntimeError::Timeout { operation, after }) => {
                assert_eq!(operation, "inspect");
                assert_eq!(after, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_share_bounded_permits() {
        let mock = Arc::new(MockRuntime::new());
        mock.set_delay(Some(Duration::from_secs(3))).await;
        let gate = RuntimeGate::new(mock, 1, RuntimeTimeouts::default());

        // Two 3s calls through one permit: the second waits for the first
        // and misses its 5s deadline.
        let (a, b) = tokio::join!(gate.inspect("a"), gate.inspect("b"));

        assert!(a.is_ok());
        assert!(matches!(b, Err(RuntimeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_passes_through_results() {
        let mock = Arc::new(MockRuntime::new());
        let gate = RuntimeGate::new(mock, 4, RuntimeTimeouts::default());

        gate.ping().await.unwrap();
        assert!(gate.inspect("missing").await.unwrap().is_none());
        assert_eq!(gate.runtime_type(), "mock");
    }
}
