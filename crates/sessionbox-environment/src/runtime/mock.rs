// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock container runtime for testing.
//!
//! Keeps containers in memory and lets tests inject the failures a real
//! engine produces: refused creates, name conflicts from a concurrent
//! creator, failing start/stop, slow calls, and ports that move on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::traits::*;

/// Call counters.
#[derive(Debug, Default)]
pub struct MockCalls {
    /// `create_and_start` calls (including failed ones).
    pub creates: AtomicUsize,
    /// `start` calls.
    pub starts: AtomicUsize,
    /// `stop` calls.
    pub stops: AtomicUsize,
    /// `remove` calls.
    pub removes: AtomicUsize,
    /// `inspect` calls.
    pub inspects: AtomicUsize,
    /// `ensure_image` calls.
    pub image_pulls: AtomicUsize,
}

/// Mock runtime for testing.
#[derive(Default)]
pub struct MockRuntime {
    containers: Arc<Mutex<HashMap<String, ContainerInfo>>>,
    logs: Arc<Mutex<HashMap<String, Vec<String>>>>,
    specs: Mutex<Vec<ContainerSpec>>,
    next_id: AtomicU64,
    /// Call counters.
    pub calls: MockCalls,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_image: AtomicBool,
    unavailable: AtomicBool,
    pending_conflicts: AtomicUsize,
    restart_port: Mutex<Option<u16>>,
    delay: Mutex<Option<Duration>>,
}

impl MockRuntime {
    /// Create an empty mock runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every create fail with an API error.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make starting an existing container fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make stop fail with an API error.
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Make `ensure_image` fail.
    pub fn set_fail_image(&self, fail: bool) {
        self.fail_image.store(fail, Ordering::SeqCst);
    }

    /// Make every call fail as if the engine were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// The next `n` creates lose a race: another creator wins the name with
    /// an identical running container and the call returns `NameConflict`.
    pub fn conflict_next_creates(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Republish the first container port on this host port whenever a
    /// stopped container is started again.
    pub async fn set_restart_port(&self, port: Option<u16>) {
        *self.restart_port.lock().await = port;
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    /// Seed a container that exists before the orchestrator looks.
    pub async fn insert_container(&self, info: ContainerInfo) {
        self.containers.lock().await.insert(info.name.clone(), info);
    }

    /// Change a container's state (e.g. simulate a crash).
    pub async fn set_state(&self, name: &str, state: ContainerState) {
        if let Some(c) = self.containers.lock().await.get_mut(name) {
            c.state = state;
        }
    }

    /// Set the log lines returned for a container.
    pub async fn set_logs(&self, name: &str, lines: Vec<String>) {
        self.logs.lock().await.insert(name.to_string(), lines);
    }

    /// Snapshot of a container by name.
    pub async fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.containers.lock().await.get(name).cloned()
    }

    /// Every spec passed to `create_and_start`, in call order.
    pub async fn created_specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().await.clone()
    }

    /// Number of containers that exist (any state).
    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }

    /// Number of running containers.
    pub async fn running_count(&self) -> usize {
        self.containers
            .lock()
            .await
            .values()
            .filter(|c| c.state.is_running())
            .count()
    }

    /// Read a counter.
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> Result<()> {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unavailable("mock engine is down".into()));
        }
        Ok(())
    }

    fn new_id(&self) -> String {
        format!("mock_{:08x}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn info_from_spec(&self, spec: &ContainerSpec) -> ContainerInfo {
        ContainerInfo {
            id: self.new_id(),
            name: spec.name.clone(),
            state: ContainerState::Running,
            labels: spec.labels.clone(),
            published_ports: spec.published_ports.clone(),
        }
    }
}

/// Find a container by name or id.
fn find_key(containers: &HashMap<String, ContainerInfo>, name_or_id: &str) -> Option<String> {
    if containers.contains_key(name_or_id) {
        return Some(name_or_id.to_string());
    }
    containers
        .values()
        .find(|c| c.id == name_or_id)
        .map(|c| c.name.clone())
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> &'static str {
        "mock"
    }

    async fn ping(&self) -> Result<()> {
        self.pause().await
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        self.calls.image_pulls.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;
        if self.fail_image.load(Ordering::SeqCst) {
            return Err(RuntimeError::NotFound(image.to_string()));
        }
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().await.push(spec.clone());
        self.pause().await?;

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api("mock create failure".into()));
        }

        let mut containers = self.containers.lock().await;

        let raced = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if raced {
            let winner = self.info_from_spec(spec);
            containers.insert(spec.name.clone(), winner);
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }

        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::NameConflict(spec.name.clone()));
        }

        let info = self.info_from_spec(spec);
        let id = info.id.clone();
        containers.insert(spec.name.clone(), info);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.calls.starts.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;

        if self.fail_start.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api("mock start failure".into()));
        }

        let restart_port = *self.restart_port.lock().await;
        let mut containers = self.containers.lock().await;
        let key = find_key(&containers, id).ok_or_else(|| RuntimeError::NotFound(id.into()))?;
        if let Some(c) = containers.get_mut(&key) {
            if !c.state.is_running()
                && let Some(port) = restart_port
                && let Some(host) = c.published_ports.values_mut().next()
            {
                *host = port;
            }
            c.state = ContainerState::Running;
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _grace: Duration) -> Result<()> {
        self.calls.stops.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;

        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api("mock stop failure".into()));
        }

        let mut containers = self.containers.lock().await;
        let key = find_key(&containers, id).ok_or_else(|| RuntimeError::NotFound(id.into()))?;
        if let Some(c) = containers.get_mut(&key) {
            c.state = ContainerState::Exited;
        }
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.calls.removes.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;

        let mut containers = self.containers.lock().await;
        let key = find_key(&containers, id).ok_or_else(|| RuntimeError::NotFound(id.into()))?;
        let running = containers.get(&key).is_some_and(|c| c.state.is_running());
        if running && !force {
            return Err(RuntimeError::Api(format!(
                "cannot remove running container {id}"
            )));
        }
        containers.remove(&key);
        Ok(())
    }

    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
        self.calls.inspects.fetch_add(1, Ordering::SeqCst);
        self.pause().await?;

        let containers = self.containers.lock().await;
        Ok(find_key(&containers, name_or_id).and_then(|k| containers.get(&k).cloned()))
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>> {
        self.pause().await?;
        let containers = self.containers.lock().await;
        let mut out: Vec<_> = containers
            .values()
            .filter(|c| c.labels.get(label).is_some_and(|v| v == value))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        self.pause().await?;
        let name = {
            let containers = self.containers.lock().await;
            find_key(&containers, id).ok_or_else(|| RuntimeError::NotFound(id.into()))?
        };
        let logs = self.logs.lock().await;
        let lines = logs.get(&name).cloned().unwrap_or_default();
        let skip = lines.len().saturating_sub(tail);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "img".to_string(),
            published_ports: BTreeMap::from([(3000, 3100)]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_duplicate_conflicts() {
        let rt = MockRuntime::new();
        let id = rt.create_and_start(&spec("a")).await.unwrap();
        assert!(id.starts_with("mock_"));

        let dup = rt.create_and_start(&spec("a")).await;
        assert!(matches!(dup, Err(RuntimeError::NameConflict(_))));
        assert_eq!(rt.container_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_conflict_leaves_winner_behind() {
        let rt = MockRuntime::new();
        rt.conflict_next_creates(1);

        let result = rt.create_and_start(&spec("a")).await;
        assert!(matches!(result, Err(RuntimeError::NameConflict(_))));

        let winner = rt.inspect("a").await.unwrap().unwrap();
        assert!(winner.state.is_running());
        assert_eq!(winner.host_port(3000), Some(3100));
    }

    #[tokio::test]
    async fn test_stop_remove_by_id() {
        let rt = MockRuntime::new();
        let id = rt.create_and_start(&spec("a")).await.unwrap();

        assert!(rt.remove(&id, false).await.is_err());
        rt.stop(&id, Duration::from_secs(1)).await.unwrap();
        rt.remove(&id, false).await.unwrap();

        assert!(rt.inspect("a").await.unwrap().is_none());
        assert!(matches!(
            rt.stop(&id, Duration::from_secs(1)).await,
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_port_moves_published_port() {
        let rt = MockRuntime::new();
        rt.create_and_start(&spec("a")).await.unwrap();
        rt.set_state("a", ContainerState::Exited).await;
        rt.set_restart_port(Some(3999)).await;

        rt.start("a").await.unwrap();

        let info = rt.inspect("a").await.unwrap().unwrap();
        assert_eq!(info.host_port(3000), Some(3999));
    }

    #[tokio::test]
    async fn test_logs_tail() {
        let rt = MockRuntime::new();
        rt.create_and_start(&spec("a")).await.unwrap();
        rt.set_logs("a", vec!["1".into(), "2".into(), "3".into()])
            .await;

        assert_eq!(rt.logs("a", 2).await.unwrap(), vec!["2", "3"]);
        assert_eq!(rt.logs("a", 10).await.unwrap().len(), 3);
    }
}
