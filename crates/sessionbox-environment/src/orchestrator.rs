// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Preview container orchestration.
//!
//! [`PreviewOrchestrator`] maps a (project, session) pair to one named
//! container, exposes it through the configured routing strategy, and keeps
//! an in-memory registry of what it started or recovered.
//!
//! # Start flow
//!
//! ```text
//!   registry hit ─────────────────────────────────────────► url
//!   registry miss ─► inspect by name
//!                      ├─ running + routable ─► adopt ────► url
//!                      ├─ stopped ─► start ─► re-inspect ─► adopt ─► url
//!                      │               └─ fails ─► remove ─┐
//!                      └─ absent ◄──────────────────────────┘
//!                           └─► workspace ─► route ─► create ─► register ─► monitor ─► url
//!                                                       └─ name conflict ─► recover once
//! ```
//!
//! The registry is never locked across a runtime call. Two calls for the
//! same session may interleave; deterministic naming on the runtime plus the
//! recovery path keep the outcome consistent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sessionbox_workspace::ProjectStore;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::health_monitor::{
    CompilationMonitor, HealthProbe, HttpHealthProbe, MonitorConfig, MonitorOutcome,
};
use crate::naming::container_name;
use crate::registry::{PreviewDescriptor, PreviewKey, PreviewRegistry, PreviewState};
use crate::routing::{
    LABEL_MANAGED, LABEL_PORT, PortMappingRouting, RecoveredRoute, RoutingConfig, RoutingStrategy,
    identity_from_labels,
};
use crate::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, RuntimeError, RuntimeGate, RuntimeTimeouts,
};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Image for preview containers.
    pub image: String,
    /// File API base URL handed to containers.
    pub callback_url: String,
    /// Runtime calls allowed in flight at once.
    pub max_runtime_calls: usize,
    /// Per-operation runtime limits.
    pub timeouts: RuntimeTimeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image: "sessionbox-preview:latest".to_string(),
            callback_url: "http://host.docker.internal:8000".to_string(),
            max_runtime_calls: 8,
            timeouts: RuntimeTimeouts::default(),
        }
    }
}

/// Where a started preview came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOrigin {
    /// Already registered in this process.
    Registered,
    /// Adopted from an existing container.
    Recovered,
    /// Newly created.
    Created,
}

/// Result of [`PreviewOrchestrator::start`].
#[derive(Debug, Clone, Serialize)]
pub struct StartResult {
    /// Externally reachable URL.
    pub url: String,
    /// Container is up.
    pub running: bool,
    /// The app has answered a probe.
    pub is_responding: bool,
    /// Container name.
    pub container_name: String,
    /// How the preview was obtained.
    pub origin: StartOrigin,
}

impl StartResult {
    fn from_descriptor(d: &PreviewDescriptor, origin: StartOrigin) -> Self {
        Self {
            url: d.url.clone(),
            running: true,
            is_responding: d.state == PreviewState::Running,
            container_name: d.container_name.clone(),
            origin,
        }
    }
}

/// Result of [`PreviewOrchestrator::status`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewStatus {
    /// A preview is registered or was recovered.
    pub running: bool,
    /// Externally reachable URL.
    pub url: Option<String>,
    /// The compilation monitor saw the app respond.
    pub compilation_complete: bool,
    /// Result of a fresh probe.
    pub is_responding: bool,
    /// Container name, when running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Lifecycle state, when running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PreviewState>,
    /// Last workspace sync status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
}

/// One failed stop inside [`PreviewOrchestrator::stop_all`].
#[derive(Debug, Clone, Serialize)]
pub struct StopFailure {
    /// Preview that failed to stop cleanly.
    pub key: PreviewKey,
    /// Error text.
    pub error: String,
}

/// Outcome of [`PreviewOrchestrator::stop_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopAllReport {
    /// Previews stopped cleanly.
    pub stopped: Vec<PreviewKey>,
    /// Previews whose runtime teardown failed. They are unregistered anyway.
    pub failures: Vec<StopFailure>,
}

/// Running monitor per preview, tagged with the container it watches.
type MonitorTasks = HashMap<PreviewKey, (String, JoinHandle<MonitorOutcome>)>;

/// Session-scoped preview container orchestrator.
pub struct PreviewOrchestrator {
    gate: RuntimeGate,
    routing: Arc<dyn RoutingStrategy>,
    store: Option<Arc<dyn ProjectStore>>,
    probe: Arc<dyn HealthProbe>,
    registry: PreviewRegistry,
    monitor: CompilationMonitor,
    monitors: Arc<Mutex<MonitorTasks>>,
    image_ready: OnceCell<()>,
    config: OrchestratorConfig,
}

impl PreviewOrchestrator {
    /// Create a new builder.
    pub fn builder() -> PreviewOrchestratorBuilder {
        PreviewOrchestratorBuilder::new()
    }

    /// Registry of live previews.
    pub fn registry(&self) -> &PreviewRegistry {
        &self.registry
    }

    /// Routing strategy in use.
    pub fn routing(&self) -> &Arc<dyn RoutingStrategy> {
        &self.routing
    }

    /// Check the container runtime is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.gate
            .ping()
            .await
            .map_err(|source| Error::Engine {
                operation: "ping",
                source,
            })
    }

    /// Start (or find) the preview for a session and return its URL.
    ///
    /// Returns as soon as the container is registered; readiness is tracked
    /// by a background monitor. `env` overrides the base container
    /// environment on key conflicts.
    pub async fn start(
        &self,
        project_id: u64,
        session_id: &str,
        env: HashMap<String, String>,
    ) -> Result<StartResult> {
        let key = PreviewKey::new(project_id, session_id);
        let name = container_name(project_id, session_id);

        if let Some(existing) = self.registry.get(&key).await {
            debug!(preview = %key, container = %existing.container_name, "Preview already registered");
            return Ok(StartResult::from_descriptor(&existing, StartOrigin::Registered));
        }

        if let Some(recovered) = self.recover(&key, &name).await? {
            return Ok(StartResult::from_descriptor(&recovered, StartOrigin::Recovered));
        }

        self.create(&key, &name, env).await
    }

    /// Stop and remove a session's preview.
    ///
    /// Returns `false` when nothing was registered. The registry entry is
    /// dropped before the runtime is touched, so a failed teardown never
    /// leaves a dead preview registered.
    pub async fn stop(&self, project_id: u64, session_id: &str) -> Result<bool> {
        let key = PreviewKey::new(project_id, session_id);
        let Some(descriptor) = self.registry.remove(&key).await else {
            debug!(preview = %key, "Stop requested for unregistered preview");
            return Ok(false);
        };
        self.cancel_monitor(&key).await;

        match self.teardown(&descriptor.container_id).await {
            Ok(()) => {
                info!(
                    preview = %key,
                    container = %descriptor.container_name,
                    "Preview stopped"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(
                    preview = %key,
                    container = %descriptor.container_name,
                    error = %e,
                    "Preview teardown failed; unregistered anyway"
                );
                Err(Error::runtime("stop", project_id, session_id, e))
            }
        }
    }

    /// Stop and remove a session's container whether or not this process
    /// registered it. An unregistered container is looked up by name and
    /// torn down in whatever state it is in; it is never restarted first.
    /// Returns `false` when no such container exists.
    pub async fn stop_by_name(&self, project_id: u64, session_id: &str) -> Result<bool> {
        let key = PreviewKey::new(project_id, session_id);
        if self.registry.get(&key).await.is_some() {
            return self.stop(project_id, session_id).await;
        }

        let name = container_name(project_id, session_id);
        let info = match self.gate.inspect(&name).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                debug!(preview = %key, container = %name, "No container to stop");
                return Ok(false);
            }
            Err(e) => return Err(Error::runtime("inspect", project_id, session_id, e)),
        };

        self.teardown(&info.id)
            .await
            .map_err(|e| Error::runtime("stop", project_id, session_id, e))?;
        info!(
            preview = %key,
            container = %name,
            state = ?info.state,
            "Unregistered preview container removed"
        );
        Ok(true)
    }

    /// Current state plus a fresh probe. Unregistered previews are looked up
    /// on the runtime before being reported as not running.
    pub async fn status(&self, project_id: u64, session_id: &str) -> Result<PreviewStatus> {
        let key = PreviewKey::new(project_id, session_id);
        let descriptor = match self.registry.get(&key).await {
            Some(d) => d,
            None => {
                let name = container_name(project_id, session_id);
                match self.recover(&key, &name).await? {
                    Some(d) => d,
                    None => return Ok(PreviewStatus::default()),
                }
            }
        };

        let is_responding = self.probe.is_responding(&descriptor.url).await;
        let state = match (descriptor.state, is_responding) {
            (PreviewState::Degraded, true) => PreviewState::Running,
            (PreviewState::Running, false) => PreviewState::Degraded,
            (state, _) => state,
        };
        if state != descriptor.state {
            self.registry
                .set_state(&key, &descriptor.container_id, state)
                .await;
        }

        Ok(PreviewStatus {
            running: true,
            url: Some(descriptor.url),
            compilation_complete: descriptor.compilation_complete,
            is_responding,
            container_name: Some(descriptor.container_name),
            state: Some(state),
            sync_status: descriptor.sync_status,
        })
    }

    /// Stop every registered preview. One failure does not block the rest.
    pub async fn stop_all(&self) -> StopAllReport {
        let keys = self.registry.keys().await;
        info!(count = keys.len(), "Stopping all previews");

        let results = futures::future::join_all(keys.into_iter().map(|key| async move {
            let result = self.stop(key.project_id, &key.session_id).await;
            (key, result)
        }))
        .await;

        let mut report = StopAllReport::default();
        for (key, result) in results {
            match result {
                Ok(_) => report.stopped.push(key),
                Err(e) => report.failures.push(StopFailure {
                    key,
                    error: e.to_string(),
                }),
            }
        }
        report
    }

    /// Last `tail` log lines of a session's preview container.
    pub async fn logs(&self, project_id: u64, session_id: &str, tail: usize) -> Result<Vec<String>> {
        let key = PreviewKey::new(project_id, session_id);
        let descriptor = match self.registry.get(&key).await {
            Some(d) => d,
            None => self
                .recover(&key, &container_name(project_id, session_id))
                .await?
                .ok_or_else(|| Error::PreviewNotFound {
                    project_id,
                    session_id: session_id.to_string(),
                })?,
        };

        match self.gate.logs(&descriptor.container_id, tail).await {
            Ok(lines) => Ok(lines),
            Err(RuntimeError::NotFound(_)) => Err(Error::PreviewNotFound {
                project_id,
                session_id: session_id.to_string(),
            }),
            Err(e) => Err(Error::runtime("logs", project_id, session_id, e)),
        }
    }

    /// Adopt every running managed container found on the runtime.
    /// Returns how many previews were registered.
    pub async fn reconcile(&self) -> Result<usize> {
        let containers = self
            .gate
            .list(LABEL_MANAGED, "true")
            .await
            .map_err(|source| Error::Engine {
                operation: "list",
                source,
            })?;

        let mut adopted = 0;
        for info in containers {
            if !info.state.is_running() {
                continue;
            }
            let Some((project_id, session_id)) = identity_from_labels(&info.labels) else {
                warn!(container = %info.name, "Managed container without identity labels");
                continue;
            };
            if info.name != container_name(project_id, &session_id) {
                warn!(container = %info.name, "Managed container name does not match its labels");
                continue;
            }
            let Some(route) = self.routing.recover(&info) else {
                debug!(container = %info.name, "Container not routable by the current strategy");
                continue;
            };
            let key = PreviewKey::new(project_id, session_id);
            if self.registry.get(&key).await.is_some() {
                continue;
            }
            if self.adopt(&key, info, route).await.1 {
                adopted += 1;
            }
        }

        info!(adopted, "Reconciled previews with runtime");
        Ok(adopted)
    }

    /// Pull the session's base branch into its workspace and record the
    /// outcome on the preview.
    pub async fn sync_workspace(&self, project_id: u64, session_id: &str) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or(Error::MissingComponent("project store"))?;
        let key = PreviewKey::new(project_id, session_id);

        let result = store.sync_from_remote(project_id, session_id).await;
        let status = match &result {
            Ok(()) => format!("synced at {}", Utc::now().to_rfc3339()),
            Err(e) => format!("sync failed: {e}"),
        };
        self.registry.set_sync_status(&key, Some(status)).await;
        result.map_err(Error::from)
    }

    /// Snapshot of all registered previews.
    pub async fn list(&self) -> Vec<PreviewDescriptor> {
        self.registry.list().await
    }

    /// Cancel background monitors. Containers keep running.
    pub async fn shutdown(&self) {
        let mut monitors = self.monitors.lock().await;
        for (_, (_, handle)) in monitors.drain() {
            handle.abort();
        }
    }

    /// Number of compilation monitors still polling.
    pub async fn active_monitors(&self) -> usize {
        self.monitors.lock().await.len()
    }

    /// Look the container up by name and register it if it can serve.
    async fn recover(&self, key: &PreviewKey, name: &str) -> Result<Option<PreviewDescriptor>> {
        let info = match self.gate.inspect(name).await {
            Ok(Some(info)) => info,
            Ok(None) => return Ok(None),
            Err(e) if e.is_absent() => {
                debug!(preview = %key, container = %name, error = %e, "Treating lookup failure as absent");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::runtime(
                    "inspect",
                    key.project_id,
                    &key.session_id,
                    e,
                ));
            }
        };

        if info.state.is_running() {
            return Ok(match self.routing.recover(&info) {
                Some(route) => Some(self.adopt(key, info, route).await.0),
                None => {
                    warn!(
                        preview = %key,
                        container = %name,
                        "Running container is not routable; replacing it"
                    );
                    self.discard(key, &info).await;
                    None
                }
            });
        }

        info!(preview = %key, container = %name, state = ?info.state, "Restarting existing container");
        if let Err(e) = self.gate.start(&info.id).await {
            warn!(preview = %key, container = %name, error = %e, "Restart failed; removing container");
            self.discard(key, &info).await;
            return Ok(None);
        }

        let restarted = match self.gate.inspect(&info.id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(preview = %key, container = %name, error = %e, "Could not inspect restarted container");
                self.discard(key, &info).await;
                return Ok(None);
            }
        };

        let Some(route) = self.routing.recover(&restarted) else {
            warn!(
                preview = %key,
                container = %name,
                "Restarted container has no resolvable port; replacing it"
            );
            self.discard(key, &restarted).await;
            return Ok(None);
        };

        if let Some(recorded) = restarted.labels.get(LABEL_PORT)
            && recorded.parse::<u16>().ok() != Some(route.port)
        {
            warn!(
                preview = %key,
                container = %name,
                recorded = %recorded,
                actual = route.port,
                "Port changed across restart; using the published port"
            );
        }

        Ok(Some(self.adopt(key, restarted, route).await.0))
    }

    /// Register an existing container. Returns the registered descriptor and
    /// whether this call inserted it.
    async fn adopt(
        &self,
        key: &PreviewKey,
        info: ContainerInfo,
        route: RecoveredRoute,
    ) -> (PreviewDescriptor, bool) {
        let descriptor = PreviewDescriptor {
            project_id: key.project_id,
            session_id: key.session_id.clone(),
            container_id: info.id,
            container_name: info.name,
            url: route.external_url,
            port: route.port,
            compilation_complete: false,
            state: PreviewState::Starting,
            sync_status: None,
            recovered: true,
            created_at: Utc::now(),
        };
        let (registered, inserted) = self.registry.insert_if_absent(descriptor).await;
        if inserted {
            info!(
                preview = %key,
                container = %registered.container_name,
                url = %registered.url,
                "Recovered existing preview container"
            );
            self.spawn_monitor(&registered).await;
        }
        (registered, inserted)
    }

    async fn create(
        &self,
        key: &PreviewKey,
        name: &str,
        env: HashMap<String, String>,
    ) -> Result<StartResult> {
        let (project_id, session_id) = (key.project_id, key.session_id.as_str());

        self.ensure_image()
            .await
            .map_err(|e| Error::runtime("pull", project_id, session_id, e))?;

        if let Some(store) = &self.store {
            let path = store
                .initialize_session_from_main(project_id, session_id)
                .await?;
            debug!(preview = %key, workspace = %path.display(), "Session workspace ready");
        }

        let routing = self.routing.prepare(project_id, session_id, name);
        let spec = ContainerSpec {
            name: name.to_string(),
            image: self.config.image.clone(),
            env: self.container_env(key, &routing, env),
            labels: routing.labels.clone(),
            published_ports: routing.published_ports.clone(),
            network: routing.network.clone(),
        };

        let container_id = match self.gate.create_and_start(&spec).await {
            Ok(id) => id,
            Err(RuntimeError::NameConflict(_)) => {
                warn!(preview = %key, container = %name, "Container name taken; retrying recovery");
                return match self.recover(key, name).await? {
                    Some(d) => Ok(StartResult::from_descriptor(&d, StartOrigin::Recovered)),
                    None => Err(Error::NameConflict(name.to_string())),
                };
            }
            Err(e) => return Err(Error::runtime("create", project_id, session_id, e)),
        };

        let descriptor = PreviewDescriptor {
            project_id,
            session_id: session_id.to_string(),
            container_id,
            container_name: name.to_string(),
            url: routing.external_url,
            port: routing.port,
            compilation_complete: false,
            state: PreviewState::Starting,
            sync_status: None,
            recovered: false,
            created_at: Utc::now(),
        };
        let (registered, inserted) = self.registry.insert_if_absent(descriptor).await;
        if inserted {
            info!(
                preview = %key,
                container = %name,
                container_id = %registered.container_id,
                url = %registered.url,
                routing = %self.routing.kind(),
                "Preview container created"
            );
            self.spawn_monitor(&registered).await;
        }

        Ok(StartResult::from_descriptor(&registered, StartOrigin::Created))
    }

    /// Base environment, overridden by caller entries.
    fn container_env(
        &self,
        key: &PreviewKey,
        routing: &RoutingConfig,
        overrides: HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut env = HashMap::from([
            (
                "SESSIONBOX_NETWORK_MODE".to_string(),
                self.routing.kind().as_str().to_string(),
            ),
            ("SESSIONBOX_PROJECT_ID".to_string(), key.project_id.to_string()),
            ("SESSIONBOX_SESSION_ID".to_string(), key.session_id.clone()),
            ("SESSIONBOX_API_URL".to_string(), self.config.callback_url.clone()),
            ("SESSIONBOX_PUBLIC_URL".to_string(), routing.external_url.clone()),
            ("PORT".to_string(), routing.app_port.to_string()),
        ]);
        env.extend(overrides);
        env
    }

    async fn ensure_image(&self) -> std::result::Result<(), RuntimeError> {
        self.image_ready
            .get_or_try_init(|| async { self.gate.ensure_image(&self.config.image).await })
            .await
            .map(|_| ())
    }

    /// Spawn the compilation monitor. The task drops its own entry when it
    /// finishes, unless a newer monitor has taken the key.
    async fn spawn_monitor(&self, descriptor: &PreviewDescriptor) {
        let key = descriptor.key();
        let container_id = descriptor.container_id.clone();

        // Held until the entry is inserted, so a fast task cannot finish first.
        let mut monitors = self.monitors.lock().await;
        let handle = {
            let monitor = self.monitor.clone();
            let tasks = Arc::clone(&self.monitors);
            let key = key.clone();
            let container_id = container_id.clone();
            let url = descriptor.url.clone();
            tokio::spawn(async move {
                let outcome = monitor.watch(key.clone(), container_id.clone(), url).await;
                let mut tasks = tasks.lock().await;
                if tasks.get(&key).is_some_and(|(id, _)| *id == container_id) {
                    tasks.remove(&key);
                }
                outcome
            })
        };
        if let Some((_, previous)) = monitors.insert(key, (container_id, handle)) {
            previous.abort();
        }
    }

    async fn cancel_monitor(&self, key: &PreviewKey) {
        if let Some((_, handle)) = self.monitors.lock().await.remove(key) {
            handle.abort();
        }
    }

    /// Stop then remove, treating "not found" as done.
    async fn teardown(&self, container_id: &str) -> std::result::Result<(), RuntimeError> {
        let stopped = match self.gate.stop(container_id).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        };
        let removed = match self.gate.remove(container_id, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        };
        stopped.and(removed)
    }

    /// Force-remove a container that cannot be adopted. Failures are logged;
    /// a container left behind surfaces as a name conflict on create.
    async fn discard(&self, key: &PreviewKey, info: &ContainerInfo) {
        match self.gate.remove(&info.id, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {
                info!(preview = %key, container = %info.name, "Removed unusable container");
            }
            Err(e) => {
                warn!(preview = %key, container = %info.name, error = %e, "Failed to remove unusable container");
            }
        }
    }
}

/// Builder for creating a [`PreviewOrchestrator`].
pub struct PreviewOrchestratorBuilder {
    runtime: Option<Arc<dyn ContainerRuntime>>,
    routing: Option<Arc<dyn RoutingStrategy>>,
    store: Option<Arc<dyn ProjectStore>>,
    probe: Option<Arc<dyn HealthProbe>>,
    config: OrchestratorConfig,
    monitor: MonitorConfig,
}

impl Default for PreviewOrchestratorBuilder {
    fn default() -> Self {
        Self {
            runtime: None,
            routing: None,
            store: None,
            probe: None,
            config: OrchestratorConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl PreviewOrchestratorBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container runtime (required).
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the routing strategy.
    ///
    /// Default: port mapping on 3000-4000
    pub fn routing(mut self, routing: Arc<dyn RoutingStrategy>) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Set the project store used to materialize session workspaces before
    /// a container is created. Without one, workspace setup is skipped.
    pub fn store(mut self, store: Arc<dyn ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the health probe.
    ///
    /// Default: HTTP GET with a 5 second timeout
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set image, callback URL and runtime limits.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the compilation monitor window and interval.
    ///
    /// Default: 60 second window, 2 second interval
    pub fn monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Result<PreviewOrchestrator> {
        let runtime = self.runtime.ok_or(Error::MissingComponent("runtime"))?;
        let routing = self
            .routing
            .unwrap_or_else(|| Arc::new(PortMappingRouting::default()));
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpHealthProbe::default()));

        let gate = RuntimeGate::new(
            runtime,
            self.config.max_runtime_calls,
            self.config.timeouts.clone(),
        );
        let registry = PreviewRegistry::new();
        let monitor = CompilationMonitor::new(registry.clone(), probe.clone(), self.monitor);

        info!(
            runtime = gate.runtime_type(),
            routing = %routing.kind(),
            image = %self.config.image,
            "Preview orchestrator initialized"
        );

        Ok(PreviewOrchestrator {
            gate,
            routing,
            store: self.store,
            probe,
            registry,
            monitor,
            monitors: Arc::new(Mutex::new(HashMap::new())),
            image_ready: OnceCell::new(),
            config: self.config,
        })
    }
}
