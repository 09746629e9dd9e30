// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for sessionbox-environment tests.
//!
//! Provides a scripted health probe, an in-memory project store, a bare git
//! remote for the real store, and helpers for seeding the mock runtime with
//! containers from a "previous process".

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Mutex;

use sessionbox_environment::naming::container_name;
use sessionbox_environment::routing::{
    PortMappingRouting, ReverseProxyConfig, ReverseProxyRouting, RoutingKind, RoutingStrategy,
    identity_labels,
};
use sessionbox_environment::runtime::{ContainerInfo, ContainerState, MockRuntime};
use sessionbox_environment::{HealthProbe, MonitorConfig, PreviewOrchestrator};
use sessionbox_workspace::{
    GitProjectStore, GitWorkspace, ProjectStore, SessionWorkspaceManager, WorkspaceManagerConfig,
};

/// Probe whose answer tests flip at will.
#[derive(Default)]
pub struct ScriptedProbe {
    responding: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn responding() -> Arc<Self> {
        let probe = Self::default();
        probe.responding.store(true, Ordering::SeqCst);
        Arc::new(probe)
    }

    pub fn silent() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_responding(&self, responding: bool) {
        self.responding.store(responding, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn is_responding(&self, _url: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responding.load(Ordering::SeqCst)
    }
}

/// Project store that only records which sessions were initialized.
#[derive(Default)]
pub struct RecordingStore {
    pub initialized: Mutex<Vec<(u64, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ProjectStore for RecordingStore {
    async fn initialize_session_from_main(
        &self,
        project_id: u64,
        session_id: &str,
    ) -> sessionbox_workspace::Result<PathBuf> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(sessionbox_workspace::Error::NoRemote(format!(
                "project {project_id}"
            )));
        }
        self.initialized
            .lock()
            .await
            .push((project_id, session_id.to_string()));
        Ok(PathBuf::from(format!("/tmp/project-{project_id}/session-{session_id}")))
    }

    async fn list_files(&self, _: u64, _: &str) -> sessionbox_workspace::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn read_file(&self, _: u64, _: &str, path: &str) -> sessionbox_workspace::Result<Vec<u8>> {
        Err(sessionbox_workspace::Error::InvalidPath(path.to_string()))
    }

    async fn write_file(
        &self,
        _: u64,
        _: &str,
        _: &str,
        _: &[u8],
    ) -> sessionbox_workspace::Result<()> {
        Ok(())
    }

    async fn sync_from_remote(&self, _: u64, _: &str) -> sessionbox_workspace::Result<()> {
        Ok(())
    }
}

pub fn proxy_routing() -> Arc<ReverseProxyRouting> {
    Arc::new(ReverseProxyRouting::new(ReverseProxyConfig {
        base_domain: "preview.example.com".to_string(),
        ..Default::default()
    }))
}

/// Orchestrator over `runtime` with port-mapping routing.
pub fn port_orchestrator(runtime: Arc<MockRuntime>, probe: Arc<ScriptedProbe>) -> PreviewOrchestrator {
    orchestrator_with(runtime, Arc::new(PortMappingRouting::default()), probe)
}

pub fn orchestrator_with(
    runtime: Arc<MockRuntime>,
    routing: Arc<dyn RoutingStrategy>,
    probe: Arc<ScriptedProbe>,
) -> PreviewOrchestrator {
    PreviewOrchestrator::builder()
        .runtime(runtime)
        .routing(routing)
        .probe(probe)
        .monitor(MonitorConfig::default())
        .build()
        .unwrap()
}

/// A port-mapped preview container as an earlier process would have left it.
pub fn existing_container(
    project_id: u64,
    session_id: &str,
    state: ContainerState,
    host_port: u16,
) -> ContainerInfo {
    ContainerInfo {
        id: format!("existing-{project_id}-{session_id}"),
        name: container_name(project_id, session_id),
        state,
        labels: identity_labels(RoutingKind::PortMapping, project_id, session_id, host_port),
        published_ports: BTreeMap::from([(3000, host_port)]),
    }
}

/// Distinct keys of a label map, for assertions.
pub fn label_keys(info: &ContainerInfo) -> HashSet<&str> {
    info.labels.keys().map(String::as_str).collect()
}

/// Run git in `dir`, panicking on failure.
fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=fixture",
            "-c",
            "user.email=fixture@example.com",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Bare repository with one commit on `main`.
pub struct GitRemote {
    pub dir: TempDir,
    pub url: String,
}

impl GitRemote {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "--quiet", "-B", "main"]);
        std::fs::write(seed.join("README.md"), "# preview app\n").unwrap();
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "--quiet", "-m", "initial"]);

        let remote = dir.path().join("remote.git");
        git(
            dir.path(),
            &[
                "clone",
                "--quiet",
                "--bare",
                seed.to_str().unwrap(),
                remote.to_str().unwrap(),
            ],
        );
        Self {
            url: remote.to_string_lossy().to_string(),
            dir,
        }
    }
}

/// Git-backed project store cloning every project from `remote` into `root`.
pub fn git_store(remote: &GitRemote, root: &Path) -> Arc<GitProjectStore> {
    let manager = SessionWorkspaceManager::new(
        WorkspaceManagerConfig {
            workspaces_dir: root.to_path_buf(),
            remote_template: Some(remote.url.clone()),
            token: None,
        },
        GitWorkspace::default(),
    );
    Arc::new(GitProjectStore::new(Arc::new(manager), "main"))
}
