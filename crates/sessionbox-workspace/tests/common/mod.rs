// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for sessionbox-workspace tests.
//!
//! Builds a bare "remote" repository in a temp directory that workspaces can
//! be cloned from, using the real `git` binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use sessionbox_workspace::{GitWorkspace, SessionWorkspaceManager, WorkspaceManagerConfig};
use tempfile::TempDir;

/// Run git synchronously and return trimmed stdout, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
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
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote with two commits on `main` and one on `develop`.
pub struct RemoteFixture {
    pub dir: TempDir,
    pub url: String,
    pub first_commit: String,
    pub main_head: String,
    pub develop_head: String,
}

impl RemoteFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();

        git(&seed, &["init", "--quiet"]);
        git(&seed, &["checkout", "--quiet", "-B", "main"]);
        std::fs::write(seed.join("README.md"), "# preview app\n").unwrap();
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "--quiet", "-m", "initial"]);
        let first_commit = git(&seed, &["rev-parse", "HEAD"]);

        std::fs::create_dir_all(seed.join("src")).unwrap();
        std::fs::write(seed.join("src/index.js"), "console.log('hi');\n").unwrap();
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "--quiet", "-m", "add entrypoint"]);
        let main_head = git(&seed, &["rev-parse", "HEAD"]);

        git(&seed, &["checkout", "--quiet", "-b", "develop"]);
        std::fs::write(seed.join("DEVELOP.md"), "wip\n").unwrap();
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "--quiet", "-m", "develop work"]);
        let develop_head = git(&seed, &["rev-parse", "HEAD"]);
        git(&seed, &["checkout", "--quiet", "main"]);

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
            first_commit,
            main_head,
            develop_head,
        }
    }

    /// Push a new commit to `main` from a scratch clone; returns its SHA.
    pub fn push_commit(&self, file: &str, contents: &str) -> String {
        let scratch = self.dir.path().join(format!("scratch-{file}"));
        git(
            self.dir.path(),
            &["clone", "--quiet", &self.url, scratch.to_str().unwrap()],
        );
        std::fs::write(scratch.join(file), contents).unwrap();
        git(&scratch, &["add", "--all"]);
        git(&scratch, &["commit", "--quiet", "-m", "upstream change"]);
        git(&scratch, &["push", "--quiet", "origin", "main"]);
        git(&scratch, &["rev-parse", "HEAD"])
    }
}

/// Workspace manager rooted in `root`, cloning every project from the fixture.
pub fn manager(remote: &RemoteFixture, root: &Path) -> Arc<SessionWorkspaceManager> {
    Arc::new(SessionWorkspaceManager::new(
        WorkspaceManagerConfig {
            workspaces_dir: root.to_path_buf(),
            remote_template: Some(remote.url.clone()),
            token: None,
        },
        GitWorkspace::default(),
    ))
}

/// Path of a file inside a workspace.
pub fn file_in(workspace: &Path, rel: &str) -> PathBuf {
    workspace.join(rel)
}
