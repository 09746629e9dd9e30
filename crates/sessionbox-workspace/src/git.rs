// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Git operations on a single checked-out workspace.
//!
//! Everything here shells out to the `git` binary via `tokio::process`, with a
//! timeout on every invocation. Authentication tokens are only ever placed in
//! the `origin` URL for the duration of one command and are redacted from any
//! captured output before it reaches an error or a log line.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

/// Username placed in front of the token for HTTPS remotes.
const TOKEN_USER: &str = "x-access-token";

/// Committer identity used for backup and session commits.
#[derive(Debug, Clone)]
pub struct GitIdentity {
    /// `user.name`
    pub name: String,
    /// `user.email`
    pub email: String,
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self {
            name: "sessionbox".to_string(),
            email: "sessionbox@localhost".to_string(),
        }
    }
}

/// Git service configuration.
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Identity for commits created by sessionbox.
    pub identity: GitIdentity,
    /// Limit for local commands (status, checkout, commit).
    pub command_timeout: Duration,
    /// Limit for commands that talk to a remote (clone, fetch, pull, push).
    pub network_timeout: Duration,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            identity: GitIdentity::default(),
            command_timeout: Duration::from_secs(30),
            network_timeout: Duration::from_secs(300),
        }
    }
}

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Git operations against workspace directories.
#[derive(Debug, Clone, Default)]
pub struct GitWorkspace {
    config: GitConfig,
}

impl GitWorkspace {
    /// Create a git service with the given configuration.
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    /// Run git in `dir`. Non-zero exit is reported in the output, not as an error.
    async fn run(
        &self,
        dir: &Path,
        args: &[&str],
        limit: Duration,
        secret: Option<&str>,
    ) -> Result<GitOutput> {
        let command = subcommand(args);

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::Timeout {
                    command,
                    after: limit,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = redact(String::from_utf8_lossy(&output.stderr).trim(), secret);

        Ok(GitOutput {
            success: output.status.success(),
            stdout,
            stderr,
        })
    }

    /// Run git in `dir` and turn a non-zero exit into [`Error::Git`].
    async fn run_checked(
        &self,
        dir: &Path,
        args: &[&str],
        limit: Duration,
        secret: Option<&str>,
    ) -> Result<String> {
        let out = self.run(dir, args, limit, secret).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(Error::Git {
                command: subcommand(args),
                path: dir.to_path_buf(),
                stderr: out.stderr,
            })
        }
    }

    /// Check that `path` is the root of a git working tree.
    ///
    /// A plain directory nested inside some other repository does not count.
    pub async fn is_repository(&self, path: &Path) -> bool {
        if !path.is_dir() || !path.join(".git").exists() {
            return false;
        }
        match self
            .run(
                path,
                &["rev-parse", "--is-inside-work-tree"],
                self.config.command_timeout,
                None,
            )
            .await
        {
            Ok(out) => out.success && out.stdout == "true",
            Err(e) => {
                debug!(path = %path.display(), error = %e, "rev-parse failed");
                false
            }
        }
    }

    /// Put the workspace into a detached HEAD at `commit_sha`.
    ///
    /// Returns `false` (and logs why) when the path is not a repository or git
    /// refuses the checkout. Callers treat `false` as "nothing changed".
    pub async fn checkout(&self, workspace: &Path, commit_sha: &str) -> bool {
        if !self.is_repository(workspace).await {
            warn!(
                path = %workspace.display(),
                commit = %commit_sha,
                "Checkout skipped: not a git repository"
            );
            return false;
        }

        match self
            .run(
                workspace,
                &["checkout", "--quiet", "--detach", commit_sha],
                self.config.command_timeout,
                None,
            )
            .await
        {
            Ok(out) if out.success => {
                info!(path = %workspace.display(), commit = %commit_sha, "Checked out commit");
                true
            }
            Ok(out) => {
                warn!(
                    path = %workspace.display(),
                    commit = %commit_sha,
                    stderr = %out.stderr,
                    "Checkout failed"
                );
                false
            }
            Err(e) => {
                warn!(
                    path = %workspace.display(),
                    commit = %commit_sha,
                    error = %e,
                    "Checkout failed"
                );
                false
            }
        }
    }

    /// Stage everything and commit it under `message`.
    ///
    /// Returns `Ok(None)` when the tree is clean; that is the normal outcome
    /// for a workspace without pending edits.
    pub async fn create_backup_commit(
        &self,
        workspace: &Path,
        message: &str,
    ) -> Result<Option<String>> {
        if !self.has_uncommitted_changes(workspace).await? {
            debug!(path = %workspace.display(), "Nothing to back up");
            return Ok(None);
        }

        let limit = self.config.command_timeout;
        self.run_checked(workspace, &["add", "--all"], limit, None)
            .await?;

        let name = format!("user.name={}", self.config.identity.name);
        let email = format!("user.email={}", self.config.identity.email);
        self.run_checked(
            workspace,
            &[
                "-c",
                &name,
                "-c",
                &email,
                "commit",
                "--quiet",
                "--no-verify",
                "-m",
                message,
            ],
            limit,
            None,
        )
        .await?;

        let sha = self
            .run_checked(workspace, &["rev-parse", "HEAD"], limit, None)
            .await?;
        info!(path = %workspace.display(), commit = %sha, "Created backup commit");
        Ok(Some(sha))
    }

    /// Full SHA of HEAD, or `None` if it cannot be resolved.
    pub async fn current_commit(&self, workspace: &Path) -> Option<String> {
        match self
            .run(
                workspace,
                &["rev-parse", "--verify", "HEAD"],
                self.config.command_timeout,
                None,
            )
            .await
        {
            Ok(out) if out.success && !out.stdout.is_empty() => Some(out.stdout),
            Ok(_) => None,
            Err(e) => {
                debug!(path = %workspace.display(), error = %e, "Could not resolve HEAD");
                None
            }
        }
    }

    /// Name of the checked-out branch, `None` when detached.
    pub async fn current_branch(&self, workspace: &Path) -> Option<String> {
        let out = self
            .run(
                workspace,
                &["symbolic-ref", "--quiet", "--short", "HEAD"],
                self.config.command_timeout,
                None,
            )
            .await
            .ok()?;
        (out.success && !out.stdout.is_empty()).then_some(out.stdout)
    }

    /// Whether the working tree has staged, unstaged or untracked changes.
    pub async fn has_uncommitted_changes(&self, workspace: &Path) -> Result<bool> {
        let status = self
            .run_checked(
                workspace,
                &["status", "--porcelain", "--untracked-files=all"],
                self.config.command_timeout,
                None,
            )
            .await?;
        Ok(!status.is_empty())
    }

    /// Clone `remote` into `dest`. `dest` must not exist yet.
    ///
    /// When a token is supplied it is used for the clone only; `origin` is
    /// reset to the sanitized URL right after.
    pub async fn clone_repository(
        &self,
        remote: &str,
        token: Option<&str>,
        dest: &Path,
    ) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| Error::InvalidPath(dest.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let sanitized = sanitize_remote_url(remote);
        let clone_url = match token {
            Some(token) => authenticated_remote_url(&sanitized, token),
            None => remote.to_string(),
        };
        let dest_str = dest.to_string_lossy();

        info!(remote = %sanitized, dest = %dest.display(), "Cloning workspace");
        self.run_checked(
            parent,
            &["clone", "--quiet", &clone_url, &dest_str],
            self.config.network_timeout,
            token,
        )
        .await?;

        if clone_url != sanitized {
            self.run_checked(
                dest,
                &["remote", "set-url", "origin", &sanitized],
                self.config.command_timeout,
                token,
            )
            .await?;
        }
        Ok(())
    }

    /// Check out an existing branch (local, or tracking `origin/<branch>`).
    pub async fn checkout_branch(&self, workspace: &Path, branch: &str) -> Result<()> {
        self.run_checked(
            workspace,
            &["checkout", "--quiet", branch],
            self.config.command_timeout,
            None,
        )
        .await
        .map(|_| ())
    }

    /// Create `branch` at HEAD and check it out, resetting it if it exists.
    pub async fn create_branch(&self, workspace: &Path, branch: &str) -> Result<()> {
        self.run_checked(
            workspace,
            &["checkout", "--quiet", "-B", branch],
            self.config.command_timeout,
            None,
        )
        .await
        .map(|_| ())
    }

    /// Fetch from `origin`.
    pub async fn fetch(&self, workspace: &Path, token: Option<&str>) -> Result<()> {
        self.with_authenticated_origin(workspace, token, &["fetch", "--quiet", "origin"])
            .await
            .map(|_| ())
    }

    /// Fast-forward `branch` from `origin`.
    pub async fn pull(&self, workspace: &Path, branch: &str, token: Option<&str>) -> Result<()> {
        self.with_authenticated_origin(
            workspace,
            token,
            &["pull", "--quiet", "--ff-only", "origin", branch],
        )
        .await
        .map(|_| ())
    }

    /// Push `branch` to `origin`, setting upstream.
    pub async fn push_branch(
        &self,
        workspace: &Path,
        branch: &str,
        token: Option<&str>,
    ) -> Result<()> {
        self.with_authenticated_origin(
            workspace,
            token,
            &["push", "--quiet", "--set-upstream", "origin", branch],
        )
        .await
        .map(|_| ())
    }

    /// Run one remote command with the token injected into `origin`.
    ///
    /// The sanitized URL is restored whether or not the command succeeded.
    async fn with_authenticated_origin(
        &self,
        workspace: &Path,
        token: Option<&str>,
        args: &[&str],
    ) -> Result<String> {
        let limit = self.config.network_timeout;
        let Some(token) = token else {
            return self.run_checked(workspace, args, limit, None).await;
        };

        let current = self
            .run_checked(
                workspace,
                &["remote", "get-url", "origin"],
                self.config.command_timeout,
                Some(token),
            )
            .await?;
        let sanitized = sanitize_remote_url(&current);
        let authenticated = authenticated_remote_url(&sanitized, token);

        if authenticated != sanitized {
            self.run_checked(
                workspace,
                &["remote", "set-url", "origin", &authenticated],
                self.config.command_timeout,
                Some(token),
            )
            .await?;
        }

        let result = self.run_checked(workspace, args, limit, Some(token)).await;

        if authenticated != sanitized
            && let Err(e) = self
                .run_checked(
                    workspace,
                    &["remote", "set-url", "origin", &sanitized],
                    self.config.command_timeout,
                    Some(token),
                )
                .await
        {
            warn!(
                path = %workspace.display(),
                remote = %sanitized,
                error = %e,
                "Failed to restore sanitized remote URL"
            );
        }

        result
    }
}

/// Strip credentials from an HTTP(S) remote URL.
///
/// Local paths and scp-style remotes are returned unchanged.
pub fn sanitize_remote_url(remote: &str) -> String {
    match Url::parse(remote) {
        Ok(mut url)
            if matches!(url.scheme(), "http" | "https")
                && (!url.username().is_empty() || url.password().is_some()) =>
        {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => remote.to_string(),
    }
}

/// Embed `token` into an HTTP(S) remote URL.
pub fn authenticated_remote_url(remote: &str, token: &str) -> String {
    match Url::parse(remote) {
        Ok(mut url) if matches!(url.scheme(), "http" | "https") => {
            if url.set_username(TOKEN_USER).is_err() || url.set_password(Some(token)).is_err() {
                return remote.to_string();
            }
            url.to_string()
        }
        _ => remote.to_string(),
    }
}

/// First argument that is not a `-c key=value` override.
fn subcommand(args: &[&str]) -> String {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "-c" {
            iter.next();
            continue;
        }
        return (*arg).to_string();
    }
    String::new()
}

fn redact(text: &str, secret: Option<&str>) -> String {
    match secret {
        Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
        _ => text.to_string(),
    }
}
