// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sessionbox - session preview environments from the command line
//!
//! Every invocation starts with an empty registry and finds previews made by
//! earlier invocations through recovery by container name. Results are
//! printed as JSON on stdout; logs go to stderr.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use sessionbox_environment::config::{Config, ConfigError};
use sessionbox_environment::runtime::DockerRuntime;
use sessionbox_environment::{HttpHealthProbe, PreviewOrchestrator, PreviewStatus};
use sessionbox_workspace::{GitProjectStore, GitWorkspace, SessionWorkspaceManager};

#[derive(Parser, Debug)]
#[command(name = "sessionbox", version, about = "Session-scoped preview environments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start (or find) the preview for a session
    Start {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
        /// Extra container environment, KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        /// Wait until the app responds or the monitor window elapses
        #[arg(long)]
        wait: bool,
    },

    /// Stop and remove a session's preview
    Stop {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
    },

    /// Show a session's preview status with a fresh probe
    Status {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
    },

    /// Print recent preview log lines
    Logs {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
        /// Number of lines
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },

    /// Adopt every running managed preview container and list them
    Reconcile,

    /// Session workspace commands
    #[command(subcommand)]
    Workspace(WorkspaceCommand),

    /// Revert a session workspace to a commit
    Revert {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
        /// Commit to check out (detached)
        commit_sha: String,
        /// Commit pending edits before reverting
        #[arg(long)]
        backup: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceCommand {
    /// Clone the project and cut the session branch
    Create {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
        /// Branch to cut from (defaults to SESSIONBOX_BASE_BRANCH)
        #[arg(long)]
        base: Option<String>,
    },

    /// Delete the session workspace
    Cleanup {
        /// Project id
        project_id: u64,
        /// Session id
        session_id: String,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn workspace_manager(config: &Config) -> Arc<SessionWorkspaceManager> {
    Arc::new(SessionWorkspaceManager::new(
        config.workspace.clone(),
        GitWorkspace::default(),
    ))
}

fn orchestrator(config: &Config) -> anyhow::Result<PreviewOrchestrator> {
    let runtime = Arc::new(DockerRuntime::connect()?);
    let mut builder = PreviewOrchestrator::builder()
        .runtime(runtime)
        .routing(config.routing_strategy())
        .probe(Arc::new(HttpHealthProbe::new(config.probe_timeout)))
        .config(config.orchestrator.clone())
        .monitor(config.monitor.clone());

    if config.workspace.remote_template.is_some() {
        let store = GitProjectStore::new(workspace_manager(config), config.base_branch.clone());
        builder = builder.store(Arc::new(store));
    } else {
        warn!("SESSIONBOX_REMOTE_TEMPLATE not set; previews start without workspace setup");
    }

    Ok(builder.build()?)
}

async fn wait_until_ready(
    orchestrator: &PreviewOrchestrator,
    config: &Config,
    project_id: u64,
    session_id: &str,
) -> anyhow::Result<PreviewStatus> {
    let deadline = tokio::time::Instant::now() + config.monitor.timeout;
    loop {
        let status = orchestrator.status(project_id, session_id).await?;
        if status.compilation_complete || status.is_responding {
            return Ok(status);
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(project_id, session_id = %session_id, "Preview not responding yet");
            return Ok(status);
        }
        tokio::time::sleep(config.monitor.interval).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sessionbox=info,sessionbox_environment=info,sessionbox_workspace=info".into()
            }),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Start {
            project_id,
            session_id,
            env,
            wait,
        } => {
            let orchestrator = orchestrator(&config)?;
            let env: HashMap<String, String> = env.into_iter().collect();
            let started = orchestrator
                .start(project_id, &session_id, env)
                .await
                .with_context(|| format!("starting preview for {project_id}/{session_id}"))?;
            info!(url = %started.url, origin = ?started.origin, "Preview started");

            if wait {
                let status = wait_until_ready(&orchestrator, &config, project_id, &session_id).await?;
                print_json(&status)?;
            } else {
                print_json(&started)?;
            }
            orchestrator.shutdown().await;
        }

        Command::Stop {
            project_id,
            session_id,
        } => {
            let orchestrator = orchestrator(&config)?;
            // Registry is empty in a fresh process; find the container by name.
            let stopped = orchestrator.stop_by_name(project_id, &session_id).await?;
            print_json(&serde_json::json!({ "stopped": stopped }))?;
        }

        Command::Status {
            project_id,
            session_id,
        } => {
            let orchestrator = orchestrator(&config)?;
            let status = orchestrator.status(project_id, &session_id).await?;
            print_json(&status)?;
            orchestrator.shutdown().await;
        }

        Command::Logs {
            project_id,
            session_id,
            tail,
        } => {
            let orchestrator = orchestrator(&config)?;
            for line in orchestrator.logs(project_id, &session_id, tail).await? {
                println!("{line}");
            }
            orchestrator.shutdown().await;
        }

        Command::Reconcile => {
            let orchestrator = orchestrator(&config)?;
            orchestrator.ping().await?;
            let adopted = orchestrator.reconcile().await?;
            print_json(&serde_json::json!({
                "adopted": adopted,
                "previews": orchestrator.list().await,
            }))?;
            orchestrator.shutdown().await;
        }

        Command::Workspace(WorkspaceCommand::Create {
            project_id,
            session_id,
            base,
        }) => {
            if config.workspace.remote_template.is_none() {
                return Err(ConfigError::MissingEnvVar("SESSIONBOX_REMOTE_TEMPLATE").into());
            }
            let manager = workspace_manager(&config);
            let base = base.unwrap_or_else(|| config.base_branch.clone());
            manager.create(project_id, &session_id, &base).await?;
            print_json(&manager.get(project_id, &session_id).await)?;
        }

        Command::Workspace(WorkspaceCommand::Cleanup {
            project_id,
            session_id,
        }) => {
            let manager = workspace_manager(&config);
            let removed = manager.cleanup(project_id, &session_id).await?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }

        Command::Revert {
            project_id,
            session_id,
            commit_sha,
            backup,
        } => {
            let manager = workspace_manager(&config);
            let outcome =
                sessionbox_workspace::revert(&manager, project_id, &session_id, &commit_sha, backup)
                    .await?;
            print_json(&outcome)?;
        }
    }

    Ok(())
}
