// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for sessionbox-environment.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sessionbox_workspace::WorkspaceManagerConfig;

use crate::health_monitor::MonitorConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::routing::{
    PortMappingConfig, PortMappingRouting, ReverseProxyConfig, ReverseProxyRouting, RoutingKind,
    RoutingStrategy,
};

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Routing variant, fixed for the process lifetime.
    pub routing: RoutingKind,
    /// Port-mapping settings (used when `routing` is port mapping).
    pub port_mapping: PortMappingConfig,
    /// Reverse-proxy settings (used when `routing` is reverse proxy).
    pub reverse_proxy: ReverseProxyConfig,
    /// Image and callback settings for preview containers.
    pub orchestrator: OrchestratorConfig,
    /// Compilation monitor window and interval.
    pub monitor: MonitorConfig,
    /// Per-request timeout for a single health probe.
    pub probe_timeout: Duration,
    /// Session workspace root, remote and token.
    pub workspace: WorkspaceManagerConfig,
    /// Branch new sessions are cut from.
    pub base_branch: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` (environment variable semantics).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let routing = match var("SESSIONBOX_ROUTING") {
            Some(v) => RoutingKind::from_str(&v).map_err(|_| ConfigError::InvalidValue {
                var: "SESSIONBOX_ROUTING",
                value: v,
            })?,
            None => RoutingKind::PortMapping,
        };

        let app_port: u16 = parse_or(&var, "SESSIONBOX_APP_PORT", 3000)?;

        let port_range = match var("SESSIONBOX_PORT_RANGE") {
            Some(v) => parse_port_range(&v)?,
            None => 3000..=4000,
        };

        let port_mapping = PortMappingConfig {
            port_range,
            app_port,
            ..Default::default()
        };

        let proxy_defaults = ReverseProxyConfig::default();
        let reverse_proxy = ReverseProxyConfig {
            base_domain: var("SESSIONBOX_BASE_DOMAIN").unwrap_or(proxy_defaults.base_domain),
            app_port,
            network: var("SESSIONBOX_PROXY_NETWORK").unwrap_or(proxy_defaults.network),
            entrypoint: var("SESSIONBOX_PROXY_ENTRYPOINT").unwrap_or(proxy_defaults.entrypoint),
            cert_resolver: var("SESSIONBOX_CERT_RESOLVER").unwrap_or(proxy_defaults.cert_resolver),
        };

        let orchestrator_defaults = OrchestratorConfig::default();
        let orchestrator = OrchestratorConfig {
            image: var("SESSIONBOX_IMAGE").unwrap_or(orchestrator_defaults.image),
            callback_url: var("SESSIONBOX_CALLBACK_URL")
                .unwrap_or(orchestrator_defaults.callback_url),
            max_runtime_calls: parse_or(
                &var,
                "SESSIONBOX_MAX_RUNTIME_CALLS",
                orchestrator_defaults.max_runtime_calls,
            )?,
            ..orchestrator_defaults
        };
        if orchestrator.max_runtime_calls == 0 {
            return Err(ConfigError::InvalidValue {
                var: "SESSIONBOX_MAX_RUNTIME_CALLS",
                value: "0".to_string(),
            });
        }

        let monitor = MonitorConfig {
            timeout: Duration::from_secs(parse_or(&var, "SESSIONBOX_HEALTH_TIMEOUT_SECS", 60)?),
            interval: Duration::from_secs(parse_or(&var, "SESSIONBOX_HEALTH_INTERVAL_SECS", 2)?),
        };
        let probe_timeout = Duration::from_secs(parse_or(&var, "SESSIONBOX_PROBE_TIMEOUT_SECS", 5)?);

        let workspace = WorkspaceManagerConfig {
            workspaces_dir: PathBuf::from(
                var("SESSIONBOX_WORKSPACES_DIR").unwrap_or_else(|| ".data/workspaces".to_string()),
            ),
            remote_template: var("SESSIONBOX_REMOTE_TEMPLATE"),
            token: var("SESSIONBOX_GIT_TOKEN"),
        };

        let base_branch = var("SESSIONBOX_BASE_BRANCH").unwrap_or_else(|| "main".to_string());

        Ok(Self {
            routing,
            port_mapping,
            reverse_proxy,
            orchestrator,
            monitor,
            probe_timeout,
            workspace,
            base_branch,
        })
    }

    /// Build the configured routing strategy.
    pub fn routing_strategy(&self) -> Arc<dyn RoutingStrategy> {
        match self.routing {
            RoutingKind::PortMapping => Arc::new(PortMappingRouting::new(self.port_mapping.clone())),
            RoutingKind::ReverseProxy => {
                Arc::new(ReverseProxyRouting::new(self.reverse_proxy.clone()))
            }
        }
    }
}

fn parse_or<T, F>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var: key, value: v }),
        None => Ok(default),
    }
}

/// Parse `start-end` (inclusive).
fn parse_port_range(value: &str) -> Result<RangeInclusive<u16>, ConfigError> {
    let invalid = || ConfigError::InvalidPortRange(value.to_string());
    let (start, end) = value.split_once('-').ok_or_else(invalid)?;
    let start: u16 = start.trim().parse().map_err(|_| invalid())?;
    let end: u16 = end.trim().parse().map_err(|_| invalid())?;
    if start == 0 || start > end {
        return Err(invalid());
    }
    Ok(start..=end)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A variable could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Value found.
        value: String,
    },
    /// The port range is not `start-end` with `0 < start <= end`.
    #[error("Invalid port range {0:?}, expected e.g. 3000-4000")]
    InvalidPortRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.routing, RoutingKind::PortMapping);
        assert_eq!(config.port_mapping.port_range, 3000..=4000);
        assert_eq!(config.port_mapping.app_port, 3000);
        assert_eq!(config.reverse_proxy.base_domain, "preview.localhost");
        assert_eq!(config.orchestrator.image, "sessionbox-preview:latest");
        assert_eq!(config.orchestrator.max_runtime_calls, 8);
        assert_eq!(config.monitor.timeout, Duration::from_secs(60));
        assert_eq!(config.monitor.interval, Duration::from_secs(2));
        assert_eq!(config.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.base_branch, "main");
        assert!(config.workspace.remote_template.is_none());
        assert!(config.workspace.token.is_none());
    }

    #[test]
    fn test_proxy_routing_settings() {
        let config = Config::from_lookup(lookup(&[
            ("SESSIONBOX_ROUTING", "proxy"),
            ("SESSIONBOX_BASE_DOMAIN", "preview.example.com"),
            ("SESSIONBOX_CERT_RESOLVER", "internal"),
            ("SESSIONBOX_APP_PORT", "5173"),
        ]))
        .unwrap();

        assert_eq!(config.routing, RoutingKind::ReverseProxy);
        assert_eq!(config.reverse_proxy.base_domain, "preview.example.com");
        assert_eq!(config.reverse_proxy.cert_resolver, "internal");
        assert_eq!(config.reverse_proxy.app_port, 5173);
        assert_eq!(config.routing_strategy().kind(), RoutingKind::ReverseProxy);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("SESSIONBOX_ROUTING", "mesh")])),
            Err(ConfigError::InvalidValue { var: "SESSIONBOX_ROUTING", .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SESSIONBOX_APP_PORT", "http")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("SESSIONBOX_MAX_RUNTIME_CALLS", "0")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_port_range_parsing() {
        assert_eq!(parse_port_range("3100-3200").unwrap(), 3100..=3200);
        assert_eq!(parse_port_range(" 4000 - 4000 ").unwrap(), 4000..=4000);
        assert!(parse_port_range("4000-3000").is_err());
        assert!(parse_port_range("0-10").is_err());
        assert!(parse_port_range("3000").is_err());
        assert!(parse_port_range("a-b").is_err());
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("SESSIONBOX_IMAGE", "  "),
            ("SESSIONBOX_GIT_TOKEN", ""),
        ]))
        .unwrap();
        assert_eq!(config.orchestrator.image, "sessionbox-preview:latest");
        assert!(config.workspace.token.is_none());
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        // SAFETY: serialized with other env-mutating tests.
        unsafe {
            std::env::set_var("SESSIONBOX_PORT_RANGE", "3500-3600");
            std::env::set_var("SESSIONBOX_REMOTE_TEMPLATE", "https://git.example/p-{project_id}.git");
        }

        let config = Config::from_env();

        unsafe {
            std::env::remove_var("SESSIONBOX_PORT_RANGE");
            std::env::remove_var("SESSIONBOX_REMOTE_TEMPLATE");
        }

        let config = config.unwrap();
        assert_eq!(config.port_mapping.port_range, 3500..=3600);
        assert_eq!(
            config.workspace.remote_template.as_deref(),
            Some("https://git.example/p-{project_id}.git")
        );
    }
}
