// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reverse-proxy routing.
//!
//! Containers are attached to the proxy network and carry Traefik labels for
//! host-based routing and TLS. No host port is published; the backend port is
//! fixed and only reachable through the proxy.

use std::collections::BTreeMap;

use super::traits::*;
use crate::naming::subdomain_for;
use crate::runtime::ContainerInfo;

/// Reverse-proxy configuration.
#[derive(Debug, Clone)]
pub struct ReverseProxyConfig {
    /// Domain previews are served under.
    pub base_domain: String,
    /// Backend port the proxy forwards to.
    pub app_port: u16,
    /// Network shared with the proxy.
    pub network: String,
    /// Proxy entrypoint name.
    pub entrypoint: String,
    /// TLS certificate resolver.
    pub cert_resolver: String,
}

impl Default for ReverseProxyConfig {
    fn default() -> Self {
        Self {
            base_domain: "preview.localhost".to_string(),
            app_port: 3000,
            network: "proxy".to_string(),
            entrypoint: "websecure".to_string(),
            cert_resolver: "letsencrypt".to_string(),
        }
    }
}

/// Routes previews through a label-driven reverse proxy.
#[derive(Debug, Clone, Default)]
pub struct ReverseProxyRouting {
    config: ReverseProxyConfig,
}

impl ReverseProxyRouting {
    /// Create a reverse-proxy strategy.
    pub fn new(config: ReverseProxyConfig) -> Self {
        Self { config }
    }

    /// Domain a session's preview is served on.
    pub fn domain_for(&self, project_id: u64, session_id: &str) -> String {
        subdomain_for(project_id, session_id, &self.config.base_domain)
    }

    fn proxy_labels(&self, router: &str, domain: &str) -> BTreeMap<String, String> {
        let c = &self.config;
        BTreeMap::from([
            ("traefik.enable".to_string(), "true".to_string()),
            (
                format!("traefik.http.routers.{router}.rule"),
                format!("Host(`{domain}`)"),
            ),
            (
                format!("traefik.http.routers.{router}.entrypoints"),
                c.entrypoint.clone(),
            ),
            (
                format!("traefik.http.routers.{router}.tls.certresolver"),
                c.cert_resolver.clone(),
            ),
            (
                format!("traefik.http.services.{router}.loadbalancer.server.port"),
                c.app_port.to_string(),
            ),
            ("traefik.docker.network".to_string(), c.network.clone()),
        ])
    }
}

impl RoutingStrategy for ReverseProxyRouting {
    fn kind(&self) -> RoutingKind {
        RoutingKind::ReverseProxy
    }

    fn prepare(&self, project_id: u64, session_id: &str, container_name: &str) -> RoutingConfig {
        let domain = self.domain_for(project_id, session_id);
        let mut labels = identity_labels(self.kind(), project_id, session_id, self.config.app_port);
        labels.extend(self.proxy_labels(container_name, &domain));

        RoutingConfig {
            published_ports: BTreeMap::new(),
            labels,
            external_url: format!("https://{domain}"),
            port: self.config.app_port,
            app_port: self.config.app_port,
            network: Some(self.config.network.clone()),
        }
    }

    fn recover(&self, info: &ContainerInfo) -> Option<RecoveredRoute> {
        let (project_id, session_id) = identity_from_labels(&info.labels)?;
        let rule = info
            .labels
            .get(&format!("traefik.http.routers.{}.rule", info.name))?;
        let domain = rule.strip_prefix("Host(`")?.strip_suffix("`)")?;
        if domain != self.domain_for(project_id, &session_id) {
            return None;
        }
        Some(RecoveredRoute {
            external_url: format!("https://{domain}"),
            port: self.config.app_port,
        })
    }
}
