// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Port-mapping routing: publish the app port on a random host port.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use rand::Rng;
use rand::rngs::OsRng;

use super::traits::*;
use crate::runtime::ContainerInfo;

/// Port-mapping configuration.
#[derive(Debug, Clone)]
pub struct PortMappingConfig {
    /// Host ports to choose from (inclusive).
    pub port_range: RangeInclusive<u16>,
    /// Port the application listens on inside the container.
    pub app_port: u16,
    /// Host name used in the returned URL.
    pub public_host: String,
}

impl Default for PortMappingConfig {
    fn default() -> Self {
        Self {
            port_range: 3000..=4000,
            app_port: 3000,
            public_host: "localhost".to_string(),
        }
    }
}

/// Publishes each preview on a host port drawn from the OS random source.
#[derive(Debug, Clone, Default)]
pub struct PortMappingRouting {
    config: PortMappingConfig,
}

impl PortMappingRouting {
    /// Create a port-mapping strategy.
    pub fn new(config: PortMappingConfig) -> Self {
        Self { config }
    }

    fn pick_port(&self) -> u16 {
        OsRng.gen_range(self.config.port_range.clone())
    }

    fn url_for(&self, port: u16) -> String {
        format!("http://{}:{port}", self.config.public_host)
    }
}

impl RoutingStrategy for PortMappingRouting {
    fn kind(&self) -> RoutingKind {
        RoutingKind::PortMapping
    }

    fn prepare(&self, project_id: u64, session_id: &str, _container_name: &str) -> RoutingConfig {
        let port = self.pick_port();
        RoutingConfig {
            published_ports: BTreeMap::from([(self.config.app_port, port)]),
            labels: identity_labels(self.kind(), project_id, session_id, port),
            external_url: self.url_for(port),
            port,
            app_port: self.config.app_port,
            network: None,
        }
    }

    fn recover(&self, info: &ContainerInfo) -> Option<RecoveredRoute> {
        let port = info.host_port(self.config.app_port)?;
        Some(RecoveredRoute {
            external_url: self.url_for(port),
            port,
        })
    }
}
