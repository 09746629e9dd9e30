// Copyright (C) 2025 The Sessionbox Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker Engine backend.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary, HostConfig, PortBinding, PortMap};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use super::traits::*;

/// Container runtime backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the standard `DOCKER_HOST` / socket defaults.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Map a bollard error onto the runtime taxonomy.
fn map_err(e: bollard::errors::Error, reference: &str) -> RuntimeError {
    use bollard::errors::Error as E;
    match e {
        E::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(reference.to_string()),
        E::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeError::NameConflict(reference.to_string()),
        E::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api(format!("{status_code}: {message}")),
        E::HyperResponseError { .. }
        | E::IOError { .. }
        | E::SocketNotFoundError(_)
        | E::RequestTimeoutError => RuntimeError::Unavailable(e.to_string()),
        other => RuntimeError::Api(other.to_string()),
    }
}

/// 304 means "already in the requested state".
fn not_modified(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn port_key(container_port: u16) -> String {
    format!("{container_port}/tcp")
}

fn parse_port_key(key: &str) -> Option<u16> {
    key.split('/').next()?.parse().ok()
}

fn published_from_map(ports: Option<&PortMap>) -> BTreeMap<u16, u16> {
    let mut out = BTreeMap::new();
    let Some(ports) = ports else {
        return out;
    };
    for (key, bindings) in ports {
        let Some(container_port) = parse_port_key(key) else {
            continue;
        };
        let host_port = bindings
            .iter()
            .flatten()
            .filter_map(|b| b.host_port.as_deref())
            .find_map(|p| p.parse::<u16>().ok());
        if let Some(host_port) = host_port {
            out.insert(container_port, host_port);
        }
    }
    out
}

fn info_from_inspect(resp: ContainerInspectResponse) -> ContainerInfo {
    let state = resp
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| ContainerState::parse(&s.to_string()))
        .unwrap_or(ContainerState::Unknown);
    let labels = resp
        .config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default()
        .into_iter()
        .collect();
    let published_ports =
        published_from_map(resp.network_settings.as_ref().and_then(|n| n.ports.as_ref()));

    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        state,
        labels,
        published_ports,
    }
}

fn info_from_summary(summary: ContainerSummary) -> ContainerInfo {
    let published_ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| Some((p.private_port, p.public_port?)))
        .collect();

    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name: summary
            .names
            .and_then(|n| n.into_iter().next())
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        state: ContainerState::parse(summary.state.as_deref().unwrap_or_default()),
        labels: summary.labels.unwrap_or_default().into_iter().collect(),
        published_ports,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) => match map_err(e, image) {
                RuntimeError::NotFound(_) => {}
                other => return Err(other),
            },
        }

        info!(image = %image, "Pulling preview image");
        self.docker
            .create_image(
                Some(CreateImageOptions {
                    from_image: image,
                    ..Default::default()
                }),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| map_err(e, image))?;
        info!(image = %image, "Preview image pulled");
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<String> {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .published_ports
            .iter()
            .map(|(container_port, host_port)| {
                (
                    port_key(*container_port),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .published_ports
            .keys()
            .map(|p| (port_key(*p), HashMap::new()))
            .collect();

        let host_config = HostConfig {
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            network_mode: spec.network.clone(),
            extra_hosts: Some(vec!["host.docker.internal:host-gateway".to_string()]),
            ..Default::default()
        };

        let mut env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env.sort();

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone().into_iter().collect()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_err(e, &spec.name))?;
        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "Docker create warning");
        }

        if let Err(e) = self.docker.start_container::<String>(&response.id, None).await
            && !not_modified(&e)
        {
            let err = map_err(e, &spec.name);
            // Do not leave a created-but-dead container holding the name.
            if let Err(remove_err) = self
                .docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                warn!(
                    container = %spec.name,
                    error = %remove_err,
                    "Failed to remove container that did not start"
                );
            }
            return Err(err);
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(()) => Ok(()),
            Err(e) if not_modified(&e) => Ok(()),
            Err(e) => Err(map_err(e, id)),
        }
    }

    async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(i64::MAX);
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if not_modified(&e) => Ok(()),
            Err(e) => Err(map_err(e, id)),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_err(e, id))
    }

    async fn inspect(&self, name_or_id: &str) -> Result<Option<ContainerInfo>> {
        match self
            .docker
            .inspect_container(name_or_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(resp) => Ok(Some(info_from_inspect(resp))),
            Err(e) => match map_err(e, name_or_id) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<ContainerInfo>> {
        let filters = HashMap::from([("label".to_string(), vec![format!("{label}={value}")])]);
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| map_err(e, label))?;
        Ok(summaries.into_iter().map(info_from_summary).collect())
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        let chunks: Vec<_> = self
            .docker
            .logs(
                id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    tail: tail.to_string(),
                    ..Default::default()
                }),
            )
            .try_collect()
            .await
            .map_err(|e| map_err(e, id))?;

        Ok(chunks
            .into_iter()
            .flat_map(|chunk| {
                chunk
                    .to_string()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let not_found = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".into(),
        };
        assert!(matches!(
            map_err(not_found, "c"),
            RuntimeError::NotFound(_)
        ));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "Conflict. The container name is already in use".into(),
        };
        assert!(matches!(
            map_err(conflict, "c"),
            RuntimeError::NameConflict(_)
        ));

        let server = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".into(),
        };
        assert!(matches!(map_err(server, "c"), RuntimeError::Api(_)));
    }

    #[test]
    fn test_published_ports_from_inspect_map() {
        let ports: PortMap = HashMap::from([
            (
                "3000/tcp".to_string(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".into()),
                    host_port: Some("3412".into()),
                }]),
            ),
            ("9229/tcp".to_string(), None),
        ]);

        let published = published_from_map(Some(&ports));
        assert_eq!(published, BTreeMap::from([(3000, 3412)]));
    }
}
