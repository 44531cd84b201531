//! Docker Engine implementation of [`ContainerRuntime`]

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config, InspectContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, HostConfig};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;
use tracing::{debug, info};

use super::traits::{ContainerRuntime, EventStream};
use super::types::{ContainerDescriptor, EventAction, HelperSpec, NetworkMode, RuntimeEvent};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;

/// Container runtime backed by the Docker Engine API over a unix socket
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    request_timeout_secs: u64,
}

impl DockerRuntime {
    /// Connect to the Docker daemon and verify it answers.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Connect` if the socket cannot be opened or the
    /// daemon does not respond to a ping.
    pub async fn connect(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let endpoint = config.docker_socket.display().to_string();
        let docker = connect_unix(&config.docker_socket, config.request_timeout_secs)
            .map_err(|e| RuntimeError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        docker.ping().await.map_err(|e| RuntimeError::Connect {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        info!("Connected to Docker at {}", endpoint);
        Ok(Self {
            docker,
            request_timeout_secs: config.request_timeout_secs,
        })
    }

    fn map_error(&self, op: &'static str, id: &str, err: BollardError) -> RuntimeError {
        map_error(op, id, self.request_timeout_secs, err)
    }
}

fn connect_unix(path: &Path, timeout_secs: u64) -> Result<Docker, BollardError> {
    Docker::connect_with_unix(&path.to_string_lossy(), timeout_secs, API_DEFAULT_VERSION)
}

fn map_error(op: &'static str, id: &str, timeout_secs: u64, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::not_found(id),
        BollardError::RequestTimeoutError => RuntimeError::Timeout { op, timeout_secs },
        other => RuntimeError::api(op, other.to_string()),
    }
}

fn descriptor_from_inspect(id: &str, resp: ContainerInspectResponse) -> ContainerDescriptor {
    let config = resp.config.unwrap_or_default();
    let network_mode = resp
        .host_config
        .and_then(|hc| hc.network_mode)
        .map_or(NetworkMode::Bridge, |mode| NetworkMode::parse(&mode));
    let ip_address = resp
        .network_settings
        .and_then(|ns| ns.ip_address)
        .filter(|ip| !ip.is_empty())
        .and_then(|ip| ip.parse::<IpAddr>().ok());

    ContainerDescriptor {
        id: resp.id.unwrap_or_else(|| id.to_string()),
        ip_address,
        hostname: config.hostname.unwrap_or_default(),
        network_mode,
        image: config.image.or(resp.image).unwrap_or_default(),
        labels: config.labels.unwrap_or_default(),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> Result<Vec<String>, RuntimeError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| self.map_error("list_containers", "", e))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDescriptor, RuntimeError> {
        let resp = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| self.map_error("inspect_container", id, e))?;

        Ok(descriptor_from_inspect(id, resp))
    }

    async fn create_container(&self, spec: &HelperSpec) -> Result<String, RuntimeError> {
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                network_mode: Some(spec.network_mode.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let resp = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| self.map_error("create_container", &spec.image, e))?;

        for warning in &resp.warnings {
            debug!("Helper {} create warning: {}", resp.id, warning);
        }
        Ok(resp.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| self.map_error("start_container", id, e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut stream = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match stream.next().await {
            Some(Ok(resp)) => Ok(resp.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(self.map_error("wait_container", id, e)),
            None => Err(RuntimeError::api(
                "wait_container",
                "stream ended without exit status",
            )),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| self.map_error("remove_container", id, e))
    }

    async fn events(&self) -> Result<EventStream, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("type".to_string(), vec!["container".to_string()]);

        let timeout_secs = self.request_timeout_secs;
        let stream = self
            .docker
            .events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            }))
            .filter_map(move |item| async move {
                match item {
                    Ok(msg) => {
                        let action = EventAction::parse(msg.action.as_deref().unwrap_or(""));
                        let id = msg.actor.and_then(|actor| actor.id)?;
                        Some(Ok(RuntimeEvent::new(action, id)))
                    }
                    Err(e) => Some(Err(map_error("events", "", timeout_secs, e))),
                }
            });

        Ok(stream.boxed())
    }

    fn name(&self) -> &str {
        "docker"
    }
}
