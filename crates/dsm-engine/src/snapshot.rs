//! Configuration captured from a container right before it is replaced.

use bollard::container::Config;
use bollard::models::{ContainerInspectResponse, HealthConfig, HostConfig};
use dsm_common::ContainerIdentity;
use std::collections::HashMap;

/// Name of the daemon's default network.
pub const DEFAULT_NETWORK: &str = "bridge";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerConfigSnapshot {
    pub env: Option<Vec<String>>,
    pub labels: Option<HashMap<String, String>>,
    pub exposed_ports: Option<HashMap<String, HashMap<(), ()>>>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub volumes: Option<HashMap<String, HashMap<(), ()>>>,
    pub healthcheck: Option<HealthConfig>,
    pub host_config: Option<HostConfig>,
    /// Attached networks sorted by name.
    pub networks: Vec<NetworkAttachment>,
}

/// Resolves the identity of an inspected container. `requested_id` is the id
/// the caller named, which is what the block-set is checked against.
pub fn identity_of(requested_id: &str, info: &ContainerInspectResponse) -> ContainerIdentity {
    let name = info.name.as_deref().unwrap_or_default();
    let image = info
        .config
        .as_ref()
        .and_then(|config| config.image.clone())
        .unwrap_or_default();
    ContainerIdentity::new(requested_id, name, image)
}

impl ContainerConfigSnapshot {
    pub fn capture(info: &ContainerInspectResponse) -> Self {
        let mut snapshot = Self {
            host_config: info.host_config.clone(),
            networks: capture_networks(info),
            ..Default::default()
        };

        if let Some(config) = info.config.as_ref() {
            snapshot.env = config.env.clone();
            snapshot.labels = config.labels.clone();
            snapshot.exposed_ports = config.exposed_ports.clone();
            snapshot.cmd = config.cmd.clone();
            snapshot.entrypoint = config.entrypoint.clone();
            snapshot.working_dir = config.working_dir.clone();
            // the daemon reports "" for an unset user and {} for no volumes
            snapshot.user = config.user.clone().filter(|user| !user.is_empty());
            snapshot.volumes = config.volumes.clone().filter(|volumes| !volumes.is_empty());
            snapshot.healthcheck = config.healthcheck.clone();
        }

        snapshot
    }

    /// Create-call configuration for the replacement container. Absent fields
    /// stay `None` so the daemon applies its own defaults.
    pub fn to_create_config(&self, image: &str) -> Config<String> {
        Config {
            image: Some(image.to_string()),
            env: self.env.clone(),
            labels: self.labels.clone(),
            exposed_ports: self.exposed_ports.clone(),
            cmd: self.cmd.clone(),
            entrypoint: self.entrypoint.clone(),
            working_dir: self.working_dir.clone(),
            user: self.user.clone(),
            volumes: self.volumes.clone(),
            healthcheck: self.healthcheck.clone(),
            host_config: self.host_config.clone(),
            ..Default::default()
        }
    }

    /// Networks to reconnect after create. The default network is skipped
    /// when the container was attached to more than one network.
    pub fn networks_to_reconnect(&self) -> impl Iterator<Item = &NetworkAttachment> {
        let multiple = self.networks.len() > 1;
        self.networks
            .iter()
            .filter(move |attachment| !(multiple && attachment.network == DEFAULT_NETWORK))
    }
}

fn capture_networks(info: &ContainerInspectResponse) -> Vec<NetworkAttachment> {
    let mut networks: Vec<NetworkAttachment> = info
        .network_settings
        .as_ref()
        .and_then(|settings| settings.networks.as_ref())
        .map(|networks| {
            networks
                .iter()
                .map(|(name, endpoint)| NetworkAttachment {
                    network: name.clone(),
                    aliases: endpoint.aliases.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    networks.sort_by(|a, b| a.network.cmp(&b.network));
    networks
}
