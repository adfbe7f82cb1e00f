//! Container lifecycle operations and the update/replace workflow.
//!
//! `update` runs its stages strictly in order and never rolls back. Once the
//! old container has been removed, a later failure leaves neither the old nor
//! a running new container; the returned [`ServiceError::UpdateFailed`] names
//! the stage so the caller can see which side of that window it is on.

use crate::docker::{classify, map_summary};
use crate::guard::ProtectionGuard;
use crate::locks::{IdentityGuard, IdentityLocks};
use crate::runtime::ContainerRuntime;
use crate::snapshot::{identity_of, ContainerConfigSnapshot};
use bollard::models::ContainerInspectResponse;
use dsm_common::{ContainerIdentity, ContainerSummary, Result, ServiceError, UpdateStage};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Grace period for stop and restart requests.
pub const STOP_TIMEOUT_SECS: u32 = 10;

/// Grace period for stopping a container that is about to be replaced.
pub const UPDATE_STOP_TIMEOUT_SECS: u32 = 30;

pub struct LifecycleOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    guard: ProtectionGuard,
    locks: IdentityLocks,
}

impl LifecycleOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, guard: ProtectionGuard) -> Self {
        Self {
            runtime,
            guard,
            locks: IdentityLocks::new(),
        }
    }

    pub fn guard(&self) -> &ProtectionGuard {
        &self.guard
    }

    #[instrument(skip(self))]
    pub async fn list(&self, include_stopped: bool) -> Result<Vec<ContainerSummary>> {
        let containers = self
            .runtime
            .list_containers(include_stopped)
            .await
            .map_err(classify)?;
        Ok(containers.into_iter().map(map_summary).collect())
    }

    /// Starts a container. Protected containers may be started.
    #[instrument(skip(self))]
    pub async fn start(&self, id: &str) -> Result<()> {
        info!(container_id = %id, "Starting container");
        self.runtime.start_container(id).await.map_err(classify)
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, id: &str) -> Result<()> {
        let (_lock, identity, _) = self.lock_guarded(id).await?;
        info!(container_id = %identity.id, "Stopping container");
        self.runtime
            .stop_container(&identity.id, STOP_TIMEOUT_SECS)
            .await
            .map_err(classify)
    }

    #[instrument(skip(self))]
    pub async fn restart(&self, id: &str) -> Result<()> {
        let (_lock, identity, _) = self.lock_guarded(id).await?;
        info!(container_id = %identity.id, "Restarting container");
        self.runtime
            .restart_container(&identity.id, STOP_TIMEOUT_SECS)
            .await
            .map_err(classify)
    }

    /// Pulls the container's image and replaces the container with one created
    /// from the fresh image and the original configuration, under the same name.
    /// Returns the id of the new container.
    #[instrument(skip(self))]
    pub async fn update(&self, id: &str) -> Result<String> {
        let (_lock, identity, info) = self.lock_guarded(id).await?;
        let snapshot = ContainerConfigSnapshot::capture(&info);
        let ContainerIdentity {
            id: full_id,
            name,
            image,
        } = identity;

        info!(container = %name, container_id = %full_id, %image, "Updating container");

        info!(%image, "Pulling latest image");
        self.runtime
            .pull_image(&image)
            .await
            .map_err(|e| stage_failed(&name, UpdateStage::Pull, classify(e)))?;

        match self
            .runtime
            .stop_container(&full_id, UPDATE_STOP_TIMEOUT_SECS)
            .await
            .map_err(classify)
        {
            Ok(()) => info!(container = %name, "Container stopped"),
            Err(ServiceError::AlreadyInDesiredState(_)) => {
                info!(container = %name, "Container was already stopped")
            }
            Err(e) => return Err(stage_failed(&name, UpdateStage::Stop, e)),
        }

        let networks: Vec<_> = snapshot.networks_to_reconnect().cloned().collect();

        self.runtime
            .remove_container(&full_id, true)
            .await
            .map_err(|e| stage_failed(&name, UpdateStage::Remove, classify(e)))?;
        info!(container = %name, "Container removed");

        let new_id = self
            .runtime
            .create_container(&name, snapshot.to_create_config(&image))
            .await
            .map_err(|e| stage_failed(&name, UpdateStage::Create, classify(e)))?;
        info!(container = %name, %new_id, "Container created with new ID");

        // the primary network is already attached through host config
        for attachment in &networks {
            match self
                .runtime
                .connect_network(&attachment.network, &new_id, attachment.aliases.clone())
                .await
            {
                Ok(()) => debug!(network = %attachment.network, "Connected container to network"),
                Err(e) => warn!(
                    network = %attachment.network,
                    error = %e,
                    "Network may already be connected or is primary"
                ),
            }
        }

        self.runtime
            .start_container(&new_id)
            .await
            .map_err(|e| stage_failed(&name, UpdateStage::Start, classify(e)))?;
        info!(container = %name, %new_id, "Container successfully updated and started");

        Ok(new_id)
    }

    /// Whether pulling `image` yields a different local image id.
    #[instrument(skip(self))]
    pub async fn check_for_update(&self, image: &str) -> Result<bool> {
        let local = self.runtime.list_images(image).await.map_err(classify)?;
        let Some(local_id) = local.first().map(|summary| summary.id.clone()) else {
            return Ok(false);
        };

        self.runtime.pull_image(image).await.map_err(classify)?;

        let updated = self.runtime.list_images(image).await.map_err(classify)?;
        Ok(updated
            .first()
            .map(|summary| summary.id != local_id)
            .unwrap_or(false))
    }

    /// Resolves `id` to the daemon's full container id, locks that id and
    /// rejects protected containers. Name and short-id callers of the same
    /// container share one lock. The returned identity carries the full id.
    async fn lock_guarded(
        &self,
        id: &str,
    ) -> Result<(IdentityGuard, ContainerIdentity, ContainerInspectResponse)> {
        let resolved = self.runtime.inspect_container(id).await.map_err(classify)?;
        let full_id = resolved.id.clone().unwrap_or_else(|| id.to_string());
        let lock = self.locks.acquire(&full_id).await;

        // the container may have been replaced while this call waited
        let info = self
            .runtime
            .inspect_container(&full_id)
            .await
            .map_err(classify)?;
        let requested = identity_of(id, &info);
        let identity = ContainerIdentity {
            id: full_id,
            ..requested.clone()
        };
        if self.guard.is_protected(&requested) || self.guard.is_protected(&identity) {
            warn!(container_id = %id, container = %identity.name, "Refusing to modify blacklisted container");
            return Err(ServiceError::blacklisted(id));
        }
        Ok((lock, identity, info))
    }
}

fn stage_failed(container: &str, stage: UpdateStage, source: ServiceError) -> ServiceError {
    ServiceError::UpdateFailed {
        container: container.to_string(),
        stage,
        source: Box::new(source),
    }
}
