//! Periodic background checks over the running containers.

use crate::orchestrator::LifecycleOrchestrator;
use dsm_common::{ContainerSummary, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// True if the reference names a registry host in its first path segment,
/// e.g. `ghcr.io/org/app:1.0` or `localhost:5000/app`.
pub fn is_remote_image(reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() {
        return false;
    }

    let without_digest = reference.split('@').next().unwrap_or(reference);
    let name = match without_digest.rfind(':') {
        // a colon after the last slash is a tag, not a registry port
        Some(colon) if without_digest[colon..].find('/').is_none() => &without_digest[..colon],
        _ => without_digest,
    };

    let mut segments = name.split('/');
    match (segments.next(), segments.next()) {
        (Some(first), Some(_)) => first.contains('.') || first.contains(':'),
        _ => false,
    }
}

/// Resolves when `signal` fires. A signal listener that fails to install
/// is logged and never resolves, so the service keeps running.
pub async fn shutdown_signal<F, E>(signal: F)
where
    F: Future<Output = std::result::Result<(), E>>,
    E: std::fmt::Display,
{
    match signal.await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await
        }
    }
}

pub struct ContainerMonitor {
    orchestrator: Arc<LifecycleOrchestrator>,
    update_interval: Duration,
    health_interval: Duration,
}

impl ContainerMonitor {
    pub fn new(
        orchestrator: Arc<LifecycleOrchestrator>,
        update_interval: Duration,
        health_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            update_interval,
            health_interval,
        }
    }

    /// Checks every running container with a remote image for a newer image.
    /// Returns the names of containers with an update available.
    pub async fn check_for_updates(&self) -> Result<Vec<String>> {
        debug!("Checking for container updates...");
        let containers = self.orchestrator.list(false).await?;

        let mut updatable = Vec::new();
        for container in containers {
            if !is_remote_image(&container.image) {
                debug!(image = %container.image, "Skipping local image");
                continue;
            }

            match self.orchestrator.check_for_update(&container.image).await {
                Ok(true) => {
                    info!(container = %container.name, image = %container.image, "Update available for container");
                    updatable.push(container.name);
                }
                Ok(false) => {}
                Err(e) => {
                    error!(container = %container.name, error = %e, "Error checking updates for container")
                }
            }
        }
        Ok(updatable)
    }

    /// Warns about every listed container that is not running.
    pub async fn health_check(&self) -> Result<Vec<ContainerSummary>> {
        let containers = self.orchestrator.list(false).await?;
        let unhealthy: Vec<ContainerSummary> = containers
            .into_iter()
            .filter(|container| !container.is_running())
            .collect();

        for container in &unhealthy {
            warn!(container = %container.name, state = %container.state, "Container is not running");
        }
        Ok(unhealthy)
    }

    /// Runs both checks on their intervals until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut updates = tokio::time::interval(self.update_interval);
        updates.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health = tokio::time::interval(self.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(shutdown);
        info!(
            update_interval_secs = self.update_interval.as_secs(),
            health_interval_secs = self.health_interval.as_secs(),
            "Container monitor started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Container monitor stopping");
                    break;
                }
                _ = updates.tick() => {
                    if let Err(e) = self.check_for_updates().await {
                        error!(error = %e, "Update check failed");
                    }
                }
                _ = health.tick() => {
                    if let Err(e) = self.health_check().await {
                        error!(error = %e, "Health check failed");
                    }
                }
            }
        }
    }
}
