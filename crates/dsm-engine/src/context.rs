//! Service components assembled from one [`ServiceConfig`].

use crate::config::ServiceConfig;
use crate::guard::ProtectionGuard;
use crate::logs::LogStreamBridge;
use crate::monitor::ContainerMonitor;
use crate::orchestrator::LifecycleOrchestrator;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub logs: Arc<LogStreamBridge>,
}

impl ServiceContext {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ServiceConfig) -> Self {
        let guard = ProtectionGuard::new(config.blacklist.iter().cloned());
        if guard.is_empty() {
            warn!("No blacklisted containers configured; every container can be stopped or updated");
        } else {
            info!(entries = ?guard.entries(), "Loaded container blacklist");
        }

        let orchestrator = Arc::new(LifecycleOrchestrator::new(runtime.clone(), guard));
        let logs = Arc::new(LogStreamBridge::from_config(runtime, &config));
        info!(
            log_stream_buffer = logs.buffer(),
            log_read_timeout = ?logs.read_timeout(),
            "Log stream bridge ready"
        );

        Self {
            config,
            orchestrator,
            logs,
        }
    }

    /// Background monitor on the configured intervals.
    pub fn monitor(&self) -> ContainerMonitor {
        ContainerMonitor::new(
            self.orchestrator.clone(),
            self.config.update_check_interval,
            self.config.health_check_interval,
        )
    }
}
