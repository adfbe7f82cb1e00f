//! The seam between the engine and the container runtime daemon.
//!
//! Records and failures are the runtime-native `bollard` types, so the
//! production implementation is a thin pass-through and tests can script the
//! daemon with plain model structs.

use async_trait::async_trait;
use bollard::container::{Config, LogOutput, LogsOptions};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, ContainerSummary, ImageSummary};
use futures::stream::BoxStream;

/// Frames of a single log subscription. Dropping the feed closes the
/// subscription on the daemon side.
pub type LogFeed = BoxStream<'static, Result<LogOutput, BollardError>>;

pub type RuntimeResult<T> = std::result::Result<T, BollardError>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_containers(&self, show_all: bool) -> RuntimeResult<Vec<ContainerSummary>>;

    async fn inspect_container(&self, id: &str) -> RuntimeResult<ContainerInspectResponse>;

    /// Local images matching `reference`.
    async fn list_images(&self, reference: &str) -> RuntimeResult<Vec<ImageSummary>>;

    /// Pulls `reference`, returning once the registry operation has finished.
    async fn pull_image(&self, reference: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()>;

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> RuntimeResult<()>;

    async fn remove_container(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Creates a container named `name`, returning the new id.
    async fn create_container(&self, name: &str, config: Config<String>) -> RuntimeResult<String>;

    async fn start_container(&self, id: &str) -> RuntimeResult<()>;

    async fn connect_network(
        &self,
        network: &str,
        container_id: &str,
        aliases: Option<Vec<String>>,
    ) -> RuntimeResult<()>;

    fn read_logs(&self, id: &str, options: LogsOptions<String>) -> LogFeed;
}
