// Re-export dependencies potentially needed by consumers (like the binary)
pub use bollard;
pub use dsm_common as common;

pub mod config;
pub mod context;
pub mod docker;
pub mod guard;
pub mod locks;
pub mod logs;
pub mod monitor;
pub mod orchestrator;
pub mod runtime;
pub mod snapshot;
pub mod test_utils;

pub use config::ServiceConfig;
pub use context::ServiceContext;
pub use docker::{classify, connect_docker, DockerRuntime};
pub use guard::{is_protected, ProtectionGuard};
pub use logs::{LogStream, LogStreamBridge, LOGS_UNAVAILABLE, MAX_TAIL_LINES};
pub use monitor::{is_remote_image, shutdown_signal, ContainerMonitor};
pub use orchestrator::LifecycleOrchestrator;
pub use runtime::{ContainerRuntime, LogFeed};
pub use snapshot::{ContainerConfigSnapshot, NetworkAttachment};
