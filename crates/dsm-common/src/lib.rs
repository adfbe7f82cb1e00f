// Re-export dependencies used in public interfaces of common types

use std::fmt::Display;

pub use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Container is blacklisted and cannot be modified: {container_id}")]
    Blacklisted { container_id: String },

    #[error("Already In Desired State: {0}")]
    AlreadyInDesiredState(String),

    #[error("Runtime Error: {0}")]
    Runtime(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Invalid Argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Failed to update container {container} during {stage}: {source}")]
    UpdateFailed {
        container: String,
        stage: UpdateStage,
        #[source]
        source: Box<ServiceError>,
    },
}

impl ServiceError {
    pub fn blacklisted(container_id: impl Into<String>) -> Self {
        ServiceError::Blacklisted {
            container_id: container_id.into(),
        }
    }

    /// The underlying failure, looking through update stage wrappers.
    pub fn root_cause(&self) -> &ServiceError {
        match self {
            ServiceError::UpdateFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True for a protection veto, which callers report differently from
    /// generic runtime failures.
    pub fn is_blacklisted(&self) -> bool {
        matches!(self.root_cause(), ServiceError::Blacklisted { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), ServiceError::NotFound(_))
    }
}

// Define the primary Result type for service manager operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Stages of the update workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Inspect,
    Pull,
    Stop,
    Remove,
    Create,
    Reconnect,
    Start,
}

impl UpdateStage {
    /// Whether the original container is already gone once this stage fails.
    pub fn is_past_removal(self) -> bool {
        matches!(
            self,
            UpdateStage::Create | UpdateStage::Reconnect | UpdateStage::Start
        )
    }
}

impl Display for UpdateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UpdateStage::Inspect => "inspect",
            UpdateStage::Pull => "pull",
            UpdateStage::Stop => "stop",
            UpdateStage::Remove => "remove",
            UpdateStage::Create => "create",
            UpdateStage::Reconnect => "reconnect",
            UpdateStage::Start => "start",
        };
        f.write_str(name)
    }
}

/// Identity of a container captured at the start of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub id: String,
    pub name: String,
    pub image: String,
}

impl ContainerIdentity {
    /// Builds an identity, stripping the leading `/` the daemon puts on names.
    pub fn new(id: impl Into<String>, name: &str, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: normalize_name(name).to_string(),
            image: image.into(),
        }
    }
}

pub fn normalize_name(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

/// Summary of a container as returned by listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
    Console,
}

/// One chunk of log output as delivered by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub stream: OutputStream,
    pub text: String,
}

impl Display for LogLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
