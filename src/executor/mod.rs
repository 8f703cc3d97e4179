//! Command executor boundary
//!
//! The pipeline only knows the five symbolic container actions. The
//! executor turns them into real operations; failures come back as
//! values so nothing downstream of a dispatch can be interrupted by them.

mod docker;
mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ContainerSettings;

pub use docker::DockerExecutor;
pub use worker::{CommandWorker, DispatchRequest};

/// Container lifecycle actions reachable by gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Pull the configured image (1 finger)
    Pull,
    /// Launch a new container (2 fingers)
    Run,
    /// Stop the container (3 fingers)
    Stop,
    /// Start a stopped container (4 fingers)
    Start,
    /// Stop and remove the container (5 fingers)
    Remove,
}

impl Action {
    /// All actions, ordered by finger count
    #[cfg(test)]
    pub const ALL: [Action; 5] = [
        Action::Pull,
        Action::Run,
        Action::Stop,
        Action::Start,
        Action::Remove,
    ];

    /// The command map: 1..=5 fingers, nothing for any other count
    pub fn for_finger_count(count: u8) -> Option<Self> {
        match count {
            1 => Some(Action::Pull),
            2 => Some(Action::Run),
            3 => Some(Action::Stop),
            4 => Some(Action::Start),
            5 => Some(Action::Remove),
            _ => None,
        }
    }

    /// Finger count bound to this action
    #[cfg(test)]
    pub fn finger_count(self) -> u8 {
        match self {
            Action::Pull => 1,
            Action::Run => 2,
            Action::Stop => 3,
            Action::Start => 4,
            Action::Remove => 5,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Pull => write!(f, "pull"),
            Action::Run => write!(f, "run"),
            Action::Stop => write!(f, "stop"),
            Action::Start => write!(f, "start"),
            Action::Remove => write!(f, "remove"),
        }
    }
}

/// What caused an action to be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// A stabilized finger count
    Gesture { fingers: u8 },
    /// An IPC client request
    Manual,
}

/// Result of one executor call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Snapshot of the managed container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub exists: bool,
    pub status: String,
    pub ports: String,
    pub running: bool,
}

impl ContainerInfo {
    /// No container with the configured name
    pub fn missing() -> Self {
        Self {
            exists: false,
            status: "Not found".to_string(),
            ports: "N/A".to_string(),
            running: false,
        }
    }
}

/// Errors from the executor's own preconditions
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("docker is not installed")]
    NotInstalled,

    #[error("docker daemon is not running: {0}")]
    DaemonDown(String),

    #[error("docker did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to run docker: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns actions into container operations
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one action; never fails, failures are reported in the outcome
    async fn execute(&self, action: Action) -> CommandOutcome;

    /// Inspect the managed container
    async fn container_info(&self) -> ContainerInfo;

    /// Point later actions at another container name and/or image
    ///
    /// Returns the settings now in effect.
    async fn set_container(&self, name: Option<String>, image: Option<String>) -> ContainerSettings;
}
