//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::DispatchEvent;
use crate::executor::{Action, ContainerInfo};
use crate::history::CommandRecord;

/// Default number of history entries returned
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to event notifications
    Subscribe,

    /// Queue an action, same as the matching gesture
    Execute { action: Action },

    /// Open or close the camera session
    SetCamera { active: bool },

    /// Most recent command records
    History {
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Forget all command records
    ClearHistory,

    /// Inspect the managed container
    ContainerStatus,

    /// Retarget later actions at another container and/or image
    SetContainer {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        image: Option<String>,
    },
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Action accepted into the dispatch queue
    Queued { action: Action },

    /// Camera session request forwarded
    CameraSet { active: bool },

    /// Command records, newest first
    History { entries: Vec<CommandRecord> },

    /// History emptied
    HistoryCleared,

    /// Container snapshot
    Container(ContainerInfo),

    /// Target container now in effect
    ContainerSet { name: String, image: String },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Pipeline or worker event
    Event { event: DispatchEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether a camera session is open
    pub camera_active: bool,

    /// Current stabilized finger count
    pub stable_count: u8,

    /// Last action that completed
    pub last_action: Option<Action>,

    /// Commands completed since startup
    pub commands_run: u64,

    /// Commands that failed since startup
    pub commands_failed: u64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            camera_active: false,
            stable_count: 0,
            last_action: None,
            commands_run: 0,
            commands_failed: 0,
            uptime_secs: 0,
        }
    }
}
