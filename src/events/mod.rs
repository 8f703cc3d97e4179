//! Events module for pipeline and worker activity
//!
//! Published on a broadcast channel; the IPC server mirrors them into
//! its status snapshot and forwards them to subscribed clients.

use serde::{Deserialize, Serialize};

use crate::executor::{Action, Trigger};
use crate::history::CommandRecord;

/// Events emitted while gestures are processed and commands run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Camera session activated; fresh stabilizer and dispatch state
    SessionStarted,

    /// Camera session deactivated; session state discarded
    SessionEnded,

    /// The stabilized finger count changed
    StableCountChanged { count: u8 },

    /// An action entered the dispatch queue
    CommandQueued { action: Action, trigger: Trigger },

    /// The executor finished an action
    CommandCompleted { record: CommandRecord },
}

impl std::fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchEvent::SessionStarted => write!(f, "SESSION_STARTED"),
            DispatchEvent::SessionEnded => write!(f, "SESSION_ENDED"),
            DispatchEvent::StableCountChanged { count } => {
                write!(f, "STABLE_COUNT_CHANGED ({})", count)
            }
            DispatchEvent::CommandQueued { action, .. } => write!(f, "COMMAND_QUEUED ({})", action),
            DispatchEvent::CommandCompleted { record } => write!(
                f,
                "COMMAND_COMPLETED ({}, {})",
                record.action,
                if record.success { "ok" } else { "failed" }
            ),
        }
    }
}
