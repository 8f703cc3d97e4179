//! Command history kept for IPC clients

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::executor::{Action, CommandOutcome, Trigger};

/// One executed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// Completion time, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub action: Action,
    pub trigger: Trigger,
    pub success: bool,
    pub message: String,
}

impl CommandRecord {
    /// Stamp an outcome with the current wall-clock time
    pub fn now(action: Action, trigger: Trigger, outcome: CommandOutcome) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            timestamp_ms,
            action,
            trigger,
            success: outcome.success,
            message: outcome.message,
        }
    }
}

/// Bounded history, oldest dropped first
#[derive(Debug, Clone)]
pub struct CommandHistory {
    records: VecDeque<CommandRecord>,
    limit: usize,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, record: CommandRecord) {
        if self.limit == 0 {
            return;
        }
        while self.records.len() >= self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records first, at most `limit` of them
    pub fn recent(&self, limit: usize) -> Vec<CommandRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
