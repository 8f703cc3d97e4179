//! Dispatch queue worker
//!
//! Drains the dispatch queue one request at a time so commands reach
//! the executor in the order they were queued.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use super::{Action, CommandExecutor, Trigger};
use crate::events::DispatchEvent;
use crate::history::CommandRecord;

/// One queued action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRequest {
    pub action: Action,
    pub trigger: Trigger,
}

/// Worker that owns the executor side of the queue
pub struct CommandWorker {
    executor: Arc<dyn CommandExecutor>,
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl CommandWorker {
    /// Create a new worker
    pub fn new(executor: Arc<dyn CommandExecutor>, event_tx: broadcast::Sender<DispatchEvent>) -> Self {
        Self { executor, event_tx }
    }

    /// Run until every sender of the queue is gone
    pub async fn run(&self, mut queue_rx: mpsc::Receiver<DispatchRequest>) {
        info!("command worker started");

        while let Some(request) = queue_rx.recv().await {
            self.handle(request).await;
        }

        info!("command worker stopped");
    }

    /// Execute one request and publish its result
    async fn handle(&self, request: DispatchRequest) -> CommandRecord {
        let outcome = self.executor.execute(request.action).await;
        let record = CommandRecord::now(request.action, request.trigger, outcome);

        if record.success {
            info!(action = %record.action, message = %record.message, "command succeeded");
        } else {
            error!(action = %record.action, message = %record.message, "command failed");
        }

        let _ = self.event_tx.send(DispatchEvent::CommandCompleted {
            record: record.clone(),
        });
        record
    }
}
