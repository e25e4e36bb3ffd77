//! Workflow events and the broadcast bus that carries them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::application::{ApplicationStatus, Role};
use crate::models::command::CommandKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Optimistic local mutation applied, persist pending.
    TransitionCommitted {
        app_id: String,
        command: CommandKind,
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    /// Backend accepted the persist. `corrected` is set when server values
    /// replaced optimistic ones.
    TransitionConfirmed {
        app_id: String,
        command: CommandKind,
        status: ApplicationStatus,
        corrected: bool,
    },
    TransitionRolledBack {
        app_id: String,
        command: CommandKind,
        restored: ApplicationStatus,
        reason: String,
    },
    ValidationFailed {
        app_id: String,
        command: CommandKind,
        missing: Vec<String>,
        malformed: Vec<String>,
    },
    InvalidTransition {
        app_id: String,
        command: CommandKind,
        from: ApplicationStatus,
        role: Role,
    },
    Conflict {
        app_id: String,
        command: CommandKind,
        reason: String,
    },
}

impl WorkflowEvent {
    pub fn app_id(&self) -> &str {
        match self {
            WorkflowEvent::TransitionCommitted { app_id, .. }
            | WorkflowEvent::TransitionConfirmed { app_id, .. }
            | WorkflowEvent::TransitionRolledBack { app_id, .. }
            | WorkflowEvent::ValidationFailed { app_id, .. }
            | WorkflowEvent::InvalidTransition { app_id, .. }
            | WorkflowEvent::Conflict { app_id, .. } => app_id,
        }
    }

    pub fn command(&self) -> CommandKind {
        match self {
            WorkflowEvent::TransitionCommitted { command, .. }
            | WorkflowEvent::TransitionConfirmed { command, .. }
            | WorkflowEvent::TransitionRolledBack { command, .. }
            | WorkflowEvent::ValidationFailed { command, .. }
            | WorkflowEvent::InvalidTransition { command, .. }
            | WorkflowEvent::Conflict { command, .. } => *command,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: WorkflowEvent) {
        tracing::trace!(?event, "workflow event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
