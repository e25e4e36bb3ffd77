//! Maps workflow events to user-facing messages.
//!
//! Presentation code never inspects errors or HTTP results directly; it
//! renders whatever the bridge delivers to its [`NotificationSink`].

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::WorkflowEvent;
use crate::models::command::CommandKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Which kind of event a template answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    Committed,
    Corrected,
    RolledBack,
    ValidationFailed,
    InvalidTransition,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub app_id: String,
    pub command: CommandKind,
    pub message: String,
}

pub trait NotificationSink: Send + Sync + 'static {
    fn deliver(&self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: Fn(Notification) + Send + Sync + 'static,
{
    fn deliver(&self, notification: Notification) {
        self(notification)
    }
}

/// Forwards notifications into a channel the UI drains.
pub struct ChannelSink(pub mpsc::UnboundedSender<Notification>);

impl NotificationSink for ChannelSink {
    fn deliver(&self, notification: Notification) {
        if self.0.send(notification).is_err() {
            debug!("Notification receiver dropped");
        }
    }
}

const ALL_COMMANDS: [CommandKind; 5] = [
    CommandKind::Review,
    CommandKind::ScheduleInterview,
    CommandKind::Accept,
    CommandKind::Reject,
    CommandKind::ConfirmAttendance,
];

fn default_template(command: CommandKind, kind: NoticeKind) -> &'static str {
    use CommandKind::*;
    use NoticeKind::*;

    match (command, kind) {
        (Review, Committed) => "Application {id} marked as reviewed",
        (ScheduleInterview, Committed) => "Interview scheduled for application {id}",
        (Accept, Committed) => "Application {id} accepted",
        (Reject, Committed) => "Application {id} rejected",
        (ConfirmAttendance, Committed) => "Attendance confirmed for application {id}",

        (Review, RolledBack) => "Could not mark application {id} as reviewed: {reason}",
        (ScheduleInterview, RolledBack) => {
            "Could not schedule the interview for application {id}: {reason}"
        }
        (Accept, RolledBack) => "Could not accept application {id}: {reason}",
        (Reject, RolledBack) => "Could not reject application {id}: {reason}",
        (ConfirmAttendance, RolledBack) => {
            "Could not confirm attendance for application {id}: {reason}"
        }

        (ScheduleInterview, ValidationFailed) => "Please complete the interview details: {fields}",
        (ConfirmAttendance, ValidationFailed) => "Please choose how you will attend the interview",
        (_, ValidationFailed) => "Please check these fields: {fields}",

        (Accept, InvalidTransition) => {
            "Application {id} can only be accepted after an interview (currently {status})"
        }
        (ConfirmAttendance, InvalidTransition) => {
            "Attendance can only be confirmed for a scheduled interview (application {id} is {status})"
        }
        (_, InvalidTransition) => "This action is not available for application {id} ({status})",

        (_, Conflict) => "Application {id} was already updated differently: {reason}",
        (_, Corrected) => "Application {id} was updated by the server and is now {status}",
    }
}

#[derive(Debug, Clone)]
pub struct NotificationBridge {
    templates: HashMap<(CommandKind, NoticeKind), String>,
}

impl Default for NotificationBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBridge {
    pub fn new() -> Self {
        let kinds = [
            NoticeKind::Committed,
            NoticeKind::Corrected,
            NoticeKind::RolledBack,
            NoticeKind::ValidationFailed,
            NoticeKind::InvalidTransition,
            NoticeKind::Conflict,
        ];
        let templates = ALL_COMMANDS
            .iter()
            .flat_map(|command| kinds.iter().map(move |kind| (*command, *kind)))
            .map(|key| (key, default_template(key.0, key.1).to_string()))
            .collect();
        Self { templates }
    }

    /// Overrides one message. Placeholders: `{id}`, `{status}`, `{reason}`,
    /// `{fields}`, `{role}`.
    pub fn with_template(
        mut self,
        command: CommandKind,
        kind: NoticeKind,
        template: impl Into<String>,
    ) -> Self {
        self.templates.insert((command, kind), template.into());
        self
    }

    fn render(
        &self,
        command: CommandKind,
        kind: NoticeKind,
        values: &[(&str, String)],
    ) -> String {
        let mut message = self
            .templates
            .get(&(command, kind))
            .cloned()
            .unwrap_or_else(|| default_template(command, kind).to_string());
        for (name, value) in values {
            message = message.replace(&format!("{{{}}}", name), value);
        }
        message
    }

    /// `None` for events the user does not need to see.
    pub fn notify(&self, event: &WorkflowEvent) -> Option<Notification> {
        let app_id = event.app_id().to_string();
        let command = event.command();
        let id = ("id", app_id.clone());

        let (level, message) = match event {
            WorkflowEvent::TransitionCommitted { to, .. } => (
                NotificationLevel::Success,
                self.render(command, NoticeKind::Committed, &[id, ("status", to.to_string())]),
            ),
            WorkflowEvent::TransitionConfirmed {
                corrected: false, ..
            } => return None,
            WorkflowEvent::TransitionConfirmed { status, .. } => (
                NotificationLevel::Info,
                self.render(
                    command,
                    NoticeKind::Corrected,
                    &[id, ("status", status.to_string())],
                ),
            ),
            WorkflowEvent::TransitionRolledBack {
                restored, reason, ..
            } => (
                NotificationLevel::Error,
                self.render(
                    command,
                    NoticeKind::RolledBack,
                    &[
                        id,
                        ("status", restored.to_string()),
                        ("reason", reason.clone()),
                    ],
                ),
            ),
            WorkflowEvent::ValidationFailed {
                missing, malformed, ..
            } => {
                let fields = missing
                    .iter()
                    .chain(malformed.iter())
                    .map(|f| f.rsplit('.').next().unwrap_or(f))
                    .collect::<Vec<_>>()
                    .join(", ");
                (
                    NotificationLevel::Warning,
                    self.render(
                        command,
                        NoticeKind::ValidationFailed,
                        &[id, ("fields", fields)],
                    ),
                )
            }
            WorkflowEvent::InvalidTransition { from, role, .. } => (
                NotificationLevel::Warning,
                self.render(
                    command,
                    NoticeKind::InvalidTransition,
                    &[id, ("status", from.to_string()), ("role", role.to_string())],
                ),
            ),
            WorkflowEvent::Conflict { reason, .. } => (
                NotificationLevel::Warning,
                self.render(command, NoticeKind::Conflict, &[id, ("reason", reason.clone())]),
            ),
        };

        Some(Notification {
            level,
            app_id,
            command,
            message,
        })
    }

    /// Runs the bridge until the event bus closes.
    pub fn spawn<S: NotificationSink>(
        self,
        mut events: broadcast::Receiver<WorkflowEvent>,
        sink: S,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(notification) = self.notify(&event) {
                            sink.deliver(notification);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification bridge fell behind, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::models::application::{ApplicationStatus, Role};

    fn committed(command: CommandKind, to: ApplicationStatus) -> WorkflowEvent {
        WorkflowEvent::TransitionCommitted {
            app_id: "app-1".into(),
            command,
            from: ApplicationStatus::Applied,
            to,
        }
    }

    #[test]
    fn committed_transitions_use_command_templates() {
        let bridge = NotificationBridge::new();
        let n = bridge
            .notify(&committed(CommandKind::Review, ApplicationStatus::Reviewed))
            .unwrap();
        assert_eq!(n.level, NotificationLevel::Success);
        assert_eq!(n.message, "Application app-1 marked as reviewed");
    }

    #[test]
    fn rollback_includes_reason() {
        let bridge = NotificationBridge::new();
        let n = bridge
            .notify(&WorkflowEvent::TransitionRolledBack {
                app_id: "app-1".into(),
                command: CommandKind::Accept,
                restored: ApplicationStatus::Interview,
                reason: "Backend error (Some(500)): boom".into(),
            })
            .unwrap();
        assert_eq!(n.level, NotificationLevel::Error);
        assert_eq!(
            n.message,
            "Could not accept application app-1: Backend error (Some(500)): boom"
        );
    }

    #[test]
    fn validation_lists_short_field_names() {
        let bridge = NotificationBridge::new();
        let n = bridge
            .notify(&WorkflowEvent::ValidationFailed {
                app_id: "app-1".into(),
                command: CommandKind::ScheduleInterview,
                missing: vec!["interview.location".into()],
                malformed: vec!["interview.time".into()],
            })
            .unwrap();
        assert_eq!(n.message, "Please complete the interview details: location, time");
    }

    #[test]
    fn quiet_confirmations_produce_nothing() {
        let bridge = NotificationBridge::new();
        let event = WorkflowEvent::TransitionConfirmed {
            app_id: "app-1".into(),
            command: CommandKind::Review,
            status: ApplicationStatus::Reviewed,
            corrected: false,
        };
        assert!(bridge.notify(&event).is_none());
    }

    #[test]
    fn templates_can_be_overridden() {
        let bridge = NotificationBridge::new().with_template(
            CommandKind::Reject,
            NoticeKind::InvalidTransition,
            "{role} cannot reject {id} ({status})",
        );
        let n = bridge
            .notify(&WorkflowEvent::InvalidTransition {
                app_id: "app-9".into(),
                command: CommandKind::Reject,
                from: ApplicationStatus::Accepted,
                role: Role::Company,
            })
            .unwrap();
        assert_eq!(n.message, "company cannot reject app-9 (accepted)");
    }

    #[tokio::test]
    async fn spawned_bridge_delivers_to_sink() {
        let bus = EventBus::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = NotificationBridge::new().spawn(bus.subscribe(), ChannelSink(tx));

        bus.publish(committed(CommandKind::Reject, ApplicationStatus::Rejected));
        let n = rx.recv().await.unwrap();
        assert_eq!(n.message, "Application app-1 rejected");

        drop(bus);
        handle.await.unwrap();
    }
}
