//! In-memory owner of the session's applications.
//!
//! Commands run synchronously against local state: they validate against the
//! transition table, apply the optimistic mutation and hand back a
//! [`PendingSync`] describing the single request that must reach the backend.
//! Only [`SyncGateway`](crate::services::sync_gateway::SyncGateway) resolves
//! pending syncs, through [`WorkflowStore::confirm`] and
//! [`WorkflowStore::rollback`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dto::application_dto::{
    ApplicationRecord, ConfirmAttendanceRequest, ScheduleInterviewRequest, StatusUpdateRequest,
    SyncRequest,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::models::application::{Application, ApplicationStatus, AttendanceConfirmation, Role};
use crate::models::command::{Command, CommandKind, InterviewDraft};
use crate::services::transition_table::{allowed_role, is_legal, required_fields, target};
use crate::utils::time;

/// Result of a command that passed local validation.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The command was already applied; nothing changed and nothing is sent.
    Unchanged(Application),
    Pending(PendingSync),
}

/// An optimistic mutation waiting for the backend.
#[derive(Debug, Clone)]
pub struct PendingSync {
    pub app_id: String,
    pub command: CommandKind,
    pub request: SyncRequest,
    /// State before the command, restored on rollback.
    pub snapshot: Application,
    pub optimistic: Application,
}

enum Plan {
    Unchanged,
    Apply {
        next: Box<Application>,
        request: SyncRequest,
    },
}

#[derive(Clone)]
pub struct WorkflowStore {
    applications: Arc<RwLock<HashMap<String, Application>>>,
    events: EventBus,
}

impl WorkflowStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            applications: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Application>> {
        self.applications.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Application>> {
        self.applications.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the whole collection with a fresh snapshot.
    pub fn load(&self, applications: Vec<Application>) {
        self.load_preserving(applications, &HashSet::new());
    }

    /// Like `load`, but ids in `preserve` keep their current local record.
    pub fn load_preserving(&self, applications: Vec<Application>, preserve: &HashSet<String>) {
        let mut guard = self.write();
        let mut next: HashMap<String, Application> = applications
            .into_iter()
            .map(|app| (app.id.clone(), app))
            .collect();
        for id in preserve {
            if let Some(local) = guard.remove(id) {
                next.insert(id.clone(), local);
            }
        }
        *guard = next;
        info!(count = guard.len(), "Loaded application snapshot");
    }

    pub fn upsert(&self, application: Application) {
        self.write().insert(application.id.clone(), application);
    }

    pub fn get_by_id(&self, id: &str) -> Option<Application> {
        self.read().get(id).cloned()
    }

    /// Matching applications, most recently changed first.
    pub fn get_by_status(&self, status: ApplicationStatus) -> Vec<Application> {
        let mut apps: Vec<Application> = self
            .read()
            .values()
            .filter(|app| app.status == status)
            .cloned()
            .collect();
        apps.sort_by(|a, b| {
            b.status_changed_at
                .cmp(&a.status_changed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        apps
    }

    pub fn all(&self) -> Vec<Application> {
        let mut apps: Vec<Application> = self.read().values().cloned().collect();
        apps.sort_by(|a, b| a.id.cmp(&b.id));
        apps
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn review(&self, app_id: &str, role: Role) -> Result<Outcome> {
        self.execute(app_id, role, Command::Review)
    }

    pub fn schedule_interview(
        &self,
        app_id: &str,
        role: Role,
        interview: InterviewDraft,
    ) -> Result<Outcome> {
        self.execute(app_id, role, Command::ScheduleInterview(interview))
    }

    pub fn accept(&self, app_id: &str, role: Role, note: Option<String>) -> Result<Outcome> {
        self.execute(app_id, role, Command::Accept { note })
    }

    pub fn reject(&self, app_id: &str, role: Role, note: Option<String>) -> Result<Outcome> {
        self.execute(app_id, role, Command::Reject { note })
    }

    pub fn confirm_attendance(
        &self,
        app_id: &str,
        role: Role,
        method: impl Into<String>,
    ) -> Result<Outcome> {
        self.execute(
            app_id,
            role,
            Command::ConfirmAttendance {
                method: method.into(),
            },
        )
    }

    /// Validates `command` and applies it optimistically. Local failures
    /// leave the record untouched and are also published as events.
    pub fn execute(&self, app_id: &str, role: Role, command: Command) -> Result<Outcome> {
        let kind = command.kind();
        let mut guard = self.write();
        let current = guard
            .get(app_id)
            .ok_or_else(|| Error::NotFound(format!("Application {} not found", app_id)))?;

        match plan(current, role, &command) {
            Err(err) => {
                drop(guard);
                debug!(app_id, command = %kind, error = %err, "Command rejected locally");
                self.publish_rejection(&err);
                Err(err)
            }
            Ok(Plan::Unchanged) => {
                debug!(app_id, command = %kind, "Command already applied, nothing to do");
                Ok(Outcome::Unchanged(current.clone()))
            }
            Ok(Plan::Apply { next, request }) => {
                let snapshot = current.clone();
                let optimistic = *next;
                guard.insert(app_id.to_string(), optimistic.clone());
                drop(guard);

                info!(
                    app_id,
                    command = %kind,
                    from = %snapshot.status,
                    to = %optimistic.status,
                    "Transition committed locally"
                );
                self.events.publish(WorkflowEvent::TransitionCommitted {
                    app_id: app_id.to_string(),
                    command: kind,
                    from: snapshot.status,
                    to: optimistic.status,
                });

                Ok(Outcome::Pending(PendingSync {
                    app_id: app_id.to_string(),
                    command: kind,
                    request,
                    snapshot,
                    optimistic,
                }))
            }
        }
    }

    /// Folds the server's view of a persisted command into local state.
    /// Server values win, except a status timestamp older than the one the
    /// command started from.
    pub fn confirm(&self, pending: &PendingSync, record: Option<&ApplicationRecord>) -> Application {
        let mut guard = self.write();
        let app = guard
            .entry(pending.app_id.clone())
            .or_insert_with(|| pending.optimistic.clone());
        let corrected = match record {
            Some(record) => merge_record(app, record, pending.snapshot.status_changed_at),
            None => false,
        };
        let confirmed = app.clone();
        drop(guard);

        if corrected {
            warn!(
                app_id = %pending.app_id,
                command = %pending.command,
                status = %confirmed.status,
                "Server response corrected optimistic state"
            );
        }
        self.events.publish(WorkflowEvent::TransitionConfirmed {
            app_id: pending.app_id.clone(),
            command: pending.command,
            status: confirmed.status,
            corrected,
        });
        confirmed
    }

    /// Restores the pre-command snapshot.
    pub fn rollback(&self, pending: &PendingSync, reason: &str) -> Application {
        self.write()
            .insert(pending.app_id.clone(), pending.snapshot.clone());

        warn!(
            app_id = %pending.app_id,
            command = %pending.command,
            restored = %pending.snapshot.status,
            reason,
            "Transition rolled back"
        );
        self.events.publish(WorkflowEvent::TransitionRolledBack {
            app_id: pending.app_id.clone(),
            command: pending.command,
            restored: pending.snapshot.status,
            reason: reason.to_string(),
        });
        pending.snapshot.clone()
    }

    /// Replaces one record with the server's copy, outside any command.
    pub fn reconcile(&self, record: ApplicationRecord) -> Result<Application> {
        let app = record.into_application()?;
        self.upsert(app.clone());
        Ok(app)
    }

    fn publish_rejection(&self, err: &Error) {
        let event = match err {
            Error::InvalidTransition {
                app_id,
                command,
                from,
                role,
            } => WorkflowEvent::InvalidTransition {
                app_id: app_id.clone(),
                command: *command,
                from: *from,
                role: *role,
            },
            Error::Validation {
                app_id,
                command,
                missing,
                malformed,
            } => WorkflowEvent::ValidationFailed {
                app_id: app_id.clone(),
                command: *command,
                missing: missing.clone(),
                malformed: malformed.clone(),
            },
            Error::Conflict {
                app_id,
                command,
                reason,
            } => WorkflowEvent::Conflict {
                app_id: app_id.clone(),
                command: *command,
                reason: reason.clone(),
            },
            _ => return,
        };
        self.events.publish(event);
    }
}

fn non_blank(note: &Option<String>) -> Option<String> {
    note.as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Decides what `command` does to `app` without touching the store.
fn plan(app: &Application, role: Role, command: &Command) -> Result<Plan> {
    let kind = command.kind();
    let invalid = || Error::InvalidTransition {
        app_id: app.id.clone(),
        command: kind,
        from: app.status,
        role,
    };
    let conflict = |reason: &str| Error::Conflict {
        app_id: app.id.clone(),
        command: kind,
        reason: reason.to_string(),
    };
    let validation = |missing: Vec<String>, malformed: Vec<String>| Error::Validation {
        app_id: app.id.clone(),
        command: kind,
        missing,
        malformed,
    };

    if allowed_role(kind) != role {
        return Err(invalid());
    }

    // Replays of a command that already took effect.
    match command {
        Command::Review if app.status == ApplicationStatus::Reviewed => {
            return Ok(Plan::Unchanged);
        }
        Command::Accept { note } if app.status == ApplicationStatus::Accepted => {
            return replay_decision(app, note).map_err(conflict);
        }
        Command::Reject { note } if app.status == ApplicationStatus::Rejected => {
            return replay_decision(app, note).map_err(conflict);
        }
        // A reviewed application carrying a server-side interview still
        // takes the Reviewed -> Interview edge.
        Command::ScheduleInterview(draft)
            if app.interview.is_some() && app.status != ApplicationStatus::Reviewed =>
        {
            if let Ok(interview) = draft.validate_into_interview(&required_fields(command)) {
                if app.interview.as_ref() == Some(&interview) {
                    return Ok(Plan::Unchanged);
                }
                if app.status.is_terminal() {
                    return Err(conflict(
                        "a different interview was already recorded for this decided application",
                    ));
                }
            }
        }
        Command::ConfirmAttendance { method } => {
            if let Some(existing) = &app.attendance_confirmation {
                return if existing.method == method.trim() {
                    Ok(Plan::Unchanged)
                } else {
                    Err(conflict("attendance was already confirmed with a different method"))
                };
            }
        }
        _ => {}
    }

    if !is_legal(app.status, kind, role) {
        return Err(invalid());
    }
    let Some(to) = target(app.status, kind) else {
        return Err(invalid());
    };

    let mut next = app.clone();
    if to != app.status {
        next.status = to;
        next.status_changed_at = time::next_after(app.status_changed_at);
    }

    let request = match command {
        Command::Review => SyncRequest::Status(StatusUpdateRequest {
            status: to,
            feedback_note: None,
        }),
        Command::ScheduleInterview(draft) => {
            let interview = draft
                .validate_into_interview(&required_fields(command))
                .map_err(|errors| validation(errors.missing, errors.malformed))?;
            if app.attendance_confirmation.is_some() {
                return Err(conflict(
                    "the student already confirmed attendance for the current interview",
                ));
            }
            let request = SyncRequest::Interview(ScheduleInterviewRequest::from(&interview));
            next.interview = Some(interview);
            request
        }
        Command::Accept { note } | Command::Reject { note } => {
            let note = non_blank(note);
            if note.is_some() {
                next.feedback_note = note.clone();
            }
            SyncRequest::Status(StatusUpdateRequest {
                status: to,
                feedback_note: note,
            })
        }
        Command::ConfirmAttendance { method } => {
            let method = method.trim();
            if method.is_empty() && required_fields(command).contains("attendance.method") {
                return Err(validation(vec!["attendance.method".to_string()], Vec::new()));
            }
            if app.interview.is_none() {
                return Err(invalid());
            }
            next.attendance_confirmation = Some(AttendanceConfirmation {
                confirmed_at: time::now(),
                method: method.to_string(),
            });
            SyncRequest::ConfirmAttendance(ConfirmAttendanceRequest {
                attendance_method: method.to_string(),
            })
        }
    };

    Ok(Plan::Apply {
        next: Box::new(next),
        request,
    })
}

/// A repeated accept/reject is a no-op unless it names a different note.
fn replay_decision(app: &Application, note: &Option<String>) -> std::result::Result<Plan, &'static str> {
    match non_blank(note) {
        Some(note) if app.feedback_note.as_deref() != Some(note.as_str()) => {
            Err("a different feedback note was already recorded")
        }
        _ => Ok(Plan::Unchanged),
    }
}

/// Returns whether any local field was overwritten.
fn merge_record(app: &mut Application, record: &ApplicationRecord, floor: DateTime<Utc>) -> bool {
    if record.id != app.id {
        warn!(expected = %app.id, got = %record.id, "Server returned a different application");
        return false;
    }

    let mut changed = false;
    if let Some(status) = record.status {
        if status != app.status {
            app.status = status;
            changed = true;
        }
    }
    if let Some(at) = record.status_changed_at {
        if at != app.status_changed_at {
            if at > floor {
                app.status_changed_at = at;
                changed = true;
            } else {
                warn!(app_id = %app.id, server = %at, "Ignoring stale status timestamp from server");
            }
        }
    }
    if let Some(interview) = record.interview() {
        if app.interview.as_ref() != Some(&interview) {
            app.interview = Some(interview);
            changed = true;
        }
    }
    if let Some(confirmation) = record.attendance_confirmation() {
        if app.attendance_confirmation.as_ref() != Some(&confirmation) {
            app.attendance_confirmation = Some(confirmation);
            changed = true;
        }
    }
    if let Some(note) = &record.feedback_note {
        if app.feedback_note.as_ref() != Some(note) {
            app.feedback_note = Some(note.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::application::{Interview, InterviewMethod};
    use tokio::sync::broadcast::error::TryRecvError;

    fn store_with(status: ApplicationStatus) -> (WorkflowStore, tokio::sync::broadcast::Receiver<WorkflowEvent>) {
        let bus = EventBus::new(64);
        let rx = bus.subscribe();
        let store = WorkflowStore::new(bus);
        store.load(vec![Application::new("app-1", "job-1", "stu-1", status)]);
        (store, rx)
    }

    fn interviewing_store() -> WorkflowStore {
        let (store, _) = store_with(ApplicationStatus::Reviewed);
        store
            .schedule_interview("app-1", Role::Company, InterviewDraft::online("2025-03-01", "10:00"))
            .unwrap();
        store
    }

    #[test]
    fn review_moves_applied_to_reviewed_and_bumps_timestamp() {
        let (store, mut rx) = store_with(ApplicationStatus::Applied);
        let before = store.get_by_id("app-1").unwrap();

        let Outcome::Pending(pending) = store.review("app-1", Role::Company).unwrap() else {
            panic!("expected a pending sync");
        };
        assert_eq!(
            pending.request,
            SyncRequest::Status(StatusUpdateRequest {
                status: ApplicationStatus::Reviewed,
                feedback_note: None
            })
        );
        let after = store.get_by_id("app-1").unwrap();
        assert_eq!(after.status, ApplicationStatus::Reviewed);
        assert!(after.status_changed_at > before.status_changed_at);
        assert_eq!(pending.snapshot, before);

        assert_eq!(
            rx.try_recv().unwrap(),
            WorkflowEvent::TransitionCommitted {
                app_id: "app-1".into(),
                command: CommandKind::Review,
                from: ApplicationStatus::Applied,
                to: ApplicationStatus::Reviewed,
            }
        );
    }

    #[test]
    fn illegal_commands_do_not_mutate_and_publish_invalid_transition() {
        let (store, mut rx) = store_with(ApplicationStatus::Applied);
        let before = store.get_by_id("app-1").unwrap();

        let err = store.accept("app-1", Role::Company, None).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { from: ApplicationStatus::Applied, .. }));
        assert!(err.is_local());
        assert_eq!(store.get_by_id("app-1").unwrap(), before);
        assert!(matches!(rx.try_recv().unwrap(), WorkflowEvent::InvalidTransition { .. }));
    }

    #[test]
    fn students_cannot_issue_company_commands() {
        let (store, _) = store_with(ApplicationStatus::Applied);
        assert!(matches!(
            store.review("app-1", Role::Student),
            Err(Error::InvalidTransition { role: Role::Student, .. })
        ));
        let store = interviewing_store();
        assert!(matches!(
            store.confirm_attendance("app-1", Role::Company, "system"),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn offline_interview_without_location_fails_validation() {
        let (store, mut rx) = store_with(ApplicationStatus::Reviewed);
        let draft = InterviewDraft {
            location: None,
            ..InterviewDraft::offline("2025-03-01", "10:00", "unused")
        };
        let err = store.schedule_interview("app-1", Role::Company, draft).unwrap_err();
        match err {
            Error::Validation { missing, .. } => {
                assert_eq!(missing, vec!["interview.location".to_string()])
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let app = store.get_by_id("app-1").unwrap();
        assert!(app.interview.is_none());
        assert_eq!(app.status, ApplicationStatus::Reviewed);
        assert!(matches!(rx.try_recv().unwrap(), WorkflowEvent::ValidationFailed { .. }));
    }

    #[test]
    fn scheduling_online_interview_sets_interview_status() {
        let store = interviewing_store();
        let app = store.get_by_id("app-1").unwrap();
        assert_eq!(app.status, ApplicationStatus::Interview);
        let interview = app.interview.unwrap();
        assert_eq!(interview.method, InterviewMethod::Online);
        assert!(interview.location.is_none());
    }

    #[test]
    fn rescheduling_keeps_status_and_timestamp() {
        let store = interviewing_store();
        let before = store.get_by_id("app-1").unwrap();

        let outcome = store
            .schedule_interview(
                "app-1",
                Role::Company,
                InterviewDraft::offline("2025-03-02", "14:30", "Main office"),
            )
            .unwrap();
        assert!(matches!(outcome, Outcome::Pending(_)));

        let after = store.get_by_id("app-1").unwrap();
        assert_eq!(after.status, ApplicationStatus::Interview);
        assert_eq!(after.status_changed_at, before.status_changed_at);
        assert_eq!(after.interview.unwrap().location.as_deref(), Some("Main office"));
    }

    #[test]
    fn identical_schedule_is_a_no_op() {
        let store = interviewing_store();
        let outcome = store
            .schedule_interview("app-1", Role::Company, InterviewDraft::online("2025-03-01", "10:00"))
            .unwrap();
        assert!(matches!(outcome, Outcome::Unchanged(_)));
    }

    #[test]
    fn rescheduling_after_attendance_confirmation_conflicts() {
        let store = interviewing_store();
        store.confirm_attendance("app-1", Role::Student, "system").unwrap();
        let err = store
            .schedule_interview("app-1", Role::Company, InterviewDraft::online("2025-04-01", "09:00"))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn accept_twice_is_idempotent() {
        let store = interviewing_store();
        assert!(matches!(
            store.accept("app-1", Role::Company, None).unwrap(),
            Outcome::Pending(_)
        ));
        let after_first = store.get_by_id("app-1").unwrap();
        assert!(matches!(
            store.accept("app-1", Role::Company, None).unwrap(),
            Outcome::Unchanged(_)
        ));
        assert_eq!(store.get_by_id("app-1").unwrap(), after_first);
    }

    #[test]
    fn reject_replay_with_different_note_conflicts() {
        let (store, _) = store_with(ApplicationStatus::Applied);
        store
            .reject("app-1", Role::Company, Some("Position filled".into()))
            .unwrap();
        assert!(matches!(
            store.reject("app-1", Role::Company, Some("Position filled".into())),
            Ok(Outcome::Unchanged(_))
        ));
        assert!(matches!(
            store.reject("app-1", Role::Company, None),
            Ok(Outcome::Unchanged(_))
        ));
        assert!(matches!(
            store.reject("app-1", Role::Company, Some("Other reason".into())),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn terminal_applications_reject_every_mutation() {
        let store = interviewing_store();
        store.accept("app-1", Role::Company, Some("Welcome".into())).unwrap();
        let accepted = store.get_by_id("app-1").unwrap();
        assert_eq!(accepted.feedback_note.as_deref(), Some("Welcome"));

        assert!(store.reject("app-1", Role::Company, None).is_err());
        assert!(store.review("app-1", Role::Company).is_err());
        assert!(matches!(
            store.schedule_interview("app-1", Role::Company, InterviewDraft::online("2026-01-01", "08:00")),
            Err(Error::Conflict { .. })
        ));
        assert!(matches!(
            store.schedule_interview("app-1", Role::Company, InterviewDraft::online("2025-03-01", "10:00")),
            Ok(Outcome::Unchanged(_))
        ));
        assert!(store.confirm_attendance("app-1", Role::Student, "email").is_err());
        assert_eq!(store.get_by_id("app-1").unwrap(), accepted);
    }

    #[test]
    fn reviewed_application_with_same_interview_still_moves_to_interview() {
        let (store, _) = store_with(ApplicationStatus::Reviewed);
        let mut app = store.get_by_id("app-1").unwrap();
        app.interview = Some(Interview {
            date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            method: InterviewMethod::Online,
            location: None,
            notes: None,
        });
        store.upsert(app);

        let Outcome::Pending(pending) = store
            .schedule_interview("app-1", Role::Company, InterviewDraft::online("2025-03-01", "10:00"))
            .unwrap()
        else {
            panic!("expected a pending sync");
        };
        assert_eq!(pending.optimistic.status, ApplicationStatus::Interview);
        assert_eq!(
            store.get_by_id("app-1").unwrap().status,
            ApplicationStatus::Interview
        );
    }

    #[test]
    fn confirm_attendance_keeps_status() {
        let store = interviewing_store();
        let before = store.get_by_id("app-1").unwrap();
        let Outcome::Pending(pending) = store.confirm_attendance("app-1", Role::Student, "system").unwrap() else {
            panic!("expected a pending sync");
        };
        assert_eq!(
            pending.request,
            SyncRequest::ConfirmAttendance(ConfirmAttendanceRequest {
                attendance_method: "system".into()
            })
        );
        let after = store.get_by_id("app-1").unwrap();
        assert_eq!(after.status, ApplicationStatus::Interview);
        assert_eq!(after.status_changed_at, before.status_changed_at);
        assert_eq!(after.attendance_confirmation.unwrap().method, "system");

        assert!(matches!(
            store.confirm_attendance("app-1", Role::Student, "system"),
            Ok(Outcome::Unchanged(_))
        ));
        assert!(matches!(
            store.confirm_attendance("app-1", Role::Student, "email"),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn confirm_attendance_requires_method_and_interview() {
        let store = interviewing_store();
        assert!(matches!(
            store.confirm_attendance("app-1", Role::Student, "  "),
            Err(Error::Validation { .. })
        ));

        let (store, _) = store_with(ApplicationStatus::Interview);
        assert!(matches!(
            store.confirm_attendance("app-1", Role::Student, "system"),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn rollback_restores_snapshot_and_publishes() {
        let (store, mut rx) = store_with(ApplicationStatus::Applied);
        let before = store.get_by_id("app-1").unwrap();
        let Outcome::Pending(pending) = store.review("app-1", Role::Company).unwrap() else {
            panic!("expected a pending sync");
        };
        let _committed = rx.try_recv().unwrap();

        let restored = store.rollback(&pending, "HTTP 500");
        assert_eq!(restored, before);
        assert_eq!(store.get_by_id("app-1").unwrap(), before);
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkflowEvent::TransitionRolledBack { restored: ApplicationStatus::Applied, .. }
        ));
    }

    #[test]
    fn confirm_applies_server_values_but_keeps_timestamps_monotonic() {
        let (store, mut rx) = store_with(ApplicationStatus::Applied);
        let Outcome::Pending(pending) = store.review("app-1", Role::Company).unwrap() else {
            panic!("expected a pending sync");
        };
        let _committed = rx.try_recv().unwrap();

        let server_time = pending.optimistic.status_changed_at + chrono::Duration::seconds(5);
        let record = ApplicationRecord {
            id: "app-1".into(),
            status: Some(ApplicationStatus::Reviewed),
            status_changed_at: Some(server_time),
            ..Default::default()
        };
        let confirmed = store.confirm(&pending, Some(&record));
        assert_eq!(confirmed.status_changed_at, server_time);
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkflowEvent::TransitionConfirmed { corrected: true, .. }
        ));

        let (store, _) = store_with(ApplicationStatus::Applied);
        let Outcome::Pending(pending) = store.review("app-1", Role::Company).unwrap() else {
            panic!("expected a pending sync");
        };
        let stale = ApplicationRecord {
            id: "app-1".into(),
            status_changed_at: Some(pending.snapshot.status_changed_at - chrono::Duration::hours(1)),
            ..Default::default()
        };
        let confirmed = store.confirm(&pending, Some(&stale));
        assert_eq!(confirmed.status_changed_at, pending.optimistic.status_changed_at);
    }

    #[test]
    fn queries_return_copies() {
        let (store, _) = store_with(ApplicationStatus::Applied);
        store.upsert(Application::new("app-2", "job-1", "stu-2", ApplicationStatus::Reviewed));

        let mut copy = store.get_by_id("app-1").unwrap();
        copy.status = ApplicationStatus::Accepted;
        assert_eq!(store.get_by_id("app-1").unwrap().status, ApplicationStatus::Applied);

        let reviewed = store.get_by_status(ApplicationStatus::Reviewed);
        assert_eq!(reviewed.len(), 1);
        assert_eq!(reviewed[0].id, "app-2");
        assert!(store.get_by_status(ApplicationStatus::Accepted).is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn load_preserving_keeps_local_copies() {
        let (store, _) = store_with(ApplicationStatus::Applied);
        store.review("app-1", Role::Company).unwrap();

        let preserve: HashSet<String> = ["app-1".to_string(), "app-3".to_string()]
            .into_iter()
            .collect();
        store.load_preserving(
            vec![
                Application::new("app-1", "job-1", "stu-1", ApplicationStatus::Applied),
                Application::new("app-3", "job-2", "stu-3", ApplicationStatus::Applied),
            ],
            &preserve,
        );
        assert_eq!(store.get_by_id("app-1").unwrap().status, ApplicationStatus::Reviewed);
        // No local copy to keep, so the server's record is taken.
        assert!(store.get_by_id("app-3").is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn unknown_application_is_not_found() {
        let (store, mut rx) = store_with(ApplicationStatus::Applied);
        assert!(matches!(
            store.review("missing", Role::Company),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn merge_never_clears_interview() {
        let mut app = Application::new("app-1", "job", "stu", ApplicationStatus::Accepted);
        app.interview = Some(Interview {
            date: time::parse_date("2025-03-01").unwrap(),
            time: time::parse_time("10:00").unwrap(),
            method: InterviewMethod::Online,
            location: None,
            notes: None,
        });
        let floor = app.status_changed_at;
        let record = ApplicationRecord {
            id: "app-1".into(),
            ..Default::default()
        };
        assert!(!merge_record(&mut app, &record, floor));
        assert!(app.interview.is_some());
    }
}
