//! Legal status transitions and the fields each command needs.

use std::collections::BTreeSet;

use crate::models::application::{ApplicationStatus, InterviewMethod, Role};
use crate::models::command::{Command, CommandKind};

use ApplicationStatus::*;

/// Whether `role` may issue `command` against an application in `from`.
pub fn is_legal(from: ApplicationStatus, command: CommandKind, role: Role) -> bool {
    target(from, command).is_some() && allowed_role(command) == role
}

/// The role each command belongs to.
pub fn allowed_role(command: CommandKind) -> Role {
    match command {
        CommandKind::ConfirmAttendance => Role::Student,
        _ => Role::Company,
    }
}

/// Status after `command` is applied in `from`, or `None` if the edge does
/// not exist. Rescheduling and attendance confirmation keep `Interview`.
pub fn target(from: ApplicationStatus, command: CommandKind) -> Option<ApplicationStatus> {
    match (from, command) {
        (Applied, CommandKind::Review) => Some(Reviewed),
        (Reviewed | Interview, CommandKind::ScheduleInterview) => Some(Interview),
        (Interview, CommandKind::Accept) => Some(Accepted),
        (Applied | Reviewed | Interview, CommandKind::Reject) => Some(Rejected),
        (Interview, CommandKind::ConfirmAttendance) => Some(Interview),
        _ => None,
    }
}

pub fn required_fields(command: &Command) -> BTreeSet<&'static str> {
    let mut fields = BTreeSet::new();
    match command {
        Command::ScheduleInterview(draft) => {
            fields.extend(["interview.date", "interview.time", "interview.method"]);
            if draft.method == Some(InterviewMethod::Offline) {
                fields.insert("interview.location");
            }
        }
        Command::ConfirmAttendance { .. } => {
            fields.insert("attendance.method");
        }
        Command::Review | Command::Accept { .. } | Command::Reject { .. } => {}
    }
    fields
}
