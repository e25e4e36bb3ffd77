use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::application::{Interview, InterviewMethod};
use crate::utils::time::{parse_date, parse_time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Review,
    ScheduleInterview,
    Accept,
    Reject,
    ConfirmAttendance,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Review => "review",
            CommandKind::ScheduleInterview => "schedule_interview",
            CommandKind::Accept => "accept",
            CommandKind::Reject => "reject",
            CommandKind::ConfirmAttendance => "confirm_attendance",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workflow command together with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Review,
    ScheduleInterview(InterviewDraft),
    Accept { note: Option<String> },
    Reject { note: Option<String> },
    ConfirmAttendance { method: String },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Review => CommandKind::Review,
            Command::ScheduleInterview(_) => CommandKind::ScheduleInterview,
            Command::Accept { .. } => CommandKind::Accept,
            Command::Reject { .. } => CommandKind::Reject,
            Command::ConfirmAttendance { .. } => CommandKind::ConfirmAttendance,
        }
    }
}

/// Interview data as entered in the scheduling form. Every field may be
/// absent; `validate_into_interview` turns it into an `Interview`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct InterviewDraft {
    pub date: Option<String>,
    pub time: Option<String>,
    pub method: Option<InterviewMethod>,
    #[validate(length(max = 255))]
    pub location: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Field-level problems found while validating a command payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub missing: Vec<String>,
    pub malformed: Vec<String>,
}

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.malformed.is_empty()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl InterviewDraft {
    pub fn online(date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            date: Some(date.into()),
            time: Some(time.into()),
            method: Some(InterviewMethod::Online),
            ..Default::default()
        }
    }

    pub fn offline(
        date: impl Into<String>,
        time: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            date: Some(date.into()),
            time: Some(time.into()),
            method: Some(InterviewMethod::Offline),
            location: Some(location.into()),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Checks `required` (from the transition table) and the field formats.
    pub fn validate_into_interview(
        &self,
        required: &std::collections::BTreeSet<&'static str>,
    ) -> Result<Interview, FieldErrors> {
        let mut errors = FieldErrors::default();

        if let Err(invalid) = self.validate() {
            let mut fields: Vec<String> = invalid
                .field_errors()
                .keys()
                .map(|field| format!("interview.{}", field))
                .collect();
            fields.sort();
            errors.malformed.extend(fields);
        }

        let date = present(&self.date);
        let time = present(&self.time);
        let location = present(&self.location);

        for (field, given) in [
            ("interview.date", date.is_some()),
            ("interview.time", time.is_some()),
            ("interview.method", self.method.is_some()),
            ("interview.location", location.is_some()),
        ] {
            if required.contains(field) && !given {
                errors.missing.push(field.to_string());
            }
        }

        let parsed_date = date.and_then(parse_date);
        if date.is_some() && parsed_date.is_none() {
            errors.malformed.push("interview.date".to_string());
        }
        let parsed_time = time.and_then(parse_time);
        if time.is_some() && parsed_time.is_none() {
            errors.malformed.push("interview.time".to_string());
        }
        if self.method == Some(InterviewMethod::Online)
            && location.is_some()
            && !errors.malformed.iter().any(|f| f == "interview.location")
        {
            errors.malformed.push("interview.location".to_string());
        }

        match (parsed_date, parsed_time, self.method) {
            (Some(date), Some(time), Some(method)) if errors.is_empty() => Ok(Interview {
                date,
                time,
                method,
                location: location.map(str::to_string),
                notes: present(&self.notes).map(str::to_string),
            }),
            _ => Err(errors),
        }
    }
}
