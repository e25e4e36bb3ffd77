use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::models::application::{
    Application, ApplicationStatus, AttendanceConfirmation, Interview, InterviewMethod,
};
use crate::utils::time::{format_date, format_time, parse_date, parse_time};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// Body of `PATCH /applications/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ApplicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_note: Option<String>,
}

/// Body of `PATCH /applications/{id}/interview`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInterviewRequest {
    pub interview_date: String,
    pub interview_time: String,
    pub interview_method: InterviewMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview_notes: Option<String>,
}

impl From<&Interview> for ScheduleInterviewRequest {
    fn from(interview: &Interview) -> Self {
        Self {
            interview_date: format_date(interview.date),
            interview_time: format_time(interview.time),
            interview_method: interview.method,
            interview_location: interview.location.clone(),
            interview_notes: interview.notes.clone(),
        }
    }
}

/// Body of `PATCH /applications/{id}/confirm-attendance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmAttendanceRequest {
    pub attendance_method: String,
}

/// The single HTTP request a committed mutation turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Status(StatusUpdateRequest),
    Interview(ScheduleInterviewRequest),
    ConfirmAttendance(ConfirmAttendanceRequest),
}

fn deserialize_id_flexible<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::String(s) => Ok(s),
        StringOrInt::Int(i) => Ok(i.to_string()),
    }
}

fn deserialize_opt_id_flexible<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_id_flexible")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(id)| id))
}

/// An application as the backend reports it. Persist responses may omit
/// any field but `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApplicationRecord {
    #[serde(deserialize_with = "deserialize_id_flexible")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id_flexible")]
    pub job_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_id_flexible")]
    pub student_id: Option<String>,
    pub status: Option<ApplicationStatus>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub interview_date: Option<String>,
    pub interview_time: Option<String>,
    pub interview_method: Option<InterviewMethod>,
    pub interview_location: Option<String>,
    pub interview_notes: Option<String>,
    pub attendance_confirmed_at: Option<DateTime<Utc>>,
    pub attendance_method: Option<String>,
    pub feedback_note: Option<String>,
}

impl ApplicationRecord {
    /// `None` unless date, time and method are all present and parse.
    pub fn interview(&self) -> Option<Interview> {
        let method = self.interview_method?;
        Some(Interview {
            date: parse_date(self.interview_date.as_deref()?)?,
            time: parse_time(self.interview_time.as_deref()?)?,
            method,
            location: match method {
                InterviewMethod::Offline => self.interview_location.clone(),
                InterviewMethod::Online => None,
            },
            notes: self.interview_notes.clone(),
        })
    }

    pub fn attendance_confirmation(&self) -> Option<AttendanceConfirmation> {
        Some(AttendanceConfirmation {
            confirmed_at: self.attendance_confirmed_at?,
            method: self.attendance_method.clone()?,
        })
    }

    /// Builds a full snapshot entry; fails if identity or status is absent.
    pub fn into_application(self) -> Result<Application> {
        let interview = self.interview();
        let attendance_confirmation = self.attendance_confirmation();
        let incomplete = |field: &str| Error::Api {
            status: None,
            message: format!("Application {} is missing {}", self.id, field),
        };

        Ok(Application {
            job_id: self.job_id.clone().ok_or_else(|| incomplete("job_id"))?,
            student_id: self.student_id.clone().ok_or_else(|| incomplete("student_id"))?,
            status: self.status.ok_or_else(|| incomplete("status"))?,
            status_changed_at: self.status_changed_at.unwrap_or_else(crate::utils::time::now),
            interview,
            attendance_confirmation,
            feedback_note: self.feedback_note,
            id: self.id,
        })
    }
}
