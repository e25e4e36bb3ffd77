use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    #[serde(alias = "pending")]
    Applied,
    Reviewed,
    Interview,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApplicationStatus::Accepted | ApplicationStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Reviewed => "reviewed",
            ApplicationStatus::Interview => "interview",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "applied" | "pending" => Ok(ApplicationStatus::Applied),
            "reviewed" => Ok(ApplicationStatus::Reviewed),
            "interview" => Ok(ApplicationStatus::Interview),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(format!("unknown application status: {}", other)),
        }
    }
}

/// Who is acting on an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Company,
    Student,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Company => write!(f, "company"),
            Role::Student => write!(f, "student"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "company" | "employer" => Ok(Role::Company),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewMethod {
    Online,
    Offline,
}

impl InterviewMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewMethod::Online => "online",
            InterviewMethod::Offline => "offline",
        }
    }
}

impl std::str::FromStr for InterviewMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" => Ok(InterviewMethod::Online),
            "offline" => Ok(InterviewMethod::Offline),
            other => Err(format!("unknown interview method: {}", other)),
        }
    }
}

/// A scheduled interview. Only built from a validated draft or a server
/// record, so `location` is present exactly when `method` is offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interview {
    pub date: NaiveDate,
    #[serde(with = "crate::utils::time::hh_mm")]
    pub time: NaiveTime,
    pub method: InterviewMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceConfirmation {
    pub confirmed_at: DateTime<Utc>,
    pub method: String,
}

/// One student's submission against one posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub job_id: String,
    pub student_id: String,
    pub status: ApplicationStatus,
    pub status_changed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview: Option<Interview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_confirmation: Option<AttendanceConfirmation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_note: Option<String>,
}

impl Application {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        student_id: impl Into<String>,
        status: ApplicationStatus,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            student_id: student_id.into(),
            status,
            status_changed_at: crate::utils::time::now(),
            interview: None,
            attendance_confirmation: None,
            feedback_note: None,
        }
    }
}
