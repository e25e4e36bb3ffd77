use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::dto::application_dto::{
    ApiEnvelope, ApplicationRecord, ConfirmAttendanceRequest, ScheduleInterviewRequest,
    StatusUpdateRequest,
};
use crate::error::{Error, Result};
use crate::session::Session;

/// The slice of the backend REST API the workflow depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApplicationsApi: Send + Sync {
    /// `PATCH /applications/{id}`
    async fn update_status(
        &self,
        app_id: &str,
        body: &StatusUpdateRequest,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>>;

    /// `PATCH /applications/{id}/interview`
    async fn schedule_interview(
        &self,
        app_id: &str,
        body: &ScheduleInterviewRequest,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>>;

    /// `PATCH /applications/{id}/confirm-attendance`
    async fn confirm_attendance(
        &self,
        app_id: &str,
        body: &ConfirmAttendanceRequest,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>>;

    /// `GET /applications`
    async fn list_applications(&self) -> Result<Vec<ApplicationRecord>>;

    /// `GET /applications/{id}`
    async fn get_application(&self, app_id: &str) -> Result<ApplicationRecord>;
}

#[derive(Clone)]
pub struct HttpApplicationsApi {
    client: Client,
    base_url: Url,
    session: Session,
}

impl HttpApplicationsApi {
    pub fn new(client: Client, base_url: &str, session: Session) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            base_url,
            session,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, self.session.bearer())
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn patch<B: Serialize + Sync>(
        &self,
        segments: &[&str],
        body: &B,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>> {
        let url = self.endpoint(segments)?;
        debug!(%url, request_id, "PATCH");
        let response = self
            .request(Method::PATCH, url)
            .header("X-Request-Id", request_id)
            .json(body)
            .send()
            .await?;

        // The backend already committed the change once it answers 2xx with
        // `success: true`, so a body we cannot read only loses the echo.
        match read_envelope::<Value>(response).await {
            Ok(data) => Ok(data.and_then(record_from_value)),
            Err(Error::Json(err)) => {
                warn!(request_id, error = %err, "Unreadable success response, keeping local state");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// `None` (with a warning) for data that is not a usable application record.
fn record_from_value(data: Value) -> Option<ApplicationRecord> {
    if data.is_null() {
        return None;
    }
    match serde_json::from_value::<ApplicationRecord>(data) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(error = %err, "Ignoring unusable application record from backend");
            None
        }
    }
}

/// Unwraps `{success, data, message}`. Non-2xx and `success: false` are
/// both failures.
async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
    let status = response.status();
    let body = response.text().await?;
    let envelope = serde_json::from_str::<ApiEnvelope<T>>(&body);

    if !status.is_success() {
        let message = match envelope {
            Ok(ApiEnvelope {
                message: Some(message),
                ..
            }) => message,
            _ => {
                let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                    .ok()
                    .and_then(|e| e.message);
                message.unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("Request failed")
                        .to_string()
                })
            }
        };
        warn!(status = status.as_u16(), %message, "Backend returned an error");
        return Err(Error::Api {
            status: Some(status.as_u16()),
            message,
        });
    }

    if body.trim().is_empty() {
        return Ok(None);
    }
    let envelope = envelope?;
    if !envelope.success {
        return Err(Error::Api {
            status: Some(status.as_u16()),
            message: envelope
                .message
                .unwrap_or_else(|| "Request was not successful".to_string()),
        });
    }
    Ok(envelope.data)
}

#[async_trait]
impl ApplicationsApi for HttpApplicationsApi {
    async fn update_status(
        &self,
        app_id: &str,
        body: &StatusUpdateRequest,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>> {
        self.patch(&["applications", app_id], body, request_id).await
    }

    async fn schedule_interview(
        &self,
        app_id: &str,
        body: &ScheduleInterviewRequest,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>> {
        self.patch(&["applications", app_id, "interview"], body, request_id)
            .await
    }

    async fn confirm_attendance(
        &self,
        app_id: &str,
        body: &ConfirmAttendanceRequest,
        request_id: &str,
    ) -> Result<Option<ApplicationRecord>> {
        self.patch(&["applications", app_id, "confirm-attendance"], body, request_id)
            .await
    }

    async fn list_applications(&self) -> Result<Vec<ApplicationRecord>> {
        let url = self.endpoint(&["applications"])?;
        let response = self.request(Method::GET, url).send().await?;
        let items = read_envelope::<Vec<Value>>(response)
            .await?
            .unwrap_or_default();
        Ok(items.into_iter().filter_map(record_from_value).collect())
    }

    async fn get_application(&self, app_id: &str) -> Result<ApplicationRecord> {
        let url = self.endpoint(&["applications", app_id])?;
        let response = self.request(Method::GET, url).send().await?;
        read_envelope::<ApplicationRecord>(response)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Application {} not found", app_id)))
    }
}
