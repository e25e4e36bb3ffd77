//! Turns committed store mutations into backend requests.
//!
//! Each application id has its own lane: a command waits for the previous
//! command on the same id to resolve (confirm or rollback) before it is even
//! validated, so requests reach the backend in issue order. Different ids
//! never wait on each other. Dropping a `dispatch` future mid-request leaves
//! the optimistic state in place; `refresh_one` reconciles it later.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dto::application_dto::SyncRequest;
use crate::error::{Error, Result, SyncFailure};
use crate::models::application::{Application, Role};
use crate::models::command::{Command, InterviewDraft};
use crate::services::api_client::ApplicationsApi;
use crate::services::workflow_store::{Outcome, PendingSync, WorkflowStore};

#[derive(Default)]
struct LaneTable {
    lanes: HashMap<String, Arc<AsyncMutex<()>>>,
    /// Sequence number of the latest command to enter each id's lane.
    entered: HashMap<String, u64>,
    seq: u64,
}

impl LaneTable {
    /// Ids busy now or entered after `mark`.
    fn touched_since(&self, mark: u64) -> HashSet<String> {
        self.lanes
            .keys()
            .cloned()
            .chain(
                self.entered
                    .iter()
                    .filter(|(_, seq)| **seq > mark)
                    .map(|(id, _)| id.clone()),
            )
            .collect()
    }
}

type Lanes = Arc<Mutex<LaneTable>>;

/// Holds an application's lane until dropped.
struct LaneTurn {
    lanes: Lanes,
    app_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LaneTurn {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .lanes
            .get(&self.app_id)
            .is_some_and(|lane| Arc::strong_count(lane) == 1)
        {
            table.lanes.remove(&self.app_id);
        }
    }
}

#[derive(Clone)]
pub struct SyncGateway {
    store: WorkflowStore,
    api: Arc<dyn ApplicationsApi>,
    role: Role,
    lanes: Lanes,
}

impl SyncGateway {
    pub fn new(store: WorkflowStore, api: Arc<dyn ApplicationsApi>, role: Role) -> Self {
        Self {
            store,
            api,
            role,
            lanes: Arc::new(Mutex::new(LaneTable::default())),
        }
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn role(&self) -> Role {
        self.role
    }

    async fn enter_lane(&self, app_id: &str) -> LaneTurn {
        let lane = {
            let mut table = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            table.seq += 1;
            let seq = table.seq;
            table.entered.insert(app_id.to_string(), seq);
            table
                .lanes
                .entry(app_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lane.lock_owned().await;
        LaneTurn {
            lanes: self.lanes.clone(),
            app_id: app_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Ids with a command queued or in flight.
    fn busy_ids(&self) -> HashSet<String> {
        self.touched_since(u64::MAX)
    }

    fn lane_mark(&self) -> u64 {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).seq
    }

    fn touched_since(&self, mark: u64) -> HashSet<String> {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .touched_since(mark)
    }

    /// Runs `command` end to end: local validation and optimistic apply,
    /// then exactly one backend request unless the command was a no-op.
    pub async fn dispatch(&self, app_id: &str, command: Command) -> Result<Application> {
        let _turn = self.enter_lane(app_id).await;
        match self.store.execute(app_id, self.role, command)? {
            Outcome::Unchanged(app) => Ok(app),
            Outcome::Pending(pending) => self.persist(&pending).await,
        }
    }

    pub async fn review(&self, app_id: &str) -> Result<Application> {
        self.dispatch(app_id, Command::Review).await
    }

    pub async fn schedule_interview(
        &self,
        app_id: &str,
        interview: InterviewDraft,
    ) -> Result<Application> {
        self.dispatch(app_id, Command::ScheduleInterview(interview))
            .await
    }

    pub async fn accept(&self, app_id: &str, note: Option<String>) -> Result<Application> {
        self.dispatch(app_id, Command::Accept { note }).await
    }

    pub async fn reject(&self, app_id: &str, note: Option<String>) -> Result<Application> {
        self.dispatch(app_id, Command::Reject { note }).await
    }

    pub async fn confirm_attendance(
        &self,
        app_id: &str,
        method: impl Into<String>,
    ) -> Result<Application> {
        self.dispatch(
            app_id,
            Command::ConfirmAttendance {
                method: method.into(),
            },
        )
        .await
    }

    /// Sends the request for an already-committed mutation and resolves it.
    /// Failures roll the store back before returning; nothing is retried.
    /// Callers outside `dispatch` are responsible for per-id ordering.
    pub async fn persist(&self, pending: &PendingSync) -> Result<Application> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "persist",
            app_id = %pending.app_id,
            command = %pending.command,
            request_id = %request_id,
        );

        async {
            let result = match &pending.request {
                SyncRequest::Status(body) => {
                    self.api
                        .update_status(&pending.app_id, body, &request_id)
                        .await
                }
                SyncRequest::Interview(body) => {
                    self.api
                        .schedule_interview(&pending.app_id, body, &request_id)
                        .await
                }
                SyncRequest::ConfirmAttendance(body) => {
                    self.api
                        .confirm_attendance(&pending.app_id, body, &request_id)
                        .await
                }
            };

            match result {
                Ok(record) => {
                    let confirmed = self.store.confirm(pending, record.as_ref());
                    info!(status = %confirmed.status, "Transition confirmed by backend");
                    Ok(confirmed)
                }
                Err(err) => {
                    let reason = err.to_string();
                    let snapshot = self.store.rollback(pending, &reason);
                    Err(Error::Sync(SyncFailure {
                        app_id: pending.app_id.clone(),
                        command: pending.command,
                        reason,
                        snapshot,
                    }))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Reloads the whole snapshot from the backend. Applications with a
    /// command in flight, or one that ran while the list was fetched, keep
    /// their local copy since the list may predate that command.
    pub async fn refresh(&self) -> Result<usize> {
        let mark = self.lane_mark();
        let mut preserve = self.busy_ids();
        let records = self.api.list_applications().await?;
        preserve.extend(self.touched_since(mark));
        let mut applications = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id.clone();
            match record.into_application() {
                Ok(app) => applications.push(app),
                Err(err) => warn!(app_id = %id, error = %err, "Skipping unusable application record"),
            }
        }
        let count = applications.len();
        self.store.load_preserving(applications, &preserve);
        Ok(count)
    }

    /// Replaces one application with the backend's copy once any command on
    /// it has resolved.
    pub async fn refresh_one(&self, app_id: &str) -> Result<Application> {
        let _turn = self.enter_lane(app_id).await;
        let record = self.api.get_application(app_id).await?;
        self.store.reconcile(record)
    }
}
