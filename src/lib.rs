pub mod config;
pub mod dto;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod session;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::events::{EventBus, WorkflowEvent};
use crate::services::{
    api_client::{ApplicationsApi, HttpApplicationsApi},
    notification_bridge::{NotificationBridge, NotificationSink},
    sync_gateway::SyncGateway,
    workflow_store::WorkflowStore,
};
use crate::session::Session;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Everything one dashboard session needs, wired together. Student and
/// company views share this; the session role decides which commands pass.
#[derive(Clone)]
pub struct WorkflowEngine {
    pub session: Session,
    pub events: EventBus,
    pub store: WorkflowStore,
    pub gateway: SyncGateway,
}

impl WorkflowEngine {
    pub fn new(config: &Config, session: Session) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        let api = HttpApplicationsApi::new(http_client, &config.api_url, session.clone())?;
        Ok(Self::with_api(Arc::new(api), session, config.event_capacity))
    }

    pub fn with_api(
        api: Arc<dyn ApplicationsApi>,
        session: Session,
        event_capacity: usize,
    ) -> Self {
        let events = EventBus::new(event_capacity);
        let store = WorkflowStore::new(events.clone());
        let gateway = SyncGateway::new(store.clone(), api, session.role());

        Self {
            session,
            events,
            store,
            gateway,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Starts `bridge` on this session's events. Subscribes before
    /// returning, so nothing published afterwards is missed.
    pub fn spawn_notifications<S: NotificationSink>(
        &self,
        bridge: NotificationBridge,
        sink: S,
    ) -> JoinHandle<()> {
        bridge.spawn(self.subscribe(), sink)
    }
}
