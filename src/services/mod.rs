pub mod api_client;
pub mod notification_bridge;
pub mod sync_gateway;
pub mod transition_table;
pub mod workflow_store;
