//! Synchronization lifecycle events

use serde_json::Value;

pub const SYNC_STARTED: &str = "schema.sync.started";
pub const SYNC_COMPLETED: &str = "schema.sync.completed";
pub const SYNC_FAILED: &str = "schema.sync.failed";

/// Receiver of engine lifecycle events
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: &str, payload: &Value);
}

/// Writes every event to the `tracing` log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatcher;

impl EventDispatcher for TracingDispatcher {
    fn dispatch(&self, event: &str, payload: &Value) {
        if event == SYNC_FAILED {
            tracing::warn!(event, %payload, "Schema sync event");
        } else {
            tracing::info!(event, %payload, "Schema sync event");
        }
    }
}
