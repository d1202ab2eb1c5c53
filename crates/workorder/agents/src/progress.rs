//! Progress broadcasting
//!
//! The engine emits an event after every node transition and on
//! agent-reported progress ticks. Consumers (a UI layer, out of scope here)
//! subscribe to the stream; a slow or absent consumer never blocks the
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use workorder_types::{AgentName, Stage, WorkOrderId};

/// One progress event pushed to the broadcaster
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub work_order_id: WorkOrderId,
    pub stage: Stage,
    /// Set for agent-reported ticks, absent for node transitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<AgentName>,
    /// Completion estimate in [0, 100], when the agent reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// A node-transition event
    pub fn stage_event(work_order_id: WorkOrderId, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            work_order_id,
            stage,
            agent_name: None,
            percent: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// An agent-reported progress tick
    pub fn agent_tick(
        work_order_id: WorkOrderId,
        stage: Stage,
        agent_name: AgentName,
        percent: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            work_order_id,
            stage,
            agent_name: Some(agent_name),
            percent: Some(percent.min(100)),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink the engine pushes progress events into
pub trait ProgressBroadcaster: Send + Sync {
    /// Deliver one event. Must never block; delivery is best-effort.
    fn broadcast(&self, event: ProgressEvent);
}

/// Broadcaster backed by a tokio broadcast channel
pub struct ChannelBroadcaster {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl ProgressBroadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: ProgressEvent) {
        // No subscribers is fine; events are advisory
        let _ = self.tx.send(event);
    }
}

/// Broadcaster that discards every event
pub struct NullBroadcaster;

impl ProgressBroadcaster for NullBroadcaster {
    fn broadcast(&self, _event: ProgressEvent) {}
}
