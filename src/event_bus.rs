//! Internal event bus for cross-component hooks (§5, §9).
//!
//! In-process pub/sub, best-effort-at-most-once per subscriber: a slow or
//! absent subscriber simply misses events, it never blocks a publisher.
//! Subscribers are registered at startup, never discovered dynamically.
//! Grounded on the teacher's `AgencyEvent` broadcast bus
//! (`src/orchestrator/event_bus.rs`), generalized to the hooks this spec
//! names: plan step completion, decision tallies, consensus gating, and
//! episode persistence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum OrchestratorEvent {
    PlanStepCompleted { plan_id: String, step_id: String, success: bool },
    GoalCompleted { goal_id: String },
    ConsensusOpened { decision_id: String },
    ConsensusTallied { decision_id: String, approved: bool },
    EpisodeRecorded { episode_id: String, session_id: String, quality: f64 },
    RefinementIteration { query_id: String, iteration: u32, quality: f64 },
}

pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event. Dropped silently (logged at debug) if there are no
    /// subscribers or a subscriber's queue has overflowed.
    pub fn publish(&self, event: OrchestratorEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event bus: no active subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// Process-wide event bus. Kept as a global, per §9's note that the event
    /// bus is explicitly a best-effort side channel rather than a
    /// dependency-injected subsystem — every other registry in this crate is
    /// constructed once at startup and threaded through explicitly.
    pub static ref EVENT_BUS: Arc<EventBus> = Arc::new(EventBus::new());
}

#[macro_export]
macro_rules! emit_event {
    ($event:expr) => {
        $crate::event_bus::EVENT_BUS.publish($event);
    };
}
