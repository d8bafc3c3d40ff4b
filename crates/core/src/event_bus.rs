//! Flow event bus: emits analytics events from the wizard,
//! the variant assigner and the cancellation service.
//!
//! Components accept an `Arc<dyn EventSink>`; hosts route events to their
//! analytics pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowEventKind {
    ModalOpened,
    ModalClosed,
    ScreenChanged,
    VariantAssigned,
    DiscountAccepted,
    CancellationRecorded,
    CancellationUpdated,
    SubscriptionReactivated,
    RateLimited,
    PersistenceFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEvent {
    pub event_id: Uuid,
    pub kind: FlowEventKind,
    pub user_id: Option<String>,
    pub detail: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Trait for emitting flow events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FlowEvent);
}

/// No-op sink for tests and hosts that don't collect events.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: FlowEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<FlowEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_kind(&self, kind: FlowEventKind) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: FlowEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating a `FlowEvent`.
pub fn make_event(
    kind: FlowEventKind,
    user_id: Option<&str>,
    detail: serde_json::Value,
) -> FlowEvent {
    FlowEvent {
        event_id: Uuid::new_v4(),
        kind,
        user_id: user_id.map(str::to_string),
        detail,
        occurred_at: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}
