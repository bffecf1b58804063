//! Event bus abstraction for decoupled event emission.
//!
//! Lets the session and worker core emit events without depending on any
//! particular transport (IPC frame to the parent process, a CLI `connect`
//! session, or a test harness).

use std::sync::{Arc, Mutex};

use crate::AgentEvent;

/// Trait for emitting typed agent events to subscribers.
///
/// This abstraction decouples the core logic from any one transport,
/// enabling:
/// - Unit testing without a live IPC channel
/// - The CLI's `dev`/`connect` modes
/// - Headless/worker deployment
pub trait EventBus: Send + Sync {
    /// Emit an event.
    fn emit(&self, event: AgentEvent);
}

/// Type alias for a shared event bus reference.
pub type EventBusRef = Arc<dyn EventBus>;

/// In-memory event bus for testing.
///
/// Captures all emitted events for later inspection.
#[derive(Default)]
pub struct InMemoryEventBus {
    events: Mutex<Vec<AgentEvent>>,
}

impl InMemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all captured events.
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Clear all captured events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Get the number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Check if no events have been captured.
    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl EventBus for InMemoryEventBus {
    fn emit(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// No-op event bus that discards all events.
///
/// Useful for benchmarking or when events are not needed.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn emit(&self, _event: AgentEvent) {
        // Intentionally empty
    }
}
