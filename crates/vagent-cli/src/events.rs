//! An `EventBus` that forwards every event to `tracing`, used by `start`
//! (where nothing else is listening) and as the fallback the `dev`/
//! `connect` subcommands layer their own stdout narration on top of.

use vagent_events::{AgentEvent, EventBus};

pub struct TracingEventBus;

impl EventBus for TracingEventBus {
    fn emit(&self, event: AgentEvent) {
        tracing::info!(?event, "agent event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_does_not_panic() {
        TracingEventBus.emit(AgentEvent::CloseEvent { reason: "test".into() });
    }
}
