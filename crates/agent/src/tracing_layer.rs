//! Custom tracing layer that republishes log events on the agent's broadcast channel

use crate::agent::AgentEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Tracing layer that forwards formatted log lines to anyone subscribed to
/// the agent's event broadcast channel (used by integration tests to assert
/// on log ordering, e.g. the serialized LED ON/OFF pattern).
pub struct EventBroadcastLayer {
    events: Arc<broadcast::Sender<AgentEvent>>,
}

impl EventBroadcastLayer {
    pub fn new(events: Arc<broadcast::Sender<AgentEvent>>) -> Self {
        Self { events }
    }
}

impl<S> Layer<S> for EventBroadcastLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => "error",
            Level::WARN => "warn",
            Level::INFO => "info",
            Level::DEBUG => "debug",
            Level::TRACE => "debug",
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(msg) = visitor.message {
            let _ = self.events.send(AgentEvent::LogLine {
                level: level.to_string(),
                target: event.metadata().target().to_string(),
                msg,
            });
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
}
