//! Typed event channel towards the host process.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Line prefix the host uses to pick events out of the daemon's stdout.
pub const STDOUT_EVENT_PREFIX: &str = "::AI_EVENT::";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub id: String,
    pub action: String,
    pub data: serde_json::Value,
    /// Unix seconds.
    pub timestamp: i64,
}

impl DaemonEvent {
    pub fn new(action: impl Into<String>, data: serde_json::Value) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: format!("evt_{}", now.timestamp_millis()),
            action: action.into(),
            data,
            timestamp: now.timestamp(),
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DaemonEvent);
}

/// Writes `::AI_EVENT::{json}` lines to stdout.
#[derive(Debug, Default)]
pub struct StdoutEventSink;

impl StdoutEventSink {
    pub fn format_line(event: &DaemonEvent) -> serde_json::Result<String> {
        Ok(format!("{}{}", STDOUT_EVENT_PREFIX, serde_json::to_string(event)?))
    }
}

impl EventSink for StdoutEventSink {
    fn emit(&self, event: &DaemonEvent) {
        let line = match Self::format_line(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event {}: {}", event.action, e);
                return;
            }
        };

        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}").and_then(|_| stdout.flush()) {
            warn!("Failed to write event {}: {}", event.action, e);
        }
    }
}

/// Forwards events into an in-process channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<DaemonEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DaemonEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: &DaemonEvent) {
        if self.tx.send(event.clone()).is_err() {
            warn!("Event receiver dropped, discarding {}", event.action);
        }
    }
}

#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &DaemonEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stdout_line_format() {
        let event = DaemonEvent {
            id: "evt_1".to_string(),
            action: "beatMarkersAdded".to_string(),
            data: json!({"count": 3}),
            timestamp: 42,
        };

        let line = StdoutEventSink::format_line(&event).unwrap();
        assert!(line.starts_with(STDOUT_EVENT_PREFIX));

        let parsed: DaemonEvent =
            serde_json::from_str(line.trim_start_matches(STDOUT_EVENT_PREFIX)).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_event_id_uses_millis() {
        let event = DaemonEvent::new("ping", json!({}));
        assert!(event.id.starts_with("evt_"));
        assert!(event.timestamp > 0);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(&DaemonEvent::new("subtitlesSynced", json!({"count": 2})));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.action, "subtitlesSynced");
        assert_eq!(received.data["count"], 2);
    }
}
