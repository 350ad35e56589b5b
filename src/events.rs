// HF Download Suite - Model Repository Download Orchestrator
// Copyright (C) 2025 HF Suite Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Process-wide publish/subscribe channel for lifecycle events
//!
//! Handlers are identified by `Arc` pointer so the same closure can be
//! subscribed once and unsubscribed later. Delivery happens outside the
//! subscriber lock: `emit` snapshots the current subscriber list, drops the
//! lock, then invokes each handler, so handlers are free to (un)subscribe
//! without deadlocking. A panicking handler is logged and skipped; it never
//! prevents delivery to the rest.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::error;

/// Event names the core emits.
pub mod topic {
    pub const DOWNLOAD_QUEUED: &str = "download.queued";
    pub const DOWNLOAD_STARTED: &str = "download.started";
    pub const DOWNLOAD_PROGRESS: &str = "download.progress";
    pub const DOWNLOAD_COMPLETED: &str = "download.completed";
    pub const DOWNLOAD_FAILED: &str = "download.failed";
    pub const DOWNLOAD_CANCELLED: &str = "download.cancelled";
    pub const DOWNLOAD_PAUSED: &str = "download.paused";
    pub const DOWNLOAD_RESUMED: &str = "download.resumed";
    pub const QUEUE_CHANGED: &str = "queue.changed";
    pub const HISTORY_ADDED: &str = "history.added";
}

/// Subscriber callback; receives the event payload.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Fan-out of named lifecycle events to subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to an event. A (event, handler) pair already
    /// present is not added twice.
    pub fn subscribe(&self, event: &str, handler: EventHandler) {
        let mut subs = self.subscribers.write().unwrap();
        let handlers = subs.entry(event.to_string()).or_default();
        if !handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            handlers.push(handler);
        }
    }

    /// Remove a previously subscribed handler.
    pub fn unsubscribe(&self, event: &str, handler: &EventHandler) {
        let mut subs = self.subscribers.write().unwrap();
        if let Some(handlers) = subs.get_mut(event) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Deliver `payload` synchronously to the current subscriber snapshot,
    /// in subscription order.
    pub fn emit(&self, event: &str, payload: Value) {
        let snapshot = self.snapshot(event);
        deliver(event, &snapshot, &payload);
    }

    /// Deliver to the current subscriber snapshot on a background task
    /// without blocking the caller. No ordering is guaranteed relative to
    /// other emissions.
    pub fn emit_async(&self, event: &str, payload: Value) {
        let snapshot = self.snapshot(event);
        let event = event.to_string();
        tokio::spawn(async move {
            deliver(&event, &snapshot, &payload);
        });
    }

    fn snapshot(&self, event: &str) -> Vec<EventHandler> {
        let subs = self.subscribers.read().unwrap();
        subs.get(event).cloned().unwrap_or_default()
    }

    /// Drop subscribers for one event, or for all events.
    pub fn clear(&self, event: Option<&str>) {
        let mut subs = self.subscribers.write().unwrap();
        match event {
            Some(name) => {
                subs.remove(name);
            }
            None => subs.clear(),
        }
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers
            .read()
            .unwrap()
            .get(event)
            .map_or(0, Vec::len)
    }
}

fn deliver(event: &str, handlers: &[EventHandler], payload: &Value) {
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            error!(event, "event handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording_handler(log: Arc<Mutex<Vec<Value>>>) -> EventHandler {
        Arc::new(move |payload| log.lock().unwrap().push(payload.clone()))
    }

    #[test]
    fn test_emit_delivers_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(topic::DOWNLOAD_QUEUED, recording_handler(log.clone()));

        bus.emit(topic::DOWNLOAD_QUEUED, json!({"task_id": 1}));
        bus.emit(topic::DOWNLOAD_QUEUED, json!({"task_id": 2}));

        let seen = log.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["task_id"], 1);
        assert_eq!(seen[1]["task_id"], 2);
    }

    #[test]
    fn test_duplicate_subscription_is_deduplicated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recording_handler(log.clone());

        bus.subscribe("queue.changed", handler.clone());
        bus.subscribe("queue.changed", handler.clone());
        assert_eq!(bus.subscriber_count("queue.changed"), 1);

        bus.emit("queue.changed", json!({}));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recording_handler(log.clone());

        bus.subscribe("queue.changed", handler.clone());
        bus.unsubscribe("queue.changed", &handler);
        bus.emit("queue.changed", json!({}));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count("queue.changed"), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            topic::DOWNLOAD_FAILED,
            Arc::new(|_| panic!("handler bug")),
        );
        bus.subscribe(topic::DOWNLOAD_FAILED, recording_handler(log.clone()));

        bus.emit(topic::DOWNLOAD_FAILED, json!({"task_id": 7}));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_clear() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("a", recording_handler(log.clone()));
        bus.subscribe("b", recording_handler(log.clone()));

        bus.clear(Some("a"));
        assert_eq!(bus.subscriber_count("a"), 0);
        assert_eq!(bus.subscriber_count("b"), 1);

        bus.clear(None);
        assert_eq!(bus.subscriber_count("b"), 0);
    }

    #[tokio::test]
    async fn test_emit_async_delivers() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(topic::HISTORY_ADDED, recording_handler(log.clone()));

        bus.emit_async(topic::HISTORY_ADDED, json!({"id": 3}));

        for _ in 0..50 {
            if !log.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
