//! Named listeners for server-pushed notifications

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Method name of block header notifications
pub const HEADERS_SUBSCRIBE: &str = "blockchain.headers.subscribe";

/// Method name of scripthash status notifications
pub const SCRIPTHASH_SUBSCRIBE: &str = "blockchain.scripthash.subscribe";

type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle returned by [`NotificationBus::on`], used to remove the handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Routes notifications to every handler registered for their method name.
///
/// Notifications nobody listens for are dropped.
#[derive(Default)]
pub struct NotificationBus {
    next_handler: AtomicU64,
    handlers: parking_lot::Mutex<HashMap<String, Vec<(HandlerId, NotificationHandler)>>>,
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.lock();
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        f.debug_struct("NotificationBus")
            .field("handlers", &counts)
            .finish()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for notifications named `event`
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::SeqCst));
        let event = event.into();
        debug!(event = %event, "Registering notification handler");
        self.handlers
            .lock()
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let mut removed = false;
        handlers.retain(|_, list| {
            let before = list.len();
            list.retain(|(handler_id, _)| *handler_id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    /// Channel-style subscription: every notification named `event` is forwarded to the
    /// returned receiver until it is dropped.
    pub fn subscribe(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<Value> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.on(event, move |params| {
            sender.send(params).ok();
        });
        receiver
    }

    /// Invoke every handler registered for `event` with `params`.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: &str, params: Value) -> usize {
        // handlers run outside the lock so they may register further handlers
        let targets: Vec<NotificationHandler> = match self.handlers.lock().get(event) {
            Some(list) => list.iter().map(|(_, handler)| Arc::clone(handler)).collect(),
            None => Vec::new(),
        };

        if targets.is_empty() {
            trace!(event = %event, "No handler for notification");
            return 0;
        }

        let count = targets.len();
        let mut iter = targets.into_iter().peekable();
        while let Some(handler) = iter.next() {
            if iter.peek().is_some() {
                handler(params.clone());
            } else {
                handler(params);
                break;
            }
        }
        count
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_reaches_named_handlers_once() {
        let bus = NotificationBus::new();
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen = Arc::clone(&calls);
        bus.on(HEADERS_SUBSCRIBE, move |params| seen.lock().push(params));

        let invoked = bus.emit(HEADERS_SUBSCRIBE, json!([{"height": 100}]));
        assert_eq!(invoked, 1);
        assert_eq!(*calls.lock(), vec![json!([{"height": 100}])]);
    }

    #[test]
    fn test_unknown_event_is_dropped() {
        let bus = NotificationBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.on(HEADERS_SUBSCRIBE, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.emit(SCRIPTHASH_SUBSCRIBE, json!([])), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_multiple_handlers_and_off() {
        let bus = NotificationBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&counter);
        let first = bus.on("e", move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&counter);
        bus.on("e", move |_| {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        assert_eq!(bus.emit("e", Value::Null), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 11);

        assert!(bus.off(first));
        assert!(!bus.off(first));
        assert_eq!(bus.handler_count("e"), 1);
        bus.emit("e", Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn test_handler_may_register_during_emit() {
        let bus = Arc::new(NotificationBus::new());
        let inner = Arc::clone(&bus);
        bus.on("e", move |_| {
            inner.on("late", |_| {});
        });

        bus.emit("e", Value::Null);
        assert_eq!(bus.handler_count("late"), 1);
    }

    #[tokio::test]
    async fn test_subscribe_forwards_params() {
        let bus = NotificationBus::new();
        let mut receiver = bus.subscribe(SCRIPTHASH_SUBSCRIBE);

        bus.emit(SCRIPTHASH_SUBSCRIBE, json!(["abcd", "status"]));
        assert_eq!(receiver.recv().await.unwrap(), json!(["abcd", "status"]));
    }
}
