//! L3 — Event Bus. In-process publish/subscribe with ordered delivery
//! (§4.3): sync subscribers run inline in registration order, then
//! async subscribers run concurrently but are not awaited by the publisher.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::error;
use serde_json::Value;

/// Payload carried by every published event. A plain JSON value keeps the
/// bus decoupled from any one subsystem's event-specific struct.
pub type EventPayload = Value;

#[async_trait]
pub trait AsyncEventSubscriber: Send + Sync {
    async fn handle(&self, event: &str, payload: &EventPayload);
}

type SyncHandler = Box<dyn Fn(&str, &EventPayload) + Send + Sync>;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct SubId(u64);

struct Subscriptions {
    sync: Vec<(SubId, SyncHandler)>,
    async_subs: Vec<(SubId, Arc<dyn AsyncEventSubscriber>)>,
}

impl Default for Subscriptions {
    fn default() -> Self {
        Subscriptions {
            sync: Vec::new(),
            async_subs: Vec::new(),
        }
    }
}

/// The event bus itself. One instance is shared (via `Arc`) across the
/// whole core; nothing about it requires more than one.
pub struct EventBus {
    topics: RwLock<HashMap<String, Subscriptions>>,
    next_id: std::sync::atomic::AtomicU64,
    in_dispatch: std::sync::atomic::AtomicBool,
    pending_unsubscribes: RwLock<Vec<(String, SubId)>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            topics: RwLock::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
            in_dispatch: std::sync::atomic::AtomicBool::new(false),
            pending_unsubscribes: RwLock::new(Vec::new()),
        }
    }

    fn alloc_id(&self) -> SubId {
        SubId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    /// Register a synchronous subscriber for `event`. Returns a handle usable with [`EventBus::unsubscribe`].
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&str, &EventPayload) + Send + Sync + 'static,
    ) -> (String, u64) {
        let event = event.into();
        let id = self.alloc_id();
        self.topics
            .write()
            .expect("event bus lock poisoned")
            .entry(event.clone())
            .or_default()
            .sync
            .push((id, Box::new(handler)));
        (event, id.0)
    }

    pub fn subscribe_async(
        &self,
        event: impl Into<String>,
        handler: Arc<dyn AsyncEventSubscriber>,
    ) -> (String, u64) {
        let event = event.into();
        let id = self.alloc_id();
        self.topics
            .write()
            .expect("event bus lock poisoned")
            .entry(event.clone())
            .or_default()
            .async_subs
            .push((id, handler));
        (event, id.0)
    }

    /// Unsubscribe `(event, id)`. If called while a dispatch for `event` is
    /// in progress, the removal is deferred until that fan-out completes.
    pub fn unsubscribe(&self, event: &str, id: u64) {
        if self.in_dispatch.load(std::sync::atomic::Ordering::Acquire) {
            self.pending_unsubscribes
                .write()
                .expect("event bus lock poisoned")
                .push((event.to_string(), SubId(id)));
            return;
        }
        self.remove_now(event, SubId(id));
    }

    fn remove_now(&self, event: &str, id: SubId) {
        if let Some(subs) = self.topics.write().expect("event bus lock poisoned").get_mut(event) {
            subs.sync.retain(|(sid, _)| *sid != id);
            subs.async_subs.retain(|(sid, _)| *sid != id);
        }
    }

    /// Publish `payload` under `event`. Sync subscribers run inline, in
    /// registration order; async subscribers are then spawned concurrently.
    /// A panicking/erroring subscriber never stops delivery to the rest —
    /// sync handlers here are plain closures (no `Result`), so any fallible
    /// work they do must catch its own errors and log them; a panic is
    /// caught here and logged instead.
    pub fn publish(&self, event: &str, payload: EventPayload) {
        let _guard = DispatchGuard::enter(self);

        {
            let topics = self.topics.read().expect("event bus lock poisoned");
            if let Some(subs) = topics.get(event) {
                for (_, handler) in &subs.sync {
                    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event, &payload))) {
                        let msg = panic_message(&panic);
                        log_subscriber_error(event, &format!("panicked: {msg}"));
                    }
                }
            }
        }

        let async_handlers = {
            let topics = self.topics.read().expect("event bus lock poisoned");
            topics
                .get(event)
                .map(|subs| subs.async_subs.clone())
                .unwrap_or_default()
        };
        for (_, subscriber) in async_handlers {
            let event = event.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                subscriber.handle(&event, &payload).await;
            });
        }
    }

    fn drain_pending_unsubscribes(&self) {
        // Called from `DispatchGuard::drop`, so this must run even when a
        // sync subscriber panicked mid fan-out.
        let pending: Vec<_> = std::mem::take(
            &mut *self.pending_unsubscribes.write().expect("event bus lock poisoned"),
        );
        for (event, id) in pending {
            self.remove_now(&event, id);
        }
    }
}

/// Logs a subscriber failure without letting it interrupt the fan-out.
/// Sync handlers that can fail should call this from within their closure.
pub fn log_subscriber_error(event: &str, err: &dyn std::fmt::Display) {
    error!("event subscriber for '{event}' failed: {err}");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Marks `in_dispatch` for the lifetime of one `publish` call and drains
/// deferred unsubscribes on the way out, including when a sync subscriber
/// panicked (RAII so unwinding still runs it, unlike the plain
/// store-then-drain this replaced).
struct DispatchGuard<'a> {
    bus: &'a EventBus,
}

impl<'a> DispatchGuard<'a> {
    fn enter(bus: &'a EventBus) -> Self {
        bus.in_dispatch.store(true, std::sync::atomic::Ordering::Release);
        DispatchGuard { bus }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.bus.in_dispatch.store(false, std::sync::atomic::Ordering::Release);
        self.bus.drain_pending_unsubscribes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_to_sync_subscribers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe("CLIENT_READY", move |_, _| {
                order.write().unwrap().push(tag);
            });
        }
        bus.publish("CLIENT_READY", json!({}));
        assert_eq!(*order.read().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn one_failing_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe("X", |event, _| {
            log_subscriber_error(event, &"boom");
        });
        {
            let calls = calls.clone();
            bus.subscribe("X", move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish("X", json!(null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_panicking_subscriber_does_not_block_others_or_wedge_the_bus() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        bus.subscribe("X", |_, _| {
            panic!("boom");
        });
        {
            let calls = calls.clone();
            bus.subscribe("X", move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        bus.publish("X", json!(null));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "subscriber after the panicking one must still run");
        assert!(
            !bus.in_dispatch.load(Ordering::Acquire),
            "in_dispatch must clear even when a sync handler unwinds"
        );

        // Without the fix, `in_dispatch` stays stuck `true` after the unwind,
        // so this unsubscribe would be deferred forever instead of applying now.
        let (event, id) = {
            let calls = calls.clone();
            bus.subscribe("X", move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        bus.unsubscribe(&event, id);
        assert!(bus.pending_unsubscribes.read().unwrap().is_empty(), "unsubscribe should apply immediately");
        bus.publish("X", json!(null));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_removes_future_deliveries() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (event, id) = {
            let calls = calls.clone();
            bus.subscribe("X", move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        bus.publish(&event, json!(null));
        bus.unsubscribe(&event, id);
        bus.publish(&event, json!(null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
