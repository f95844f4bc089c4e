//! Pub/sub middleware seam
//!
//! The worker never talks to a broker directly. It goes through the
//! [`Middleware`] trait, which covers the connection lifecycle (init, master
//! check, start, shutdown), topic binding and the host-controlled dispatch
//! capability ([`Dispatch`]). Two implementations live here:
//! - [`mqtt::MqttMiddleware`] talks to a real MQTT broker through `rumqttc`
//! - [`loopback::LoopbackMiddleware`] is an in-process broker used by the
//!   `--loopback` mode and the tests
pub mod loopback;
pub mod mqtt;
mod remappings;

pub use remappings::{Remappings, HOSTNAME_KEY, MASTER_KEY};

use anyhow::Result;
use flume::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// A named topic together with the depth of its message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicEndpoint {
    pub name: &'static str,
    pub queue_depth: usize,
}

/// Outbound topic the publish loop writes to
pub const CHAT_OUT: TopicEndpoint = TopicEndpoint {
    name: "chat-out",
    queue_depth: 1000,
};

/// Inbound topic mirrored into the listen log
pub const CHAT_IN: TopicEndpoint = TopicEndpoint {
    name: "chat-in",
    queue_depth: 100,
};

/// Callback invoked once per inbound message with its string payload.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Host-controlled shutdown predicate and callback pump.
pub trait Dispatch: Send + Sync {
    /// Whether a global shutdown has been requested.
    fn is_shutdown(&self) -> bool;

    /// Run the callbacks of every message queued so far, then return.
    fn yield_once(&self);
}

/// Outbound side of a bound topic.
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    fn publish(&self, payload: &str) -> Result<()>;
}

/// Inbound side of a bound topic. Dropping the handle unbinds it.
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;
}

/// Connection lifecycle of a pub/sub middleware
pub trait Middleware: Dispatch {
    /// Low-level initialization from remappings. Must not touch the network.
    fn init(&self, remappings: &Remappings) -> Result<()>;

    /// Probe whether the master configured by `init` answers.
    fn master_reachable(&self) -> bool;

    /// Open the session with the master.
    fn start(&self) -> Result<()>;

    /// Whether this process started a session that has not finished shutting down.
    fn is_started(&self) -> bool;

    fn advertise(&self, endpoint: &TopicEndpoint) -> Result<Box<dyn Publisher>>;

    fn subscribe(
        &self,
        endpoint: &TopicEndpoint,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>>;

    /// Request a global shutdown. Idempotent.
    fn shutdown(&self);

    /// Block until a requested shutdown has completed.
    fn wait_for_shutdown(&self);
}

struct SubscriberSlot {
    id: u64,
    topic: String,
    handler: MessageHandler,
    tx: Sender<String>,
    rx: Receiver<String>,
}

/// Per-subscription bounded inbound queues shared by the middleware implementations.
///
/// Messages are queued on delivery and handed to their handler on
/// [`SubscriberTable::dispatch_pending`]. A full queue drops its oldest message.
#[derive(Default)]
pub(crate) struct SubscriberTable {
    slots: Mutex<Vec<SubscriberSlot>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    pub(crate) fn add(&self, topic: &str, queue_depth: usize, handler: MessageHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = flume::bounded(queue_depth.max(1));
        self.slots.lock().push(SubscriberSlot {
            id,
            topic: topic.to_string(),
            handler,
            tx,
            rx,
        });
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.slots.lock().retain(|slot| slot.id != id);
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .slots
            .lock()
            .iter()
            .map(|slot| slot.topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        topics
    }

    /// Queue `payload` for every subscriber of `topic`. Returns the number of subscribers reached.
    pub(crate) fn deliver(&self, topic: &str, payload: &str) -> usize {
        let slots = self.slots.lock();
        let mut reached = 0;
        for slot in slots.iter().filter(|slot| slot.topic == topic) {
            if let Err(TrySendError::Full(payload)) = slot.tx.try_send(payload.to_string()) {
                let _ = slot.rx.try_recv();
                let _ = slot.tx.try_send(payload);
                log::debug!("Inbound queue for '{topic}' is full, dropped the oldest message");
            }
            reached += 1;
        }
        reached
    }

    /// Invoke handlers for the messages queued at call time. Returns how many ran.
    pub(crate) fn dispatch_pending(&self) -> usize {
        // Handlers may append to logs or deliver again; never run them under the table lock.
        let pending: Vec<(MessageHandler, Receiver<String>)> = self
            .slots
            .lock()
            .iter()
            .map(|slot| (slot.handler.clone(), slot.rx.clone()))
            .collect();

        let mut handled = 0;
        for (handler, rx) in pending {
            for _ in 0..rx.len() {
                let Ok(payload) = rx.try_recv() else {
                    break;
                };
                handler(&payload);
                handled += 1;
            }
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_handler() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: MessageHandler = Arc::new(move |payload: &str| {
            sink.lock().push(payload.to_string());
        });
        (handler, seen)
    }

    #[test]
    fn test_delivery_waits_for_dispatch() {
        let table = SubscriberTable::default();
        let (handler, seen) = collecting_handler();
        table.add("chat-in", 10, handler);

        assert_eq!(table.deliver("chat-in", "a"), 1);
        assert_eq!(table.deliver("other", "b"), 0);
        assert!(seen.lock().is_empty());

        assert_eq!(table.dispatch_pending(), 1);
        assert_eq!(*seen.lock(), vec!["a".to_string()]);
        assert_eq!(table.dispatch_pending(), 0);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let table = SubscriberTable::default();
        let (handler, seen) = collecting_handler();
        table.add("chat-in", 2, handler);

        for payload in ["1", "2", "3"] {
            table.deliver("chat-in", payload);
        }
        table.dispatch_pending();

        assert_eq!(*seen.lock(), vec!["2".to_string(), "3".to_string()]);
    }

    #[test]
    fn test_removed_slot_receives_nothing() {
        let table = SubscriberTable::default();
        let (handler, seen) = collecting_handler();
        let id = table.add("chat-in", 4, handler);
        table.remove(id);

        assert_eq!(table.deliver("chat-in", "lost"), 0);
        assert_eq!(table.dispatch_pending(), 0);
        assert!(seen.lock().is_empty());
        assert!(table.topics().is_empty());
    }
}
