//! In-process middleware
//!
//! Publishes are queued for every subscriber of the topic (and of any topic
//! routed from it) and delivered on [`Dispatch::yield_once`]. The master can be
//! flagged unreachable to exercise connection failures without a broker.
use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use super::{
    Dispatch, MessageHandler, Middleware, Publisher, Remappings, SubscriberTable, Subscription,
    TopicEndpoint,
};

const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct LoopbackBus {
    subscribers: SubscriberTable,
    routes: RwLock<HashMap<String, Vec<String>>>,
}

impl LoopbackBus {
    fn publish(&self, topic: &str, payload: &str) -> usize {
        let mut reached = self.subscribers.deliver(topic, payload);
        if let Some(targets) = self.routes.read().get(topic) {
            for target in targets {
                reached += self.subscribers.deliver(target, payload);
            }
        }
        reached
    }
}

pub struct LoopbackMiddleware {
    bus: Arc<LoopbackBus>,
    reachable: AtomicBool,
    started: AtomicBool,
    shutdown: AtomicBool,
    remappings: Mutex<Option<Remappings>>,
    yields: AtomicU64,
}

impl Default for LoopbackMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMiddleware {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(LoopbackBus::default()),
            reachable: AtomicBool::new(true),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            remappings: Mutex::new(None),
            yields: AtomicU64::new(0),
        }
    }

    /// Re-deliver every message published on `from` to subscribers of `to`.
    pub fn with_route(self, from: &str, to: &str) -> Self {
        self.bus
            .routes
            .write()
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Inject a message as if an external node had published it.
    pub fn deliver(&self, topic: &str, payload: &str) -> usize {
        self.bus.publish(topic, payload)
    }

    /// Remappings seen by the last `init` call.
    pub fn remappings(&self) -> Option<Remappings> {
        self.remappings.lock().clone()
    }

    /// Topics that currently have at least one subscriber.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.bus.subscribers.topics()
    }

    pub fn yield_count(&self) -> u64 {
        self.yields.load(Ordering::Acquire)
    }
}

impl Dispatch for LoopbackMiddleware {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn yield_once(&self) {
        self.yields.fetch_add(1, Ordering::AcqRel);
        self.bus.subscribers.dispatch_pending();
    }
}

impl Middleware for LoopbackMiddleware {
    fn init(&self, remappings: &Remappings) -> Result<()> {
        log::debug!("Loopback: init with {remappings}");
        *self.remappings.lock() = Some(remappings.clone());
        Ok(())
    }

    fn master_reachable(&self) -> bool {
        self.remappings.lock().is_some() && self.reachable.load(Ordering::Acquire)
    }

    fn start(&self) -> Result<()> {
        if !self.master_reachable() {
            return Err(anyhow!("loopback master is unreachable"));
        }
        self.shutdown.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn advertise(&self, endpoint: &TopicEndpoint) -> Result<Box<dyn Publisher>> {
        if !self.is_started() {
            return Err(anyhow!("cannot advertise '{}' before start", endpoint.name));
        }
        Ok(Box::new(LoopbackPublisher {
            topic: endpoint.name.to_string(),
            bus: self.bus.clone(),
        }))
    }

    fn subscribe(
        &self,
        endpoint: &TopicEndpoint,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>> {
        if !self.is_started() {
            return Err(anyhow!("cannot subscribe to '{}' before start", endpoint.name));
        }
        let id = self
            .bus
            .subscribers
            .add(endpoint.name, endpoint.queue_depth, handler);
        Ok(Box::new(LoopbackSubscription {
            topic: endpoint.name.to_string(),
            id,
            bus: self.bus.clone(),
        }))
    }

    fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            log::debug!("Loopback: shutdown requested");
        }
    }

    fn wait_for_shutdown(&self) {
        while !self.is_shutdown() {
            thread::sleep(SHUTDOWN_POLL);
        }
        self.started.store(false, Ordering::Release);
    }
}

struct LoopbackPublisher {
    topic: String,
    bus: Arc<LoopbackBus>,
}

impl Publisher for LoopbackPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, payload: &str) -> Result<()> {
        self.bus.publish(&self.topic, payload);
        Ok(())
    }
}

struct LoopbackSubscription {
    topic: String,
    id: u64,
    bus: Arc<LoopbackBus>,
}

impl Subscription for LoopbackSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for LoopbackSubscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(self.id);
    }
}
