//! MQTT-backed middleware
//!
//! The master is an MQTT broker addressed as `mqtt://host[:port]`. Inbound
//! publishes are read by a dedicated event loop thread and parked in the
//! per-subscription queues until [`Dispatch::yield_once`] runs their handlers.
use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use std::{
    net::{TcpStream, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    Dispatch, MessageHandler, Middleware, Publisher, Remappings, SubscriberTable, Subscription,
    TopicEndpoint, CHAT_OUT,
};

const DEFAULT_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_millis(500);
const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
struct BrokerTarget {
    host: String,
    port: u16,
    client_id: String,
}

impl BrokerTarget {
    fn from_remappings(node_name: &str, remappings: &Remappings) -> Result<Self> {
        let master = remappings
            .master()
            .ok_or_else(|| anyhow!("no master URL configured"))?;
        let parsed =
            url::Url::parse(master).with_context(|| format!("invalid master URL '{master}'"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("master URL '{master}' must have a host"))?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_MQTT_PORT);

        let hostname = remappings.hostname().unwrap_or("localhost");
        let client_id = format!("{node_name}_{hostname}_{}", uuid::Uuid::new_v4());

        Ok(Self {
            host,
            port,
            client_id,
        })
    }
}

pub struct MqttMiddleware {
    node_name: String,
    connect_timeout: Duration,
    request_capacity: usize,
    target: Mutex<Option<BrokerTarget>>,
    client: Mutex<Option<Client>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    subscribers: Arc<SubscriberTable>,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl MqttMiddleware {
    pub fn new(node_name: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            node_name: node_name.into(),
            connect_timeout,
            request_capacity: CHAT_OUT.queue_depth,
            target: Mutex::new(None),
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
            subscribers: Arc::new(SubscriberTable::default()),
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn client(&self) -> Result<Client> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("MQTT session has not been started"))
    }
}

impl Dispatch for MqttMiddleware {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn yield_once(&self) {
        self.subscribers.dispatch_pending();
    }
}

impl Middleware for MqttMiddleware {
    fn init(&self, remappings: &Remappings) -> Result<()> {
        let target = BrokerTarget::from_remappings(&self.node_name, remappings)?;
        log::debug!(
            "MQTT: initialized for {}:{} as '{}'",
            target.host,
            target.port,
            target.client_id
        );
        *self.target.lock() = Some(target);
        Ok(())
    }

    fn master_reachable(&self) -> bool {
        let Some(target) = self.target.lock().clone() else {
            log::warn!("MQTT: master check before init");
            return false;
        };

        let addrs = match (target.host.as_str(), target.port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(err) => {
                log::warn!("MQTT: cannot resolve {}: {err}", target.host);
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(_) => return true,
                Err(err) => log::debug!("MQTT: connect to {addr} failed: {err}"),
            }
        }
        log::warn!(
            "MQTT: master {}:{} is unreachable",
            target.host,
            target.port
        );
        false
    }

    fn start(&self) -> Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let target = self
            .target
            .lock()
            .clone()
            .ok_or_else(|| anyhow!("MQTT middleware started before init"))?;

        let mut options = MqttOptions::new(&target.client_id, &target.host, target.port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, connection) = Client::new(options, self.request_capacity);

        self.shutdown.store(false, Ordering::Release);
        let handle = {
            let client = client.clone();
            let subscribers = self.subscribers.clone();
            let shutdown = self.shutdown.clone();
            thread::Builder::new()
                .name(format!("{}-mqtt", self.node_name))
                .spawn(move || run_event_loop(connection, client, subscribers, shutdown))
                .context("failed to spawn MQTT event loop thread")?
        };

        *self.client.lock() = Some(client);
        *self.event_loop.lock() = Some(handle);
        self.started.store(true, Ordering::Release);
        log::info!(
            "MQTT: session started against {}:{}",
            target.host,
            target.port
        );
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn advertise(&self, endpoint: &TopicEndpoint) -> Result<Box<dyn Publisher>> {
        let client = self.client()?;
        log::debug!(
            "MQTT: advertising '{}' (depth {})",
            endpoint.name,
            endpoint.queue_depth
        );
        Ok(Box::new(MqttPublisher {
            topic: endpoint.name.to_string(),
            client,
        }))
    }

    fn subscribe(
        &self,
        endpoint: &TopicEndpoint,
        handler: MessageHandler,
    ) -> Result<Box<dyn Subscription>> {
        let client = self.client()?;
        client
            .try_subscribe(endpoint.name, QoS::AtMostOnce)
            .map_err(|err| anyhow!("failed to subscribe to '{}': {err}", endpoint.name))?;
        let id = self
            .subscribers
            .add(endpoint.name, endpoint.queue_depth, handler);
        log::debug!(
            "MQTT: subscribed to '{}' (depth {})",
            endpoint.name,
            endpoint.queue_depth
        );
        Ok(Box::new(MqttSubscription {
            topic: endpoint.name.to_string(),
            id,
            subscribers: self.subscribers.clone(),
            client,
        }))
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("MQTT: shutdown requested");
        if let Some(client) = self.client.lock().as_ref() {
            if let Err(err) = client.try_disconnect() {
                log::debug!("MQTT: disconnect request failed: {err}");
            }
        }
    }

    fn wait_for_shutdown(&self) {
        while !self.is_shutdown() {
            thread::sleep(SHUTDOWN_POLL);
        }
        if let Some(handle) = self.event_loop.lock().take() {
            if handle.join().is_err() {
                log::error!("MQTT: event loop thread panicked");
            }
        }
        self.client.lock().take();
        self.started.store(false, Ordering::Release);
        log::info!("MQTT: shutdown complete");
    }
}

struct MqttPublisher {
    topic: String,
    client: Client,
}

impl Publisher for MqttPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, payload: &str) -> Result<()> {
        self.client
            .try_publish(
                self.topic.as_str(),
                QoS::AtMostOnce,
                false,
                payload.as_bytes().to_vec(),
            )
            .map_err(|err| anyhow!("failed to publish on '{}': {err}", self.topic))
    }
}

struct MqttSubscription {
    topic: String,
    id: u64,
    subscribers: Arc<SubscriberTable>,
    client: Client,
}

impl Subscription for MqttSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for MqttSubscription {
    fn drop(&mut self) {
        self.subscribers.remove(self.id);
        if !self.subscribers.topics().contains(&self.topic) {
            if let Err(err) = self.client.try_unsubscribe(self.topic.as_str()) {
                log::debug!("MQTT: unsubscribe from '{}' failed: {err}", self.topic);
            }
        }
    }
}

fn run_event_loop(
    mut connection: Connection,
    client: Client,
    subscribers: Arc<SubscriberTable>,
    shutdown: Arc<AtomicBool>,
) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload);
                log::debug!("MQTT: received on '{}': {payload}", publish.topic);
                subscribers.deliver(&publish.topic, &payload);
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("MQTT: connected");
                // Clean sessions forget subscriptions across reconnects.
                for topic in subscribers.topics() {
                    if let Err(err) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                        log::warn!("MQTT: failed to renew subscription to '{topic}': {err}");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                log::warn!("MQTT: connection error: {err}");
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    log::debug!("MQTT: event loop exited");
}
