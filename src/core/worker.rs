/// The chatter worker
///
/// Owns the middleware connection, the two log buffers and the publish loop
/// thread. The shell constructs a [`Worker`], calls [`Worker::init`] (or
/// [`Worker::init_with_endpoints`]) once, then follows the returned [`Bus`].
/// Dropping the worker shuts the middleware down and joins the publish thread.
use anyhow::{anyhow, Context, Result};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use super::{
    bus::{Bus, WorkerToUi},
    config::WorkerConfig,
    logs::{DiagnosticSink, LogBuffer, LogChannel, LogFacadeSink, Severity},
    publish_loop::{run_publish_loop, PublishLoopArgs},
};
use crate::middleware::{
    Dispatch, MessageHandler, Middleware, Publisher, Remappings, Subscription, CHAT_IN, CHAT_OUT,
};

/// Subscription handler mirroring inbound messages into the listen log.
///
/// May be invoked from any thread the middleware delivers on.
#[derive(Clone)]
pub struct ListenHandler {
    listen_log: Arc<LogBuffer>,
}

impl ListenHandler {
    pub fn new(listen_log: Arc<LogBuffer>) -> Self {
        Self { listen_log }
    }

    pub fn handle(&self, payload: &str) {
        self.listen_log
            .append(Severity::Info, format!("I heard: {payload}"));
    }

    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |payload: &str| self.handle(payload))
    }
}

/// Endpoints bound to a live middleware session
struct Connection {
    publisher: Arc<dyn Publisher>,
    subscription: Box<dyn Subscription>,
}

pub struct Worker<M: Middleware + 'static> {
    middleware: Arc<M>,
    config: WorkerConfig,
    args: Vec<String>,
    log: Arc<LogBuffer>,
    listen_log: Arc<LogBuffer>,
    events: flume::Sender<WorkerToUi>,
    connection: Option<Connection>,
    publish_thread: Option<JoinHandle<u64>>,
}

impl<M: Middleware + 'static> Worker<M> {
    /// Build a disconnected worker and the bus its notifications arrive on.
    ///
    /// The bus is unbounded: a connected worker queues roughly one
    /// notification per tick plus one per message heard. Drain the bus or
    /// drop it; a dropped bus discards notifications instead of queueing them.
    pub fn new(middleware: Arc<M>, config: WorkerConfig) -> (Self, Bus) {
        Self::with_diagnostics(middleware, config, Arc::new(LogFacadeSink))
    }

    pub fn with_diagnostics(
        middleware: Arc<M>,
        config: WorkerConfig,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> (Self, Bus) {
        let (events, bus) = Bus::channel();
        let log = Arc::new(LogBuffer::new(
            LogChannel::Log,
            diagnostics.clone(),
            events.clone(),
        ));
        let listen_log = Arc::new(LogBuffer::new(
            LogChannel::Listen,
            diagnostics,
            events.clone(),
        ));

        let worker = Self {
            middleware,
            config,
            args: Vec::new(),
            log,
            listen_log,
            events,
            connection: None,
            publish_thread: None,
        };
        (worker, bus)
    }

    /// Extra `name:=value` arguments applied on top of default discovery.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Connect through default discovery.
    ///
    /// Returns `false` when the master is unreachable or any binding step
    /// fails; nothing is left bound or running in that case.
    pub fn init(&mut self) -> bool {
        let remappings = Remappings::discover(&self.args);
        self.init_with(remappings)
    }

    /// Connect to an explicit master, announcing `host_url` as this node's host.
    ///
    /// Other `name:=value` arguments given through [`Worker::with_args`] still
    /// apply; the two endpoints always win over them.
    pub fn init_with_endpoints(&mut self, master_url: &str, host_url: &str) -> bool {
        let (mut remappings, _) = Remappings::from_args(&self.args);
        remappings.extend(Remappings::with_endpoints(master_url, host_url));
        self.init_with(remappings)
    }

    fn init_with(&mut self, remappings: Remappings) -> bool {
        if self.is_connected() {
            log::warn!("Worker is already connected, ignoring init");
            return true;
        }
        if self.connection.is_some() {
            log::info!("Previous session has ended, reconnecting");
            self.disconnect();
        }

        match self.connect(&remappings) {
            Ok(()) => true,
            Err(err) => {
                log::error!("Failed to connect with {remappings}: {err:#}");
                self.disconnect();
                false
            }
        }
    }

    /// Shut the middleware down, join the publish loop and unbind both endpoints.
    fn disconnect(&mut self) {
        if self.middleware.is_started() {
            self.middleware.shutdown();
            self.middleware.wait_for_shutdown();
        }
        if let Some(handle) = self.publish_thread.take() {
            match handle.join() {
                Ok(ticks) => log::debug!("Publish loop joined after {ticks} ticks"),
                Err(_) => log::error!("Publish loop thread panicked"),
            }
        }
        self.connection.take();
    }

    fn connect(&mut self, remappings: &Remappings) -> Result<()> {
        self.middleware
            .init(remappings)
            .context("middleware init failed")?;
        if !self.middleware.master_reachable() {
            return Err(anyhow!(
                "master {} is unreachable",
                remappings.master().unwrap_or("<unset>")
            ));
        }
        self.middleware
            .start()
            .context("failed to start middleware session")?;

        let publisher: Arc<dyn Publisher> = Arc::from(
            self.middleware
                .advertise(&CHAT_OUT)
                .with_context(|| format!("failed to advertise '{}'", CHAT_OUT.name))?,
        );
        let subscription = self
            .middleware
            .subscribe(
                &CHAT_IN,
                ListenHandler::new(self.listen_log.clone()).into_handler(),
            )
            .with_context(|| format!("failed to subscribe to '{}'", CHAT_IN.name))?;

        let dispatch: Arc<dyn Dispatch> = self.middleware.clone();
        let args = PublishLoopArgs {
            dispatch,
            publisher: publisher.clone(),
            log: self.log.clone(),
            events: self.events.clone(),
            interval: self.config.publish_interval(),
            prefix: self.config.message_prefix.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("{}-publish", self.config.node_name))
            .spawn(move || run_publish_loop(args))
            .context("failed to spawn publish loop thread")?;

        log::info!(
            "Connected: publishing on '{}', listening on '{}'",
            publisher.topic(),
            subscription.topic()
        );
        self.connection = Some(Connection {
            publisher,
            subscription,
        });
        self.publish_thread = Some(handle);
        Ok(())
    }

    /// Whether a session is bound and its publish loop is still running.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
            && !self.middleware.is_shutdown()
            && self
                .publish_thread
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Topics bound by the live connection, outbound first.
    pub fn bound_topics(&self) -> Option<(String, String)> {
        self.connection.as_ref().map(|connection| {
            (
                connection.publisher.topic().to_string(),
                connection.subscription.topic().to_string(),
            )
        })
    }

    /// Self log: events this worker originates.
    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Listen log: messages heard on the inbound topic.
    pub fn listen_log(&self) -> &LogBuffer {
        &self.listen_log
    }

    pub fn logs(&self, channel: LogChannel) -> &LogBuffer {
        match channel {
            LogChannel::Log => &self.log,
            LogChannel::Listen => &self.listen_log,
        }
    }

    pub fn middleware(&self) -> &Arc<M> {
        &self.middleware
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

impl<M: Middleware + 'static> Drop for Worker<M> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
