/// Periodic publish loop
///
/// Runs on the worker's dedicated thread once the connection is up. Each tick
/// publishes `<prefix><counter>` on the outbound topic, records it in the self
/// log, pumps the middleware callbacks once and sleeps until the next tick.
/// The loop polls the shutdown predicate at the top of every tick; that is its
/// only way out.
use flume::Sender;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::{
    bus::WorkerToUi,
    logs::{LogBuffer, Severity},
};
use crate::middleware::{Dispatch, Publisher};

/// Everything the publish loop needs, moved onto its thread.
pub struct PublishLoopArgs {
    pub dispatch: Arc<dyn Dispatch>,
    pub publisher: Arc<dyn Publisher>,
    pub log: Arc<LogBuffer>,
    pub events: Sender<WorkerToUi>,
    pub interval: Duration,
    pub prefix: String,
}

/// Run until the middleware reports shutdown. Returns the number of ticks published.
pub fn run_publish_loop(args: PublishLoopArgs) -> u64 {
    let PublishLoopArgs {
        dispatch,
        publisher,
        log,
        events,
        interval,
        prefix,
    } = args;

    let mut count: u64 = 0;
    let mut next_tick = Instant::now();
    while !dispatch.is_shutdown() {
        let payload = format!("{prefix}{count}");
        // Fire and forget: a failed publish is still recorded as sent.
        if let Err(err) = publisher.publish(&payload) {
            log::warn!("Publish on '{}' failed: {err:#}", publisher.topic());
        }
        log.append(Severity::Info, format!("I sent: {payload}"));

        dispatch.yield_once();

        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            std::thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
        count += 1;
    }

    log::info!("Middleware shut down after {count} ticks, stopping publish loop");
    if events.send(WorkerToUi::Stopped).is_err() {
        log::debug!("No observer for the stop notification");
    }
    count
}
