use anyhow::Result;
use parking_lot::Mutex;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use chatter::{
    core::{logs::DiagnosticSink, Worker, WorkerConfig},
    middleware::{loopback::LoopbackMiddleware, Dispatch, Middleware, CHAT_IN, CHAT_OUT},
    Severity, WorkerToUi,
};

const DEADLINE: Duration = Duration::from_secs(5);

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        publish_interval_ms: 10,
        ..WorkerConfig::default()
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<(Severity, String)>>,
}

impl DiagnosticSink for RecordingSink {
    fn emit(&self, severity: Severity, text: &str) {
        self.records.lock().push((severity, text.to_string()));
    }
}

/// Unreachable master leaves nothing bound and both logs empty
#[test]
fn test_unreachable_master_returns_false() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    middleware.set_reachable(false);
    let (mut worker, bus) = Worker::new(middleware.clone(), fast_config());

    assert!(!worker.init());
    assert!(!worker.is_connected());
    assert!(!middleware.is_started());
    assert!(middleware.subscribed_topics().is_empty());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(worker.log().row_count(), 0);
    assert_eq!(worker.listen_log().row_count(), 0);
    assert!(bus.drain().is_empty());
}

#[test]
fn test_explicit_endpoints_become_remappings() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (mut worker, _bus) = Worker::new(middleware.clone(), fast_config());

    assert!(worker.init_with_endpoints("mqtt://10.1.2.3:1883", "bench-7"));
    let remappings = middleware.remappings().expect("init was called");
    assert_eq!(remappings.master(), Some("mqtt://10.1.2.3:1883"));
    assert_eq!(remappings.hostname(), Some("bench-7"));
    assert_eq!(
        worker.bound_topics(),
        Some((CHAT_OUT.name.to_string(), CHAT_IN.name.to_string()))
    );
}

#[test]
fn test_default_discovery_applies_remap_args() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (worker, _bus) = Worker::new(middleware.clone(), fast_config());
    let mut worker = worker.with_args(vec!["__hostname:=pinned-host".to_string()]);

    assert!(worker.init());
    let remappings = middleware.remappings().expect("init was called");
    assert_eq!(remappings.hostname(), Some("pinned-host"));
    assert!(remappings.master().is_some());
}

#[test]
fn test_second_init_keeps_single_connection() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (mut worker, _bus) = Worker::new(middleware.clone(), fast_config());

    assert!(worker.init());
    assert!(worker.init());
    assert_eq!(middleware.subscribed_topics(), vec![CHAT_IN.name.to_string()]);
}

#[test]
fn test_self_log_grows_once_per_tick() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (mut worker, bus) = Worker::new(middleware.clone(), fast_config());
    assert!(worker.init());

    let ticks = 5;
    assert!(wait_until(|| worker.log().row_count() >= ticks));
    let rows = worker.log().entries();
    for (i, entry) in rows.iter().take(ticks).enumerate() {
        assert_eq!(entry.severity, Severity::Info);
        assert_eq!(entry.message, format!("I sent: hello world -- {i}"));
    }
    assert!(bus.drain().contains(&WorkerToUi::LogUpdated));
    assert!(middleware.yield_count() >= ticks as u64 - 1);
}

#[test]
fn test_each_delivery_adds_one_listen_entry() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (mut worker, _bus) = Worker::new(middleware.clone(), fast_config());
    assert!(worker.init());

    assert_eq!(middleware.deliver(CHAT_IN.name, "from outside"), 1);
    assert!(wait_until(|| worker.listen_log().row_count() == 1));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(worker.listen_log().row_count(), 1);
    let entry = worker.listen_log().entry_at(0).unwrap();
    assert_eq!(entry.severity, Severity::Info);
    assert_eq!(entry.message, "I heard: from outside");
    assert!(worker.listen_log().entry_at(1).is_err());
}

#[test]
fn test_end_to_end_chatter() -> Result<()> {
    let middleware =
        Arc::new(LoopbackMiddleware::new().with_route(CHAT_OUT.name, CHAT_IN.name));
    let (mut worker, bus) = Worker::new(middleware.clone(), fast_config());
    assert!(worker.init());

    assert!(wait_until(|| worker.listen_log().row_count() >= 1));

    let sent = worker.log().row_at(0)?;
    assert!(sent.starts_with("[INFO] ["), "unexpected row: {sent}");
    assert!(
        sent.ends_with("]: I sent: hello world -- 0"),
        "unexpected row: {sent}"
    );

    let heard = worker.listen_log().row_at(0)?;
    assert!(heard.starts_with("[INFO] ["), "unexpected row: {heard}");
    assert!(
        heard.ends_with("]: I heard: hello world -- 0"),
        "unexpected row: {heard}"
    );

    middleware.shutdown();
    let mut stopped = 0;
    let start = Instant::now();
    while stopped == 0 && start.elapsed() < DEADLINE {
        if let Some(WorkerToUi::Stopped) = bus.next_timeout(Duration::from_millis(50))? {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 1);

    drop(worker);
    let late_stops = bus
        .worker_rx
        .try_iter()
        .filter(|event| *event == WorkerToUi::Stopped)
        .count();
    assert_eq!(late_stops, 0);
    assert!(bus.worker_rx.recv().is_err());
    Ok(())
}

#[test]
fn test_drop_shuts_down_and_unbinds() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    {
        let (mut worker, _bus) = Worker::new(middleware.clone(), fast_config());
        assert!(worker.init());
        assert!(wait_until(|| worker.log().row_count() >= 2));
    }

    assert!(middleware.is_shutdown());
    assert!(!middleware.is_started());
    assert!(middleware.subscribed_topics().is_empty());
}

#[test]
fn test_every_append_reaches_diagnostics() {
    let middleware =
        Arc::new(LoopbackMiddleware::new().with_route(CHAT_OUT.name, CHAT_IN.name));
    let sink = Arc::new(RecordingSink::default());
    let (mut worker, _bus) =
        Worker::with_diagnostics(middleware.clone(), fast_config(), sink.clone());
    assert!(worker.init());
    assert!(wait_until(|| worker.listen_log().row_count() >= 2));
    drop(worker);

    let records = sink.records.lock();
    assert!(records.contains(&(Severity::Info, "I sent: hello world -- 0".to_string())));
    assert!(records.contains(&(Severity::Info, "I heard: hello world -- 0".to_string())));
}

#[test]
fn test_init_after_shutdown_reconnects() -> Result<()> {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (mut worker, bus) = Worker::new(middleware.clone(), fast_config());
    assert!(worker.init());
    assert!(wait_until(|| worker.log().row_count() >= 2));

    middleware.shutdown();
    let start = Instant::now();
    let mut stopped = false;
    while !stopped && start.elapsed() < DEADLINE {
        stopped = bus.next_timeout(Duration::from_millis(50))? == Some(WorkerToUi::Stopped);
    }
    assert!(stopped);
    assert!(!worker.is_connected());

    let rows_before = worker.log().row_count();
    assert!(worker.init());
    assert!(worker.is_connected());
    assert!(wait_until(|| worker.log().row_count() >= rows_before + 2));
    assert_eq!(middleware.subscribed_topics(), vec![CHAT_IN.name.to_string()]);
    Ok(())
}

#[test]
fn test_explicit_endpoints_keep_other_remap_args() {
    let middleware = Arc::new(LoopbackMiddleware::new());
    let (worker, _bus) = Worker::new(middleware.clone(), fast_config());
    let mut worker = worker.with_args(vec![
        "__master:=mqtt://overridden:1883".to_string(),
        "rate:=5".to_string(),
    ]);

    assert!(worker.init_with_endpoints("mqtt://10.0.0.9:1883", "bench"));
    let remappings = middleware.remappings().expect("init was called");
    assert_eq!(remappings.master(), Some("mqtt://10.0.0.9:1883"));
    assert_eq!(remappings.hostname(), Some("bench"));
    assert_eq!(remappings.get("rate"), Some("5"));
}
