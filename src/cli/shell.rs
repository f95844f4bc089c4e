//! Thin terminal shell around the worker
//!
//! Connects, then prints every new row of whichever log changed until the
//! worker reports that it stopped.
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    io::{self, Write},
    sync::Arc,
};

use crate::{
    core::{LogBuffer, LogChannel, LogEntry, Worker, WorkerConfig, WorkerToUi},
    middleware::Middleware,
};

/// How the shell connects and prints
#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    /// Explicit `(master_url, host)`; default discovery when `None`
    pub endpoints: Option<(String, String)>,
    /// Extra `name:=value` discovery overrides
    pub remap_args: Vec<String>,
    pub json: bool,
}

#[derive(Serialize)]
struct ShellRow<'a> {
    channel: LogChannel,
    #[serde(flatten)]
    entry: &'a LogEntry,
}

/// Prints only the rows of a buffer it has not printed yet.
#[derive(Debug, Default)]
pub struct Renderer {
    json: bool,
    log_rows: usize,
    listen_rows: usize,
}

impl Renderer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            ..Self::default()
        }
    }

    /// Write the new rows of `buffer`. Returns how many were written.
    pub fn render<W: Write>(&mut self, out: &mut W, buffer: &LogBuffer) -> Result<usize> {
        let channel = buffer.channel();
        let seen = match channel {
            LogChannel::Log => &mut self.log_rows,
            LogChannel::Listen => &mut self.listen_rows,
        };

        let label = channel.to_string();
        let entries = buffer.entries_from(*seen);
        for entry in &entries {
            if self.json {
                serde_json::to_writer(&mut *out, &ShellRow { channel, entry })?;
                writeln!(out)?;
            } else {
                writeln!(out, "{label:<6} {entry}")?;
            }
        }
        out.flush()?;
        *seen += entries.len();
        Ok(entries.len())
    }
}

/// Run the worker against `middleware` until it stops.
pub fn run_shell<M: Middleware + 'static>(
    middleware: Arc<M>,
    config: WorkerConfig,
    options: ShellOptions,
) -> Result<()> {
    let (worker, bus) = Worker::new(middleware.clone(), config);
    let mut worker = worker.with_args(options.remap_args);

    let connected = match &options.endpoints {
        Some((master_url, host_url)) => worker.init_with_endpoints(master_url, host_url),
        None => worker.init(),
    };
    if !connected {
        bail!("could not connect to the master, is the broker running?");
    }

    {
        let middleware = middleware.clone();
        ctrlc::set_handler(move || middleware.shutdown())
            .context("failed to install Ctrl-C handler")?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut renderer = Renderer::new(options.json);
    loop {
        match bus.worker_rx.recv() {
            Ok(WorkerToUi::LogUpdated) => {
                renderer.render(&mut out, worker.log())?;
            }
            Ok(WorkerToUi::ListenLogUpdated) => {
                renderer.render(&mut out, worker.listen_log())?;
            }
            Ok(WorkerToUi::Stopped) | Err(_) => break,
        }
    }

    renderer.render(&mut out, worker.log())?;
    renderer.render(&mut out, worker.listen_log())?;
    log::info!("Worker stopped, closing the shell");
    Ok(())
}
