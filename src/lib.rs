//! Chatter — a pub/sub worker feeding UI-facing log buffers
//!
//! The [`core::Worker`] connects to a broker through a [`middleware::Middleware`],
//! publishes a counter-stamped message on `chat-out` at a fixed interval and
//! mirrors everything heard on `chat-in` into its listen log. Both logs are
//! append-only and announce every new row on the worker [`core::Bus`], so a
//! presentation layer can re-render incrementally.
//!
//! The `chatter` binary is a thin terminal shell over this library; see
//! [`cli::shell`].

#[doc(hidden)]
pub mod boot;
pub mod cli;
pub mod core;
pub mod middleware;

pub use crate::core::{Bus, LogBuffer, LogChannel, LogEntry, LogError, Severity, Worker, WorkerToUi};
