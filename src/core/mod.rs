/// Core worker logic for chatter
///
/// This module contains everything that is independent of the shell:
/// - Worker-to-shell notification bus
/// - Dual log buffers and the diagnostic side channel
/// - Worker configuration
/// - The periodic publish loop
/// - The worker itself (connection lifecycle and subscription handling)
pub mod bus;
pub mod config;
pub mod logs;
pub mod publish_loop;
pub mod worker;

pub use bus::{Bus, WorkerToUi};
pub use config::WorkerConfig;
pub use logs::{append_log, LogBuffer, LogChannel, LogEntry, LogError, Severity};
pub use worker::{ListenHandler, Worker};
