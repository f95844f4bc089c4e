use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::{self, Write};

/// Environment variable naming a file that receives diagnostics instead of stderr.
pub const LOG_FILE_ENV: &str = "CHATTER_LOG_FILE";

/// Initialize the diagnostic logger for the `chatter` binary.
///
/// Honors `RUST_LOG`. When `CHATTER_LOG_FILE` is set, records go to that file.
pub fn init_logging() {
    if let Some(path) = std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|path| !path.trim().is_empty())
    {
        if let Err(err) = init_file_logger(&path) {
            eprintln!("Failed to initialize file logger at '{path}': {err}");
            init_stderr_logger();
        }
    } else {
        init_stderr_logger();
    }
}

fn init_stderr_logger() {
    Builder::new()
        .target(Target::Stderr)
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(file)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .init();

    log::info!("File logger initialized at {path}");

    Ok(())
}
