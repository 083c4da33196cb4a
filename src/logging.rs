//! Tracing setup for the shell and the one-shot CLI.
//!
//! Events go to stdout in compact form and to the configured log file without ANSI colours.
//! The file layer also records when each `run` span closes, so every pipeline run leaves one
//! line with its `run_id` and elapsed time.
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, fmt::format::FmtSpan, prelude::*};

use crate::config::LogSettings;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber. Stdout logging still works when the file cannot be opened.
pub fn init_tracing(settings: &LogSettings) {
    let stdout_layer = fmt::layer().with_target(false).compact();
    let registry = tracing_subscriber::registry()
        .with(filter_for(settings))
        .with(stdout_layer);

    match open_log_file(&settings.file) {
        Ok((writer, guard)) => {
            let _ = LOG_GUARD.set(guard);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .compact();
            registry.with(file_layer).init();
        }
        Err(err) => {
            registry.init();
            tracing::warn!(
                path = %settings.file.display(),
                error = %err,
                "File logging disabled"
            );
        }
    }
}

/// Parse the configured directives, falling back to `info` when they are malformed.
fn filter_for(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_new(&settings.filter).unwrap_or_else(|err| {
        eprintln!("Ignoring RUST_LOG={:?}: {err}", settings.filter);
        EnvFilter::new("info")
    })
}

/// Open `path` for appending behind a non-blocking writer, creating parent directories.
fn open_log_file(path: &Path) -> io::Result<(NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::non_blocking(file))
}
