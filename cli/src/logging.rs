// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Logging initialisation for both binaries.
//!
//! `kvmfwd` logs to stderr only. `kvmfwd-hook` runs under libvirtd, whose
//! stderr nobody reads, so it also writes to `<log_dir>/kvmfwd-hook.log`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer alive; buffered lines are flushed
/// when it drops.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

fn filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")
}

/// Initialize tracing subscriber for logging
pub fn init_logging(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

/// Stderr plus the append-only `log_file`. Falls back to stderr only when
/// its directory cannot be created.
pub fn init_hook_logging(level: &str, log_file: &Path) -> Result<LogGuard> {
    let log_dir = log_file.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .context("Hook log path has no file name")?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        tracing_subscriber::registry()
            .with(filter(level)?)
            .with(stderr_layer)
            .init();
        tracing::warn!(path = %log_dir.display(), error = %e, "Cannot create log directory, logging to stderr only");
        return Ok(LogGuard { _file_guard: None });
    }

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter(level)?)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(LogGuard {
        _file_guard: Some(guard),
    })
}
