// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # kvmfwd-hook
//!
//! Installed as (or called from) `/etc/libvirt/hooks/qemu`. libvirt runs it
//! as `qemu <domain> <action> <sub-action> <extra>` and feeds the domain XML
//! on stdin; only the first two arguments matter here.
//!
//! Every failure is logged to `<log_dir>/kvmfwd-hook.log` and turned into a
//! non-zero exit status. The hook never calls back into libvirt.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use kvmfwd_cli::commands::hook;
use kvmfwd_cli::{engine, logging};
use kvmfwd_core::settings::EngineSettings;

#[derive(Parser)]
#[command(name = "kvmfwd-hook")]
#[command(version, about = "libvirt qemu hook for kvmfwd", long_about = None)]
struct HookArgs {
    /// Path to settings file (overrides discovery)
    #[arg(long, env = "KVMFWD_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "KVMFWD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// libvirt domain name
    domain: String,

    /// Lifecycle action (start, stopped, reconnect, ...)
    action: String,

    /// Sub-action and extra arguments appended by libvirt
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    rest: Vec<String>,
}

fn main() -> ExitCode {
    let args = HookArgs::parse();

    // The log file lives in log_dir, so settings load before the subscriber exists.
    let settings = engine::load_settings(args.config.clone());
    let log_file = settings
        .as_ref()
        .map(EngineSettings::hook_log_path)
        .unwrap_or_else(|_| EngineSettings::default().hook_log_path());

    let _guard = match logging::init_hook_logging(&args.log_level, &log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("kvmfwd-hook: failed to initialise logging: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(domain = %args.domain, action = %args.action, "{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match hook::run(&settings, &args.domain, &args.action) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(domain = %args.domain, action = %args.action, "{:#}", e);
            ExitCode::FAILURE
        }
    }
}
