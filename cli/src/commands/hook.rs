// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The libvirt `qemu` hook path, shared by `kvmfwd hook` and `kvmfwd-hook`.

use anyhow::{bail, Context, Result};
use colored::Colorize;

use kvmfwd_core::application::HookOutcome;
use kvmfwd_core::hook::HookAction;
use kvmfwd_core::settings::EngineSettings;

use crate::engine;

/// Handle one hook event. Fails when any packet-filter command failed, so
/// the process exits non-zero.
pub fn run(settings: &EngineSettings, domain: &str, action: &str) -> Result<HookOutcome> {
    let action = HookAction::parse(action);
    let outcome = engine::hook_service(settings)
        .handle(domain, &action)
        .with_context(|| format!("Hook '{}' for '{}' failed", action, domain))?;

    if let HookOutcome::Applied(report) = &outcome {
        if !report.failures.is_empty() {
            for failure in &report.failures {
                tracing::error!(
                    command = %failure.command.render(&settings.program_line()),
                    error = %failure.error,
                    "Command failed"
                );
            }
            bail!(
                "{} of {} commands failed for '{}'{}",
                report.failures.len(),
                report.applied.len() + report.failures.len() + report.skipped.len(),
                domain,
                if report.aborted { ", batch aborted" } else { "" }
            );
        }
    }

    Ok(outcome)
}

/// `kvmfwd hook <domain> <action>`: run the hook path and describe the result.
pub fn handle_command(domain: &str, action: &str, settings: &EngineSettings) -> Result<()> {
    match run(settings, domain, action)? {
        HookOutcome::NoConfiguration => {
            println!("{}", format!("No forwarding configuration for '{}'", domain).yellow());
        }
        HookOutcome::Ignored => {
            println!("{}", format!("Action '{}' produces no commands", action).dimmed());
        }
        HookOutcome::Recorded(batch) => {
            println!(
                "{}",
                format!(
                    "✓ Recorded {} commands to {} (record mode)",
                    batch.len(),
                    settings.commands_path().display()
                )
                .green()
            );
        }
        HookOutcome::Applied(report) => {
            println!(
                "{}",
                format!("✓ Applied {} commands for '{}'", report.applied.len(), domain).green()
            );
        }
    }
    Ok(())
}
