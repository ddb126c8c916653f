// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Preview the batch a lifecycle event would produce, without executing it.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use kvmfwd_core::application::{Dispatch, ForwardingEventDispatcher};
use kvmfwd_core::hook::HookAction;

use crate::engine;

pub fn handle_command(domain: &str, action: &str, config_override: Option<PathBuf>) -> Result<()> {
    let settings = engine::load_settings(config_override)?;
    let dispatcher = ForwardingEventDispatcher::new(engine::repository(&settings));
    let action = HookAction::parse(action);

    let dispatch = dispatcher
        .dispatch(domain, &action)
        .with_context(|| format!("Failed to compile '{}' for '{}'", action, domain))?;

    let batch = match dispatch {
        Dispatch::Ignored => {
            println!("{}", format!("Action '{}' does not drive rules", action).yellow());
            return Ok(());
        }
        Dispatch::NoConfiguration => {
            println!("{}", format!("No forwarding declared for '{}'", domain).yellow());
            return Ok(());
        }
        Dispatch::Batch(batch) if batch.is_empty() => {
            println!(
                "{}",
                format!("No commands for '{}' on '{}'", action, domain).yellow()
            );
            return Ok(());
        }
        Dispatch::Batch(batch) => batch,
    };

    for line in batch.render_lines(&settings.program_line()) {
        println!("{}", line);
    }
    Ok(())
}
