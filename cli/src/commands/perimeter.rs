// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Perimeter firewall commands
//!
//! Commands: status, enable, disable, add, remove

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use kvmfwd_core::forwarding::ForwardingConfig;
use kvmfwd_core::settings::EngineSettings;

use crate::engine;

#[derive(Subcommand)]
pub enum PerimeterCommand {
    /// Show whether the managed block is active and what it contains
    Status,

    /// Uncomment the managed block
    Enable,

    /// Comment out the managed block
    Disable,

    /// Add perimeter rules for a VM's stored declaration
    Add {
        #[arg(value_name = "VM")]
        vm: String,
    },

    /// Remove perimeter rules for a VM's stored declaration
    Remove {
        #[arg(value_name = "VM")]
        vm: String,
    },
}

pub fn handle_command(command: PerimeterCommand, config_override: Option<PathBuf>) -> Result<()> {
    let settings = engine::load_settings(config_override)?;
    let service = engine::perimeter_service(&settings);
    let rules_file = settings.perimeter.rules_file.display().to_string();

    match command {
        PerimeterCommand::Status => {
            let status = service
                .status()
                .with_context(|| format!("Failed to read {}", rules_file))?;
            println!("{} {}", "Rule file:".bold(), rules_file);
            if status.active {
                println!("{} {}", "Block:".bold(), "active".green());
            } else {
                println!("{} {}", "Block:".bold(), "inactive".yellow());
            }
            for rule in &status.rules {
                println!("  {}", rule);
            }
        }

        PerimeterCommand::Enable => {
            let changed = service
                .enable()
                .with_context(|| format!("Failed to enable block in {}", rules_file))?;
            report_change(changed, "Perimeter block enabled");
        }

        PerimeterCommand::Disable => {
            let changed = service
                .disable()
                .with_context(|| format!("Failed to disable block in {}", rules_file))?;
            report_change(changed, "Perimeter block disabled");
        }

        PerimeterCommand::Add { vm } => {
            let config = stored_config(&settings, &vm)?;
            let changed = service
                .expose(&config)
                .with_context(|| format!("Failed to add perimeter rules for '{}'", vm))?;
            report_change(changed, &format!("Perimeter rules added for '{}'", vm));
        }

        PerimeterCommand::Remove { vm } => {
            let config = stored_config(&settings, &vm)?;
            let changed = service
                .withdraw(&config)
                .with_context(|| format!("Failed to remove perimeter rules for '{}'", vm))?;
            report_change(changed, &format!("Perimeter rules removed for '{}'", vm));
        }
    }

    Ok(())
}

fn stored_config(settings: &EngineSettings, vm: &str) -> Result<ForwardingConfig> {
    engine::repository(settings)
        .find(vm)
        .context("Failed to read forwarding store")?
        .with_context(|| format!("No declaration stored for '{}'", vm))
}

fn report_change(changed: bool, message: &str) {
    if changed {
        println!("{}", format!("✓ {}", message).green());
    } else {
        println!("{}", "Already up to date, nothing changed".dimmed());
    }
}
