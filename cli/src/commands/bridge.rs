// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use kvmfwd_core::infrastructure::sysctl::{
    disable_bridge_filtering, BridgeFilterState, BRIDGE_NF_CALL_IPTABLES,
};

#[derive(Subcommand)]
pub enum BridgeFilterCommand {
    /// Stop bridged guest traffic from traversing iptables
    Disable {
        /// sysctl file to write
        #[arg(long, default_value = BRIDGE_NF_CALL_IPTABLES)]
        path: PathBuf,
    },
}

pub fn handle_command(command: BridgeFilterCommand) -> Result<()> {
    match command {
        BridgeFilterCommand::Disable { path } => {
            let state = disable_bridge_filtering(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            match state {
                BridgeFilterState::Disabled => {
                    println!("{}", "✓ Bridge netfilter disabled".green())
                }
                BridgeFilterState::AlreadyDisabled => {
                    println!("{}", "Bridge netfilter already disabled".dimmed())
                }
                BridgeFilterState::Absent => println!(
                    "{}",
                    "br_netfilter not loaded, nothing to disable".yellow()
                ),
            }
        }
    }
    Ok(())
}
