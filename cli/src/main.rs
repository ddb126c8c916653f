// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # kvmfwd
//!
//! Operator CLI for the forwarding rule engine.
//!
//! ## Commands
//!
//! - `kvmfwd forward add|remove|show|list` - Manage forwarding declarations
//! - `kvmfwd compile <domain> <action>` - Print the batch an event would run
//! - `kvmfwd hook <domain> <action>` - Run the hook path by hand
//! - `kvmfwd perimeter status|enable|disable|add|remove` - Perimeter rule file
//! - `kvmfwd config show|validate|generate` - Engine settings
//! - `kvmfwd bridge-filter disable` - Turn off bridge netfilter
//!
//! libvirt itself calls the separate `kvmfwd-hook` binary.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use kvmfwd_cli::commands::{
    self, BridgeFilterCommand, ConfigCommand, ForwardCommand, PerimeterCommand,
};
use kvmfwd_cli::{engine, logging};

/// kvmfwd - expose libvirt guest ports through per-VM iptables chains
#[derive(Parser)]
#[command(name = "kvmfwd")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to settings file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "KVMFWD_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "KVMFWD_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage forwarding declarations
    #[command(name = "forward")]
    Forward {
        #[command(subcommand)]
        command: ForwardCommand,
    },

    /// Print the commands a lifecycle event would run, without running them
    #[command(name = "compile")]
    Compile {
        #[arg(value_name = "DOMAIN")]
        domain: String,
        #[arg(value_name = "ACTION")]
        action: String,
    },

    /// Handle a lifecycle event as the libvirt hook would
    #[command(name = "hook")]
    Hook {
        #[arg(value_name = "DOMAIN")]
        domain: String,
        #[arg(value_name = "ACTION")]
        action: String,
    },

    /// Perimeter firewall rule file
    #[command(name = "perimeter")]
    Perimeter {
        #[command(subcommand)]
        command: PerimeterCommand,
    },

    /// Engine settings management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Bridge netfilter switch
    #[command(name = "bridge-filter")]
    BridgeFilter {
        #[command(subcommand)]
        command: BridgeFilterCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Forward { command }) => {
            commands::forward::handle_command(command, cli.config)
        }
        Some(Commands::Compile { domain, action }) => {
            commands::compile::handle_command(&domain, &action, cli.config)
        }
        Some(Commands::Hook { domain, action }) => {
            let settings = engine::load_settings(cli.config)?;
            commands::hook::handle_command(&domain, &action, &settings)
        }
        Some(Commands::Perimeter { command }) => {
            commands::perimeter::handle_command(command, cli.config)
        }
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config)
        }
        Some(Commands::BridgeFilter { command }) => commands::bridge::handle_command(command),
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
