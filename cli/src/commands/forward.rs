// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Forwarding declaration commands
//!
//! Commands: add, remove, show, list

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use kvmfwd_core::forwarding::{ForwardingConfig, PortMapping, PortRange};

use crate::engine;

#[derive(Subcommand)]
pub enum ForwardCommand {
    /// Declare ports to forward for a VM (merged into any existing declaration)
    Add {
        /// libvirt domain name
        #[arg(value_name = "VM")]
        vm: String,

        /// Host address traffic arrives on
        #[arg(long)]
        host_ip: Ipv4Addr,

        /// Guest address on the libvirt network
        #[arg(long)]
        private_ip: Ipv4Addr,

        /// Only forward traffic sourced from this address
        #[arg(long)]
        external_ip: Option<Ipv4Addr>,

        /// Egress interface for forward-accept rules
        #[arg(long)]
        interface: Option<String>,

        /// Port mapping, e.g. tcp:1100:3000 (repeatable)
        #[arg(long = "map", value_name = "PROTO:HOST:VM")]
        maps: Vec<PortMapping>,

        /// Port range, e.g. udp:40000-40010:30000-30010 (repeatable)
        #[arg(long = "range", value_name = "PROTO:HS-HE:VS-VE")]
        ranges: Vec<PortRange>,

        /// Replace the stored declaration instead of merging
        #[arg(long)]
        replace: bool,
    },

    /// Delete a VM's declaration
    Remove {
        #[arg(value_name = "VM")]
        vm: String,
    },

    /// Show a VM's declaration
    Show {
        #[arg(value_name = "VM")]
        vm: String,

        /// Print the stored JSON
        #[arg(long)]
        json: bool,
    },

    /// List all declarations
    List {
        /// Print the stored JSON document
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_command(command: ForwardCommand, config_override: Option<PathBuf>) -> Result<()> {
    let settings = engine::load_settings(config_override)?;
    let repository = engine::repository(&settings);

    match command {
        ForwardCommand::Add {
            vm,
            host_ip,
            private_ip,
            external_ip,
            interface,
            maps,
            ranges,
            replace,
        } => {
            let mut config = ForwardingConfig::new(vm).with_addresses(host_ip, private_ip);
            config.external_ip = external_ip;
            config.interface = interface;
            config.port_map = maps;
            config.port_range = ranges;

            for range in &config.port_range {
                if let Some(defect) = range.defect() {
                    println!(
                        "{}",
                        format!("⚠ Range {} will be skipped: {}", range, defect).yellow()
                    );
                }
            }

            let stored = if replace {
                repository
                    .upsert(config.clone())
                    .with_context(|| format!("Failed to store declaration for '{}'", config.vm_name))?;
                config
            } else {
                let vm_name = config.vm_name.clone();
                repository
                    .merge(config)
                    .with_context(|| format!("Failed to merge declaration for '{}'", vm_name))?
            };

            println!(
                "{}",
                format!("✓ Forwarding declared for '{}'", stored.vm_name).green()
            );
            print_config(&stored);
            println!();
            println!(
                "{}",
                "Rules take effect on the next start or reconnect of the domain.".dimmed()
            );
        }

        ForwardCommand::Remove { vm } => {
            let removed = repository
                .remove(&vm)
                .with_context(|| format!("Failed to remove declaration for '{}'", vm))?;
            if removed {
                println!("{}", format!("✓ Removed declaration for '{}'", vm).green());
            } else {
                println!("{}", format!("No declaration stored for '{}'", vm).yellow());
            }
        }

        ForwardCommand::Show { vm, json } => {
            let config = repository
                .find(&vm)
                .context("Failed to read forwarding store")?
                .with_context(|| format!("No declaration stored for '{}'", vm))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }

        ForwardCommand::List { json } => {
            let all = repository.load_all().context("Failed to read forwarding store")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&all)?);
                return Ok(());
            }
            if all.is_empty() {
                println!("{}", "No forwarding declarations.".yellow());
                return Ok(());
            }

            println!(
                "{:<32} {:<16} {:<16} {:>6} {:>7}",
                "VM".bold(),
                "HOST".bold(),
                "PRIVATE".bold(),
                "PORTS".bold(),
                "RANGES".bold()
            );
            for config in &all.configs {
                println!(
                    "{:<32} {:<16} {:<16} {:>6} {:>7}",
                    config.vm_name,
                    display_ip(config.host_ip),
                    display_ip(config.private_ip),
                    config.port_map.len(),
                    config.port_range.len()
                );
            }
        }
    }

    Ok(())
}

fn display_ip(ip: Option<Ipv4Addr>) -> String {
    ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string())
}

fn print_config(config: &ForwardingConfig) {
    println!("{}", config.vm_name.bold());
    println!("  Host IP:     {}", display_ip(config.host_ip));
    println!("  Private IP:  {}", display_ip(config.private_ip));
    if let Some(external) = config.external_ip {
        println!("  External IP: {}", external);
    }
    if let Some(interface) = &config.interface {
        println!("  Interface:   {}", interface);
    }
    if let Ok(chains) = config.chains() {
        println!(
            "  Chains:      {}, {}, {}",
            chains.ingress, chains.egress, chains.forward
        );
    }
    for mapping in &config.port_map {
        println!("  Port:        {}", mapping);
    }
    for range in &config.port_range {
        println!("  Range:       {}", range);
    }
    if let Some(updated) = config.last_updated {
        println!("  Updated:     {}", updated.to_rfc3339().dimmed());
    }
}
