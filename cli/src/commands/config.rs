// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Engine settings commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use kvmfwd_core::settings::{EngineSettings, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show effective settings
    Show {
        /// Show settings file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate a settings file
    Validate {
        /// Path to settings file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a sample settings file
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./kvmfwd-config.yaml")]
        output: PathBuf,
    },
}

pub fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Settings discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./kvmfwd-config.yaml");
        println!("  4. ~/.kvmfwd/config.yaml");
        println!("  5. /etc/kvmfwd/config.yaml");
        if config_override.is_none() {
            match EngineSettings::discover_config() {
                Some(found) => println!("  Using: {}", found.display().to_string().green()),
                None => println!("  Using: {}", "built-in defaults".yellow()),
            }
        }
        println!();
    }

    let settings = EngineSettings::load_or_default(config_override)
        .context("Failed to load engine settings")?;

    println!("{}", "Current settings:".bold());
    println!();
    println!("  Store:        {}", settings.store_path.display());
    println!("  Log dir:      {}", settings.log_dir.display());
    println!("  Filter:       {}", settings.program_line());
    println!("  Mode:         {}", settings.mode);
    println!();
    println!("{}", "Perimeter:".bold());
    println!("  Rule file:    {}", settings.perimeter.rules_file.display());
    println!(
        "  Markers:      {} ... {}",
        settings.perimeter.block.start_marker, settings.perimeter.block.end_marker
    );
    if settings.perimeter.reload_command.is_empty() {
        println!("  Reload:       {}", "(disabled)".dimmed());
    } else {
        println!("  Reload:       {}", settings.perimeter.reload_command.join(" "));
    }

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating settings...");

    let settings = EngineSettings::load_or_default(config_path)
        .context("Failed to load engine settings")?;

    settings
        .validate()
        .context("Settings validation failed")?;

    println!("{}", "✓ Settings are valid".green());

    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    let sample = include_str!("../../templates/kvmfwd-config.yaml");

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write settings to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Settings generated: {}", output.display()).green()
    );

    Ok(())
}
