// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Builds core services from engine settings.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use kvmfwd_core::application::{HookService, PerimeterService};
use kvmfwd_core::infrastructure::{
    FileHookAudit, FileRuleFile, JsonFileForwardingConfigRepository, ProcessCommandRunner,
};
use kvmfwd_core::repository::ForwardingConfigRepository;
use kvmfwd_core::settings::EngineSettings;

/// Load, override and validate settings.
pub fn load_settings(config_override: Option<PathBuf>) -> Result<EngineSettings> {
    let settings = EngineSettings::load_or_default(config_override)
        .context("Failed to load engine settings")?;
    settings.validate().context("Engine settings are invalid")?;
    Ok(settings)
}

pub fn repository(settings: &EngineSettings) -> Arc<dyn ForwardingConfigRepository> {
    Arc::new(JsonFileForwardingConfigRepository::new(&settings.store_path))
}

pub fn runner(settings: &EngineSettings) -> Arc<ProcessCommandRunner> {
    Arc::new(ProcessCommandRunner::new(&settings.iptables_path, settings.use_sudo))
}

pub fn hook_service(settings: &EngineSettings) -> HookService {
    HookService::new(
        repository(settings),
        runner(settings),
        Arc::new(FileHookAudit::from_settings(settings)),
        settings.mode,
    )
}

pub fn perimeter_service(settings: &EngineSettings) -> PerimeterService {
    PerimeterService::new(
        settings.perimeter.block.clone(),
        Arc::new(FileRuleFile::from_settings(&settings.perimeter)),
    )
}
