// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Engine Settings
//!
//! Host-local settings of the forwarding engine, loaded from
//! `kvmfwd-config.yaml`. Distinct from the forwarding declarations
//! themselves, which live in the JSON store at `store_path`.
//!
//! ```yaml
//! store_path: /var/lib/kvmfwd/forwarding.json
//! log_dir: /var/log/kvmfwd
//! iptables_path: iptables
//! use_sudo: false
//! mode: apply
//! perimeter:
//!   rules_file: /etc/ufw/before.rules
//!   start_marker: "#KVM_GO_START"
//!   end_marker: "#KVM_GO_END"
//!   reload_command: ["ufw", "reload"]
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domain::command::DEFAULT_PROGRAM;
use crate::domain::perimeter::PerimeterBlock;

pub const CONFIG_PATH_ENV: &str = "KVMFWD_CONFIG_PATH";
pub const STORE_PATH_ENV: &str = "KVMFWD_STORE_PATH";
pub const LOG_DIR_ENV: &str = "KVMFWD_LOG_DIR";
pub const MODE_ENV: &str = "KVMFWD_MODE";

/// Whether hook batches reach the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Execute batches and write the audit file
    #[default]
    Apply,
    /// Only write the audit file
    Record,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apply" => Ok(Mode::Apply),
            "record" => Ok(Mode::Record),
            other => Err(format!("unknown mode '{}', expected apply or record", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Apply => f.write_str("apply"),
            Mode::Record => f.write_str("record"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerimeterSettings {
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,

    #[serde(flatten)]
    pub block: PerimeterBlock,

    /// Program and arguments run after the rule file changes. Empty disables it.
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
}

impl Default for PerimeterSettings {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
            block: PerimeterBlock::default(),
            reload_command: default_reload_command(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_iptables_path")]
    pub iptables_path: String,

    #[serde(default)]
    pub use_sudo: bool,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub perimeter: PerimeterSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            log_dir: default_log_dir(),
            iptables_path: default_iptables_path(),
            use_sudo: false,
            mode: Mode::default(),
            perimeter: PerimeterSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let settings = serde_yaml::from_str(yaml)?;
        Ok(settings)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover the settings file using precedence order
    /// 1. KVMFWD_CONFIG_PATH environment variable
    /// 2. ./kvmfwd-config.yaml (working directory)
    /// 3. ~/.kvmfwd/config.yaml (user home)
    /// 4. /etc/kvmfwd/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./kvmfwd-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".kvmfwd").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/kvmfwd/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load from an explicit path (which must exist), else from discovery,
    /// else built-in defaults. Environment overrides apply in every case.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::debug!(path = %path.display(), "Loading settings from explicit path");
            let mut settings = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load settings at {:?}: {}", path, e)
            })?;
            settings.apply_env_overrides();
            return Ok(settings);
        }

        let mut settings = match Self::discover_config() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading settings from discovered path");
                Self::from_yaml_file(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to load settings at {:?}: {}", path, e))?
            }
            None => {
                tracing::debug!("No settings file found in standard locations, using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(STORE_PATH_ENV).filter(|v| !v.is_empty()) {
            tracing::debug!("Environment override: {}={}", STORE_PATH_ENV, val);
            self.store_path = PathBuf::from(val);
        }

        if let Some(val) = lookup(LOG_DIR_ENV).filter(|v| !v.is_empty()) {
            tracing::debug!("Environment override: {}={}", LOG_DIR_ENV, val);
            self.log_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup(MODE_ENV) {
            match val.parse::<Mode>() {
                Ok(mode) => {
                    tracing::debug!("Environment override: {}={}", MODE_ENV, mode);
                    self.mode = mode;
                }
                Err(e) => {
                    tracing::warn!("Invalid value for {}: {}. Ignoring.", MODE_ENV, e);
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store_path.as_os_str().is_empty() {
            anyhow::bail!("store_path cannot be empty");
        }

        if self.log_dir.as_os_str().is_empty() {
            anyhow::bail!("log_dir cannot be empty");
        }

        if self.iptables_path.trim().is_empty() {
            anyhow::bail!("iptables_path cannot be empty");
        }

        if self.perimeter.rules_file.as_os_str().is_empty() {
            anyhow::bail!("perimeter.rules_file cannot be empty");
        }

        let block = &self.perimeter.block;
        if block.start_marker.trim().is_empty() || block.end_marker.trim().is_empty() {
            anyhow::bail!("perimeter markers cannot be empty");
        }

        if block.start_marker.trim() == block.end_marker.trim() {
            anyhow::bail!(
                "perimeter.start_marker and perimeter.end_marker must differ (both '{}')",
                block.start_marker
            );
        }

        if block.comment_marker.is_empty() {
            anyhow::bail!("perimeter.comment_marker cannot be empty");
        }

        Ok(())
    }

    /// Path of the durable hook diagnostics log.
    pub fn hook_log_path(&self) -> PathBuf {
        self.log_dir.join("kvmfwd-hook.log")
    }

    /// Path of the append-only hook event log.
    pub fn events_path(&self) -> PathBuf {
        self.log_dir.join("kvmfwd-events.log")
    }

    /// Path of the file holding the most recent batch.
    pub fn commands_path(&self) -> PathBuf {
        self.log_dir.join("kvmfwd-commands.log")
    }

    /// Program prefix as rendered into the audit file.
    pub fn program_line(&self) -> String {
        if self.use_sudo {
            format!("sudo {}", self.iptables_path)
        } else {
            self.iptables_path.clone()
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/kvmfwd/forwarding.json")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/kvmfwd")
}

fn default_iptables_path() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_rules_file() -> PathBuf {
    PathBuf::from("/etc/ufw/before.rules")
}

fn default_reload_command() -> Vec<String> {
    vec!["ufw".to_string(), "reload".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.mode, Mode::Apply);
        assert_eq!(settings.program_line(), "iptables");
        assert_eq!(settings.perimeter.block.start_marker, "#KVM_GO_START");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r##"
store_path: /tmp/fwd.json
mode: record
use_sudo: true
perimeter:
  end_marker: "#KVM_END"
"##;
        let settings = EngineSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.store_path, PathBuf::from("/tmp/fwd.json"));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/kvmfwd"));
        assert_eq!(settings.mode, Mode::Record);
        assert_eq!(settings.program_line(), "sudo iptables");
        assert_eq!(settings.perimeter.block.start_marker, "#KVM_GO_START");
        assert_eq!(settings.perimeter.block.end_marker, "#KVM_END");
        assert_eq!(settings.perimeter.reload_command, vec!["ufw", "reload"]);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut settings = EngineSettings::default();
        settings.mode = Mode::Record;
        settings.perimeter.reload_command.clear();

        let yaml = settings.to_yaml_string().unwrap();
        let parsed = EngineSettings::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (STORE_PATH_ENV, "/srv/fwd.json"),
            (LOG_DIR_ENV, ""),
            (MODE_ENV, "RECORD"),
        ]
        .into_iter()
        .collect();

        let mut settings = EngineSettings::default();
        settings.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.store_path, PathBuf::from("/srv/fwd.json"));
        assert_eq!(settings.log_dir, PathBuf::from("/var/log/kvmfwd"));
        assert_eq!(settings.mode, Mode::Record);
    }

    #[test]
    fn test_invalid_mode_override_is_ignored() {
        let mut settings = EngineSettings::default();
        settings.apply_overrides_from(|k| (k == MODE_ENV).then(|| "dry".to_string()));
        assert_eq!(settings.mode, Mode::Apply);
    }

    #[test]
    fn test_validation() {
        let mut settings = EngineSettings::default();
        settings.iptables_path = " ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.perimeter.block.end_marker = settings.perimeter.block.start_marker.clone();
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.store_path = PathBuf::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_log_paths() {
        let mut settings = EngineSettings::default();
        settings.log_dir = PathBuf::from("/tmp/logs");
        assert_eq!(settings.hook_log_path(), PathBuf::from("/tmp/logs/kvmfwd-hook.log"));
        assert_eq!(settings.events_path(), PathBuf::from("/tmp/logs/kvmfwd-events.log"));
        assert_eq!(settings.commands_path(), PathBuf::from("/tmp/logs/kvmfwd-commands.log"));
    }
}
