// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hypervisor lifecycle actions, as passed to the libvirt `qemu` hook.
//!
//! See <https://www.libvirt.org/hooks.html>. Unknown vocabulary is kept
//! verbatim and treated as a no-op.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookAction {
    Start,
    Stopped,
    Reconnect,
    Started,
    Prepare,
    Restore,
    Release,
    Migrate,
    Other(String),
}

impl HookAction {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "start" => HookAction::Start,
            "stopped" => HookAction::Stopped,
            "reconnect" => HookAction::Reconnect,
            "started" => HookAction::Started,
            "prepare" => HookAction::Prepare,
            "restore" => HookAction::Restore,
            "release" => HookAction::Release,
            "migrate" => HookAction::Migrate,
            other => HookAction::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HookAction::Start => "start",
            HookAction::Stopped => "stopped",
            HookAction::Reconnect => "reconnect",
            HookAction::Started => "started",
            HookAction::Prepare => "prepare",
            HookAction::Restore => "restore",
            HookAction::Release => "release",
            HookAction::Migrate => "migrate",
            HookAction::Other(raw) => raw,
        }
    }

    /// Only these actions produce packet-filter commands.
    pub fn drives_rules(&self) -> bool {
        matches!(self, HookAction::Start | HookAction::Stopped | HookAction::Reconnect)
    }
}

impl From<&str> for HookAction {
    fn from(raw: &str) -> Self {
        HookAction::parse(raw)
    }
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the durable hook event log.
pub fn event_line(vm_name: &str, action: &HookAction, at: DateTime<Utc>) -> String {
    format!(
        "LIBVIRT_HOOK: {} Event received - Domain: {}, Action: {}",
        at.to_rfc3339_opts(SecondsFormat::Secs, true),
        vm_name,
        action
    )
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where hook invocations leave their trace.
pub trait HookAudit: Send + Sync {
    /// Append one event to the hook event log.
    fn record_event(&self, vm_name: &str, action: &HookAction, at: DateTime<Utc>) -> Result<(), AuditError>;

    /// Replace the commands file with the latest batch, one line each.
    fn record_commands(&self, lines: &[String]) -> Result<(), AuditError>;
}
