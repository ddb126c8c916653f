// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File-backed hook audit: an append-only event log and a commands file
//! that always holds the latest batch.

use chrono::{DateTime, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::domain::hook::{event_line, AuditError, HookAction, HookAudit};
use crate::domain::settings::EngineSettings;

#[derive(Debug, Clone)]
pub struct FileHookAudit {
    event_log: PathBuf,
    commands_file: PathBuf,
}

impl FileHookAudit {
    pub fn new(event_log: impl Into<PathBuf>, commands_file: impl Into<PathBuf>) -> Self {
        Self {
            event_log: event_log.into(),
            commands_file: commands_file.into(),
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.events_path(), settings.commands_path())
    }

    pub fn commands_file(&self) -> &Path {
        &self.commands_file
    }
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> AuditError + '_ {
    move |source| AuditError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_parent(path: &Path) -> Result<(), AuditError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(write_err(path))
        }
        _ => Ok(()),
    }
}

impl HookAudit for FileHookAudit {
    fn record_event(&self, vm_name: &str, action: &HookAction, at: DateTime<Utc>) -> Result<(), AuditError> {
        ensure_parent(&self.event_log)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.event_log)
            .map_err(write_err(&self.event_log))?;
        writeln!(file, "{}", event_line(vm_name, action, at)).map_err(write_err(&self.event_log))
    }

    fn record_commands(&self, lines: &[String]) -> Result<(), AuditError> {
        ensure_parent(&self.commands_file)?;
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&self.commands_file, content).map_err(write_err(&self.commands_file))
    }
}
