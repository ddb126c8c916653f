// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Perimeter rule file on disk (ufw `before.rules`).
//!
//! Writes go through a temp file in the same directory which takes over the
//! original's permissions before it is renamed into place. Edits hold an
//! exclusive `flock` on `<file>.lock` so concurrent operator commands never
//! drop each other's rules.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;

use crate::domain::perimeter::{rewrite, PerimeterError, RuleFile};
use crate::domain::settings::PerimeterSettings;
use crate::infrastructure::file_lock::{sidecar_path, FileLock, LockMode};

#[derive(Debug, Clone)]
pub struct FileRuleFile {
    path: PathBuf,
    reload_command: Vec<String>,
}

impl FileRuleFile {
    pub fn new(path: impl Into<PathBuf>, reload_command: Vec<String>) -> Self {
        Self {
            path: path.into(),
            reload_command,
        }
    }

    pub fn from_settings(settings: &PerimeterSettings) -> Self {
        Self::new(settings.rules_file.clone(), settings.reload_command.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, e: impl ToString) -> PerimeterError {
        PerimeterError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

impl RuleFile for FileRuleFile {
    fn read(&self) -> Result<String, PerimeterError> {
        fs::read_to_string(&self.path).map_err(|e| self.io_err(e))
    }

    fn write(&self, text: &str) -> Result<(), PerimeterError> {
        let permissions = fs::metadata(&self.path).map_err(|e| self.io_err(e))?.permissions();
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| self.io_err(e))?;
        tmp.write_all(text.as_bytes()).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        fs::set_permissions(tmp.path(), permissions).map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        tracing::debug!(path = %self.path.display(), "Rewrote perimeter rule file");
        Ok(())
    }

    fn edit(&self, transform: &dyn Fn(&str) -> Result<String, PerimeterError>) -> Result<bool, PerimeterError> {
        let lock_path = sidecar_path(&self.path);
        let _lock = FileLock::acquire(&lock_path, LockMode::Exclusive).map_err(|e| PerimeterError::Io {
            path: lock_path.display().to_string(),
            reason: e.to_string(),
        })?;
        rewrite(self, transform)
    }

    fn reload(&self) -> Result<(), PerimeterError> {
        let Some((program, args)) = self.reload_command.split_first() else {
            return Ok(());
        };
        let rendered = self.reload_command.join(" ");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| PerimeterError::Reload {
                command: rendered.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(PerimeterError::Reload {
                command: rendered,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(command = %rendered, "Perimeter firewall reloaded");
        Ok(())
    }
}
