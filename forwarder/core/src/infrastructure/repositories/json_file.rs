// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! JSON File Store
//!
//! The forwarding declarations of a host live in one JSON document:
//!
//! ```json
//! {
//!   "configs": [
//!     {
//!       "vm_name": "spark",
//!       "port_map": [{ "host_port": 1100, "vm_port": 3000, "protocol": "tcp" }],
//!       "port_range": [],
//!       "host_ip": "192.168.1.194",
//!       "private_ip": "192.168.122.101",
//!       "last_updated": "2024-03-09T14:05:00Z"
//!     }
//!   ],
//!   "last_updated": "2024-03-09T14:05:00Z"
//! }
//! ```
//!
//! Every hook invocation is a separate process, so access is serialized with
//! an advisory `flock` on a sidecar `<store>.lock` file: exclusive for the
//! whole read-modify-write, shared for reads. The store itself is replaced
//! by renaming a fully written temp file from the same directory over it,
//! so a reader never observes a partial document.
//!
//! Until the store directory exists nothing can have been stored, so reads
//! see an empty collection without creating the lock file. Writes still
//! require the directory.

use chrono::Utc;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::domain::forwarding::{ForwardingConfig, ForwardingConfigs};
use crate::domain::repository::{ForwardingConfigRepository, RepositoryError};
use crate::infrastructure::file_lock::{sidecar_path, FileLock, LockMode};

#[derive(Debug, Clone)]
pub struct JsonFileForwardingConfigRepository {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileForwardingConfigRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = sidecar_path(&path);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn lock(&self, mode: LockMode) -> Result<FileLock, RepositoryError> {
        let parent = self.parent_dir();
        if !parent.is_dir() {
            return Err(RepositoryError::MissingParent(parent));
        }

        FileLock::acquire(&self.lock_path, mode).map_err(|source| RepositoryError::Lock {
            path: self.lock_path.clone(),
            source,
        })
    }

    /// Read the document. Caller must hold the lock.
    fn read_locked(&self) -> Result<ForwardingConfigs, RepositoryError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Store file absent, starting empty");
                return Ok(ForwardingConfigs::default());
            }
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(ForwardingConfigs::default());
        }

        serde_json::from_str(&content).map_err(|e| RepositoryError::Serialization {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Replace the document. Caller must hold the exclusive lock.
    fn write_locked(&self, configs: &ForwardingConfigs) -> Result<(), RepositoryError> {
        let io_err = |source| RepositoryError::Io {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(configs).map_err(|e| RepositoryError::Serialization {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let mut tmp = NamedTempFile::new_in(self.parent_dir()).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Atomic read-modify-write under the exclusive lock. Nothing is written
    /// when `f` fails.
    fn modify<T, F>(&self, f: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&mut ForwardingConfigs) -> Result<T, RepositoryError>,
    {
        let _lock = self.lock(LockMode::Exclusive)?;
        let mut configs = self.read_locked()?;
        let result = f(&mut configs)?;
        self.write_locked(&configs)?;
        Ok(result)
    }
}

impl ForwardingConfigRepository for JsonFileForwardingConfigRepository {
    fn find(&self, vm_name: &str) -> Result<Option<ForwardingConfig>, RepositoryError> {
        Ok(self.load_all()?.configs.into_iter().find(|c| c.vm_name == vm_name))
    }

    fn load_all(&self) -> Result<ForwardingConfigs, RepositoryError> {
        if !self.parent_dir().is_dir() {
            tracing::debug!(path = %self.path.display(), "Store directory absent, nothing stored");
            return Ok(ForwardingConfigs::default());
        }
        let _lock = self.lock(LockMode::Shared)?;
        self.read_locked()
    }

    fn upsert(&self, config: ForwardingConfig) -> Result<(), RepositoryError> {
        let vm_name = config.vm_name.clone();
        self.modify(|configs| Ok(configs.upsert(config, Utc::now())?))?;
        tracing::info!(vm = %vm_name, path = %self.path.display(), "Stored forwarding declaration");
        Ok(())
    }

    fn merge(&self, update: ForwardingConfig) -> Result<ForwardingConfig, RepositoryError> {
        let merged = self.modify(|configs| Ok(configs.merge(update, Utc::now())?))?;
        tracing::info!(vm = %merged.vm_name, path = %self.path.display(), "Merged forwarding declaration");
        Ok(merged)
    }

    fn remove(&self, vm_name: &str) -> Result<bool, RepositoryError> {
        let removed = self.modify(|configs| Ok(configs.remove(vm_name, Utc::now())))?;
        if removed {
            tracing::info!(vm = %vm_name, path = %self.path.display(), "Removed forwarding declaration");
        }
        Ok(removed)
    }

    fn replace_all(&self, replacement: ForwardingConfigs) -> Result<(), RepositoryError> {
        self.modify(|configs| {
            *configs = replacement;
            Ok(())
        })
    }
}
