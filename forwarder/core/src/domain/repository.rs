// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Forwarding Config Repository
//!
//! Persistence contract for the forwarding declarations. The interface lives
//! in the domain layer and is implemented in
//! `crate::infrastructure::repositories`.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | `InMemoryForwardingConfigRepository` | process memory (tests) |
//! | `JsonFileForwardingConfigRepository` | JSON file + sidecar `flock` |
//!
//! Every mutating call is one atomic read-modify-write of the whole
//! collection. Hook invocations are separate processes, so the contract has
//! to hold across processes, not just threads.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::forwarding::{ForwardingConfig, ForwardingConfigs, ForwardingError};

pub trait ForwardingConfigRepository: Send + Sync {
    /// Find the declaration for one VM
    fn find(&self, vm_name: &str) -> Result<Option<ForwardingConfig>, RepositoryError>;

    /// Read the whole collection
    fn load_all(&self) -> Result<ForwardingConfigs, RepositoryError>;

    /// Insert or fully replace the declaration keyed by its VM name
    fn upsert(&self, config: ForwardingConfig) -> Result<(), RepositoryError>;

    /// Fold `update` into the stored declaration (or insert it) and return
    /// the stored result
    fn merge(&self, update: ForwardingConfig) -> Result<ForwardingConfig, RepositoryError>;

    /// Delete the declaration. Returns whether one existed.
    fn remove(&self, vm_name: &str) -> Result<bool, RepositoryError>;

    /// Overwrite the whole collection
    fn replace_all(&self, configs: ForwardingConfigs) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Store directory does not exist: {0}")]
    MissingParent(PathBuf),

    #[error("Failed to lock store {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store {path} is not valid JSON: {reason}")]
    Serialization { path: PathBuf, reason: String },

    #[error(transparent)]
    Forwarding(#[from] ForwardingError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
