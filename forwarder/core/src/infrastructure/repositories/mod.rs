// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of [`ForwardingConfigRepository`].
//!
//! # Available Implementations
//!
//! - **JsonFileForwardingConfigRepository** - the durable store shared by
//!   every hook invocation on the host
//! - **InMemoryForwardingConfigRepository** - `RwLock`-guarded collection
//!   for tests
//!
//! Both apply the same collection rules (chain collision check, merge
//! semantics, timestamps) through [`ForwardingConfigs`].

pub mod json_file;

pub use json_file::JsonFileForwardingConfigRepository;

use chrono::Utc;
use std::sync::{Arc, RwLock};

use crate::domain::forwarding::{ForwardingConfig, ForwardingConfigs};
use crate::domain::repository::{ForwardingConfigRepository, RepositoryError};

#[derive(Clone, Default)]
pub struct InMemoryForwardingConfigRepository {
    configs: Arc<RwLock<ForwardingConfigs>>,
}

impl InMemoryForwardingConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Unavailable("in-memory store lock poisoned".to_string())
}

impl ForwardingConfigRepository for InMemoryForwardingConfigRepository {
    fn find(&self, vm_name: &str) -> Result<Option<ForwardingConfig>, RepositoryError> {
        let configs = self.configs.read().map_err(poisoned)?;
        Ok(configs.find(vm_name).cloned())
    }

    fn load_all(&self) -> Result<ForwardingConfigs, RepositoryError> {
        let configs = self.configs.read().map_err(poisoned)?;
        Ok(configs.clone())
    }

    fn upsert(&self, config: ForwardingConfig) -> Result<(), RepositoryError> {
        let mut configs = self.configs.write().map_err(poisoned)?;
        configs.upsert(config, Utc::now())?;
        Ok(())
    }

    fn merge(&self, update: ForwardingConfig) -> Result<ForwardingConfig, RepositoryError> {
        let mut configs = self.configs.write().map_err(poisoned)?;
        Ok(configs.merge(update, Utc::now())?)
    }

    fn remove(&self, vm_name: &str) -> Result<bool, RepositoryError> {
        let mut configs = self.configs.write().map_err(poisoned)?;
        Ok(configs.remove(vm_name, Utc::now()))
    }

    fn replace_all(&self, replacement: ForwardingConfigs) -> Result<(), RepositoryError> {
        let mut configs = self.configs.write().map_err(poisoned)?;
        *configs = replacement;
        Ok(())
    }
}
