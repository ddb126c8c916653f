// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Forwarding Event Dispatcher
//!
//! Maps a lifecycle action for one VM to a finished command batch:
//!
//! | Action | Batch |
//! |--------|-------|
//! | `start` | start |
//! | `stopped` | stop |
//! | `reconnect` | stop, then start |
//! | anything else | empty |
//!
//! Actions that do not drive rules are answered before the store is read,
//! so they never depend on the store being readable. A VM without a stored
//! declaration yields no batch.

use std::sync::Arc;
use thiserror::Error;

use crate::application::rule_compiler::{
    compile_reconnect_for, compile_start_for, compile_stop_for, CompileError,
};
use crate::domain::command::CommandBatch;
use crate::domain::forwarding::ForwardingConfig;
use crate::domain::hook::HookAction;
use crate::domain::repository::{ForwardingConfigRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to read forwarding declaration: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// What a lifecycle event resolved to.
#[derive(Debug)]
pub enum Dispatch {
    /// The action does not drive rules
    Ignored,
    /// No declaration is stored for the VM
    NoConfiguration,
    Batch(CommandBatch),
}

impl Dispatch {
    /// The compiled commands; empty unless a batch was produced.
    pub fn into_batch(self) -> CommandBatch {
        match self {
            Dispatch::Batch(batch) => batch,
            Dispatch::Ignored | Dispatch::NoConfiguration => CommandBatch::new(),
        }
    }
}

/// Batch for `action` against an already loaded declaration.
pub fn compile(config: &ForwardingConfig, action: &HookAction) -> Result<CommandBatch, CompileError> {
    match action {
        HookAction::Start => compile_start_for(config),
        HookAction::Stopped => compile_stop_for(config),
        HookAction::Reconnect => compile_reconnect_for(config),
        _ => Ok(CommandBatch::new()),
    }
}

pub struct ForwardingEventDispatcher {
    repository: Arc<dyn ForwardingConfigRepository>,
}

impl ForwardingEventDispatcher {
    pub fn new(repository: Arc<dyn ForwardingConfigRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn ForwardingConfigRepository> {
        &self.repository
    }

    pub fn dispatch(&self, vm_name: &str, action: &HookAction) -> Result<Dispatch, DispatchError> {
        if !action.drives_rules() {
            tracing::debug!(vm = vm_name, action = %action, "Action does not drive rules");
            return Ok(Dispatch::Ignored);
        }

        let Some(config) = self.repository.find(vm_name)? else {
            tracing::info!(vm = vm_name, "No forwarding configuration for domain");
            return Ok(Dispatch::NoConfiguration);
        };

        let batch = compile(&config, action)?;
        tracing::debug!(vm = vm_name, action = %action, commands = batch.len(), "Compiled batch");
        Ok(Dispatch::Batch(batch))
    }
}
