// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod rule_compiler;
pub mod dispatcher;
pub mod batch_executor;
pub mod hook_service;
pub mod perimeter_service;

// Re-export services for convenience
pub use batch_executor::{BatchExecutor, CommandFailure, ExecutionReport};
pub use dispatcher::{Dispatch, DispatchError, ForwardingEventDispatcher};
pub use hook_service::{HookError, HookOutcome, HookService};
pub use perimeter_service::{PerimeterService, PerimeterStatus};
pub use rule_compiler::CompileError;
