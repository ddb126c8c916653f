// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod process_runner;
pub mod audit;
mod file_lock;
pub mod perimeter_file;
pub mod sysctl;

pub use audit::FileHookAudit;
pub use perimeter_file::FileRuleFile;
pub use process_runner::ProcessCommandRunner;
pub use repositories::{InMemoryForwardingConfigRepository, JsonFileForwardingConfigRepository};
