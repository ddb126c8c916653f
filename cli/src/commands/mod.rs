// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the kvmfwd CLI

pub mod bridge;
pub mod compile;
pub mod config;
pub mod forward;
pub mod hook;
pub mod perimeter;

pub use self::bridge::BridgeFilterCommand;
pub use self::config::ConfigCommand;
pub use self::forward::ForwardCommand;
pub use self::perimeter::PerimeterCommand;
