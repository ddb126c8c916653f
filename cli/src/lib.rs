// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! kvmfwd CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Wires engine settings to the core services and renders
//!   their results for operators

pub mod commands;
pub mod engine;
pub mod logging;
