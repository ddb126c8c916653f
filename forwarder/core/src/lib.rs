// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # kvmfwd core
//!
//! Forwarding rule engine for exposing libvirt/QEMU guest ports on the host.
//!
//! # Architecture
//!
//! - **domain**: forwarding declarations, chain identity, filter commands,
//!   hook actions, perimeter block editing, engine settings
//! - **application**: rule compilation, event dispatch, batch execution and
//!   the hook use case
//! - **infrastructure**: JSON config store, process runner, audit files,
//!   perimeter rule file, bridge sysctl

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
