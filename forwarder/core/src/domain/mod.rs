// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Types and rules of the forwarding engine. Apart from settings discovery,
//! nothing in here touches the filesystem or spawns processes.

pub mod forwarding;
pub mod chain;
pub mod command;
pub mod hook;
pub mod perimeter;
pub mod repository;
pub mod settings;
