// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Packet-Filter Commands
//!
//! Structured form of a single `iptables` invocation. Commands are compiled
//! as data, rendered as one shell-invocable line for the audit file, and
//! executed as an argv vector so nothing passes through a shell.
//!
//! Each command carries the [`Stage`] it was compiled for; the batch
//! executor uses it to decide whether a failure aborts the rest of the batch.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default packet-filter binary
pub const DEFAULT_PROGRAM: &str = "iptables";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Nat,
    Filter,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Nat => "nat",
            Table::Filter => "filter",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain operation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainOp {
    /// `-N`
    NewChain,
    /// `-A`
    Append,
    /// `-I`
    Insert,
    /// `-D`
    Delete,
    /// `-F`
    Flush,
    /// `-X`
    DeleteChain,
}

impl ChainOp {
    pub fn flag(&self) -> &'static str {
        match self {
            ChainOp::NewChain => "-N",
            ChainOp::Append => "-A",
            ChainOp::Insert => "-I",
            ChainOp::Delete => "-D",
            ChainOp::Flush => "-F",
            ChainOp::DeleteChain => "-X",
        }
    }
}

/// Phase of a batch a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Create,
    /// Rules for one port mapping or range; `block` is its position in the batch
    Populate { block: usize },
    Link,
    Unlink,
    Destroy,
}

impl Stage {
    /// Whether a failure at this stage makes the rest of the batch pointless.
    pub fn is_critical(&self) -> bool {
        matches!(self, Stage::Create | Stage::Link)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterCommand {
    pub table: Table,
    pub op: ChainOp,
    /// Custom chain name or built-in chain (`PREROUTING`, `FORWARD`, ...)
    pub chain: String,
    /// Match and target arguments following the chain
    pub args: Vec<String>,
    pub stage: Stage,
}

impl FilterCommand {
    pub fn new(table: Table, op: ChainOp, chain: impl Into<String>, stage: Stage) -> Self {
        Self {
            table,
            op,
            chain: chain.into(),
            args: Vec::new(),
            stage,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Arguments after the program name.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(4 + self.args.len());
        argv.push("-t".to_string());
        argv.push(self.table.as_str().to_string());
        argv.push(self.op.flag().to_string());
        argv.push(self.chain.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Render as a single shell line, e.g. `iptables -t nat -N DNAT-spark`.
    pub fn render(&self, program: &str) -> String {
        let mut line = String::from(program);
        for arg in self.argv() {
            line.push(' ');
            line.push_str(&arg);
        }
        line
    }

    /// Target of a `-j` argument, if present.
    pub fn jump_target(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == "-j")
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for FilterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(DEFAULT_PROGRAM))
    }
}

/// Ordered list of commands produced for one lifecycle event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch {
    pub commands: Vec<FilterCommand>,
}

impl CommandBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: FilterCommand) {
        self.commands.push(command);
    }

    pub fn append(&mut self, other: CommandBatch) {
        self.commands.extend(other.commands);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilterCommand> {
        self.commands.iter()
    }

    /// One rendered line per command.
    pub fn render_lines(&self, program: &str) -> Vec<String> {
        self.commands.iter().map(|c| c.render(program)).collect()
    }
}

impl<'a> IntoIterator for &'a CommandBatch {
    type Item = &'a FilterCommand;
    type IntoIter = std::slice::Iter<'a, FilterCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

/// Failure of a single packet-filter invocation.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    #[error("Failed to spawn '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Command exited with status {status:?}: {stderr}")]
    NonZeroExit { status: Option<i32>, stderr: String },
}

/// Executes one filter command against the kernel.
///
/// Implementations block until the command finishes.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &FilterCommand) -> Result<(), RunnerError>;

    /// Program line prefix used when rendering commands for the audit file.
    fn program(&self) -> String {
        DEFAULT_PROGRAM.to_string()
    }
}
