// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Batch Executor
//!
//! Runs a compiled batch strictly in order, one command at a time, with no
//! retries and no rollback. Failure handling follows the command's stage:
//!
//! - `Create` / `Link`: the rest of the batch is skipped.
//! - `Populate`: the rest of that block is skipped, other blocks and the
//!   link phase still run.
//! - `Unlink` / `Destroy`: logged, teardown continues.
//!
//! The report lists what reached the kernel so an operator can compensate.

use crate::domain::command::{CommandBatch, CommandRunner, FilterCommand, RunnerError, Stage};

#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: FilterCommand,
    pub error: RunnerError,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub applied: Vec<FilterCommand>,
    pub failures: Vec<CommandFailure>,
    pub skipped: Vec<FilterCommand>,
    /// A critical command failed and the remainder was not attempted
    pub aborted: bool,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

pub struct BatchExecutor<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    pub fn execute(&self, batch: &CommandBatch) -> ExecutionReport {
        let program = self.runner.program();
        let mut report = ExecutionReport::default();
        let mut failed_block: Option<usize> = None;

        for command in batch {
            if report.aborted {
                report.skipped.push(command.clone());
                continue;
            }

            if let Stage::Populate { block } = command.stage {
                if failed_block == Some(block) {
                    report.skipped.push(command.clone());
                    continue;
                }
            }

            match self.runner.run(command) {
                Ok(()) => {
                    tracing::debug!(command = %command.render(&program), "Applied");
                    report.applied.push(command.clone());
                }
                Err(error) => {
                    tracing::error!(
                        command = %command.render(&program),
                        error = %error,
                        "Packet-filter command failed"
                    );
                    match command.stage {
                        stage if stage.is_critical() => report.aborted = true,
                        Stage::Populate { block } => failed_block = Some(block),
                        _ => {}
                    }
                    report.failures.push(CommandFailure {
                        command: command.clone(),
                        error,
                    });
                }
            }
        }

        if report.aborted {
            tracing::error!(
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                "Batch aborted, applied commands were not rolled back"
            );
        }

        report
    }
}
