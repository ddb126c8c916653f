// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Runs filter commands as child processes, one at a time, argv only.

use std::process::{Command, Stdio};

use crate::domain::command::{CommandRunner, FilterCommand, RunnerError, DEFAULT_PROGRAM};

#[derive(Debug, Clone)]
pub struct ProcessCommandRunner {
    program: String,
    use_sudo: bool,
}

impl Default for ProcessCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, false)
    }
}

impl ProcessCommandRunner {
    pub fn new(program: impl Into<String>, use_sudo: bool) -> Self {
        Self {
            program: program.into(),
            use_sudo,
        }
    }

    fn command_for(&self, filter: &FilterCommand) -> Command {
        let mut cmd = if self.use_sudo {
            let mut sudo = Command::new("sudo");
            sudo.arg("-n").arg(&self.program);
            sudo
        } else {
            Command::new(&self.program)
        };
        cmd.args(filter.argv())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, command: &FilterCommand) -> Result<(), RunnerError> {
        let output = self
            .command_for(command)
            .output()
            .map_err(|e| RunnerError::SpawnFailed {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(RunnerError::NonZeroExit {
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn program(&self) -> String {
        if self.use_sudo {
            format!("sudo {}", self.program)
        } else {
            self.program.clone()
        }
    }
}
