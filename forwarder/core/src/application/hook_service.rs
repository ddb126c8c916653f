// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hook Service
//!
//! Handles one hypervisor lifecycle event end to end:
//!
//! 1. Append the event to the hook event log.
//! 2. Resolve the event through [`ForwardingEventDispatcher`]; stop quietly
//!    for ignored actions and VMs without a declaration.
//! 3. Write the batch to the commands file, then execute it unless the
//!    engine runs in record mode.
//!
//! Audit write failures are logged and never keep a batch from running.
//! The hypervisor control plane is never called back from here; the hook
//! runs while libvirt holds its own locks.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::application::batch_executor::{BatchExecutor, ExecutionReport};
use crate::application::dispatcher::{Dispatch, DispatchError, ForwardingEventDispatcher};
use crate::domain::command::{CommandBatch, CommandRunner};
use crate::domain::hook::{HookAction, HookAudit};
use crate::domain::repository::ForwardingConfigRepository;
use crate::domain::settings::Mode;

#[derive(Debug)]
pub enum HookOutcome {
    /// No declaration is stored for the VM
    NoConfiguration,
    /// The action does not drive rules
    Ignored,
    /// Batch written to the commands file only
    Recorded(CommandBatch),
    /// Batch written and executed
    Applied(ExecutionReport),
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub struct HookService {
    dispatcher: ForwardingEventDispatcher,
    runner: Arc<dyn CommandRunner>,
    audit: Arc<dyn HookAudit>,
    mode: Mode,
}

impl HookService {
    pub fn new(
        repository: Arc<dyn ForwardingConfigRepository>,
        runner: Arc<dyn CommandRunner>,
        audit: Arc<dyn HookAudit>,
        mode: Mode,
    ) -> Self {
        Self {
            dispatcher: ForwardingEventDispatcher::new(repository),
            runner,
            audit,
            mode,
        }
    }

    pub fn handle(&self, vm_name: &str, action: &HookAction) -> Result<HookOutcome, HookError> {
        tracing::info!(vm = vm_name, action = %action, "Hook event received");
        if let Err(e) = self.audit.record_event(vm_name, action, Utc::now()) {
            tracing::warn!(error = %e, "Failed to append hook event log");
        }

        let batch = match self.dispatcher.dispatch(vm_name, action)? {
            Dispatch::Ignored => return Ok(HookOutcome::Ignored),
            Dispatch::NoConfiguration => return Ok(HookOutcome::NoConfiguration),
            Dispatch::Batch(batch) if batch.is_empty() => return Ok(HookOutcome::Ignored),
            Dispatch::Batch(batch) => batch,
        };

        if let Err(e) = self
            .audit
            .record_commands(&batch.render_lines(&self.runner.program()))
        {
            tracing::warn!(vm = vm_name, error = %e, "Failed to write commands file");
        }

        match self.mode {
            Mode::Record => {
                tracing::info!(vm = vm_name, commands = batch.len(), "Batch recorded, not applied");
                Ok(HookOutcome::Recorded(batch))
            }
            Mode::Apply => {
                let report = BatchExecutor::new(self.runner.as_ref()).execute(&batch);
                tracing::info!(
                    vm = vm_name,
                    applied = report.applied.len(),
                    failed = report.failures.len(),
                    skipped = report.skipped.len(),
                    "Batch executed"
                );
                Ok(HookOutcome::Applied(report))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::{FilterCommand, RunnerError};
    use crate::domain::hook::AuditError;
    use crate::domain::forwarding::{ForwardingConfig, PortMapping, Protocol};
    use crate::infrastructure::repositories::InMemoryForwardingConfigRepository;
    use chrono::{DateTime, Utc};
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        seen: Mutex<Vec<String>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, command: &FilterCommand) -> Result<(), RunnerError> {
            self.seen.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryAudit {
        events: Mutex<Vec<String>>,
        commands: Mutex<Vec<String>>,
        read_only: bool,
    }

    impl HookAudit for MemoryAudit {
        fn record_event(&self, vm_name: &str, action: &HookAction, at: DateTime<Utc>) -> Result<(), AuditError> {
            self.events
                .lock()
                .unwrap()
                .push(crate::domain::hook::event_line(vm_name, action, at));
            Ok(())
        }

        fn record_commands(&self, lines: &[String]) -> Result<(), AuditError> {
            if self.read_only {
                return Err(AuditError::Write {
                    path: "kvmfwd-commands.log".into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            *self.commands.lock().unwrap() = lines.to_vec();
            Ok(())
        }
    }

    fn service(mode: Mode) -> (HookService, Arc<RecordingRunner>, Arc<MemoryAudit>) {
        service_with_audit(mode, MemoryAudit::default())
    }

    fn service_with_audit(mode: Mode, audit: MemoryAudit) -> (HookService, Arc<RecordingRunner>, Arc<MemoryAudit>) {
        let repo = InMemoryForwardingConfigRepository::new();
        repo.upsert(
            ForwardingConfig::new("spark")
                .with_addresses(Ipv4Addr::new(192, 168, 1, 194), Ipv4Addr::new(192, 168, 122, 101))
                .with_port(PortMapping::new(Protocol::Tcp, 1100, 3000)),
        )
        .unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let audit = Arc::new(audit);
        let service = HookService::new(Arc::new(repo), runner.clone(), audit.clone(), mode);
        (service, runner, audit)
    }

    #[test]
    fn test_missing_config_runs_nothing() {
        let (service, runner, audit) = service(Mode::Apply);
        let outcome = service.handle("hadoop", &HookAction::Start).unwrap();

        assert!(matches!(outcome, HookOutcome::NoConfiguration));
        assert!(runner.seen.lock().unwrap().is_empty());
        assert!(audit.commands.lock().unwrap().is_empty());
        assert_eq!(audit.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_start_applies_and_records() {
        let (service, runner, audit) = service(Mode::Apply);
        let outcome = service.handle("spark", &HookAction::Start).unwrap();

        let HookOutcome::Applied(report) = outcome else {
            panic!("expected applied outcome");
        };
        assert!(report.is_success());
        assert_eq!(runner.seen.lock().unwrap().len(), 11);
        assert_eq!(*audit.commands.lock().unwrap(), *runner.seen.lock().unwrap());
        assert!(audit.events.lock().unwrap()[0].ends_with("Domain: spark, Action: start"));
    }

    #[test]
    fn test_record_mode_never_executes() {
        let (service, runner, audit) = service(Mode::Record);
        let outcome = service.handle("spark", &HookAction::Stopped).unwrap();

        assert!(matches!(outcome, HookOutcome::Recorded(ref b) if b.len() == 10));
        assert!(runner.seen.lock().unwrap().is_empty());
        assert_eq!(audit.commands.lock().unwrap().len(), 10);
    }

    #[test]
    fn test_ignored_action() {
        let (service, runner, _audit) = service(Mode::Apply);
        let outcome = service.handle("spark", &HookAction::Prepare).unwrap();
        assert!(matches!(outcome, HookOutcome::Ignored));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_commands_file_failure_still_applies() {
        let audit = MemoryAudit {
            read_only: true,
            ..Default::default()
        };
        let (service, runner, _audit) = service_with_audit(Mode::Apply, audit);
        let outcome = service.handle("spark", &HookAction::Start).unwrap();

        assert!(matches!(outcome, HookOutcome::Applied(ref r) if r.is_success()));
        assert_eq!(runner.seen.lock().unwrap().len(), 11);
    }
}
