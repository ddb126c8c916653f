// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end hook lifecycle against the on-disk store and audit files.
//!
//! The packet filter is replaced by a recording runner; nothing here touches
//! the kernel.

use kvmfwd_core::application::{HookOutcome, HookService};
use kvmfwd_core::command::{CommandRunner, FilterCommand, RunnerError, Stage};
use kvmfwd_core::forwarding::{ForwardingConfig, PortMapping, PortRange, Protocol};
use kvmfwd_core::hook::HookAction;
use kvmfwd_core::infrastructure::{FileHookAudit, JsonFileForwardingConfigRepository};
use kvmfwd_core::repository::ForwardingConfigRepository;
use kvmfwd_core::settings::{EngineSettings, Mode};
use std::fs;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct RecordingRunner {
    lines: Mutex<Vec<String>>,
    fail_chain: Option<String>,
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &FilterCommand) -> Result<(), RunnerError> {
        self.lines.lock().unwrap().push(command.to_string());
        if self.fail_chain.as_deref() == Some(command.chain.as_str()) {
            return Err(RunnerError::NonZeroExit {
                status: Some(1),
                stderr: "iptables: Chain already exists.".to_string(),
            });
        }
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    settings: EngineSettings,
    repo: Arc<JsonFileForwardingConfigRepository>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = EngineSettings::default();
        settings.store_path = dir.path().join("forwarding.json");
        settings.log_dir = dir.path().join("log");
        let repo = Arc::new(JsonFileForwardingConfigRepository::new(&settings.store_path));
        Self {
            _dir: dir,
            settings,
            repo,
        }
    }

    fn service(&self, runner: Arc<RecordingRunner>, mode: Mode) -> HookService {
        HookService::new(
            self.repo.clone(),
            runner,
            Arc::new(FileHookAudit::from_settings(&self.settings)),
            mode,
        )
    }

    fn commands_file(&self) -> String {
        fs::read_to_string(self.settings.commands_path()).unwrap_or_default()
    }
}

fn spark() -> ForwardingConfig {
    ForwardingConfig::new("spark")
        .with_addresses(Ipv4Addr::new(192, 168, 1, 194), Ipv4Addr::new(192, 168, 122, 101))
        .with_port(PortMapping::new(Protocol::Tcp, 1100, 3000))
}

#[test]
fn test_start_then_stop_round_trip() {
    let fixture = Fixture::new();
    fixture.repo.upsert(spark()).unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let service = fixture.service(runner.clone(), Mode::Apply);

    let outcome = service.handle("spark", &HookAction::Start).unwrap();
    assert!(matches!(outcome, HookOutcome::Applied(ref r) if r.is_success()));
    assert!(fixture
        .commands_file()
        .starts_with("iptables -t nat -N DNAT-spark\n"));

    service.handle("spark", &HookAction::Stopped).unwrap();
    assert!(fixture
        .commands_file()
        .ends_with("iptables -t filter -X FWD-spark\n"));

    let lines = runner.lines.lock().unwrap();
    assert_eq!(lines.len(), 21);

    let log = fs::read_to_string(fixture.settings.events_path()).unwrap();
    assert_eq!(log.lines().count(), 2);
}

#[test]
fn test_fresh_install_without_store_directory() {
    let dir = TempDir::new().unwrap();
    let mut settings = EngineSettings::default();
    settings.store_path = dir.path().join("not-created").join("forwarding.json");
    settings.log_dir = dir.path().join("log");
    let runner = Arc::new(RecordingRunner::default());
    let service = HookService::new(
        Arc::new(JsonFileForwardingConfigRepository::new(&settings.store_path)),
        runner.clone(),
        Arc::new(FileHookAudit::from_settings(&settings)),
        Mode::Apply,
    );

    for action in ["prepare", "start", "started", "stopped", "release", "bogus"] {
        let outcome = service.handle("spark", &HookAction::parse(action)).unwrap();
        assert!(
            matches!(outcome, HookOutcome::Ignored | HookOutcome::NoConfiguration),
            "{} produced {:?}",
            action,
            outcome
        );
    }
    assert!(runner.lines.lock().unwrap().is_empty());
    assert!(!dir.path().join("not-created").exists());

    let log = fs::read_to_string(settings.events_path()).unwrap();
    assert_eq!(log.lines().count(), 6);
}

#[test]
fn test_missing_configuration_scenario() {
    let fixture = Fixture::new();
    let runner = Arc::new(RecordingRunner::default());
    let service = fixture.service(runner.clone(), Mode::Apply);

    let outcome = service.handle("hadoop", &HookAction::Start).unwrap();
    assert!(matches!(outcome, HookOutcome::NoConfiguration));
    assert!(runner.lines.lock().unwrap().is_empty());
    assert!(fixture.commands_file().is_empty());

    let log = fs::read_to_string(fixture.settings.events_path()).unwrap();
    assert!(log.contains("Domain: hadoop, Action: start"));
}

#[test]
fn test_reconnect_equals_stop_then_start() {
    let fixture = Fixture::new();
    fixture.repo.upsert(spark()).unwrap();

    let separate = Arc::new(RecordingRunner::default());
    let service = fixture.service(separate.clone(), Mode::Apply);
    service.handle("spark", &HookAction::Stopped).unwrap();
    service.handle("spark", &HookAction::Start).unwrap();

    let combined = Arc::new(RecordingRunner::default());
    let service = fixture.service(combined.clone(), Mode::Apply);
    service.handle("spark", &HookAction::Reconnect).unwrap();

    assert_eq!(*separate.lines.lock().unwrap(), *combined.lines.lock().unwrap());
}

#[test]
fn test_skipped_range_does_not_abort_siblings() {
    let fixture = Fixture::new();
    fixture
        .repo
        .upsert(
            spark()
                .with_range(PortRange::new(Protocol::Tcp, (0, 0), (0, 0)))
                .with_range(PortRange::new(Protocol::Udp, (5000, 5010), (5000, 5010))),
        )
        .unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let outcome = fixture
        .service(runner.clone(), Mode::Apply)
        .handle("spark", &HookAction::Start)
        .unwrap();

    let HookOutcome::Applied(report) = outcome else {
        panic!("expected applied outcome");
    };
    assert!(report.is_success());
    assert_eq!(report.applied.len(), 3 + 4 + 4 + 4);
    assert!(report
        .applied
        .iter()
        .any(|c| c.stage == Stage::Populate { block: 1 }));
}

#[test]
fn test_create_failure_aborts_and_reports() {
    let fixture = Fixture::new();
    fixture.repo.upsert(spark()).unwrap();
    let runner = Arc::new(RecordingRunner {
        fail_chain: Some("DNAT-spark".to_string()),
        ..Default::default()
    });
    let outcome = fixture
        .service(runner.clone(), Mode::Apply)
        .handle("spark", &HookAction::Start)
        .unwrap();

    let HookOutcome::Applied(report) = outcome else {
        panic!("expected applied outcome");
    };
    assert!(report.aborted);
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped.len(), 10);
    assert_eq!(runner.lines.lock().unwrap().len(), 1);
    // The audit file still shows the full intended batch
    assert_eq!(fixture.commands_file().lines().count(), 11);
}

#[test]
fn test_record_mode_writes_audit_only() {
    let fixture = Fixture::new();
    fixture.repo.upsert(spark()).unwrap();
    let runner = Arc::new(RecordingRunner::default());
    let outcome = fixture
        .service(runner.clone(), Mode::Record)
        .handle("spark", &HookAction::Start)
        .unwrap();

    assert!(matches!(outcome, HookOutcome::Recorded(_)));
    assert!(runner.lines.lock().unwrap().is_empty());
    assert_eq!(fixture.commands_file().lines().count(), 11);
}
