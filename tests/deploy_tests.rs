//! Behavioural tests for the deploy orchestrator using scripted doubles.

use std::time::Duration;

use camino::Utf8PathBuf;
use devstead::config::{BootPolicy, Settings};
use devstead::deploy::{
    BOOT_FINISHED_MARKER, BootError, DeployError, DeployOrchestrator, remote_target,
    wait_for_boot,
};
use devstead::provision::{MemoryLedger, SequenceError, StepState};
use devstead::remote::RemoteError;
use devstead::test_support::{
    FakeKeygen, MemoryHostConfig, ScriptedBackend, ScriptedBackendError, ScriptedExecutor,
    sample_settings,
};
use devstead::InstanceHandle;
use rstest::{fixture, rstest};
use tempfile::TempDir;

type Orchestrator =
    DeployOrchestrator<ScriptedBackend, FakeKeygen, ScriptedExecutor, MemoryHostConfig>;

struct Harness {
    _tmp: TempDir,
    settings: Settings,
    backend: ScriptedBackend,
    keygen: FakeKeygen,
    executor: ScriptedExecutor,
    writer: MemoryHostConfig,
}

impl Harness {
    fn orchestrator(&self) -> Orchestrator {
        DeployOrchestrator::new(
            self.backend.clone(),
            self.keygen.clone(),
            self.executor.clone(),
            self.writer.clone(),
            "ssh-keygen",
        )
    }
}

fn write(path: &Utf8PathBuf, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap_or_else(|err| panic!("create {parent}: {err}"));
    }
    std::fs::write(path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let settings = Settings {
        scripts_dir: root.join("scripts"),
        ssh_dir: root.join(".ssh"),
        state_dir: root.join("state"),
        boot: BootPolicy {
            timeout: Duration::ZERO,
            poll_interval: Duration::from_millis(1),
        },
        ..sample_settings()
    };

    let userdata = settings.userdata_dir();
    write(&userdata.join("sequence.yml"), "sequence:\n  - up: 01-host.sh\n");
    write(&userdata.join("01-host.sh"), "hostnamectl set-hostname ___HOSTNAME___");

    let provisioning = settings.provisioning_dir();
    write(
        &provisioning.join("sequence.yml"),
        "sequence:\n  - up: 01-base.sh\n    down: 01-base-down.sh\n  - up: 02-code-server.sh\n",
    );
    write(&provisioning.join("01-base.sh"), "apt-get install -y git\n");
    write(&provisioning.join("01-base-down.sh"), "echo bye\n");
    write(&provisioning.join("02-code-server.sh"), "install code-server for ___USERNAME___\n");

    Harness {
        _tmp: tmp,
        settings,
        backend: ScriptedBackend::new(),
        keygen: FakeKeygen::new(),
        executor: ScriptedExecutor::new(),
        writer: MemoryHostConfig::new(),
    }
}

#[rstest]
#[tokio::test]
async fn up_creates_waits_and_provisions(harness: Harness) {
    let ledger = MemoryLedger::new();
    let outcome = harness
        .orchestrator()
        .up(&harness.settings, &ledger)
        .await
        .unwrap_or_else(|err| panic!("up: {err}"));

    assert!(outcome.credentials_created);
    assert_eq!(outcome.handle.id, ScriptedBackend::INSTANCE_ID);
    assert_eq!(
        outcome.report.names_in(StepState::Succeeded),
        vec!["01-base.sh", "02-code-server.sh"]
    );

    let requests = harness.backend.requests();
    assert_eq!(requests.len(), 1);
    let request = requests
        .first()
        .unwrap_or_else(|| panic!("one request expected"));
    assert_eq!(request.name, "devbox.example.com");
    assert_eq!(request.user_data, "hostnamectl set-hostname devbox");
    assert_eq!(request.public_key, "ssh-ed25519 AAAAfake devbox.example.com");

    assert_eq!(
        harness.executor.labels(),
        vec!["boot-finished", "01-base.sh", "02-code-server.sh"]
    );
    let commands = harness.executor.commands();
    let probe = commands
        .first()
        .unwrap_or_else(|| panic!("boot probe expected"));
    assert_eq!(probe.body, format!("test -f {BOOT_FINISHED_MARKER}"));
    let first_step = commands
        .get(1)
        .unwrap_or_else(|| panic!("first step expected"));
    assert_eq!(first_step.trigger, ScriptedBackend::INSTANCE_ID);
    assert_eq!(
        first_step.dependencies,
        vec![
            format!("instance:{}", ScriptedBackend::INSTANCE_ID),
            String::from("dns:devbox.example.com"),
        ]
    );

    let targets = harness.executor.targets();
    assert!(targets.iter().all(|target| target.user == "ubuntu"
        && target.host == "devbox.example.com"
        && target.identity_file == Some(harness.settings.identity_file())));
    assert_eq!(harness.writer.calls().len(), 1);
    assert!(harness.backend.destroyed().is_empty());
}

#[rstest]
#[tokio::test]
async fn up_polls_until_boot_finishes(mut harness: Harness) {
    harness.settings.boot.timeout = Duration::from_secs(5);
    harness.executor.push_output(Some(1), "", "");
    harness.executor.push_output(Some(1), "", "");

    harness
        .orchestrator()
        .up(&harness.settings, &MemoryLedger::new())
        .await
        .unwrap_or_else(|err| panic!("up: {err}"));

    let probes = harness
        .executor
        .labels()
        .into_iter()
        .filter(|label| label == "boot-finished")
        .count();
    assert_eq!(probes, 3);
}

#[rstest]
#[tokio::test]
async fn boot_timeout_keeps_instance(harness: Harness) {
    harness.executor.push_output(Some(1), "", "");

    let err = harness
        .orchestrator()
        .up(&harness.settings, &MemoryLedger::new())
        .await
        .expect_err("boot should time out");

    assert!(
        matches!(
            err,
            DeployError::Boot(BootError::Timeout { ref instance_id, .. })
                if instance_id == ScriptedBackend::INSTANCE_ID
        ),
        "unexpected error: {err}"
    );
    assert_eq!(harness.executor.labels(), vec!["boot-finished"]);
    assert!(harness.backend.destroyed().is_empty());
}

#[rstest]
#[tokio::test]
async fn unrepresentable_boot_timeout_keeps_polling(harness: Harness) {
    harness.executor.push_output(Some(1), "", "");
    let target = remote_target(&harness.settings, "devbox.example.com", 22);
    let policy = BootPolicy {
        timeout: Duration::MAX,
        poll_interval: Duration::from_millis(1),
    };

    wait_for_boot(&harness.executor, &target, "i-1", policy)
        .await
        .unwrap_or_else(|err| panic!("boot wait: {err}"));
    assert_eq!(harness.executor.labels(), vec!["boot-finished", "boot-finished"]);
}

#[rstest]
#[tokio::test]
async fn boot_probe_transport_failure_is_reported(harness: Harness) {
    harness.executor.push_error(RemoteError::Spawn {
        program: String::from("ssh"),
        message: String::from("not found"),
    });

    let err = harness
        .orchestrator()
        .up(&harness.settings, &MemoryLedger::new())
        .await
        .expect_err("probe failure should surface");
    assert!(matches!(err, DeployError::Boot(BootError::Check { .. })));
}

#[rstest]
#[tokio::test]
async fn create_failure_stops_before_any_remote_work(harness: Harness) {
    harness.backend.fail_on_create();

    let err = harness
        .orchestrator()
        .up(&harness.settings, &MemoryLedger::new())
        .await
        .expect_err("create failure should surface");

    assert!(matches!(err, DeployError::Create(ScriptedBackendError::Create)));
    assert!(harness.executor.commands().is_empty());
}

#[rstest]
#[tokio::test]
async fn wait_failure_names_instance(harness: Harness) {
    harness.backend.fail_on_wait();

    let err = harness
        .orchestrator()
        .up(&harness.settings, &MemoryLedger::new())
        .await
        .expect_err("wait failure should surface");

    assert_eq!(
        err.to_string(),
        format!(
            "instance {} did not become ready: wait failure",
            ScriptedBackend::INSTANCE_ID
        )
    );
    assert!(harness.backend.destroyed().is_empty());
}

#[rstest]
#[tokio::test]
async fn failing_step_is_reported_without_destroy(harness: Harness) {
    harness.executor.push_success();
    harness.executor.push_output(Some(100), "", "E: Unable to locate package\n");

    let err = harness
        .orchestrator()
        .up(&harness.settings, &MemoryLedger::new())
        .await
        .expect_err("step failure should surface");

    let DeployError::Sequence { instance_id, source } = err else {
        panic!("expected sequence failure");
    };
    assert_eq!(instance_id, ScriptedBackend::INSTANCE_ID);
    assert!(
        matches!(*source, SequenceError::StepFailed { ref step, .. } if step == "01-base.sh")
    );
    assert_eq!(harness.executor.labels(), vec!["boot-finished", "01-base.sh"]);
    assert!(harness.backend.destroyed().is_empty());
}

#[rstest]
#[tokio::test]
async fn down_tears_down_then_destroys(harness: Harness) {
    let ledger = MemoryLedger::new();
    let orchestrator = harness.orchestrator();
    let outcome = orchestrator
        .up(&harness.settings, &ledger)
        .await
        .unwrap_or_else(|err| panic!("up: {err}"));

    let report = orchestrator
        .down(
            &harness.settings,
            outcome.handle.clone(),
            outcome.networking.ssh_port,
            &ledger,
        )
        .await
        .unwrap_or_else(|err| panic!("down: {err}"));

    assert_eq!(report.names_in(StepState::Succeeded), vec!["01-base.sh"]);
    assert_eq!(
        harness.executor.labels().last().map(String::as_str),
        Some("01-base.sh")
    );
    assert_eq!(harness.backend.destroyed(), vec![outcome.handle]);
    assert!(ledger.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_teardown_keeps_instance(harness: Harness) {
    harness.executor.push_output(Some(1), "", "busy");
    let handle = InstanceHandle {
        id: String::from("i-existing"),
        name: String::from("devbox.example.com"),
    };

    let err = harness
        .orchestrator()
        .down(&harness.settings, handle, 2222, &MemoryLedger::new())
        .await
        .expect_err("teardown failure should surface");

    assert!(matches!(err, DeployError::Sequence { .. }));
    let ports: Vec<u16> = harness
        .executor
        .targets()
        .iter()
        .map(|target| target.port)
        .collect();
    assert_eq!(ports, vec![2222]);
    assert!(harness.backend.destroyed().is_empty());
}

#[rstest]
#[tokio::test]
async fn destroy_failure_is_reported(harness: Harness) {
    harness.backend.fail_on_destroy();
    let handle = InstanceHandle {
        id: String::from("i-existing"),
        name: String::from("devbox.example.com"),
    };

    let err = harness
        .orchestrator()
        .down(&harness.settings, handle, 22, &MemoryLedger::new())
        .await
        .expect_err("destroy failure should surface");

    assert_eq!(
        err.to_string(),
        "failed to destroy instance i-existing: destroy failure"
    );
}
