//! End-to-end lifecycle tests driven against a scripted stand-in for
//! the supervision host binary.
#![cfg(unix)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use svcwarden::config::HostConfig;
use svcwarden::{
    BatchOutcome, ChannelSink, EventType, Notifier, Orchestrator, ServicePaths, StartMode,
    StatusPoller, UnitRecord, UnitState, WardenConfig, WardenError,
};
use tempfile::TempDir;

const FAKE_HOST: &str = r#"#!/bin/sh
cmd="$1"
echo "$cmd" >> invocations.log
if [ -f "fail_$cmd" ]; then
  echo "simulated $cmd failure" >&2
  exit 1
fi
case "$cmd" in
  install) echo Stopped > state.txt ;;
  start) echo Started > state.txt ;;
  stop)
    if [ -f slow_stop ]; then sleep 5; fi
    echo Stopped > state.txt
    ;;
  uninstall) echo NonExistent > state.txt ;;
  status)
    if [ -f state.txt ]; then cat state.txt; else echo NonExistent; fi
    ;;
esac
exit 0
"#;

const BROKEN_HOST: &str = "#!/bin/sh\necho broken >&2\nexit 1\n";

fn write_host_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("winhost");
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

async fn setup(root: &Path, host_body: &str) -> Orchestrator {
    setup_with(root, host_body, Notifier::new(), true).await
}

async fn setup_with(
    root: &Path,
    host_body: &str,
    notifier: Notifier,
    cleanup_failed_installs: bool,
) -> Orchestrator {
    let host = write_host_script(root, host_body);
    let mut config = WardenConfig::default();
    config.host = HostConfig { binary_path: host };
    config.orchestrator.cleanup_failed_installs = cleanup_failed_installs;

    let orchestrator = Orchestrator::new(config, ServicePaths::new(root), notifier);
    orchestrator.init().await.unwrap();
    orchestrator
}

fn unit(id: &str) -> UnitRecord {
    UnitRecord::new(id, format!("Service {}", id)).with_executable("/opt/fake/worker")
}

fn unit_dir(root: &Path, id: &str) -> PathBuf {
    root.join("services").join(id)
}

fn invocations(root: &Path, id: &str) -> Vec<String> {
    let log = unit_dir(root, id).join("invocations.log");
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_full_lifecycle_of_a_single_unit() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-a")).await.unwrap();

    orch.install("svc-a").await.unwrap();
    assert_eq!(orch.get("svc-a").await.unwrap().status, UnitState::Installed);
    let svc_dir = unit_dir(dir.path(), "svc-a");
    assert!(svc_dir.join("svc-a.exe").exists());
    assert!(svc_dir.join("svc-a.xml").exists());
    assert!(svc_dir.join("logs").is_dir());

    orch.start("svc-a").await.unwrap();
    assert_eq!(orch.get("svc-a").await.unwrap().status, UnitState::Running);

    orch.stop("svc-a").await.unwrap();
    assert_eq!(orch.get("svc-a").await.unwrap().status, UnitState::Stopped);

    orch.uninstall("svc-a").await.unwrap();
    assert_eq!(
        orch.get("svc-a").await.unwrap().status,
        UnitState::Uninstalled
    );
    assert!(!svc_dir.exists());

    assert_eq!(
        invocations(dir.path(), "svc-a"),
        Vec::<String>::new(),
        "directory teardown removed the invocation log"
    );

    orch.remove("svc-a").await.unwrap();
    assert!(orch.get("svc-a").await.is_none());

    let event_log = dir.path().join("events").join("svc-a.log");
    let logged = std::fs::read_to_string(event_log).unwrap();
    assert!(logged.contains("unit.registered"));
    assert!(logged.contains("Uninstalled -> Installing"));
    assert!(logged.contains("unit.removed"));
}

#[tokio::test]
async fn test_batch_start_runs_shared_dependency_exactly_once() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-a")).await.unwrap();
    orch.register(unit("svc-b").with_dependency("svc-a")).await.unwrap();
    orch.register(unit("svc-c").with_dependency("svc-a")).await.unwrap();

    for id in ["svc-a", "svc-b", "svc-c"] {
        orch.install(id).await.unwrap();
    }

    let outcome = orch
        .start_many(&["svc-b".to_string(), "svc-c".to_string()])
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.succeeded, vec!["svc-a", "svc-b", "svc-c"]);

    for id in ["svc-a", "svc-b", "svc-c"] {
        assert_eq!(orch.get(id).await.unwrap().status, UnitState::Running);
    }

    let starts = invocations(dir.path(), "svc-a")
        .iter()
        .filter(|c| c.as_str() == "start")
        .count();
    assert_eq!(starts, 1, "shared dependency started exactly once");
}

#[tokio::test]
async fn test_traversal_path_is_rejected_before_any_side_effect() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    let err = orch
        .register(unit("svc-evil").with_executable("../../evil.exe"))
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::PathRejected { .. }));

    assert!(orch.get("svc-evil").await.is_none());
    assert!(orch.list().await.is_empty());
    assert!(!dir.path().join("units").join("svc-evil.yaml").exists());
    assert!(!unit_dir(dir.path(), "svc-evil").exists());
}

#[tokio::test]
async fn test_start_before_install_is_invalid_and_spawns_nothing() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-x")).await.unwrap();

    let err = orch.start("svc-x").await.unwrap_err();
    assert!(matches!(err, WardenError::InvalidTransition { .. }));
    assert_eq!(
        orch.get("svc-x").await.unwrap().status,
        UnitState::Uninstalled
    );
    assert!(!unit_dir(dir.path(), "svc-x").exists());
}

#[tokio::test]
async fn test_failed_install_cleans_directory_when_configured() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), BROKEN_HOST).await;

    orch.register(unit("svc-f")).await.unwrap();
    let err = orch.install("svc-f").await.unwrap_err();
    assert!(matches!(err, WardenError::SubprocessFailure { .. }));

    assert_eq!(orch.get("svc-f").await.unwrap().status, UnitState::Failed);
    assert!(!unit_dir(dir.path(), "svc-f").exists());
}

#[tokio::test]
async fn test_failed_install_keeps_directory_when_configured() {
    let dir = TempDir::new().unwrap();
    let orch = setup_with(dir.path(), BROKEN_HOST, Notifier::new(), false).await;

    orch.register(unit("svc-f")).await.unwrap();
    assert!(orch.install("svc-f").await.is_err());

    assert_eq!(orch.get("svc-f").await.unwrap().status, UnitState::Failed);
    let svc_dir = unit_dir(dir.path(), "svc-f");
    assert!(svc_dir.join("svc-f.exe").exists(), "diagnostics preserved");
    assert!(svc_dir.join("svc-f.xml").exists());
}

#[tokio::test]
async fn test_failed_unit_can_be_reinstalled_by_operator() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-r")).await.unwrap();
    orch.install("svc-r").await.unwrap();
    orch.start("svc-r").await.unwrap();

    // Force a stop failure to land the unit in Failed
    std::fs::write(unit_dir(dir.path(), "svc-r").join("fail_stop"), "").unwrap();
    assert!(orch.stop("svc-r").await.is_err());
    assert_eq!(orch.get("svc-r").await.unwrap().status, UnitState::Failed);

    // Explicit operator retry: re-install from Failed
    std::fs::remove_file(unit_dir(dir.path(), "svc-r").join("fail_stop")).unwrap();
    orch.install("svc-r").await.unwrap();
    assert_eq!(orch.get("svc-r").await.unwrap().status, UnitState::Installed);
}

#[tokio::test]
async fn test_stop_timeout_is_reported_and_marks_failed() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-slow").with_stop_timeout_ms(200))
        .await
        .unwrap();
    orch.install("svc-slow").await.unwrap();
    orch.start("svc-slow").await.unwrap();

    std::fs::write(unit_dir(dir.path(), "svc-slow").join("slow_stop"), "").unwrap();

    let err = orch.stop("svc-slow").await.unwrap_err();
    match err {
        WardenError::StopTimeout { timeout_ms, .. } => assert_eq!(timeout_ms, 200),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(orch.get("svc-slow").await.unwrap().status, UnitState::Failed);
}

#[tokio::test]
async fn test_batch_aborts_after_first_failure_without_rollback() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-a")).await.unwrap();
    orch.register(unit("svc-b").with_dependency("svc-a")).await.unwrap();
    orch.register(unit("svc-c").with_dependency("svc-b")).await.unwrap();

    for id in ["svc-a", "svc-b", "svc-c"] {
        orch.install(id).await.unwrap();
    }
    std::fs::write(unit_dir(dir.path(), "svc-b").join("fail_start"), "").unwrap();

    let outcome = orch.start_many(&["svc-c".to_string()]).await.unwrap();
    assert!(!outcome.is_success());
    assert_eq!(outcome.succeeded, vec!["svc-a"]);
    assert_eq!(outcome.failed.as_ref().unwrap().0, "svc-b");
    assert_eq!(outcome.aborted, vec!["svc-c"]);

    // svc-a stays running: no rollback of already-started units
    assert_eq!(orch.get("svc-a").await.unwrap().status, UnitState::Running);
    assert_eq!(orch.get("svc-b").await.unwrap().status, UnitState::Failed);
    assert_eq!(orch.get("svc-c").await.unwrap().status, UnitState::Installed);
}

#[tokio::test]
async fn test_disabled_units_are_skipped_in_batches_and_refused_directly() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-d").with_start_mode(StartMode::Disabled))
        .await
        .unwrap();
    orch.install("svc-d").await.unwrap();

    let err = orch.start("svc-d").await.unwrap_err();
    assert!(matches!(err, WardenError::UnitDisabled(_)));

    let outcome: BatchOutcome = orch.start_many(&["svc-d".to_string()]).await.unwrap();
    assert_eq!(outcome.skipped, vec!["svc-d"]);
    assert!(outcome.succeeded.is_empty());
}

#[tokio::test]
async fn test_cancellation_before_subprocess_prevents_invocation() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-c")).await.unwrap();

    orch.request_cancel("svc-c").await;
    let err = orch.install("svc-c").await.unwrap_err();
    assert!(matches!(err, WardenError::Cancelled(_)));
    assert_eq!(
        orch.get("svc-c").await.unwrap().status,
        UnitState::Uninstalled
    );
    assert!(!unit_dir(dir.path(), "svc-c").exists());

    // The flag is consumed: the next attempt proceeds normally
    orch.install("svc-c").await.unwrap();
    assert_eq!(orch.get("svc-c").await.unwrap().status, UnitState::Installed);
}

#[tokio::test]
async fn test_uninstall_stops_a_running_unit_first() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-u")).await.unwrap();
    orch.install("svc-u").await.unwrap();
    orch.start("svc-u").await.unwrap();

    let calls_before_teardown = invocations(dir.path(), "svc-u");
    assert!(!calls_before_teardown.contains(&"stop".to_string()));

    orch.uninstall("svc-u").await.unwrap();
    assert_eq!(
        orch.get("svc-u").await.unwrap().status,
        UnitState::Uninstalled
    );
    assert!(!unit_dir(dir.path(), "svc-u").exists());
}

#[tokio::test]
async fn test_remove_refuses_units_that_others_depend_on() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-base")).await.unwrap();
    orch.register(unit("svc-app").with_dependency("svc-base"))
        .await
        .unwrap();

    let err = orch.remove("svc-base").await.unwrap_err();
    assert!(err.to_string().contains("dependency"));
}

#[tokio::test]
async fn test_cycle_is_rejected_at_registration() {
    let dir = TempDir::new().unwrap();
    let orch = setup(dir.path(), FAKE_HOST).await;

    orch.register(unit("svc-a")).await.unwrap();
    orch.register(unit("svc-b").with_dependency("svc-a")).await.unwrap();

    // Updating svc-a to depend on svc-b would close the loop
    let looped = unit("svc-a").with_dependency("svc-b");
    let err = orch.update(looped).await.unwrap_err();
    assert!(matches!(err, WardenError::CyclicDependency { .. }));
}

#[tokio::test]
async fn test_registry_survives_restart() {
    let dir = TempDir::new().unwrap();
    {
        let orch = setup(dir.path(), FAKE_HOST).await;
        orch.register(unit("svc-p")).await.unwrap();
        orch.install("svc-p").await.unwrap();
    }

    let orch = setup(dir.path(), FAKE_HOST).await;
    let revived = orch.get("svc-p").await.unwrap();
    assert_eq!(revived.status, UnitState::Installed);
}

#[tokio::test]
async fn test_events_are_published_for_every_transition() {
    let dir = TempDir::new().unwrap();
    let (sink, mut rx) = ChannelSink::new();
    let notifier = Notifier::new().with_sink(Arc::new(sink));
    let orch = setup_with(dir.path(), FAKE_HOST, notifier, true).await;

    orch.register(unit("svc-e")).await.unwrap();
    orch.install("svc-e").await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events[0].event_type, EventType::UnitRegistered);
    let transitions: Vec<(Option<UnitState>, Option<UnitState>)> = events[1..]
        .iter()
        .map(|e| (e.from, e.to))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (Some(UnitState::Uninstalled), Some(UnitState::Installing)),
            (Some(UnitState::Installing), Some(UnitState::Installed)),
        ]
    );
}

#[tokio::test]
async fn test_status_poller_reconciles_external_changes() {
    let dir = TempDir::new().unwrap();
    let orch = Arc::new(setup(dir.path(), FAKE_HOST).await);

    orch.register(unit("svc-w")).await.unwrap();
    orch.install("svc-w").await.unwrap();
    orch.start("svc-w").await.unwrap();
    assert_eq!(orch.get("svc-w").await.unwrap().status, UnitState::Running);

    // The process dies behind our back; the host's status now says so
    std::fs::write(unit_dir(dir.path(), "svc-w").join("state.txt"), "Stopped\n").unwrap();

    let poller = StatusPoller::spawn(Arc::clone(&orch), Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(450)).await;
    poller.shutdown().await;

    assert_eq!(orch.get("svc-w").await.unwrap().status, UnitState::Stopped);
}

#[tokio::test]
async fn test_cancelled_stop_reverts_and_stays_operable() {
    let dir = TempDir::new().unwrap();
    let orch = Arc::new(setup(dir.path(), FAKE_HOST).await);

    orch.register(unit("svc-k")).await.unwrap();
    orch.install("svc-k").await.unwrap();
    orch.start("svc-k").await.unwrap();
    std::fs::write(unit_dir(dir.path(), "svc-k").join("slow_stop"), "").unwrap();

    let stopper = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.stop("svc-k").await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    orch.request_cancel("svc-k").await;

    let err = stopper.await.unwrap().unwrap_err();
    assert!(matches!(err, WardenError::Cancelled(_)));

    // The unit is not stranded mid-transition: the recorded state is
    // one the poller refreshes and a later stop goes through.
    assert_eq!(orch.get("svc-k").await.unwrap().status, UnitState::Running);
    std::fs::remove_file(unit_dir(dir.path(), "svc-k").join("slow_stop")).unwrap();
    orch.stop("svc-k").await.unwrap();
    assert_eq!(orch.get("svc-k").await.unwrap().status, UnitState::Stopped);
}

#[tokio::test]
async fn test_concurrent_registration_keeps_ids_unique() {
    let dir = TempDir::new().unwrap();
    let orch = Arc::new(setup(dir.path(), FAKE_HOST).await);

    for i in 0..50 {
        let id = format!("svc-{}", i);
        let a = {
            let orch = Arc::clone(&orch);
            let candidate = unit(&id);
            tokio::spawn(async move { orch.register(candidate).await })
        };
        let b = {
            let orch = Arc::clone(&orch);
            let candidate = unit(&id);
            tokio::spawn(async move { orch.register(candidate).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(
            results.iter().filter(|r| r.is_ok()).count(),
            1,
            "exactly one registration of {} must win",
            id
        );
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(WardenError::UnitAlreadyExists(_))))
                .count(),
            1
        );
    }

    let registered = orch.list().await;
    let distinct: HashSet<&str> = registered.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(registered.len(), 50);
    assert_eq!(distinct.len(), 50);
}

#[tokio::test]
async fn test_concurrent_transitions_on_one_unit_are_serialized() {
    let dir = TempDir::new().unwrap();
    let orch = Arc::new(setup(dir.path(), FAKE_HOST).await);

    orch.register(unit("svc-s")).await.unwrap();
    orch.install("svc-s").await.unwrap();

    // Two simultaneous starts: exactly one wins, the other observes
    // the already-Running state through the per-unit lock.
    let a = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.start("svc-s").await })
    };
    let b = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.start("svc-s").await })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let invalid = results
        .iter()
        .filter(|r| matches!(r, Err(WardenError::InvalidTransition { .. })))
        .count();
    assert_eq!((ok, invalid), (1, 1));
    assert_eq!(orch.get("svc-s").await.unwrap().status, UnitState::Running);

    let starts = invocations(dir.path(), "svc-s")
        .iter()
        .filter(|c| c.as_str() == "start")
        .count();
    assert_eq!(starts, 1);
}
