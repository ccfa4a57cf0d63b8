//! Supervisor lifecycle tests against the in-process fakes.
//!
//! Every test drives a real `SidecarManager` wired to `FakeInventory` and
//! `FakeProcessControl`, so launches, kills and inventory polls are observed
//! through the shared call log instead of real processes.

use std::time::Duration;

use pretty_assertions::assert_eq;

use sidecar_supervisor::config::{HeartbeatConfig, SupervisorConfig, injected_env};
use sidecar_supervisor::sidecar::{
    HTTP_PORT_ENV, HeartbeatOutcome, OutputLevel, OutputStream, RuntimeInstance, SidecarError,
    SidecarOptions, SidecarStatus,
};
use sidecar_supervisor::testing::{FIRST_FAKE_PID, LogCapture, TestHarness, eventually};

const WAIT: Duration = Duration::from_secs(2);

fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        stop_grace_secs: 1,
        ..Default::default()
    }
}

fn options(app_id: &str) -> SidecarOptions {
    SidecarOptions {
        heartbeat: HeartbeatConfig::default().disabled(),
        ..SidecarOptions::new(app_id, 5000)
    }
}

fn harness() -> TestHarness {
    TestHarness::new(supervisor_config())
}

// ── Start / Stop ────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_then_stop_leaves_nothing_tracked() {
    let h = harness();

    h.manager.start(&options("orders")).await.unwrap();
    assert_eq!(h.manager.status(), SidecarStatus::Started);
    assert_eq!(h.manager.process_id().await, Some(FIRST_FAKE_PID));

    let launches = h.process.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].executable, "dapr");
    assert_eq!(
        launches[0].args,
        [
            "run",
            "--app-id",
            "orders",
            "--app-port",
            "5000",
            "--app-protocol",
            "http",
        ]
    );

    h.manager.stop().await;
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);
    assert_eq!(h.manager.process_id().await, None);
    assert!(!h.process.is_running(FIRST_FAKE_PID));
    assert!(h.log.contains("terminate 1000"));

    // Idempotent.
    h.manager.stop().await;
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);
}

#[tokio::test]
async fn invalid_options_touch_no_process() {
    let h = harness();

    let err = h
        .manager
        .start(&SidecarOptions::new("  ", 5000))
        .await
        .unwrap_err();

    assert!(matches!(err, SidecarError::Config(_)));
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);
    assert!(h.log.entries().is_empty());
}

#[tokio::test]
async fn launch_failure_propagates() {
    let h = harness();
    h.process.fail_next_launch();

    let err = h.manager.start(&options("orders")).await.unwrap_err();
    assert!(matches!(err, SidecarError::LaunchFailed { .. }));
    assert_eq!(h.manager.process_id().await, None);
    assert_eq!(h.manager.applied_config().await, None);
}

#[tokio::test(start_paused = true)]
async fn stop_escalates_to_kill_when_terminate_is_ignored() {
    let h = harness();
    h.process.set_ignore_terminate(true);

    h.manager.start(&options("orders")).await.unwrap();
    h.manager.stop().await;

    let terminate = h.log.position("terminate 1000").unwrap();
    let kill = h.log.position("kill 1000").unwrap();
    assert!(terminate < kill);
    assert!(!h.process.is_running(FIRST_FAKE_PID));
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);
}

#[tokio::test]
async fn start_evicts_stale_instances_and_port_holders() {
    let (logs, _guard) = LogCapture::install();
    let h = harness();
    h.process.add_process(777, "daprd");
    h.inventory.set_instances(vec![RuntimeInstance {
        app_id: "orders".to_string(),
        pid: 777,
        http_port: Some(3600),
        grpc_port: Some(50100),
    }]);
    h.process.occupy_port(3500, 4242, "rogue");
    h.process.occupy_port(50001, 4343, "other");

    let opts = SidecarOptions {
        http_port: Some(3500),
        grpc_port: Some(50001),
        ..options("orders")
    };
    h.manager.start(&opts).await.unwrap();

    assert_eq!(h.process.kills(), vec![777, 4242, 4343]);
    assert!(h.log.position("kill 4343").unwrap() < h.log.position("launch 1000").unwrap());
    assert!(!h.process.is_running(4242));
    assert!(h.process.launches()[0]
        .args
        .windows(2)
        .any(|pair| pair == ["--dapr-http-port", "3500"]));

    let port_kills = logs.warnings("Killing process holding sidecar port");
    assert_eq!(port_kills.len(), 2);
    assert!(port_kills[0].contains("pid=4242"));
    assert!(port_kills[1].contains("pid=4343"));
}

#[tokio::test]
async fn failed_start_leaves_supervisor_stopped() {
    let h = harness();
    h.process.fail_next_launch();

    assert!(h.manager.start(&options("orders")).await.is_err());
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);

    h.manager.start(&options("orders")).await.unwrap();
    assert_eq!(h.manager.status(), SidecarStatus::Started);
}

#[tokio::test]
async fn exit_during_launch_is_not_reported_as_started() {
    let h = harness();
    h.process.set_exit_on_launch(true);

    h.manager.start(&options("orders")).await.unwrap();
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);

    h.process.set_exit_on_launch(false);
    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::Restarted);
    assert_eq!(h.manager.status(), SidecarStatus::Started);
}

// ── Refresh ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_before_start_fails() {
    let h = harness();

    let err = h.manager.refresh(&options("orders")).await.unwrap_err();
    assert!(matches!(err, SidecarError::NotStarted));
    assert_eq!(h.process.launch_count(), 0);
}

#[tokio::test]
async fn refresh_stops_previous_before_launching() {
    let h = harness();
    h.manager.start(&options("orders")).await.unwrap();
    h.log.clear();

    let refreshed = SidecarOptions {
        app_id_suffix: Some("blue".to_string()),
        ..options("orders")
    };
    h.manager.refresh(&refreshed).await.unwrap();

    let stopped = h.log.position("terminate 1000").unwrap();
    let listed = h.log.position("list orders").unwrap();
    let launched = h.log.position("launch 1001").unwrap();
    assert!(stopped < launched);
    assert!(listed < launched);

    let applied = h.manager.applied_config().await.unwrap();
    assert_eq!(applied.app_id, "orders-blue");
    assert_eq!(h.manager.process_id().await, Some(1001));

    // The superseded process's exit must not flip the status.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.manager.status(), SidecarStatus::Started);
}

// ── Output ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn output_is_classified_in_arrival_order() {
    let h = harness();
    let output = &h.output;
    let opts = SidecarOptions {
        http_port: Some(3501),
        grpc_port: Some(50011),
        ..options("orders")
    };
    h.manager.start(&opts).await.unwrap();

    h.process.emit_stdout(1000, "time=now level=warning msg=\"disk low\"");
    h.process.emit_stdout(1000, "");
    h.process.emit_stderr(1000, "panic: boom");
    h.process.emit_stdout(1000, "level=fatal msg=\"gone\"");
    h.process.emit_stdout(1000, "plain line");

    assert!(eventually(WAIT, || async move { output.len() == 4 }).await);

    let summary: Vec<(OutputStream, OutputLevel)> = h
        .output
        .lines()
        .iter()
        .map(|line| (line.stream, line.level))
        .collect();
    assert_eq!(
        summary,
        vec![
            (OutputStream::Stdout, OutputLevel::Warning),
            (OutputStream::Stderr, OutputLevel::Error),
            (OutputStream::Stdout, OutputLevel::Error),
            (OutputStream::Stdout, OutputLevel::Information),
        ]
    );
    assert_eq!(h.output.lines()[1].text, "panic: boom");
}

#[tokio::test]
async fn missing_ports_poll_inventory_then_give_up() {
    let (logs, _guard) = LogCapture::install();
    let h = harness();
    let output = &h.output;
    h.manager.start(&options("orders")).await.unwrap();
    // One listing while evicting stale instances.
    assert_eq!(h.inventory.list_calls(), 1);

    h.process.emit_stdout(1000, "level=info starting");
    assert!(eventually(WAIT, || async move { output.len() == 1 }).await);

    assert_eq!(h.inventory.list_calls(), 4);
    assert_eq!(h.manager.status(), SidecarStatus::Started);
    let applied = h.manager.applied_config().await.unwrap();
    assert_eq!(applied.http_port, None);
    assert_eq!(applied.grpc_port, None);
    assert_eq!(logs.warnings("Could not discover ports for sidecar orders").len(), 1);
}

#[tokio::test]
async fn discovered_ports_are_backfilled_once() {
    let h = harness();
    let output = &h.output;
    h.manager.start(&options("payments")).await.unwrap();
    h.inventory.add_running("payments", 1000, 3510, 50010);

    h.process.emit_stdout(1000, "level=info starting");
    assert!(eventually(WAIT, || async move { output.len() == 1 }).await);

    let applied = h.manager.applied_config().await.unwrap();
    assert_eq!(applied.http_port, Some(3510));
    assert_eq!(applied.grpc_port, Some(50010));
    assert!(injected_env(HTTP_PORT_ENV).is_some());

    let polls = h.inventory.list_calls();
    h.process.emit_stdout(1000, "level=info ready");
    assert!(eventually(WAIT, || async move { output.len() == 2 }).await);
    assert_eq!(h.inventory.list_calls(), polls);
}

#[tokio::test]
async fn process_exit_marks_stopped() {
    let h = harness();
    let manager = &h.manager;
    h.manager.start(&options("orders")).await.unwrap();

    h.process.exit(1000, Some(1));

    assert!(
        eventually(WAIT, || async move {
            manager.status() == SidecarStatus::Stopped
        })
        .await
    );
}

// ── Heartbeat ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_before_start_does_nothing() {
    let h = harness();
    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::NotConfigured);
    assert_eq!(h.process.launch_count(), 0);
}

#[tokio::test]
async fn heartbeat_restarts_missing_sidecar() {
    let h = harness();
    h.manager.start(&options("orders")).await.unwrap();

    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::Restarted);
    assert_eq!(h.process.launch_count(), 2);
    assert!(h.log.position("terminate 1000").unwrap() < h.log.position("launch 1001").unwrap());
    assert_eq!(h.manager.status(), SidecarStatus::Started);

    h.inventory.add_running("orders", 1001, 3500, 50001);
    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::Healthy);
    assert_eq!(h.process.launch_count(), 2);
}

#[tokio::test]
async fn heartbeat_restarts_after_crash() {
    let h = harness();
    let manager = &h.manager;
    h.manager.start(&options("orders")).await.unwrap();
    h.process.exit(1000, None);
    assert!(
        eventually(WAIT, || async move {
            manager.status() == SidecarStatus::Stopped
        })
        .await
    );

    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::Restarted);
    assert_eq!(h.manager.status(), SidecarStatus::Started);
    assert_eq!(h.manager.process_id().await, Some(1001));
}

#[tokio::test]
async fn heartbeat_retries_after_failed_restart() {
    let h = harness();
    h.manager.start(&options("orders")).await.unwrap();

    h.process.fail_next_launch();
    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::RestartFailed);
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);
    assert_eq!(h.manager.process_id().await, None);

    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::Restarted);
    assert_eq!(h.manager.status(), SidecarStatus::Started);
    assert_eq!(h.process.launch_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_task_runs_on_its_interval() {
    let h = harness();
    let process = &h.process;
    let opts = SidecarOptions {
        heartbeat: HeartbeatConfig::default().with_interval(Duration::from_secs(1)),
        ..SidecarOptions::new("orders", 5000)
    };
    h.manager.start(&opts).await.unwrap();
    assert_eq!(h.process.launch_count(), 1);

    assert!(eventually(WAIT, || async move { process.launch_count() >= 2 }).await);

    h.manager.dispose().await;
}

// ── Dispose ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispose_stops_and_rejects_later_calls() {
    let h = harness();
    h.manager.start(&options("orders")).await.unwrap();

    h.manager.dispose().await;
    assert_eq!(h.manager.status(), SidecarStatus::Stopped);
    assert!(!h.process.is_running(FIRST_FAKE_PID));

    let err = h.manager.start(&options("orders")).await.unwrap_err();
    assert!(matches!(err, SidecarError::Disposed));
    assert_eq!(h.manager.check_heartbeat().await, HeartbeatOutcome::NotConfigured);

    // Second dispose is a no-op.
    h.manager.dispose().await;
}
