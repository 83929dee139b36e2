//! Lifecycle tests driving the orchestrator through in-memory doubles

use host_core::chain::{ChainError, PriceType};
use host_core::config::{ConfigStore, FileConfigStore, HostConfig};
use host_core::orchestrator::{RunMode, StartOptions, StartOutcome, StopOutcome, UnregisterOutcome};
use host_core::supervisor::{ProcessState, StopOptions, StopReport};
use host_core::{ErrorKind, HostError, Progress, RegisterRequest};
use host_devkit::doubles::Call;
use host_devkit::harness::{drain, register_request, sample_config, TEST_PUBLIC_URL};
use host_devkit::TestHost;
use std::sync::Arc;

const FIRST_SPAWNED_PID: u32 = 40_000;
const RUNNING_PID: u32 = 4242;

fn is_spawn(call: &Call) -> bool {
    matches!(call, Call::Spawn { .. })
}

fn is_register(call: &Call) -> bool {
    matches!(call, Call::RegisterHost(_))
}

fn is_save_config(call: &Call) -> bool {
    matches!(call, Call::SaveConfig)
}

/// Registration fields as seeded, with the process markers cleared
fn stopped_config() -> HostConfig {
    HostConfig {
        process_pid: None,
        node_start_time: None,
        ..sample_config()
    }
}

/// Config file holding a running node, paired with a live process and PID record
async fn file_store_with_running_node(host: &TestHost, dir: &std::path::Path) -> Arc<FileConfigStore> {
    let store = Arc::new(FileConfigStore::new(dir.join("config.toml")));
    let mut config = sample_config();
    config.mark_running(RUNNING_PID, chrono::Utc::now());
    store.save(&config).await.unwrap();

    host.processes.insert(RUNNING_PID);
    host.pids.seed(RUNNING_PID, &config.public_url);
    store
}

// ===== register =====

#[tokio::test]
async fn test_register_happy_path_persists_running_node() {
    let host = TestHost::new();
    let (orchestrator, mut events) = host.orchestrator();

    let outcome = orchestrator.register(register_request()).await.unwrap();

    assert_eq!(outcome.transaction_hash, "0xregister");
    assert_eq!(outcome.pid, FIRST_SPAWNED_PID);
    assert!(host.chain.status().is_registered);
    assert!(host.processes.is_alive(FIRST_SPAWNED_PID));

    let config = host.config.peek().expect("config saved");
    assert_eq!(config.public_url, TEST_PUBLIC_URL);
    assert_eq!(config.inference_port, 8080);
    assert_eq!(config.process_pid, Some(FIRST_SPAWNED_PID));
    assert!(config.node_start_time.is_some());
    assert_eq!(host.pids.peek().map(|r| r.pid), Some(FIRST_SPAWNED_PID));

    let log = &host.log;
    let probe = log.position(|c| matches!(c, Call::Probe(_))).unwrap();
    let spawn = log.position(is_spawn).unwrap();
    let register = log.position(is_register).unwrap();
    let save = log.position(is_save_config).unwrap();
    assert!(spawn < probe && probe < register && register < save);
    assert!(log
        .calls()
        .contains(&Call::Spawn { host: "0.0.0.0".to_string(), port: 8080 }));

    let progress = drain(&mut events);
    assert_eq!(progress.first(), Some(&Progress::CheckingRegistration));
    assert_eq!(progress.last(), Some(&Progress::SavingState));
    assert!(progress.contains(&Progress::Registered {
        transaction_hash: "0xregister".to_string()
    }));
    assert!(!progress.iter().any(|p| matches!(p, Progress::LocalhostWarning { .. })));
}

#[tokio::test]
async fn test_register_sends_request_fields_to_chain() {
    let host = TestHost::new();
    let (orchestrator, _events) = host.orchestrator();

    let mut request = register_request();
    request.price_per_token = 3500;
    request.stake_amount = "2500".to_string();
    orchestrator.register(request.clone()).await.unwrap();

    let registration = host
        .log
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::RegisterHost(registration) => Some(registration),
            _ => None,
        })
        .unwrap();
    assert_eq!(registration.api_url, request.api_url);
    assert_eq!(registration.models, request.models);
    assert_eq!(registration.price_per_token, 3500);
    assert_eq!(registration.stake_amount, "2500");
}

#[tokio::test]
async fn test_unreachable_endpoint_rolls_back_without_registering() {
    let host = TestHost::new();
    host.probe.set_reachable(false);
    let (orchestrator, mut events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Reachability);
    assert!(err.to_string().contains("not accessible"));
    assert!(!err.hints().is_empty());
    assert!(host.log.calls().contains(&Call::StopInference {
        pid: FIRST_SPAWNED_PID,
        force: true
    }));
    assert_eq!(host.log.count(is_register), 0);
    assert_eq!(host.log.count(is_save_config), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::SavePid { .. })), 0);
    assert!(!host.processes.is_alive(FIRST_SPAWNED_PID));
    assert!(host.config.peek().is_none());
    assert!(!host.chain.status().is_registered);

    let progress = drain(&mut events);
    assert!(progress
        .iter()
        .any(|p| matches!(p, Progress::RollingBack { pid, .. } if *pid == FIRST_SPAWNED_PID)));
    assert!(!progress.contains(&Progress::RegisteringOnChain));
}

#[tokio::test]
async fn test_chain_failure_stops_node_and_saves_nothing() {
    let host = TestHost::new();
    host.chain.fail_registration("execution reverted: insufficient allowance");
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert!(matches!(err, HostError::Chain(ChainError::Reverted(_))));
    assert_eq!(err.kind(), ErrorKind::ChainTransaction);
    assert!(host.log.calls().contains(&Call::StopInference {
        pid: FIRST_SPAWNED_PID,
        force: true
    }));
    assert!(host.config.peek().is_none());
    assert!(host.pids.peek().is_none());
    assert!(!host.processes.is_alive(FIRST_SPAWNED_PID));
}

#[tokio::test]
async fn test_persist_failure_rolls_back_pid_record_and_node() {
    let host = TestHost::new();
    host.config.fail_saves();
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(host.pids.peek().is_none());
    assert!(host.log.calls().contains(&Call::RemovePid));
    assert!(host.log.calls().contains(&Call::StopInference {
        pid: FIRST_SPAWNED_PID,
        force: true
    }));
    assert!(!host.processes.is_alive(FIRST_SPAWNED_PID));
}

#[tokio::test]
async fn test_already_registered_has_no_side_effects() {
    let host = TestHost::new();
    host.chain.set_registered("http://other.example.com:8080", "1000");
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    match err {
        HostError::AlreadyRegistered { api_url, staked_amount, .. } => {
            assert_eq!(api_url, "http://other.example.com:8080");
            assert_eq!(staked_amount, "1000");
        }
        other => panic!("expected AlreadyRegistered, got {:?}", other),
    }
    assert_eq!(host.log.calls(), vec![Call::CheckRegistrationStatus]);
}

fn invalid(mutate: fn(&mut RegisterRequest)) -> RegisterRequest {
    let mut request = register_request();
    mutate(&mut request);
    request
}

#[tokio::test]
async fn test_invalid_input_never_spawns() {
    let cases = vec![
        ("missing port", invalid(|r| r.api_url = "http://node.example.com".to_string())),
        ("bad scheme", invalid(|r| r.api_url = "ftp://node.example.com:21".to_string())),
        ("bad model", invalid(|r| r.models = vec!["llama-2-7b.gguf".to_string()])),
        ("no models", invalid(|r| r.models.clear())),
        ("price too low", invalid(|r| r.price_per_token = 1)),
        ("stake too low", invalid(|r| r.stake_amount = "10".to_string())),
    ];

    for (name, request) in cases {
        let host = TestHost::new();
        let (orchestrator, _events) = host.orchestrator();

        let err = orchestrator.register(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{}", name);
        assert_eq!(host.log.count(is_spawn), 0, "{}", name);
        assert_eq!(host.log.count(|c| matches!(c, Call::ValidateRequirements)), 0, "{}", name);
    }
}

#[tokio::test]
async fn test_missing_binary_fails_before_spawn() {
    let host = TestHost::new();
    host.preflight.set_binary_available(false);
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("binary"));
    assert_eq!(host.log.count(is_spawn), 0);
}

#[tokio::test]
async fn test_port_in_use_fails_before_spawn() {
    let host = TestHost::new();
    host.preflight.set_port_available(false);
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert!(err.to_string().contains("8080"));
    assert_eq!(host.log.count(is_spawn), 0);
}

#[tokio::test]
async fn test_chain_requirements_are_reported() {
    let host = TestHost::new();
    host.chain
        .set_requirement_errors(vec!["Insufficient FAB balance".to_string()]);
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("Insufficient FAB balance"));
    assert_eq!(host.log.count(is_spawn), 0);
}

#[tokio::test]
async fn test_spawn_failure_propagates_without_rollback() {
    let host = TestHost::new();
    host.launcher.fail_spawn(std::io::ErrorKind::NotFound);
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.register(register_request()).await.unwrap_err();

    assert!(matches!(err, HostError::Spawn(_)));
    assert_eq!(host.log.count(|c| matches!(c, Call::Probe(_))), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::StopInference { .. })), 0);
    assert_eq!(host.log.count(is_register), 0);
}

#[tokio::test]
async fn test_localhost_url_warns_and_binds_loopback() {
    let host = TestHost::new();
    let (orchestrator, mut events) = host.orchestrator();

    let mut request = register_request();
    request.api_url = "http://localhost:8080".to_string();
    orchestrator.register(request).await.unwrap();

    assert!(host
        .log
        .calls()
        .contains(&Call::Spawn { host: "127.0.0.1".to_string(), port: 8080 }));
    assert!(drain(&mut events)
        .iter()
        .any(|p| matches!(p, Progress::LocalhostWarning { .. })));
}

// ===== start =====

#[tokio::test]
async fn test_start_without_config() {
    let host = TestHost::new();
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.start(StartOptions::default()).await.unwrap_err();

    assert!(matches!(err, HostError::NoConfig));
    assert_eq!(host.log.count(is_spawn), 0);
}

#[tokio::test]
async fn test_start_without_public_url() {
    let host = TestHost::new();
    let mut config = sample_config();
    config.public_url = String::new();
    host.config.seed(config);
    let (orchestrator, _events) = host.orchestrator();

    let err = orchestrator.start(StartOptions::default()).await.unwrap_err();

    assert!(matches!(err, HostError::NoPublicUrl));
    assert!(err.to_string().contains("No public URL configured"));
    assert_eq!(host.log.count(is_spawn), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::GetPidInfo)), 0);
}

#[tokio::test]
async fn test_start_when_already_running() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (orchestrator, mut events) = host.orchestrator();

    let outcome = orchestrator.start(StartOptions::default()).await.unwrap();

    match outcome {
        StartOutcome::AlreadyRunning(record) => assert_eq!(record.pid, RUNNING_PID),
        other => panic!("expected AlreadyRunning, got {:?}", other),
    }
    assert_eq!(host.log.count(is_spawn), 0);
    assert_eq!(drain(&mut events), vec![Progress::AlreadyRunning { pid: RUNNING_PID }]);
}

#[tokio::test]
async fn test_start_replaces_stale_pid_record() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    host.processes.kill(RUNNING_PID);
    let (orchestrator, _events) = host.orchestrator();

    let outcome = orchestrator.start(StartOptions::default()).await.unwrap();

    let StartOutcome::Started(handle) = outcome else {
        panic!("expected a fresh node");
    };
    assert_eq!(handle.pid, FIRST_SPAWNED_PID);
    assert_eq!(host.log.count(|c| matches!(c, Call::CleanupStalePid)), 1);
    assert_eq!(host.pids.peek().map(|r| r.pid), Some(FIRST_SPAWNED_PID));
    assert_eq!(
        host.config.peek().and_then(|c| c.process_pid),
        Some(FIRST_SPAWNED_PID)
    );
}

#[tokio::test]
async fn test_start_never_touches_chain() {
    let host = TestHost::new().with_running_node(None);
    let (orchestrator, _events) = host.orchestrator();

    orchestrator.start(StartOptions::default()).await.unwrap();

    assert_eq!(host.log.count(|c| matches!(c, Call::CheckRegistrationStatus)), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::Probe(_))), 0);
}

#[tokio::test]
async fn test_foreground_finish_clears_record_and_config() {
    let host = TestHost::new().with_running_node(None);
    let (orchestrator, _events) = host.orchestrator();

    let options = StartOptions {
        mode: RunMode::Foreground,
        ..StartOptions::default()
    };
    let StartOutcome::Started(mut handle) = orchestrator.start(options).await.unwrap() else {
        panic!("expected a fresh node");
    };

    let state = orchestrator.finish_foreground(&mut handle).await.unwrap();

    assert_eq!(state, ProcessState::Stopped);
    assert!(host.log.calls().contains(&Call::StopInference {
        pid: FIRST_SPAWNED_PID,
        force: false
    }));
    assert!(host.pids.peek().is_none());
    let config = host.config.peek().unwrap();
    assert_eq!(config.process_pid, None);
    assert_eq!(config.public_url, TEST_PUBLIC_URL);
}

// ===== stop =====

#[tokio::test]
async fn test_stop_when_nothing_runs_is_a_no_op() {
    let host = TestHost::new();
    let (orchestrator, mut events) = host.orchestrator();

    let outcome = orchestrator.stop(StopOptions::default()).await.unwrap();

    assert_eq!(outcome, StopOutcome::NotRunning);
    assert_eq!(host.log.calls(), vec![Call::GetPidInfo]);
    assert_eq!(drain(&mut events), vec![Progress::NotRunning]);
}

#[tokio::test]
async fn test_stop_removes_record_after_process() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (orchestrator, _events) = host.orchestrator();

    let outcome = orchestrator.stop(StopOptions::default()).await.unwrap();

    assert_eq!(
        outcome,
        StopOutcome::Stopped {
            pid: RUNNING_PID,
            report: StopReport::Graceful
        }
    );
    let stopped = host.log.position(|c| matches!(c, Call::StopDaemon { .. })).unwrap();
    let removed = host.log.position(|c| matches!(c, Call::RemovePid)).unwrap();
    assert!(stopped < removed);
    assert!(!host.processes.is_alive(RUNNING_PID));
    assert!(host.pids.peek().is_none());
}

#[tokio::test]
async fn test_stop_preserves_registration_config() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (orchestrator, _events) = host.orchestrator();

    orchestrator.stop(StopOptions::default()).await.unwrap();

    assert_eq!(host.config.peek().unwrap(), stopped_config());
}

#[tokio::test]
async fn test_stop_preserves_registration_config_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let host = TestHost::new();
    let store = file_store_with_running_node(&host, dir.path()).await;
    let (orchestrator, _events) = host.orchestrator_with_config(store.clone());

    orchestrator.stop(StopOptions::default()).await.unwrap();

    assert_eq!(store.load().await.unwrap(), Some(stopped_config()));
}

#[tokio::test]
async fn test_force_stop_passes_options_through() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (orchestrator, _events) = host.orchestrator();

    let options = StopOptions {
        force: true,
        ..StopOptions::default()
    };
    let outcome = orchestrator.stop(options).await.unwrap();

    assert_eq!(
        outcome,
        StopOutcome::Stopped {
            pid: RUNNING_PID,
            report: StopReport::Forced
        }
    );
    assert!(host
        .log
        .calls()
        .iter()
        .any(|c| matches!(c, Call::StopDaemon { force: true, .. })));
}

#[tokio::test]
async fn test_second_stop_does_nothing() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (orchestrator, _events) = host.orchestrator();

    orchestrator.stop(StopOptions::default()).await.unwrap();
    host.log.clear();
    let outcome = orchestrator.stop(StopOptions::default()).await.unwrap();

    assert_eq!(outcome, StopOutcome::NotRunning);
    assert_eq!(host.log.calls(), vec![Call::GetPidInfo]);
}

// ===== unregister =====

#[tokio::test]
async fn test_unregister_when_not_registered() {
    let host = TestHost::new();
    let (orchestrator, _events) = host.orchestrator();

    let outcome = orchestrator.unregister().await.unwrap();

    assert_eq!(outcome, UnregisterOutcome::NotRegistered);
    assert_eq!(host.log.count(|c| matches!(c, Call::UnregisterHost)), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::GetPidInfo)), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::StopDaemon { .. })), 0);
}

#[tokio::test]
async fn test_unregister_stops_running_node_and_keeps_config() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    host.chain.set_registered(TEST_PUBLIC_URL, "1000");
    let (orchestrator, mut events) = host.orchestrator();

    let outcome = orchestrator.unregister().await.unwrap();

    assert_eq!(
        outcome,
        UnregisterOutcome::Unregistered {
            transaction_hash: "0xunregister".to_string(),
            confirmed: true,
            stopped_pid: Some(RUNNING_PID),
            stop_error: None,
        }
    );
    let unregistered = host.log.position(|c| matches!(c, Call::UnregisterHost)).unwrap();
    let stopped = host.log.position(|c| matches!(c, Call::StopDaemon { .. })).unwrap();
    assert!(unregistered < stopped);
    assert!(!host.processes.is_alive(RUNNING_PID));

    let config = host.config.peek().expect("config kept for re-registration");
    assert_eq!(config, stopped_config());

    let progress = drain(&mut events);
    assert!(progress.contains(&Progress::Unregistering {
        staked_amount: "1000".to_string()
    }));
    assert!(progress.contains(&Progress::NodeStopped { pid: RUNNING_PID }));
}

#[tokio::test]
async fn test_unregister_keeps_config_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let host = TestHost::new();
    host.chain.set_registered(TEST_PUBLIC_URL, "1000");
    let store = file_store_with_running_node(&host, dir.path()).await;
    let (orchestrator, _events) = host.orchestrator_with_config(store.clone());

    orchestrator.unregister().await.unwrap();

    assert!(!host.processes.is_alive(RUNNING_PID));
    assert_eq!(store.load().await.unwrap(), Some(stopped_config()));
}

#[tokio::test]
async fn test_unregister_keeps_transaction_when_local_stop_fails() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    host.chain.set_registered(TEST_PUBLIC_URL, "1000");
    host.daemon.fail_stops();
    let (orchestrator, _events) = host.orchestrator();

    let outcome = orchestrator.unregister().await.unwrap();

    let UnregisterOutcome::Unregistered {
        transaction_hash,
        confirmed,
        stopped_pid,
        stop_error,
    } = outcome
    else {
        panic!("expected Unregistered, got {:?}", outcome);
    };
    assert_eq!(transaction_hash, "0xunregister");
    assert!(confirmed);
    assert_eq!(stopped_pid, None);
    assert!(stop_error.unwrap().contains("permission denied"));

    assert!(!host.chain.status().is_registered);
    assert!(host.processes.is_alive(RUNNING_PID));
    assert_eq!(host.pids.peek().map(|r| r.pid), Some(RUNNING_PID));
}

#[tokio::test]
async fn test_unregister_reports_unconfirmed_status() {
    let host = TestHost::new();
    host.chain.set_registered(TEST_PUBLIC_URL, "1000");
    host.chain.stay_active_after_unregister();
    let (orchestrator, _events) = host.orchestrator();

    let outcome = orchestrator.unregister().await.unwrap();

    assert_eq!(
        outcome,
        UnregisterOutcome::Unregistered {
            transaction_hash: "0xunregister".to_string(),
            confirmed: false,
            stopped_pid: None,
            stop_error: None,
        }
    );
    assert_eq!(host.log.count(|c| matches!(c, Call::CheckRegistrationStatus)), 2);
}

// ===== status =====

#[tokio::test]
async fn test_status_heals_stale_process_markers() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    host.processes.kill(RUNNING_PID);
    let (orchestrator, _events) = host.orchestrator();

    let status = orchestrator.status().await.unwrap();

    assert!(status.process.is_none());
    assert_eq!(status.config.as_ref().and_then(|c| c.process_pid), None);
    assert_eq!(host.config.peek().and_then(|c| c.process_pid), None);
}

#[tokio::test]
async fn test_status_reports_live_node() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (orchestrator, _events) = host.orchestrator();

    let status = orchestrator.status().await.unwrap();

    assert_eq!(status.process.map(|r| r.pid), Some(RUNNING_PID));
    assert_eq!(host.log.count(is_save_config), 0);
}

#[tokio::test]
async fn test_register_stop_start_cycle() {
    let host = TestHost::new();
    let (orchestrator, _events) = host.orchestrator();

    orchestrator.register(register_request()).await.unwrap();
    orchestrator.stop(StopOptions::default()).await.unwrap();
    let outcome = orchestrator.start(StartOptions::default()).await.unwrap();

    let StartOutcome::Started(handle) = outcome else {
        panic!("expected a fresh node");
    };
    assert_eq!(handle.pid, FIRST_SPAWNED_PID + 1);
    assert_eq!(host.log.count(is_register), 1);
}

// ===== admin =====

#[tokio::test]
async fn test_add_stake_approves_when_allowance_is_short() {
    let host = TestHost::new();
    host.chain.set_allowance("100");
    let (admin, mut events) = host.admin();

    let tx = admin.add_stake("500", false).await.unwrap();

    assert_eq!(tx, "0xstake");
    let approved = host
        .log
        .position(|c| matches!(c, Call::ApproveToken(amount) if amount == "500"))
        .unwrap();
    let staked = host.log.position(|c| matches!(c, Call::AddStake(_))).unwrap();
    assert!(approved < staked);
    assert!(drain(&mut events).contains(&Progress::ApprovingTokens {
        amount: "500".to_string()
    }));
}

#[tokio::test]
async fn test_add_stake_skips_approval_when_covered() {
    let host = TestHost::new();
    host.chain.set_allowance("1000");
    let (admin, _events) = host.admin();

    admin.add_stake("500", false).await.unwrap();

    assert_eq!(host.log.count(|c| matches!(c, Call::ApproveToken(_))), 0);
    assert_eq!(host.log.count(|c| matches!(c, Call::AddStake(_))), 1);
}

#[tokio::test]
async fn test_add_stake_without_approval_check() {
    let host = TestHost::new();
    let (admin, _events) = host.admin();

    admin.add_stake("500", true).await.unwrap();

    assert_eq!(host.log.count(|c| matches!(c, Call::CheckAllowance)), 0);
}

#[tokio::test]
async fn test_add_stake_rejects_non_positive_amount() {
    let host = TestHost::new();
    let (admin, _events) = host.admin();

    let err = admin.add_stake("0", false).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(host.log.calls().is_empty());
}

#[tokio::test]
async fn test_update_url_mirrors_local_config() {
    let host = TestHost::new().with_running_node(None);
    let (admin, _events) = host.admin();

    admin.update_url("http://new.example.com:9090").await.unwrap();

    let config = host.config.peek().unwrap();
    assert_eq!(config.public_url, "http://new.example.com:9090");
    assert_eq!(config.inference_port, 9090);
    assert!(host
        .log
        .calls()
        .contains(&Call::UpdateApiUrl("http://new.example.com:9090".to_string())));
}

#[tokio::test]
async fn test_update_url_rejects_missing_port() {
    let host = TestHost::new().with_running_node(None);
    let (admin, _events) = host.admin();

    let err = admin.update_url("http://new.example.com").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(host.log.count(|c| matches!(c, Call::UpdateApiUrl(_))), 0);
    assert_eq!(host.config.peek().unwrap().public_url, TEST_PUBLIC_URL);
}

#[tokio::test]
async fn test_update_models_and_pricing_without_local_config() {
    let host = TestHost::new();
    let (admin, _events) = host.admin();
    let models = vec!["org/model-GGUF:model.Q5_K_M.gguf".to_string()];

    admin.update_models(&models).await.unwrap();
    admin.update_pricing(5000).await.unwrap();

    assert!(host.config.peek().is_none());
    let info = admin.info(None).await.unwrap();
    assert_eq!(info.models, models);
    assert_eq!(info.price_per_token, Some(5000));
}

#[tokio::test]
async fn test_update_pricing_mirrors_local_config() {
    let host = TestHost::new().with_running_node(Some(RUNNING_PID));
    let (admin, _events) = host.admin();

    admin.update_pricing(4000).await.unwrap();

    let config = host.config.peek().unwrap();
    assert_eq!(config.price_per_token, 4000);
    assert_eq!(config.process_pid, Some(RUNNING_PID));
}

#[tokio::test]
async fn test_set_model_pricing_validates_before_submitting() {
    let host = TestHost::new();
    let (admin, _events) = host.admin();

    assert!(admin
        .set_model_pricing("not-a-model", 2000, PriceType::Usdc)
        .await
        .is_err());
    assert!(admin
        .set_model_pricing("org/m:m.gguf", 1, PriceType::Eth)
        .await
        .is_err());
    assert!(host.log.calls().is_empty());

    admin
        .set_model_pricing("org/m:m.gguf", 2000, PriceType::Eth)
        .await
        .unwrap();
    assert_eq!(
        host.log.calls(),
        vec![Call::SetModelPricing {
            model: "org/m:m.gguf".to_string(),
            price: 2000,
            price_type: PriceType::Eth
        }]
    );
}

#[tokio::test]
async fn test_info_for_other_address() {
    let host = TestHost::new();
    let (admin, _events) = host.admin();

    let info = admin.info(Some("0xOTHER")).await.unwrap();

    assert_eq!(info.address, "0xOTHER");
    assert!(!info.is_active);
}
