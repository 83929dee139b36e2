//! Host lifecycle orchestration
//!
//! Sequences the leaf components into the `register`, `start`, `stop` and
//! `unregister` commands. Registration is a saga: once the node process is
//! spawned, every later failure force-stops it and nothing is persisted.
//!
//! All collaborators are injected through `HostServices`, constructed once per
//! invocation.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainRegistrar, GatewayClient, HostInfo, HostRegistration};
use crate::config::{ConfigStore, FileConfigStore, HostConfig, Settings};
use crate::error::{HostError, Result};
use crate::events::{Progress, ProgressSink};
use crate::pid::{PidManager, PidRecord, PidStore};
use crate::probe::{extract_host_port, troubleshooting_hints, warn_if_localhost, EndpointProbe, HostPort, HttpProbe};
use crate::supervisor::{
    DaemonControl, InferenceConfig, InferenceLauncher, NodeLauncher, OutputMode, ProcessHandle, ProcessState,
    SignalDaemonControl, StopOptions, StopReport,
};
use crate::validator::{
    resolve_node_binary, validate_models, validate_price, validate_public_url, validate_stake_amount, Preflight,
    SystemPreflight,
};

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// States of the register saga
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    CheckingStatus,
    Validating,
    Starting,
    VerifyingReachability,
    Registering,
    Persisting,
    Done,
    RollingBack,
    Failed,
}

impl SagaState {
    pub fn can_advance_to(self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (CheckingStatus, Validating)
                | (Validating, Starting)
                | (Starting, VerifyingReachability)
                | (VerifyingReachability, Registering)
                | (Registering, Persisting)
                | (Persisting, Done)
                | (VerifyingReachability, RollingBack)
                | (Registering, RollingBack)
                | (Persisting, RollingBack)
                | (RollingBack, Failed)
                // Nothing was started yet, so there is nothing to roll back
                | (CheckingStatus, Failed)
                | (Validating, Failed)
                | (Starting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SagaState::Done | SagaState::Failed)
    }
}

struct SagaTracker {
    state: SagaState,
}

impl SagaTracker {
    fn new() -> Self {
        Self {
            state: SagaState::CheckingStatus,
        }
    }

    fn advance(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal saga transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "Register saga transition");
        self.state = next;
    }
}

/// Every collaborator the orchestrator talks to
#[derive(Clone)]
pub struct HostServices {
    pub registrar: Arc<dyn ChainRegistrar>,
    pub launcher: Arc<dyn InferenceLauncher>,
    pub daemon: Arc<dyn DaemonControl>,
    pub pids: Arc<dyn PidStore>,
    pub config: Arc<dyn ConfigStore>,
    pub probe: Arc<dyn EndpointProbe>,
    pub preflight: Arc<dyn Preflight>,
    /// Output destination of daemonized nodes
    pub node_log: PathBuf,
}

impl HostServices {
    /// Real collaborators for this installation
    pub fn system(settings: &Settings, gateway: Arc<GatewayClient>) -> Result<Self> {
        let binary = resolve_node_binary(settings.node_binary.as_deref(), &settings.paths.home);
        debug!(binary = ?binary, home = %settings.paths.home.display(), "Resolved host services");

        Ok(Self {
            registrar: gateway,
            launcher: Arc::new(NodeLauncher::new(binary.clone())),
            daemon: Arc::new(SignalDaemonControl::new()),
            pids: Arc::new(PidManager::new(settings.paths.pid_file())),
            config: Arc::new(FileConfigStore::new(settings.paths.config_file())),
            probe: Arc::new(HttpProbe::new(settings.probe.clone())?),
            preflight: Arc::new(SystemPreflight::new(binary)),
            node_log: settings.paths.node_log_file(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub api_url: String,
    pub models: Vec<String>,
    pub price_per_token: u64,
    pub stake_amount: String,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub transaction_hash: String,
    pub host_info: HostInfo,
    pub pid: u32,
    pub config: HostConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Output to the node log, return once the process is recorded
    Daemon,
    /// Output captured on the handle; the caller blocks until interrupted
    Foreground,
}

#[derive(Debug, Clone)]
pub struct StartOptions {
    pub mode: RunMode,
    pub log_level: String,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Daemon,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    AlreadyRunning(PidRecord),
    Started(ProcessHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped { pid: u32, report: StopReport },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterOutcome {
    NotRegistered,
    Unregistered {
        transaction_hash: String,
        /// Status re-query reports the host inactive
        confirmed: bool,
        stopped_pid: Option<u32>,
        /// The chain side succeeded but the local node could not be stopped
        stop_error: Option<String>,
    },
}

/// Local view of the host
#[derive(Debug, Clone, PartialEq)]
pub struct HostStatus {
    pub config: Option<HostConfig>,
    pub process: Option<PidRecord>,
}

pub struct Orchestrator {
    services: HostServices,
    progress: ProgressSink,
}

impl Orchestrator {
    pub fn new(services: HostServices, progress: ProgressSink) -> Self {
        Self { services, progress }
    }

    /// Start the node, prove it reachable, then stake and register it on-chain
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterOutcome> {
        let mut saga = SagaTracker::new();
        let result = self.run_register(&mut saga, request).await;
        if result.is_err() && !saga.state.is_terminal() {
            saga.advance(SagaState::Failed);
        }
        result
    }

    async fn run_register(&self, saga: &mut SagaTracker, request: RegisterRequest) -> Result<RegisterOutcome> {
        let registrar = &self.services.registrar;

        self.progress.emit(Progress::CheckingRegistration);
        let status = registrar.check_registration_status().await?;
        if status.is_registered {
            return Err(HostError::AlreadyRegistered {
                host_address: status.host_address,
                api_url: status.api_url,
                staked_amount: status.staked_amount,
            });
        }

        saga.advance(SagaState::Validating);
        self.progress.emit(Progress::ValidatingRequirements);
        let endpoint = self.validate_registration(&request).await?;

        saga.advance(SagaState::Starting);
        let output = OutputMode::File(self.services.node_log.clone());
        let mut handle = self
            .spawn_node(&request.api_url, &endpoint, &request.models, &request.log_level, output)
            .await?;

        saga.advance(SagaState::VerifyingReachability);
        self.progress.emit(Progress::VerifyingEndpoint {
            url: request.api_url.clone(),
        });
        if !self.services.probe.verify_public_endpoint(&request.api_url).await {
            let cause = HostError::Unreachable {
                url: request.api_url.clone(),
                hints: troubleshooting_hints(&request.api_url),
            };
            return Err(self.roll_back(saga, &mut handle, cause).await);
        }
        self.progress.emit(Progress::EndpointReachable {
            url: request.api_url.clone(),
        });

        saga.advance(SagaState::Registering);
        if handle.refresh_status() != ProcessState::Running {
            let cause = HostError::Process(format!(
                "inference server {} exited before registration",
                handle.pid
            ));
            return Err(self.roll_back(saga, &mut handle, cause).await);
        }

        self.progress.emit(Progress::RegisteringOnChain);
        let registration = HostRegistration {
            api_url: request.api_url.clone(),
            models: request.models.clone(),
            price_per_token: request.price_per_token,
            stake_amount: request.stake_amount.clone(),
        };
        let receipt = match registrar.register_host(&registration).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.roll_back(saga, &mut handle, e.into()).await),
        };
        self.progress.emit(Progress::Registered {
            transaction_hash: receipt.transaction_hash.clone(),
        });

        saga.advance(SagaState::Persisting);
        self.progress.emit(Progress::SavingState);
        let identity = registrar.identity();
        let mut config = HostConfig {
            wallet_address: identity.wallet_address,
            network: identity.network,
            rpc_url: identity.rpc_url,
            inference_port: endpoint.port,
            public_url: request.api_url,
            models: request.models,
            price_per_token: request.price_per_token,
            process_pid: None,
            node_start_time: None,
        };
        if let Err(e) = self.persist_running(&mut config, handle.pid).await {
            return Err(self.roll_back(saga, &mut handle, e).await);
        }

        saga.advance(SagaState::Done);
        info!(
            pid = handle.pid,
            url = %config.public_url,
            tx = %receipt.transaction_hash,
            "Host registered"
        );

        Ok(RegisterOutcome {
            transaction_hash: receipt.transaction_hash,
            host_info: receipt.host_info,
            pid: handle.pid,
            config,
        })
    }

    async fn validate_registration(&self, request: &RegisterRequest) -> Result<HostPort> {
        validate_public_url(&request.api_url).check()?;
        validate_models(&request.models).check()?;
        validate_price(request.price_per_token).check()?;
        validate_stake_amount(&request.stake_amount).check()?;

        let endpoint = extract_host_port(&request.api_url)?;
        self.check_local_environment(&endpoint)?;

        let requirements = self.services.registrar.validate_registration_requirements().await?;
        if !requirements.can_register {
            return Err(HostError::Validation(format!(
                "Registration requirements not met: {}",
                requirements.errors.join("; ")
            )));
        }

        Ok(endpoint)
    }

    fn check_local_environment(&self, endpoint: &HostPort) -> Result<()> {
        if !self.services.preflight.binary_available() {
            return Err(HostError::Validation(
                "Inference server binary not found. Install llm-node or set LLM_HOST_NODE_BIN".to_string(),
            ));
        }
        if !self.services.preflight.port_available(endpoint.port) {
            return Err(HostError::Validation(format!("Port {} is already in use", endpoint.port)));
        }
        Ok(())
    }

    async fn spawn_node(
        &self,
        public_url: &str,
        endpoint: &HostPort,
        models: &[String],
        log_level: &str,
        output: OutputMode,
    ) -> Result<ProcessHandle> {
        if warn_if_localhost(public_url) {
            self.progress.emit(Progress::LocalhostWarning {
                url: public_url.to_string(),
            });
        }

        let host = endpoint.bind_host().to_string();
        self.progress.emit(Progress::StartingNode {
            host: host.clone(),
            port: endpoint.port,
        });

        let handle = self
            .services
            .launcher
            .spawn_inference_server(InferenceConfig {
                port: endpoint.port,
                host,
                public_url: public_url.to_string(),
                models: models.to_vec(),
                log_level: log_level.to_string(),
                output,
            })
            .await?;

        self.progress.emit(Progress::NodeStarted { pid: handle.pid });
        Ok(handle)
    }

    /// Force-stop the node spawned by the saga and hand back the original failure
    async fn roll_back(&self, saga: &mut SagaTracker, handle: &mut ProcessHandle, cause: HostError) -> HostError {
        saga.advance(SagaState::RollingBack);
        warn!(pid = handle.pid, error = %cause, "Registration failed, rolling back");
        self.progress.emit(Progress::RollingBack {
            pid: handle.pid,
            reason: cause.to_string(),
        });

        if let Err(e) = self.services.launcher.stop_inference_server(handle, true).await {
            error!(pid = handle.pid, error = %e, "Rollback could not stop the inference server");
        }

        saga.advance(SagaState::Failed);
        cause
    }

    /// Write the PID record and the config markers as one unit
    async fn persist_running(&self, config: &mut HostConfig, pid: u32) -> Result<PidRecord> {
        let record = self.services.pids.save_pid_with_url(pid, &config.public_url).await?;
        config.mark_running(pid, record.start_time);

        if let Err(e) = self.services.config.save(config).await {
            if let Err(cleanup) = self.services.pids.remove_pid().await {
                warn!(pid, error = %cleanup, "Failed to remove PID record after config save failure");
            }
            return Err(e.into());
        }
        Ok(record)
    }

    /// Launch the node for an already registered host
    pub async fn start(&self, options: StartOptions) -> Result<StartOutcome> {
        let mut config = self.services.config.load().await?.ok_or(HostError::NoConfig)?;
        if config.public_url.trim().is_empty() {
            return Err(HostError::NoPublicUrl);
        }

        if let Some(record) = self.services.pids.get_pid_info().await? {
            info!(pid = record.pid, "Node already running");
            self.progress.emit(Progress::AlreadyRunning { pid: record.pid });
            return Ok(StartOutcome::AlreadyRunning(record));
        }

        let endpoint = extract_host_port(&config.public_url)?;
        self.check_local_environment(&endpoint)?;

        let output = match options.mode {
            RunMode::Daemon => OutputMode::File(self.services.node_log.clone()),
            RunMode::Foreground => OutputMode::Capture,
        };
        let mut handle = self
            .spawn_node(&config.public_url, &endpoint, &config.models, &options.log_level, output)
            .await?;

        config.inference_port = endpoint.port;
        if let Err(e) = self.persist_running(&mut config, handle.pid).await {
            if let Err(stop) = self.services.launcher.stop_inference_server(&mut handle, true).await {
                error!(pid = handle.pid, error = %stop, "Could not stop unrecorded inference server");
            }
            return Err(e);
        }

        info!(pid = handle.pid, mode = ?options.mode, url = %config.public_url, "Node started");
        Ok(StartOutcome::Started(handle))
    }

    /// Stop the recorded node; succeeds without action when nothing is running
    pub async fn stop(&self, options: StopOptions) -> Result<StopOutcome> {
        let Some(record) = self.services.pids.get_pid_info().await? else {
            self.progress.emit(Progress::NotRunning);
            return Ok(StopOutcome::NotRunning);
        };

        let report = self.stop_record(&record, options).await?;
        Ok(StopOutcome::Stopped {
            pid: record.pid,
            report,
        })
    }

    async fn stop_record(&self, record: &PidRecord, options: StopOptions) -> Result<StopReport> {
        self.progress.emit(Progress::StoppingNode { pid: record.pid });

        // The record goes only after the process is confirmed gone
        let report = self.services.daemon.stop_daemon(record.pid, options).await?;
        self.services.pids.remove_pid().await?;
        self.clear_process_fields().await?;

        info!(pid = record.pid, report = ?report, "Node stopped");
        self.progress.emit(Progress::NodeStopped { pid: record.pid });
        Ok(report)
    }

    async fn clear_process_fields(&self) -> Result<()> {
        if let Some(mut config) = self.services.config.load().await? {
            if config.has_process() {
                config.clear_process();
                self.services.config.save(&config).await?;
            }
        }
        Ok(())
    }

    /// Leave the marketplace and stop the local node if one is running
    pub async fn unregister(&self) -> Result<UnregisterOutcome> {
        let registrar = &self.services.registrar;

        self.progress.emit(Progress::CheckingRegistration);
        let status = registrar.check_registration_status().await?;
        if !status.is_registered {
            self.progress.emit(Progress::NotRegistered);
            return Ok(UnregisterOutcome::NotRegistered);
        }

        self.progress.emit(Progress::Unregistering {
            staked_amount: status.staked_amount.clone(),
        });
        let transaction_hash = registrar.unregister_host().await?;

        let confirmed = !registrar.check_registration_status().await?.is_registered;
        if !confirmed {
            warn!(tx = %transaction_hash, "Host still reports active after unregister");
        }
        self.progress.emit(Progress::Unregistered {
            transaction_hash: transaction_hash.clone(),
            confirmed,
        });

        // The host is already off-chain here, so a local failure must not hide the transaction
        let (stopped_pid, stop_error) = match self.stop_after_unregister().await {
            Ok(pid) => (pid, None),
            Err(e) => {
                error!(tx = %transaction_hash, error = %e, "Host unregistered but the local node could not be stopped");
                (None, Some(e.to_string()))
            }
        };

        Ok(UnregisterOutcome::Unregistered {
            transaction_hash,
            confirmed,
            stopped_pid,
            stop_error,
        })
    }

    async fn stop_after_unregister(&self) -> Result<Option<u32>> {
        match self.services.pids.get_pid_info().await? {
            Some(record) => {
                self.stop_record(&record, StopOptions::default()).await?;
                Ok(Some(record.pid))
            }
            None => Ok(None),
        }
    }

    /// Config plus live process, clearing process markers left by a dead node
    pub async fn status(&self) -> Result<HostStatus> {
        let process = self.services.pids.get_pid_info().await?;
        let mut config = self.services.config.load().await?;

        if let Some(config) = config.as_mut() {
            if process.is_none() && config.has_process() {
                info!(pid = ?config.process_pid, "Clearing process markers of a node that is no longer running");
                config.clear_process();
                self.services.config.save(config).await?;
            }
        }

        Ok(HostStatus { config, process })
    }

    /// Tear down a foreground node once the operator interrupts or it exits
    pub async fn finish_foreground(&self, handle: &mut ProcessHandle) -> Result<ProcessState> {
        if handle.refresh_status() == ProcessState::Running {
            self.progress.emit(Progress::StoppingNode { pid: handle.pid });
            if let Err(e) = self.services.launcher.stop_inference_server(handle, false).await {
                warn!(pid = handle.pid, error = %e, "Graceful stop failed, force killing");
                self.services.launcher.stop_inference_server(handle, true).await?;
            }
        }

        self.services.pids.remove_pid().await?;
        self.clear_process_fields().await?;
        self.progress.emit(Progress::NodeStopped { pid: handle.pid });
        Ok(handle.status())
    }
}
