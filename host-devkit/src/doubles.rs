/*!
In-memory doubles for every orchestrator seam

All doubles share a `CallLog`, so tests can assert on the order of calls across
collaborators, and a `ProcessTable` standing in for the OS process list.
*/

use async_trait::async_trait;
use chrono::Utc;
use host_core::chain::{
    ChainError, ChainIdentity, ChainRegistrar, HostAdmin, HostInfo, HostRegistration, PriceType,
    RegistrationReceipt, RegistrationStatus, RequirementsCheck, TokenApprovals,
};
use host_core::config::{ConfigError, ConfigStore, HostConfig};
use host_core::pid::{PidRecord, PidStore};
use host_core::probe::EndpointProbe;
use host_core::supervisor::{
    DaemonControl, InferenceConfig, InferenceLauncher, ProcessHandle, StopOptions, StopReport,
};
use host_core::validator::Preflight;
use host_core::{HostError, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

pub const TEST_WALLET: &str = "0xHOST";
pub const TEST_NETWORK: &str = "base-sepolia";
pub const TEST_RPC_URL: &str = "http://127.0.0.1:8545";
const FIRST_PID: u32 = 40_000;

/// One observed collaborator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CheckRegistrationStatus,
    ValidateRequirements,
    RegisterHost(HostRegistration),
    UnregisterHost,
    CheckAllowance,
    ApproveToken(String),
    AddStake(String),
    UpdateApiUrl(String),
    UpdateModels(Vec<String>),
    UpdatePricing(u64),
    SetModelPricing { model: String, price: u64, price_type: PriceType },
    HostInfo(Option<String>),
    Spawn { host: String, port: u16 },
    StopInference { pid: u32, force: bool },
    StopDaemon { pid: u32, force: bool, timeout_ms: u64 },
    GetPidInfo,
    CleanupStalePid,
    SavePid { pid: u32, public_url: String },
    RemovePid,
    LoadConfig,
    SaveConfig,
    Probe(String),
}

/// Ordered record of calls, shared by all doubles of one test
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Index of the first matching call
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(predicate)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Fake OS process list
#[derive(Debug, Clone, Default)]
pub struct ProcessTable {
    alive: Arc<Mutex<HashSet<u32>>>,
}

impl ProcessTable {
    pub fn insert(&self, pid: u32) {
        self.alive.lock().insert(pid);
    }

    pub fn kill(&self, pid: u32) -> bool {
        self.alive.lock().remove(&pid)
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().contains(&pid)
    }
}

#[derive(Debug)]
struct ChainState {
    status: RegistrationStatus,
    requirements: RequirementsCheck,
    register_failure: Option<String>,
    allowance: String,
    stays_active: bool,
    models: Vec<String>,
    price_per_token: Option<u64>,
}

/// Chain collaborator implementing registrar, approvals and admin
pub struct MockChain {
    log: CallLog,
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            state: Mutex::new(ChainState {
                status: RegistrationStatus {
                    is_registered: false,
                    host_address: TEST_WALLET.to_string(),
                    api_url: String::new(),
                    staked_amount: "0".to_string(),
                },
                requirements: RequirementsCheck {
                    can_register: true,
                    errors: Vec::new(),
                },
                register_failure: None,
                allowance: "0".to_string(),
                stays_active: false,
                models: Vec::new(),
                price_per_token: None,
            }),
        }
    }

    pub fn set_registered(&self, api_url: &str, staked_amount: &str) {
        let mut state = self.state.lock();
        state.status.is_registered = true;
        state.status.api_url = api_url.to_string();
        state.status.staked_amount = staked_amount.to_string();
    }

    pub fn set_requirement_errors(&self, errors: Vec<String>) {
        let mut state = self.state.lock();
        state.requirements = RequirementsCheck {
            can_register: errors.is_empty(),
            errors,
        };
    }

    /// `register_host` reverts with this reason
    pub fn fail_registration(&self, reason: &str) {
        self.state.lock().register_failure = Some(reason.to_string());
    }

    pub fn set_allowance(&self, allowance: &str) {
        self.state.lock().allowance = allowance.to_string();
    }

    /// Status keeps reporting registered after unregister
    pub fn stay_active_after_unregister(&self) {
        self.state.lock().stays_active = true;
    }

    pub fn status(&self) -> RegistrationStatus {
        self.state.lock().status.clone()
    }

    fn info(state: &ChainState, address: &str) -> HostInfo {
        HostInfo {
            address: address.to_string(),
            api_url: state.status.api_url.clone(),
            models: state.models.clone(),
            staked_amount: state.status.staked_amount.clone(),
            is_active: state.status.is_registered,
            price_per_token: state.price_per_token,
        }
    }
}

#[async_trait]
impl ChainRegistrar for MockChain {
    fn identity(&self) -> ChainIdentity {
        ChainIdentity {
            wallet_address: TEST_WALLET.to_string(),
            network: TEST_NETWORK.to_string(),
            rpc_url: TEST_RPC_URL.to_string(),
        }
    }

    async fn check_registration_status(&self) -> std::result::Result<RegistrationStatus, ChainError> {
        self.log.record(Call::CheckRegistrationStatus);
        Ok(self.state.lock().status.clone())
    }

    async fn validate_registration_requirements(&self) -> std::result::Result<RequirementsCheck, ChainError> {
        self.log.record(Call::ValidateRequirements);
        Ok(self.state.lock().requirements.clone())
    }

    async fn register_host(
        &self,
        registration: &HostRegistration,
    ) -> std::result::Result<RegistrationReceipt, ChainError> {
        self.log.record(Call::RegisterHost(registration.clone()));
        let mut state = self.state.lock();
        if let Some(reason) = &state.register_failure {
            return Err(ChainError::Reverted(reason.clone()));
        }

        state.status.is_registered = true;
        state.status.api_url = registration.api_url.clone();
        state.status.staked_amount = registration.stake_amount.clone();
        state.models = registration.models.clone();
        state.price_per_token = Some(registration.price_per_token);

        Ok(RegistrationReceipt {
            success: true,
            transaction_hash: "0xregister".to_string(),
            host_info: Self::info(&state, TEST_WALLET),
        })
    }

    async fn unregister_host(&self) -> std::result::Result<String, ChainError> {
        self.log.record(Call::UnregisterHost);
        let mut state = self.state.lock();
        if !state.stays_active {
            state.status.is_registered = false;
            state.status.staked_amount = "0".to_string();
        }
        Ok("0xunregister".to_string())
    }
}

#[async_trait]
impl TokenApprovals for MockChain {
    async fn check_allowance(&self) -> std::result::Result<String, ChainError> {
        self.log.record(Call::CheckAllowance);
        Ok(self.state.lock().allowance.clone())
    }

    async fn approve_token(&self, amount: &str) -> std::result::Result<String, ChainError> {
        self.log.record(Call::ApproveToken(amount.to_string()));
        self.state.lock().allowance = amount.to_string();
        Ok("0xapprove".to_string())
    }
}

#[async_trait]
impl HostAdmin for MockChain {
    async fn host_info(&self, address: Option<&str>) -> std::result::Result<HostInfo, ChainError> {
        self.log.record(Call::HostInfo(address.map(str::to_string)));
        let state = self.state.lock();
        Ok(Self::info(&state, address.unwrap_or(TEST_WALLET)))
    }

    async fn add_stake(&self, amount: &str) -> std::result::Result<String, ChainError> {
        self.log.record(Call::AddStake(amount.to_string()));
        Ok("0xstake".to_string())
    }

    async fn update_api_url(&self, url: &str) -> std::result::Result<String, ChainError> {
        self.log.record(Call::UpdateApiUrl(url.to_string()));
        self.state.lock().status.api_url = url.to_string();
        Ok("0xurl".to_string())
    }

    async fn update_supported_models(&self, models: &[String]) -> std::result::Result<String, ChainError> {
        self.log.record(Call::UpdateModels(models.to_vec()));
        self.state.lock().models = models.to_vec();
        Ok("0xmodels".to_string())
    }

    async fn update_pricing(&self, price_per_token: u64) -> std::result::Result<String, ChainError> {
        self.log.record(Call::UpdatePricing(price_per_token));
        self.state.lock().price_per_token = Some(price_per_token);
        Ok("0xpricing".to_string())
    }

    async fn set_model_pricing(
        &self,
        model: &str,
        price: u64,
        price_type: PriceType,
    ) -> std::result::Result<String, ChainError> {
        self.log.record(Call::SetModelPricing {
            model: model.to_string(),
            price,
            price_type,
        });
        Ok("0xmodelpricing".to_string())
    }
}

/// Launcher that hands out fake pids from the process table
pub struct MockLauncher {
    log: CallLog,
    table: ProcessTable,
    next_pid: Mutex<u32>,
    spawn_failure: Mutex<Option<std::io::ErrorKind>>,
}

impl MockLauncher {
    pub fn new(log: CallLog, table: ProcessTable) -> Self {
        Self {
            log,
            table,
            next_pid: Mutex::new(FIRST_PID),
            spawn_failure: Mutex::new(None),
        }
    }

    /// Next spawn fails with this OS error
    pub fn fail_spawn(&self, kind: std::io::ErrorKind) {
        *self.spawn_failure.lock() = Some(kind);
    }
}

#[async_trait]
impl InferenceLauncher for MockLauncher {
    async fn spawn_inference_server(&self, config: InferenceConfig) -> Result<ProcessHandle> {
        self.log.record(Call::Spawn {
            host: config.host.clone(),
            port: config.port,
        });
        if let Some(kind) = self.spawn_failure.lock().take() {
            return Err(HostError::Spawn(std::io::Error::from(kind)));
        }

        let pid = {
            let mut next = self.next_pid.lock();
            let pid = *next;
            *next += 1;
            pid
        };
        self.table.insert(pid);
        Ok(ProcessHandle::detached(pid, config))
    }

    async fn stop_inference_server(&self, handle: &mut ProcessHandle, force: bool) -> Result<()> {
        self.log.record(Call::StopInference { pid: handle.pid, force });
        self.table.kill(handle.pid);
        handle.mark_stopped();
        Ok(())
    }
}

pub struct MockDaemon {
    log: CallLog,
    table: ProcessTable,
    fail_stops: Mutex<bool>,
}

impl MockDaemon {
    pub fn new(log: CallLog, table: ProcessTable) -> Self {
        Self {
            log,
            table,
            fail_stops: Mutex::new(false),
        }
    }

    /// Every stop is recorded, leaves the process alive, and fails
    pub fn fail_stops(&self) {
        *self.fail_stops.lock() = true;
    }
}

#[async_trait]
impl DaemonControl for MockDaemon {
    async fn stop_daemon(&self, pid: u32, options: StopOptions) -> Result<StopReport> {
        self.log.record(Call::StopDaemon {
            pid,
            force: options.force,
            timeout_ms: options.timeout.as_millis() as u64,
        });

        if *self.fail_stops.lock() {
            return Err(HostError::Process(format!("permission denied signalling {}", pid)));
        }

        Ok(match (self.table.kill(pid), options.force) {
            (false, _) => StopReport::AlreadyExited,
            (true, false) => StopReport::Graceful,
            (true, true) => StopReport::Forced,
        })
    }
}

/// PID record kept in memory, liveness answered by the process table
pub struct MemoryPidStore {
    log: CallLog,
    table: ProcessTable,
    record: Mutex<Option<PidRecord>>,
}

impl MemoryPidStore {
    pub fn new(log: CallLog, table: ProcessTable) -> Self {
        Self {
            log,
            table,
            record: Mutex::new(None),
        }
    }

    /// Seed a record without logging a call
    pub fn seed(&self, pid: u32, public_url: &str) {
        *self.record.lock() = Some(PidRecord {
            pid,
            public_url: public_url.to_string(),
            start_time: Utc::now(),
        });
    }

    /// Current record without logging a call
    pub fn peek(&self) -> Option<PidRecord> {
        self.record.lock().clone()
    }
}

#[async_trait]
impl PidStore for MemoryPidStore {
    async fn get_pid_info(&self) -> std::result::Result<Option<PidRecord>, ConfigError> {
        self.log.record(Call::GetPidInfo);
        let record = self.record.lock().clone();
        match record {
            Some(record) if self.table.is_alive(record.pid) => Ok(Some(record)),
            Some(_) => {
                self.cleanup_stale_pid().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn is_process_running(&self, pid: u32) -> bool {
        self.table.is_alive(pid)
    }

    async fn cleanup_stale_pid(&self) -> std::result::Result<(), ConfigError> {
        self.log.record(Call::CleanupStalePid);
        *self.record.lock() = None;
        Ok(())
    }

    async fn save_pid_with_url(&self, pid: u32, public_url: &str) -> std::result::Result<PidRecord, ConfigError> {
        self.log.record(Call::SavePid {
            pid,
            public_url: public_url.to_string(),
        });
        let record = PidRecord {
            pid,
            public_url: public_url.to_string(),
            start_time: Utc::now(),
        };
        *self.record.lock() = Some(record.clone());
        Ok(record)
    }

    async fn remove_pid(&self) -> std::result::Result<(), ConfigError> {
        self.log.record(Call::RemovePid);
        *self.record.lock() = None;
        Ok(())
    }
}

pub struct MemoryConfigStore {
    log: CallLog,
    config: Mutex<Option<HostConfig>>,
    fail_saves: Mutex<bool>,
}

impl MemoryConfigStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            config: Mutex::new(None),
            fail_saves: Mutex::new(false),
        }
    }

    pub fn seed(&self, config: HostConfig) {
        *self.config.lock() = Some(config);
    }

    pub fn peek(&self) -> Option<HostConfig> {
        self.config.lock().clone()
    }

    /// Saves fail with a permission error
    pub fn fail_saves(&self) {
        *self.fail_saves.lock() = true;
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> std::result::Result<Option<HostConfig>, ConfigError> {
        self.log.record(Call::LoadConfig);
        Ok(self.config.lock().clone())
    }

    async fn save(&self, config: &HostConfig) -> std::result::Result<(), ConfigError> {
        self.log.record(Call::SaveConfig);
        if *self.fail_saves.lock() {
            return Err(ConfigError::Io {
                path: "config.toml".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        *self.config.lock() = Some(config.clone());
        Ok(())
    }
}

pub struct StaticProbe {
    log: CallLog,
    reachable: Mutex<bool>,
}

impl StaticProbe {
    pub fn new(log: CallLog, reachable: bool) -> Self {
        Self {
            log,
            reachable: Mutex::new(reachable),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock() = reachable;
    }
}

#[async_trait]
impl EndpointProbe for StaticProbe {
    async fn verify_public_endpoint(&self, url: &str) -> bool {
        self.log.record(Call::Probe(url.to_string()));
        *self.reachable.lock()
    }
}

#[derive(Debug)]
pub struct StaticPreflight {
    binary: Mutex<bool>,
    port: Mutex<bool>,
}

impl StaticPreflight {
    pub fn healthy() -> Self {
        Self {
            binary: Mutex::new(true),
            port: Mutex::new(true),
        }
    }

    pub fn set_binary_available(&self, available: bool) {
        *self.binary.lock() = available;
    }

    pub fn set_port_available(&self, available: bool) {
        *self.port.lock() = available;
    }
}

impl Preflight for StaticPreflight {
    fn binary_available(&self) -> bool {
        *self.binary.lock()
    }

    fn port_available(&self, _port: u16) -> bool {
        *self.port.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_log_positions() {
        let log = CallLog::new();
        log.record(Call::GetPidInfo);
        log.record(Call::RemovePid);

        assert_eq!(log.position(|c| matches!(c, Call::RemovePid)), Some(1));
        assert_eq!(log.count(|c| matches!(c, Call::SaveConfig)), 0);
        log.clear();
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pid_store_follows_process_table() {
        let log = CallLog::new();
        let table = ProcessTable::default();
        let store = MemoryPidStore::new(log.clone(), table.clone());

        table.insert(7);
        store.seed(7, "http://node:8080");
        assert!(store.get_pid_info().await.unwrap().is_some());

        table.kill(7);
        assert!(store.get_pid_info().await.unwrap().is_none());
        assert!(store.peek().is_none());
        assert_eq!(log.count(|c| matches!(c, Call::CleanupStalePid)), 1);
    }
}
