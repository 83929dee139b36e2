/*!
Test harness wiring the doubles into an orchestrator

`TestHost` owns one double per seam, all sharing a call log and a process
table. Tests tweak the doubles, build an orchestrator, run a command, then
assert on calls, persisted state and progress events.
*/

use host_core::admin::AdminService;
use host_core::config::{ConfigStore, HostConfig};
use host_core::orchestrator::{HostServices, Orchestrator, RegisterRequest, DEFAULT_LOG_LEVEL};
use host_core::{Progress, ProgressSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::doubles::{
    CallLog, MemoryConfigStore, MemoryPidStore, MockChain, MockDaemon, MockLauncher, ProcessTable, StaticPreflight,
    StaticProbe, TEST_NETWORK, TEST_RPC_URL, TEST_WALLET,
};

pub const TEST_MODEL: &str = "TheBloke/Llama-2-7B-GGUF:llama-2-7b.Q4_K_M.gguf";
pub const TEST_PUBLIC_URL: &str = "http://node.example.com:8080";

pub struct TestHost {
    pub log: CallLog,
    pub processes: ProcessTable,
    pub chain: Arc<MockChain>,
    pub launcher: Arc<MockLauncher>,
    pub daemon: Arc<MockDaemon>,
    pub pids: Arc<MemoryPidStore>,
    pub config: Arc<MemoryConfigStore>,
    pub probe: Arc<StaticProbe>,
    pub preflight: Arc<StaticPreflight>,
}

impl TestHost {
    /// Healthy environment: unregistered host, reachable endpoint, nothing running
    pub fn new() -> Self {
        init_tracing();
        let log = CallLog::new();
        let processes = ProcessTable::default();

        Self {
            chain: Arc::new(MockChain::new(log.clone())),
            launcher: Arc::new(MockLauncher::new(log.clone(), processes.clone())),
            daemon: Arc::new(MockDaemon::new(log.clone(), processes.clone())),
            pids: Arc::new(MemoryPidStore::new(log.clone(), processes.clone())),
            config: Arc::new(MemoryConfigStore::new(log.clone())),
            probe: Arc::new(StaticProbe::new(log.clone(), true)),
            preflight: Arc::new(StaticPreflight::healthy()),
            log,
            processes,
        }
    }

    /// Seed a persisted config, plus a live process when `pid` is given
    pub fn with_running_node(self, pid: Option<u32>) -> Self {
        let mut config = sample_config();
        if let Some(pid) = pid {
            self.processes.insert(pid);
            self.pids.seed(pid, &config.public_url);
            config.mark_running(pid, chrono::Utc::now());
        }
        self.config.seed(config);
        self
    }

    pub fn services(&self) -> HostServices {
        HostServices {
            registrar: self.chain.clone(),
            launcher: self.launcher.clone(),
            daemon: self.daemon.clone(),
            pids: self.pids.clone(),
            config: self.config.clone(),
            probe: self.probe.clone(),
            preflight: self.preflight.clone(),
            node_log: PathBuf::from("node.log"),
        }
    }

    pub fn orchestrator(&self) -> (Orchestrator, UnboundedReceiver<Progress>) {
        let (progress, events) = ProgressSink::channel();
        (Orchestrator::new(self.services(), progress), events)
    }

    /// Same doubles, but config goes through `store` instead of memory
    pub fn orchestrator_with_config(&self, store: Arc<dyn ConfigStore>) -> (Orchestrator, UnboundedReceiver<Progress>) {
        let (progress, events) = ProgressSink::channel();
        let services = HostServices {
            config: store,
            ..self.services()
        };
        (Orchestrator::new(services, progress), events)
    }

    pub fn admin(&self) -> (AdminService, UnboundedReceiver<Progress>) {
        let (progress, events) = ProgressSink::channel();
        let admin = AdminService::new(self.chain.clone(), self.chain.clone(), self.config.clone(), progress);
        (admin, events)
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sample_config() -> HostConfig {
    HostConfig {
        wallet_address: TEST_WALLET.to_string(),
        network: TEST_NETWORK.to_string(),
        rpc_url: TEST_RPC_URL.to_string(),
        inference_port: 8080,
        public_url: TEST_PUBLIC_URL.to_string(),
        models: vec![TEST_MODEL.to_string()],
        price_per_token: 2000,
        process_pid: None,
        node_start_time: None,
    }
}

pub fn register_request() -> RegisterRequest {
    RegisterRequest {
        api_url: TEST_PUBLIC_URL.to_string(),
        models: vec![TEST_MODEL.to_string()],
        price_per_token: 2000,
        stake_amount: "1000".to_string(),
        log_level: DEFAULT_LOG_LEVEL.to_string(),
    }
}

/// Everything emitted so far
pub fn drain(events: &mut UnboundedReceiver<Progress>) -> Vec<Progress> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Test logging, honours `RUST_LOG`; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
