//! llm-host: operator CLI for an inference host on the compute marketplace
//!
//! ## Commands
//!
//! ### Lifecycle
//! - `register`: start the node, verify it is publicly reachable, then stake and register
//! - `start`: launch the node for a registered host (`--daemon` or `--foreground`)
//! - `stop`: stop the running node, graceful first (`--timeout`, `--force`)
//! - `unregister`: leave the marketplace and stop the local node
//! - `status`: local configuration and process state
//!
//! ### Administration
//! - `add-stake`, `update-url`, `update-models`, `update-pricing`, `set-model-pricing`, `info`
//! - `token set|clear`: gateway API token in the OS keyring
//!
//! ## Environment Variables
//!
//! - `LLM_HOST_HOME`: installation directory (default: OS config dir + `llm-host`)
//! - `LLM_HOST_RPC_URL`: chain gateway endpoint (default: http://127.0.0.1:8545)
//! - `LLM_HOST_NETWORK`: network name (default: base-sepolia)
//! - `LLM_HOST_WALLET`: host wallet address
//! - `LLM_HOST_NODE_BIN`: inference server binary override
//! - `LLM_HOST_GATEWAY_TOKEN`: gateway API token, overrides the keyring
//!
//! A `.env` file in the working directory is loaded first.

mod output;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use host_core::admin::{parse_models_file, AdminService};
use host_core::chain::{ChainIdentity, GatewayClient, HostInfo, PriceType};
use host_core::config::{
    delete_gateway_token, save_gateway_token, ConfigStore, FileConfigStore, HostPaths, Settings,
    DEFAULT_NETWORK, DEFAULT_RPC_URL, ENV_GATEWAY_TOKEN, ENV_HOME, ENV_NETWORK, ENV_NODE_BIN, ENV_RPC_URL, ENV_WALLET,
};
use host_core::orchestrator::DEFAULT_LOG_LEVEL;
use host_core::pid::PidRecord;
use host_core::supervisor::{LogLine, ProcessHandle, ProcessState, StopOptions, DEFAULT_STOP_TIMEOUT_MS};
use host_core::{
    HostServices, HostStatus, Orchestrator, Progress, ProgressSink, RegisterOutcome, RegisterRequest, RunMode,
    StartOptions, StartOutcome, StopOutcome, UnregisterOutcome,
};

const DEFAULT_PRICE_PER_TOKEN: u64 = 2000;
const DEFAULT_STAKE_AMOUNT: &str = "1000";

#[derive(Parser)]
#[command(name = "llm-host", version, about = "Run an inference host on the compute marketplace")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Installation directory
    #[arg(long, global = true, env = ENV_HOME)]
    home: Option<PathBuf>,

    /// Chain gateway endpoint
    #[arg(long, global = true, env = ENV_RPC_URL)]
    rpc_url: Option<String>,

    #[arg(long, global = true, env = ENV_NETWORK)]
    network: Option<String>,

    /// Host wallet address
    #[arg(long, global = true, env = ENV_WALLET)]
    wallet: Option<String>,

    /// Inference server binary
    #[arg(long, global = true, env = ENV_NODE_BIN)]
    node_bin: Option<PathBuf>,

    #[arg(long, global = true, env = ENV_GATEWAY_TOKEN, hide_env_values = true)]
    gateway_token: Option<String>,

    /// Reachability probe attempts
    #[arg(long, global = true, default_value_t = 10)]
    probe_attempts: u32,

    /// Delay between reachability probe attempts
    #[arg(long, global = true, default_value_t = 2000)]
    probe_interval_ms: u64,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node, verify it is reachable, then stake and register on-chain
    Register {
        /// Public URL clients will use, with an explicit port
        #[arg(long)]
        api_url: String,
        /// Models as <repo>:<file>
        #[arg(long, num_args = 1.., required = true)]
        models: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_PRICE_PER_TOKEN)]
        price: u64,
        #[arg(long, default_value = DEFAULT_STAKE_AMOUNT)]
        stake: String,
        #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
        log_level: String,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Start the inference node of a registered host
    Start {
        #[arg(long, conflicts_with = "foreground")]
        daemon: bool,
        #[arg(long)]
        foreground: bool,
        #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
        log_level: String,
    },

    /// Stop the running inference node
    Stop {
        /// Grace period in milliseconds before a forced kill
        #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT_MS)]
        timeout: u64,
        #[arg(long)]
        force: bool,
    },

    /// Unregister the host and stop the local node
    Unregister {
        #[arg(short, long)]
        yes: bool,
    },

    /// Stake additional tokens
    AddStake {
        amount: String,
        #[arg(long)]
        skip_approval: bool,
    },

    /// Change the advertised API URL
    UpdateUrl { url: String },

    /// Replace the supported model list
    UpdateModels {
        #[arg(required_unless_present = "file")]
        models: Vec<String>,
        /// One model per line (# comments allowed) or a JSON array
        #[arg(long, conflicts_with = "models")]
        file: Option<PathBuf>,
    },

    /// Change the default price per token
    UpdatePricing {
        #[arg(long)]
        price: u64,
    },

    /// Set the price of a single model
    SetModelPricing {
        #[arg(long)]
        model: String,
        #[arg(long)]
        price: u64,
        #[arg(long, value_enum, default_value_t = PriceTypeArg::Usdc)]
        price_type: PriceTypeArg,
    },

    /// Show on-chain host information
    Info {
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Show local configuration and node process state
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Manage the gateway API token stored in the OS keyring
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    Set { token: String },
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriceTypeArg {
    Usdc,
    Eth,
}

impl From<PriceTypeArg> for PriceType {
    fn from(arg: PriceTypeArg) -> Self {
        match arg {
            PriceTypeArg::Usdc => PriceType::Usdc,
            PriceTypeArg::Eth => PriceType::Eth,
        }
    }
}

/// Everything a command needs, resolved once per invocation
struct Invocation {
    settings: Settings,
}

impl Invocation {
    async fn resolve(global: &GlobalArgs) -> Result<Self> {
        let paths = HostPaths::resolve(global.home.clone()).context("Failed to resolve installation directory")?;
        let stored = FileConfigStore::new(paths.config_file())
            .load()
            .await
            .context("Failed to read host configuration")?;

        let mut settings = Settings::new(paths);
        // Flags and environment win over the identity stored at registration
        settings.rpc_url = global
            .rpc_url
            .clone()
            .or_else(|| stored.as_ref().map(|c| c.rpc_url.clone()))
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        settings.network = global
            .network
            .clone()
            .or_else(|| stored.as_ref().map(|c| c.network.clone()))
            .unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        settings.wallet_address = global
            .wallet
            .clone()
            .or_else(|| stored.as_ref().map(|c| c.wallet_address.clone()));
        settings.node_binary = global.node_bin.clone();
        settings.gateway_token = global.gateway_token.clone();
        settings.probe.attempts = global.probe_attempts;
        settings.probe.interval = Duration::from_millis(global.probe_interval_ms);

        debug!(
            home = %settings.paths.home.display(),
            rpc_url = %settings.rpc_url,
            network = %settings.network,
            "Resolved settings"
        );
        Ok(Self { settings })
    }

    /// Chain identity; commands that sign transactions need a wallet
    fn identity(&self, wallet_required: bool) -> Result<ChainIdentity> {
        let wallet_address = match &self.settings.wallet_address {
            Some(wallet) => wallet.clone(),
            None if wallet_required => bail!("Wallet address required. Pass --wallet or set {}", ENV_WALLET),
            None => String::new(),
        };
        Ok(ChainIdentity {
            wallet_address,
            network: self.settings.network.clone(),
            rpc_url: self.settings.rpc_url.clone(),
        })
    }

    fn gateway(&self, wallet_required: bool) -> Result<Arc<GatewayClient>> {
        let client = GatewayClient::new(self.identity(wallet_required)?, self.settings.resolve_gateway_token())
            .context("Failed to create gateway client")?;
        Ok(Arc::new(client))
    }

    fn orchestrator(&self, wallet_required: bool, progress: ProgressSink) -> Result<Orchestrator> {
        let services = HostServices::system(&self.settings, self.gateway(wallet_required)?)?;
        Ok(Orchestrator::new(services, progress))
    }

    fn admin(&self, wallet_required: bool, progress: ProgressSink) -> Result<AdminService> {
        let gateway = self.gateway(wallet_required)?;
        let store = Arc::new(FileConfigStore::new(self.settings.paths.config_file()));
        Ok(AdminService::new(gateway.clone(), gateway, store, progress))
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    if let Err(e) = run(cli).await {
        output::failure(&e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "llm_host=debug,host_core=debug"
    } else {
        "llm_host=info,host_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // stderr keeps --json output on stdout clean
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Invocation::resolve(&cli.global).await?;
    let report = with_progress(output::progress, |progress| execute(cli.cmd, &ctx, progress)).await?;
    report.render()
}

/// Run `work` with a progress sink and return once every event it emitted has been printed
///
/// All senders must be dropped by the time `work` completes, otherwise the printer never ends.
async fn with_progress<W, F, T>(mut render: impl FnMut(&Progress) + Send + 'static, work: W) -> T
where
    W: FnOnce(ProgressSink) -> F,
    F: Future<Output = T>,
{
    let (progress, mut events) = ProgressSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render(&event);
        }
    });

    let result = work(progress).await;
    if let Err(e) = printer.await {
        warn!(error = %e, "Progress printer failed");
    }
    result
}

/// Final outcome of a command, printed after its progress lines
enum Report {
    Cancelled,
    Registered(RegisterOutcome),
    AlreadyRunning(PidRecord),
    Started { handle: ProcessHandle, log_file: PathBuf },
    ForegroundStopped { pid: u32, state: ProcessState },
    Stop(StopOutcome),
    Unregister(UnregisterOutcome),
    Transaction { action: &'static str, tx: String },
    Info { info: HostInfo, json: bool },
    Status { status: HostStatus, json: bool },
    Done(&'static str),
}

impl Report {
    fn render(self) -> Result<()> {
        match self {
            Report::Cancelled => output::cancelled(),
            Report::Registered(outcome) => output::registered(&outcome),
            Report::AlreadyRunning(record) => output::already_running(&record),
            Report::Started { handle, log_file } => output::started(&handle, &log_file),
            Report::ForegroundStopped { pid, state } => output::stopped_foreground(pid, state),
            Report::Stop(StopOutcome::NotRunning) => output::not_running(),
            Report::Stop(StopOutcome::Stopped { pid, report }) => output::stopped(pid, report),
            Report::Unregister(UnregisterOutcome::NotRegistered) => output::not_registered(),
            Report::Unregister(outcome @ UnregisterOutcome::Unregistered { .. }) => {
                output::unregistered(&outcome);
                if let UnregisterOutcome::Unregistered {
                    stop_error: Some(e), ..
                } = outcome
                {
                    bail!("Host left the marketplace but the local node is still running ({}); run `llm-host stop`", e);
                }
            }
            Report::Transaction { action, tx } => output::transaction(action, &tx),
            Report::Info { info, json: true } => output::json(&info)?,
            Report::Info { info, json: false } => output::host_info(&info),
            Report::Status { status, json: true } => output::json(&serde_json::json!({
                "config": status.config,
                "process": status.process,
            }))?,
            Report::Status { status, json: false } => output::status(&status),
            Report::Done(message) => output::done(message),
        }
        Ok(())
    }
}

/// Run one command; the orchestrator and its progress sink are dropped on return
async fn execute(cmd: Commands, ctx: &Invocation, progress: ProgressSink) -> Result<Report> {
    let report = match cmd {
        Commands::Register {
            api_url,
            models,
            price,
            stake,
            log_level,
            yes,
        } => {
            let request = RegisterRequest {
                api_url,
                models,
                price_per_token: price,
                stake_amount: stake,
                log_level,
            };
            output::register_summary(&request);
            if !yes && !output::confirm("Stake tokens and register this host?", true)? {
                return Ok(Report::Cancelled);
            }

            let orchestrator = ctx.orchestrator(true, progress)?;
            Report::Registered(orchestrator.register(request).await?)
        }

        Commands::Start {
            daemon: _,
            foreground,
            log_level,
        } => {
            let mode = if foreground { RunMode::Foreground } else { RunMode::Daemon };
            let orchestrator = ctx.orchestrator(false, progress)?;

            match orchestrator.start(StartOptions { mode, log_level }).await? {
                StartOutcome::AlreadyRunning(record) => Report::AlreadyRunning(record),
                StartOutcome::Started(handle) if mode == RunMode::Foreground => {
                    run_foreground(&orchestrator, handle).await?
                }
                StartOutcome::Started(handle) => Report::Started {
                    handle,
                    log_file: ctx.settings.paths.node_log_file(),
                },
            }
        }

        Commands::Stop { timeout, force } => {
            let orchestrator = ctx.orchestrator(false, progress)?;
            let options = StopOptions {
                timeout: Duration::from_millis(timeout),
                force,
            };
            Report::Stop(orchestrator.stop(options).await?)
        }

        Commands::Unregister { yes } => {
            if !yes && !output::confirm("Unregister this host and withdraw its stake?", false)? {
                return Ok(Report::Cancelled);
            }
            let orchestrator = ctx.orchestrator(true, progress)?;
            Report::Unregister(orchestrator.unregister().await?)
        }

        Commands::AddStake { amount, skip_approval } => Report::Transaction {
            action: "Stake added",
            tx: ctx.admin(true, progress)?.add_stake(&amount, skip_approval).await?,
        },

        Commands::UpdateUrl { url } => Report::Transaction {
            action: "API URL updated",
            tx: ctx.admin(true, progress)?.update_url(&url).await?,
        },

        Commands::UpdateModels { models, file } => {
            let models = match file {
                Some(path) => {
                    let content = tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read model list {}", path.display()))?;
                    parse_models_file(&content)?
                }
                None => models,
            };
            Report::Transaction {
                action: "Supported models updated",
                tx: ctx.admin(true, progress)?.update_models(&models).await?,
            }
        }

        Commands::UpdatePricing { price } => Report::Transaction {
            action: "Pricing updated",
            tx: ctx.admin(true, progress)?.update_pricing(price).await?,
        },

        Commands::SetModelPricing {
            model,
            price,
            price_type,
        } => Report::Transaction {
            action: "Model pricing set",
            tx: ctx
                .admin(true, progress)?
                .set_model_pricing(&model, price, price_type.into())
                .await?,
        },

        Commands::Info { address, json } => {
            let info = ctx
                .admin(address.is_none(), progress)?
                .info(address.as_deref())
                .await?;
            Report::Info { info, json }
        }

        Commands::Status { json } => {
            let status = ctx.orchestrator(false, progress)?.status().await?;
            Report::Status { status, json }
        }

        Commands::Token { action } => match action {
            TokenAction::Set { token } => {
                save_gateway_token(&token).context("Failed to store gateway token")?;
                Report::Done("Gateway token stored in the OS keyring")
            }
            TokenAction::Clear => {
                delete_gateway_token().context("Failed to delete gateway token")?;
                Report::Done("Gateway token removed from the OS keyring")
            }
        },
    };

    Ok(report)
}

/// Echo node output until Ctrl-C or until the node exits, then tear it down
async fn run_foreground(orchestrator: &Orchestrator, mut handle: ProcessHandle) -> Result<Report> {
    let mut logs = handle.take_log_stream();
    output::foreground(&handle);

    let exited = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!(pid = handle.pid, "Interrupt received, stopping node");
                break None;
            }
            state = handle.wait() => break Some(state?),
            Some(line) = next_line(&mut logs) => output::node_log(&line),
        }
    };

    // Lines written just before exit are still queued
    if let Some(rx) = logs.as_mut() {
        while let Ok(line) = rx.try_recv() {
            output::node_log(&line);
        }
    }

    let state = orchestrator.finish_foreground(&mut handle).await?;
    match exited {
        Some(ProcessState::Crashed) => bail!("Inference server exited unexpectedly"),
        Some(_) => Ok(Report::Done("Inference server exited")),
        None => Ok(Report::ForegroundStopped { pid: handle.pid, state }),
    }
}

async fn next_line(logs: &mut Option<UnboundedReceiver<LogLine>>) -> Option<LogLine> {
    match logs {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
