//! Progress events emitted by the orchestrator
//!
//! Events are advisory milestones, delivered in order over an unbounded
//! channel. The presentation layer decides how to render them.

use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    CheckingRegistration,
    ValidatingRequirements,
    LocalhostWarning { url: String },
    StartingNode { host: String, port: u16 },
    NodeStarted { pid: u32 },
    VerifyingEndpoint { url: String },
    EndpointReachable { url: String },
    RollingBack { pid: u32, reason: String },
    RegisteringOnChain,
    Registered { transaction_hash: String },
    SavingState,
    AlreadyRunning { pid: u32 },
    StoppingNode { pid: u32 },
    NodeStopped { pid: u32 },
    NotRunning,
    NotRegistered,
    Unregistering { staked_amount: String },
    Unregistered { transaction_hash: String, confirmed: bool },
    ApprovingTokens { amount: String },
    SubmittingTransaction { action: &'static str },
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::CheckingRegistration => write!(f, "Checking registration status"),
            Progress::ValidatingRequirements => write!(f, "Checking requirements"),
            Progress::LocalhostWarning { url } => write!(
                f,
                "Public URL {} is localhost; remote clients will not reach this node",
                url
            ),
            Progress::StartingNode { host, port } => write!(f, "Starting node on {}:{}", host, port),
            Progress::NodeStarted { pid } => write!(f, "Node started (PID: {})", pid),
            Progress::VerifyingEndpoint { url } => write!(f, "Verifying public endpoint {}", url),
            Progress::EndpointReachable { url } => write!(f, "Public endpoint {} is reachable", url),
            Progress::RollingBack { pid, reason } => {
                write!(f, "Rolling back: stopping node (PID: {}) after: {}", pid, reason)
            }
            Progress::RegisteringOnChain => write!(f, "Registering on-chain"),
            Progress::Registered { transaction_hash } => {
                write!(f, "Registered (transaction: {})", transaction_hash)
            }
            Progress::SavingState => write!(f, "Saving host state"),
            Progress::AlreadyRunning { pid } => write!(f, "Node is already running (PID: {})", pid),
            Progress::StoppingNode { pid } => write!(f, "Stopping node (PID: {})", pid),
            Progress::NodeStopped { pid } => write!(f, "Node stopped (PID: {})", pid),
            Progress::NotRunning => write!(f, "Node is not running"),
            Progress::NotRegistered => write!(f, "Host is not registered"),
            Progress::Unregistering { staked_amount } => {
                write!(f, "Unregistering host (staked: {})", staked_amount)
            }
            Progress::Unregistered { transaction_hash, confirmed } => {
                if *confirmed {
                    write!(f, "Unregistered (transaction: {})", transaction_hash)
                } else {
                    write!(
                        f,
                        "Unregister submitted (transaction: {}) but host still reports active",
                        transaction_hash
                    )
                }
            }
            Progress::ApprovingTokens { amount } => write!(f, "Approving {} tokens for staking", amount),
            Progress::SubmittingTransaction { action } => write!(f, "Submitting {} transaction", action),
        }
    }
}

/// Sending half of the progress stream; a disabled sink drops events
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<Progress>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::UnboundedSender<Progress>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: Progress) {
        debug!(event = %event, "Progress");
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is rendering; the operation carries on
            let _ = tx.send(event);
        }
    }
}
