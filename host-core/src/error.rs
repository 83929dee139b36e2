//! Error taxonomy for host lifecycle operations
//!
//! Every failure the orchestrator can surface maps onto one `ErrorKind`, which
//! the CLI uses for exit codes and troubleshooting output.

use crate::chain::ChainError;
use crate::config::ConfigError;

pub type Result<T, E = HostError> = std::result::Result<T, E>;

/// Broad class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or local environment, raised before any side effect
    Validation,
    /// Host state forbids the operation, the operator must change it first
    Precondition,
    /// Advertised endpoint cannot be reached from outside
    Reachability,
    /// On-chain call failed or was reverted
    ChainTransaction,
    /// Spawning or stopping the inference server failed
    Process,
    /// Reading or writing local state failed
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("{0}")]
    Validation(String),

    #[error("Host is already registered (address: {host_address}, API URL: {api_url}, staked: {staked_amount})")]
    AlreadyRegistered {
        host_address: String,
        api_url: String,
        staked_amount: String,
    },

    #[error("Host is not registered")]
    NotRegistered,

    #[error("No configuration found. Run `llm-host register` first")]
    NoConfig,

    #[error("No public URL configured. Re-register the host with --api-url")]
    NoPublicUrl,

    #[error("Public endpoint {url} is not accessible")]
    Unreachable { url: String, hints: Vec<String> },

    #[error("Chain transaction failed: {0}")]
    Chain(#[from] ChainError),

    #[error("Failed to spawn inference server: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Validation(_) => ErrorKind::Validation,
            HostError::AlreadyRegistered { .. }
            | HostError::NotRegistered
            | HostError::NoConfig
            | HostError::NoPublicUrl => ErrorKind::Precondition,
            HostError::Unreachable { .. } => ErrorKind::Reachability,
            HostError::Chain(_) => ErrorKind::ChainTransaction,
            HostError::Spawn(_) | HostError::Process(_) => ErrorKind::Process,
            HostError::Config(_) | HostError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Troubleshooting lines attached to the error, if any
    pub fn hints(&self) -> &[String] {
        match self {
            HostError::Unreachable { hints, .. } => hints,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(HostError::NoPublicUrl.kind(), ErrorKind::Precondition);
        assert_eq!(HostError::Validation("bad".into()).kind(), ErrorKind::Validation);
        assert_eq!(
            HostError::Chain(ChainError::Reverted("out of gas".into())).kind(),
            ErrorKind::ChainTransaction
        );
        let spawn = HostError::Spawn(std::io::Error::from(std::io::ErrorKind::AddrInUse));
        assert_eq!(spawn.kind(), ErrorKind::Process);
    }

    #[test]
    fn test_chain_error_message_is_preserved() {
        let err = HostError::from(ChainError::InsufficientBalance {
            required: "1000".into(),
            available: "10".into(),
        });
        let message = err.to_string();
        assert!(message.contains("1000"));
        assert!(message.contains("10"));
    }

    #[test]
    fn test_no_public_url_message() {
        assert!(HostError::NoPublicUrl.to_string().contains("No public URL configured"));
    }
}
