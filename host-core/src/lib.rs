//! Host lifecycle core: keeps the local inference process, its public
//! reachability and its on-chain registration consistent.

pub mod admin;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pid;
pub mod probe;
pub mod supervisor;
pub mod validator;

pub use error::{ErrorKind, HostError, Result};
pub use events::{Progress, ProgressSink};
pub use orchestrator::{
    HostServices, HostStatus, Orchestrator, RegisterOutcome, RegisterRequest, RunMode, SagaState, StartOptions,
    StartOutcome, StopOutcome, UnregisterOutcome,
};
