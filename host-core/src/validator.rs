//! Pre-flight validation for host operations
//!
//! Pure checks run before any process is started or any transaction is sent:
//! - Public URL shape (scheme + explicit port)
//! - Model identifiers (`<repo>:<file>`)
//! - Price and stake ranges
//! - Inference binary presence and local port availability

use reqwest::Url;
use serde::Serialize;
use std::ffi::OsString;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::HostError;

/// Default executable name of the inference server
pub const NODE_BINARY_NAME: &str = "llm-node";

pub const MIN_PRICE_PER_TOKEN: u64 = 100;
pub const MAX_PRICE_PER_TOKEN: u64 = 100_000;
pub const MIN_STAKE_AMOUNT: f64 = 1000.0;

/// Outcome of a validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub error: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { valid: true, error: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { valid: false, error: Some(error.into()) }
    }

    /// Convert into a `Result`, keeping the error text
    pub fn into_result(self) -> Result<(), String> {
        if self.valid {
            Ok(())
        } else {
            Err(self.error.unwrap_or_else(|| "validation failed".to_string()))
        }
    }

    /// Fail as `HostError::Validation`
    pub fn check(self) -> crate::error::Result<()> {
        self.into_result().map_err(HostError::Validation)
    }
}

/// Validate the URL clients will use to reach this host
pub fn validate_public_url(url: &str) -> Validation {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => return Validation::fail(format!("Invalid URL format: {}", e)),
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        return Validation::fail(format!(
            "URL must use http or https protocol (got '{}')",
            parsed.scheme()
        ));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Validation::fail("URL must include a host");
    }

    // `Url::port` hides ports equal to the scheme default, so look at the raw text too
    if parsed.port().is_none() && !has_explicit_port(url) {
        return Validation::fail("URL must include an explicit port (e.g. http://example.com:8080)");
    }

    Validation::ok()
}

fn has_explicit_port(url: &str) -> bool {
    let Some((_, rest)) = url.split_once("://") else {
        return false;
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);

    if let Some(stripped) = host_port.strip_prefix('[') {
        // IPv6 literal: [::1]:8080
        return stripped
            .split_once(']')
            .map(|(_, tail)| tail.starts_with(':') && tail.len() > 1)
            .unwrap_or(false);
    }

    host_port
        .split_once(':')
        .map(|(_, port)| !port.is_empty())
        .unwrap_or(false)
}

/// Validate model identifiers of the form `<repo>:<file>`
pub fn validate_models(models: &[String]) -> Validation {
    if models.is_empty() {
        return Validation::fail("At least one model must be specified");
    }

    for model in models {
        if let Err(reason) = check_model_id(model) {
            return Validation::fail(format!(
                "Invalid model format: \"{}\" ({}). Expected <repo>:<file>, e.g. TheBloke/Llama-2-7B-GGUF:llama-2-7b.Q4_K_M.gguf",
                model, reason
            ));
        }
    }

    Validation::ok()
}

fn check_model_id(model: &str) -> Result<(), &'static str> {
    if model.chars().any(char::is_whitespace) {
        return Err("whitespace is not allowed");
    }
    if model.matches(':').count() != 1 {
        return Err("exactly one ':' separator is required");
    }
    match model.split_once(':') {
        Some((repo, file)) if !repo.is_empty() && !file.is_empty() => Ok(()),
        _ => Err("repository and file must both be non-empty"),
    }
}

/// Price per token must fall inside the marketplace range
pub fn validate_price(price: u64) -> Validation {
    if (MIN_PRICE_PER_TOKEN..=MAX_PRICE_PER_TOKEN).contains(&price) {
        Validation::ok()
    } else {
        Validation::fail(format!(
            "Price per token must be between {} and {} (got {})",
            MIN_PRICE_PER_TOKEN, MAX_PRICE_PER_TOKEN, price
        ))
    }
}

/// Stake amount is a decimal token amount, at least `MIN_STAKE_AMOUNT`
pub fn validate_stake_amount(amount: &str) -> Validation {
    match amount.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= MIN_STAKE_AMOUNT => Validation::ok(),
        Ok(value) => Validation::fail(format!(
            "Stake amount must be at least {} tokens (got {})",
            MIN_STAKE_AMOUNT, value
        )),
        Err(_) => Validation::fail(format!("Invalid stake amount: \"{}\"", amount)),
    }
}

/// Additional stake only needs to be a positive amount
pub fn validate_additional_stake(amount: &str) -> Validation {
    match amount.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => Validation::ok(),
        _ => Validation::fail(format!("Stake amount must be a positive number (got \"{}\")", amount)),
    }
}

/// Locate the inference server executable
///
/// Resolution order: explicit override, `<home>/bin/llm-node`, then `PATH`.
/// Candidates that exist but are not executable are skipped.
pub fn resolve_node_binary(override_path: Option<&Path>, home: &Path) -> Option<PathBuf> {
    resolve_node_binary_in(override_path, home, std::env::var_os("PATH"))
}

fn resolve_node_binary_in(
    override_path: Option<&Path>,
    home: &Path,
    search_path: Option<OsString>,
) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return is_executable(path).then(|| path.to_path_buf());
    }

    let installed = home.join("bin").join(binary_file_name());
    if is_executable(&installed) {
        return Some(installed);
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| home.to_path_buf());
    which::which_in(binary_file_name(), search_path, cwd).ok()
}

/// An existing file with an execute bit set
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn binary_file_name() -> String {
    if cfg!(target_os = "windows") {
        format!("{}.exe", NODE_BINARY_NAME)
    } else {
        NODE_BINARY_NAME.to_string()
    }
}

pub fn check_binary_available(override_path: Option<&Path>, home: &Path) -> bool {
    resolve_node_binary(override_path, home).is_some()
}

/// Bind and immediately release a listener on `port`
pub fn check_port_available(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            debug!(port, error = %e, "Port not available");
            false
        }
    }
}

/// Local environment checks, behind a trait so sagas can run without a real binary
pub trait Preflight: Send + Sync {
    fn binary_available(&self) -> bool;
    fn port_available(&self, port: u16) -> bool;
}

/// Preflight against the real filesystem and network stack
pub struct SystemPreflight {
    binary: Option<PathBuf>,
}

impl SystemPreflight {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }
}

impl Preflight for SystemPreflight {
    fn binary_available(&self) -> bool {
        self.binary.as_deref().is_some_and(is_executable)
    }

    fn port_available(&self, port: u16) -> bool {
        check_port_available(port)
    }
}
