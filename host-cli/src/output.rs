//! Terminal presentation for llm-host
//!
//! Progress events, command outcomes and prompts. Human output goes to stdout;
//! tracing logs stay on stderr.

use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};
use std::path::Path;

use host_core::chain::HostInfo;
use host_core::pid::PidRecord;
use host_core::supervisor::{LogLine, LogStream, ProcessHandle, ProcessState, StopReport};
use host_core::{HostError, HostStatus, Progress, RegisterOutcome, RegisterRequest, UnregisterOutcome};

const RULE: &str = "────────────────────────────────────────";

/// One progress line
pub fn progress(event: &Progress) {
    let icon = match event {
        Progress::LocalhostWarning { .. } | Progress::RollingBack { .. } => "⚠️ ",
        Progress::NodeStarted { .. }
        | Progress::EndpointReachable { .. }
        | Progress::Registered { .. }
        | Progress::NodeStopped { .. } => "✅",
        Progress::Unregistered { confirmed: false, .. } => "⚠️ ",
        Progress::Unregistered { .. } => "✅",
        _ => "🔄",
    };
    println!("{} {}", icon, event);
}

fn section(title: &str) {
    println!();
    println!("{}", title);
    println!("{}", RULE);
}

pub fn register_summary(request: &RegisterRequest) {
    section("📋 REGISTRATION");
    println!("🌐 API URL: {}", request.api_url);
    println!("🧠 Models:");
    for model in &request.models {
        println!("   - {}", model);
    }
    println!("💰 Price per token: {}", request.price_per_token);
    println!("🔒 Stake: {}", request.stake_amount);
    println!();
}

pub fn registered(outcome: &RegisterOutcome) {
    section("✅ HOST REGISTERED");
    println!("🧾 Transaction: {}", outcome.transaction_hash);
    println!("🖥️  Node PID: {}", outcome.pid);
    println!("🌐 API URL: {}", outcome.config.public_url);
    println!("🔒 Staked: {}", outcome.host_info.staked_amount);
    println!();
}

pub fn started(handle: &ProcessHandle, log_file: &Path) {
    println!();
    println!("✅ Node running in the background (PID: {})", handle.pid);
    println!("🌐 Serving: {}", handle.config.public_url);
    println!("📄 Logs: {}", log_file.display());
    println!("   Stop it with `llm-host stop`");
}

pub fn foreground(handle: &ProcessHandle) {
    println!();
    println!("🚀 Node running in the foreground (PID: {})", handle.pid);
    println!("🌐 Serving: {}", handle.config.public_url);
    println!("   Press Ctrl-C to stop");
    println!("{}", RULE);
}

pub fn node_log(line: &LogLine) {
    match line.stream {
        LogStream::Stdout => println!("{}", line.line),
        LogStream::Stderr => eprintln!("{}", line.line),
    }
}

pub fn stopped_foreground(pid: u32, state: ProcessState) {
    println!();
    match state {
        ProcessState::Crashed => println!("⚠️  Node (PID: {}) exited with an error while stopping", pid),
        _ => println!("✅ Node stopped (PID: {})", pid),
    }
}

pub fn already_running(record: &PidRecord) {
    println!("ℹ️  Node is already running (PID: {})", record.pid);
    println!("🌐 Serving: {}", record.public_url);
    println!("🕒 Since: {}", record.start_time.format("%Y-%m-%d %H:%M:%S UTC"));
}

pub fn not_running() {
    println!("ℹ️  Node is not running");
}

pub fn stopped(pid: u32, report: StopReport) {
    match report {
        StopReport::Graceful => println!("✅ Node stopped (PID: {})", pid),
        StopReport::Forced => println!("✅ Node force killed (PID: {})", pid),
        StopReport::AlreadyExited => println!("✅ Node had already exited (PID: {})", pid),
    }
}

pub fn not_registered() {
    println!("ℹ️  Host is not registered, nothing to unregister");
}

pub fn unregistered(outcome: &UnregisterOutcome) {
    let UnregisterOutcome::Unregistered {
        transaction_hash,
        confirmed,
        stopped_pid,
        stop_error,
    } = outcome
    else {
        return not_registered();
    };

    section("👋 HOST UNREGISTERED");
    println!("🧾 Transaction: {}", transaction_hash);
    if *confirmed {
        println!("✅ Host is no longer active");
    } else {
        println!("⚠️  Host still reports active; check again shortly");
    }
    match (stopped_pid, stop_error) {
        (_, Some(e)) => println!("❌ Local node could not be stopped: {}", e),
        (Some(pid), None) => println!("🛑 Stopped local node (PID: {})", pid),
        (None, None) => println!("ℹ️  No local node was running"),
    }
    println!();
}

pub fn transaction(action: &str, tx: &str) {
    println!("✅ {}", action);
    println!("🧾 Transaction: {}", tx);
}

pub fn host_info(info: &HostInfo) {
    section("🖥️  HOST INFORMATION");
    println!("📍 Address: {}", info.address);
    println!(
        "⚡ Status: {}",
        if info.is_active { "✅ Active" } else { "❌ Inactive" }
    );
    println!("🌐 API URL: {}", if info.api_url.is_empty() { "-" } else { info.api_url.as_str() });
    println!("🔒 Staked: {}", info.staked_amount);
    if let Some(price) = info.price_per_token {
        println!("💰 Price per token: {}", price);
    }
    println!("🧠 Models:");
    if info.models.is_empty() {
        println!("   (none)");
    }
    for model in &info.models {
        println!("   - {}", model);
    }
    println!();
}

pub fn status(status: &HostStatus) {
    section("📋 HOST STATUS");
    match &status.config {
        Some(config) => {
            println!("👛 Wallet: {}", config.wallet_address);
            println!("🔗 Network: {} ({})", config.network, config.rpc_url);
            println!(
                "🌐 API URL: {}",
                if config.public_url.is_empty() { "-" } else { config.public_url.as_str() }
            );
            println!("🔌 Port: {}", config.inference_port);
            println!("💰 Price per token: {}", config.price_per_token);
            println!("🧠 Models: {}", config.models.join(", "));
        }
        None => println!("❌ Not configured. Run `llm-host register` first"),
    }

    println!();
    match &status.process {
        Some(record) => {
            println!("⚡ Node: ✅ Running (PID: {})", record.pid);
            println!("🕒 Since: {}", record.start_time.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        None => println!("⚡ Node: ❌ Not running"),
    }
    println!();
}

pub fn json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn done(message: &str) {
    println!("✅ {}", message);
}

pub fn cancelled() {
    println!("❌ Cancelled.");
}

/// Error chain plus any troubleshooting hints
pub fn failure(error: &anyhow::Error) {
    eprintln!();
    eprintln!("❌ {}", error);
    for cause in error.chain().skip(1) {
        eprintln!("   caused by: {}", cause);
    }

    if let Some(host_error) = error.downcast_ref::<HostError>() {
        let hints = host_error.hints();
        if !hints.is_empty() {
            eprintln!();
            eprintln!("🔧 Troubleshooting:");
            for hint in hints {
                eprintln!("   - {}", hint);
            }
        }
    }
}

pub fn confirm(prompt: &str, default: bool) -> Result<bool> {
    let default_str = if default { "Y/n" } else { "y/N" };

    loop {
        print!("❓ {} [{}]: ", prompt, default_str);
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input.is_empty() {
            return Ok(default);
        }

        match input.as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => println!("❌ Please enter 'y' or 'n'."),
        }
    }
}
