//! Inference server process supervision
//!
//! Handles:
//! - Spawning the inference binary with its endpoint configuration
//! - Capturing child output (ring buffer + live stream) or redirecting it to a log file
//! - Graceful and forced stop of a spawned child
//! - Stopping a daemon known only by pid, escalating to a kill at the deadline

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::pid::is_process_running;

pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 10_000;
const LOG_BUFFER_LINES: usize = 500;
const DEFAULT_GRACEFUL_WAIT: Duration = Duration::from_secs(10);
const KILL_SETTLE: Duration = Duration::from_secs(2);

/// Where the child's stdout/stderr go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Piped into the handle (foreground runs)
    Capture,
    /// Appended to a log file so the child can outlive the CLI (daemon runs)
    File(PathBuf),
}

/// Launch parameters of the inference server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    pub port: u16,
    pub host: String,
    pub public_url: String,
    pub models: Vec<String>,
    pub log_level: String,
    pub output: OutputMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Bounded buffer of the most recent output lines
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// A spawned inference server, owned by the invocation that spawned it
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub config: InferenceConfig,
    pub start_time: DateTime<Utc>,
    status: ProcessState,
    child: Option<Child>,
    logs: LogBuffer,
    log_rx: Option<mpsc::UnboundedReceiver<LogLine>>,
}

impl ProcessHandle {
    /// Handle for a process this invocation does not own a child for
    pub fn detached(pid: u32, config: InferenceConfig) -> Self {
        Self {
            pid,
            config,
            start_time: Utc::now(),
            status: ProcessState::Running,
            child: None,
            logs: LogBuffer::new(LOG_BUFFER_LINES),
            log_rx: None,
        }
    }

    pub fn status(&self) -> ProcessState {
        self.status
    }

    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Live output lines; only available once and only for captured output
    pub fn take_log_stream(&mut self) -> Option<mpsc::UnboundedReceiver<LogLine>> {
        self.log_rx.take()
    }

    /// Poll the child without blocking and record an exit
    pub fn refresh_status(&mut self) -> ProcessState {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(exit)) => self.record_exit(exit),
                Ok(None) => {}
                Err(e) => {
                    warn!(pid = self.pid, error = %e, "Failed to poll inference server");
                }
            }
        }
        self.status
    }

    /// Wait for the child to exit on its own
    pub async fn wait(&mut self) -> Result<ProcessState> {
        if let Some(child) = self.child.as_mut() {
            let exit = child.wait().await?;
            self.record_exit(exit);
        }
        Ok(self.status)
    }

    pub fn mark_stopped(&mut self) {
        self.status = ProcessState::Stopped;
    }

    fn record_exit(&mut self, exit: ExitStatus) {
        // Stopped processes stay stopped even if the signal shows in the exit code
        if self.status == ProcessState::Stopped {
            return;
        }
        self.status = if exit.success() {
            ProcessState::Stopped
        } else {
            ProcessState::Crashed
        };
        info!(pid = self.pid, status = %exit, "Inference server exited");
    }
}

/// Spawns and stops the inference server
#[async_trait]
pub trait InferenceLauncher: Send + Sync {
    /// Resolves once the process exists; readiness is checked separately
    async fn spawn_inference_server(&self, config: InferenceConfig) -> Result<ProcessHandle>;

    /// `force = false` asks the process to terminate, `force = true` kills it
    async fn stop_inference_server(&self, handle: &mut ProcessHandle, force: bool) -> Result<()>;
}

/// Launcher for the real inference binary
pub struct NodeLauncher {
    binary: Option<PathBuf>,
    graceful_wait: Duration,
}

impl NodeLauncher {
    pub fn new(binary: Option<PathBuf>) -> Self {
        Self {
            binary,
            graceful_wait: DEFAULT_GRACEFUL_WAIT,
        }
    }

    pub fn with_graceful_wait(mut self, wait: Duration) -> Self {
        self.graceful_wait = wait;
        self
    }

    fn build_command(&self, binary: &Path, config: &InferenceConfig) -> Result<Command> {
        let mut cmd = Command::new(binary);
        cmd.args(["--port", &config.port.to_string(), "--host", &config.host])
            .env("API_PORT", config.port.to_string())
            .env("API_HOST", &config.host)
            .env("PUBLIC_URL", &config.public_url)
            .env("MODELS", config.models.join(","))
            .env("RUST_LOG", &config.log_level)
            .stdin(Stdio::null())
            // Daemon processes must outlive the CLI
            .kill_on_drop(false);

        match &config.output {
            OutputMode::Capture => {
                cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
                cmd.stdout(Stdio::from(file.try_clone()?)).stderr(Stdio::from(file));

                // Detach from the terminal's process group so Ctrl-C in the shell leaves it alone
                #[cfg(unix)]
                cmd.process_group(0);
            }
        }

        Ok(cmd)
    }
}

#[async_trait]
impl InferenceLauncher for NodeLauncher {
    async fn spawn_inference_server(&self, config: InferenceConfig) -> Result<ProcessHandle> {
        let binary = self
            .binary
            .clone()
            .filter(|path| path.is_file())
            .ok_or_else(|| {
                HostError::Validation(
                    "Inference server binary not found. Install it or set LLM_HOST_NODE_BIN".to_string(),
                )
            })?;

        debug!(
            binary = %binary.display(),
            host = %config.host,
            port = config.port,
            "Spawning inference server"
        );

        let mut cmd = self.build_command(&binary, &config)?;
        let mut child = cmd.spawn().map_err(HostError::Spawn)?;
        let pid = child
            .id()
            .ok_or_else(|| HostError::Process("spawned inference server but no PID available".to_string()))?;

        let logs = LogBuffer::new(LOG_BUFFER_LINES);
        let mut log_rx = None;
        if config.output == OutputMode::Capture {
            let (tx, rx) = mpsc::unbounded_channel();
            if let Some(stdout) = child.stdout.take() {
                pipe_lines(stdout, LogStream::Stdout, logs.clone(), tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                pipe_lines(stderr, LogStream::Stderr, logs.clone(), tx);
            }
            log_rx = Some(rx);
        }

        info!(pid, url = %config.public_url, "Inference server spawned");

        Ok(ProcessHandle {
            pid,
            config,
            start_time: Utc::now(),
            status: ProcessState::Running,
            child: Some(child),
            logs,
            log_rx,
        })
    }

    async fn stop_inference_server(&self, handle: &mut ProcessHandle, force: bool) -> Result<()> {
        let pid = handle.pid;

        let Some(child) = handle.child.as_mut() else {
            send_stop_signal(pid, force).await?;
            handle.mark_stopped();
            return Ok(());
        };

        if let Ok(Some(exit)) = child.try_wait() {
            debug!(pid, status = %exit, "Inference server already exited");
            handle.record_exit(exit);
            return Ok(());
        }

        if force {
            info!(pid, "Force killing inference server");
            child
                .start_kill()
                .map_err(|e| HostError::Process(format!("failed to kill {}: {}", pid, e)))?;
            if let Err(e) = child.wait().await {
                warn!(pid, error = %e, "Error waiting for killed process");
            }
            handle.mark_stopped();
            return Ok(());
        }

        info!(pid, "Requesting graceful shutdown of inference server");
        send_stop_signal(pid, false).await?;
        match tokio::time::timeout(self.graceful_wait, child.wait()).await {
            Ok(Ok(exit)) => {
                debug!(pid, status = %exit, "Inference server stopped");
                handle.mark_stopped();
                Ok(())
            }
            Ok(Err(e)) => Err(HostError::Process(format!("error waiting for {}: {}", pid, e))),
            Err(_) => Err(HostError::Process(format!(
                "inference server {} did not exit within {}s",
                pid,
                self.graceful_wait.as_secs()
            ))),
        }
    }
}

fn pipe_lines<R>(reader: R, stream: LogStream, logs: LogBuffer, tx: mpsc::UnboundedSender<LogLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.push(line.clone());
            // Nobody listening is fine, the buffer still keeps the line
            let _ = tx.send(LogLine { stream, line });
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    pub timeout: Duration,
    pub force: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            force: false,
        }
    }
}

/// How a daemon ended up stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    AlreadyExited,
    Graceful,
    Forced,
}

/// Stops a daemon known only by its pid
#[async_trait]
pub trait DaemonControl: Send + Sync {
    async fn stop_daemon(&self, pid: u32, options: StopOptions) -> Result<StopReport>;
}

/// Signal based daemon control: terminate, poll liveness, kill at the deadline
pub struct SignalDaemonControl {
    poll_interval: Duration,
}

impl SignalDaemonControl {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }

    async fn wait_for_exit(&self, pid: u32, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !is_process_running(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl Default for SignalDaemonControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DaemonControl for SignalDaemonControl {
    async fn stop_daemon(&self, pid: u32, options: StopOptions) -> Result<StopReport> {
        if !is_process_running(pid) {
            debug!(pid, "Daemon already gone");
            return Ok(StopReport::AlreadyExited);
        }

        if !options.force {
            info!(pid, timeout_ms = options.timeout.as_millis() as u64, "Stopping daemon gracefully");
            send_stop_signal(pid, false).await?;
            if self.wait_for_exit(pid, options.timeout).await {
                return Ok(StopReport::Graceful);
            }
            warn!(pid, "Daemon did not exit before the deadline, force killing");
        } else {
            info!(pid, "Force killing daemon");
        }

        send_stop_signal(pid, true).await?;
        if self.wait_for_exit(pid, KILL_SETTLE).await {
            Ok(StopReport::Forced)
        } else {
            Err(HostError::Process(format!("process {} is still running after kill", pid)))
        }
    }
}

/// SIGTERM / SIGKILL; a process that is already gone is not an error
#[cfg(unix)]
async fn send_stop_signal(pid: u32, force: bool) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(raw) = i32::try_from(pid).ok().filter(|&p| p > 0) else {
        return Err(HostError::Process(format!("invalid pid {}", pid)));
    };
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };

    match kill(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(HostError::Process(format!("failed to send {} to {}: {}", signal, pid, e))),
    }
}

#[cfg(windows)]
async fn send_stop_signal(pid: u32, force: bool) -> Result<()> {
    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str()];
    if force {
        args.push("/F");
    }

    let output = Command::new("taskkill")
        .args(&args)
        .output()
        .await
        .map_err(|e| HostError::Process(format!("failed to execute taskkill: {}", e)))?;

    if output.status.success() || !is_process_running(pid) {
        Ok(())
    } else {
        Err(HostError::Process(format!(
            "taskkill failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}
