//! PID record tracking for the managed inference server
//!
//! The record names the process believed to be running for this host. A record
//! whose process is gone is stale and gets purged on the next read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::{ProcessStatus, System};
use tracing::{debug, info, warn};

use crate::config::{write_atomic, ConfigError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub public_url: String,
    pub start_time: DateTime<Utc>,
}

/// Persistence seam for the PID record
#[async_trait]
pub trait PidStore: Send + Sync {
    /// The record, only if its process is alive. Stale records are removed.
    async fn get_pid_info(&self) -> Result<Option<PidRecord>, ConfigError>;

    fn is_process_running(&self, pid: u32) -> bool;

    async fn cleanup_stale_pid(&self) -> Result<(), ConfigError>;

    async fn save_pid_with_url(&self, pid: u32, public_url: &str) -> Result<PidRecord, ConfigError>;

    async fn remove_pid(&self) -> Result<(), ConfigError>;
}

/// JSON file backed PID record
pub struct PidManager {
    path: PathBuf,
}

impl PidManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_record(&self) -> Result<Option<PidRecord>, ConfigError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::io(&self.path, e)),
        };

        match serde_json::from_str(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable PID record, treating as stale");
                self.cleanup_stale_pid().await?;
                Ok(None)
            }
        }
    }

    async fn delete_record(&self) -> Result<(), ConfigError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::io(&self.path, e)),
        }
    }
}

#[async_trait]
impl PidStore for PidManager {
    async fn get_pid_info(&self) -> Result<Option<PidRecord>, ConfigError> {
        let Some(record) = self.read_record().await? else {
            return Ok(None);
        };

        if self.is_process_running(record.pid) {
            Ok(Some(record))
        } else {
            info!(pid = record.pid, "Found stale PID record, cleaning up");
            self.cleanup_stale_pid().await?;
            Ok(None)
        }
    }

    fn is_process_running(&self, pid: u32) -> bool {
        is_process_running(pid)
    }

    async fn cleanup_stale_pid(&self) -> Result<(), ConfigError> {
        self.delete_record().await
    }

    async fn save_pid_with_url(&self, pid: u32, public_url: &str) -> Result<PidRecord, ConfigError> {
        let record = PidRecord {
            pid,
            public_url: public_url.to_string(),
            start_time: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&record)?;
        write_atomic(&self.path, &content).await?;
        debug!(pid, url = %public_url, "PID record saved");
        Ok(record)
    }

    async fn remove_pid(&self) -> Result<(), ConfigError> {
        self.delete_record().await
    }
}

/// OS-level liveness check; zombies count as dead
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // PIDs are always positive and fit in i32 on Unix
    let Some(raw) = i32::try_from(pid).ok().filter(|&p| p > 0) else {
        return false;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_running(pid: u32) -> bool {
    let mut sys = System::new();
    let target = sysinfo::Pid::from_u32(pid);
    sys.refresh_process(target) && sys.process(target).is_some()
}

fn is_zombie(pid: u32) -> bool {
    let mut sys = System::new();
    let target = sysinfo::Pid::from_u32(pid);
    sys.refresh_process(target);
    sys.process(target)
        .map(|p| matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}
