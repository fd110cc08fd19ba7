// Process State Snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of a live OS process
///
/// Read once from the OS when requested; never refreshed or cached.
///
/// Scheduling priority is not included: sysinfo 0.30 does not expose it on
/// any platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    /// OS scheduler status (e.g. "Runnable", "Sleeping")
    pub status: String,
    /// Resident set size in bytes
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub cpu_usage_percent: f32,
    /// Start time in seconds since the unix epoch
    pub start_time_secs: u64,
    pub run_time_secs: u64,
    pub captured_at: DateTime<Utc>,
}

impl ProcessState {
    /// Resident memory in whole megabytes
    pub fn memory_mb(&self) -> u64 {
        self.memory_bytes / 1024 / 1024
    }
}
