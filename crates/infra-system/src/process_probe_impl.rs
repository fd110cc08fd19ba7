// Process probe implementation
// reason: sysinfo for cross-platform per-process attributes
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, System};
use tracing::debug;

use procline_core::domain::ProcessState;
use procline_core::port::ProcessProbe;
use procline_core::{ProcessError, Result};

/// Process probe backed by sysinfo
///
/// Only the requested pid is refreshed on each call; nothing is cached
/// between snapshots.
pub struct SysinfoProcessProbe {
    system: Arc<Mutex<System>>,
}

impl SysinfoProcessProbe {
    /// Create a new probe
    ///
    /// # Example
    /// ```ignore
    /// let probe = SysinfoProcessProbe::new();
    /// let state = probe.snapshot(std::process::id()).await?;
    /// ```
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl Default for SysinfoProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Refresh one pid and copy out its attributes
fn read_state(system: &mut System, pid: u32) -> Result<ProcessState> {
    let sys_pid = Pid::from_u32(pid);

    if !system.refresh_process(sys_pid) {
        return Err(ProcessError::ProcessUnavailable(pid));
    }

    let process = system
        .process(sys_pid)
        .ok_or(ProcessError::ProcessUnavailable(pid))?;

    Ok(ProcessState {
        pid,
        parent_pid: process.parent().map(|p| p.as_u32()),
        name: process.name().to_string(),
        status: process.status().to_string(),
        memory_bytes: process.memory(),
        virtual_memory_bytes: process.virtual_memory(),
        cpu_usage_percent: process.cpu_usage(),
        start_time_secs: process.start_time(),
        run_time_secs: process.run_time(),
        captured_at: Utc::now(),
    })
}

#[async_trait]
impl ProcessProbe for SysinfoProcessProbe {
    async fn snapshot(&self, pid: u32) -> Result<ProcessState> {
        let system = self.system.clone();

        // /proc scanning blocks; keep it off the async workers
        let state = tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            read_state(&mut sys, pid)
        })
        .await
        .map_err(|e| ProcessError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        debug!(
            pid = %state.pid,
            name = %state.name,
            memory_bytes = %state.memory_bytes,
            status = %state.status,
            "Process state captured"
        );

        Ok(state)
    }
}
