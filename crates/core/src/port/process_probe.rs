// Process state probe port
// reason: async-trait, adapters may block on OS queries
use async_trait::async_trait;

use crate::domain::ProcessState;
use crate::error::Result;

/// Reads live OS attributes of a single process
///
/// Implementations:
/// - SysinfoProcessProbe: queries the OS via sysinfo
/// - MockProcessProbe: canned snapshots for tests
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    /// Take a snapshot of the process with the given pid
    ///
    /// # Errors
    /// - ProcessError::ProcessUnavailable if the OS has no such process
    async fn snapshot(&self, pid: u32) -> Result<ProcessState>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::ProcessError;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    /// Mock ProcessProbe for testing
    pub struct MockProcessProbe {
        available: Arc<Mutex<bool>>,
        call_count: Arc<Mutex<usize>>,
    }

    impl MockProcessProbe {
        pub fn new() -> Self {
            Self {
                available: Arc::new(Mutex::new(true)),
                call_count: Arc::new(Mutex::new(0)),
            }
        }

        /// Make subsequent snapshots fail as if the process was reaped
        pub fn set_available(&self, available: bool) {
            *self.available.lock().unwrap() = available;
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    impl Default for MockProcessProbe {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessProbe for MockProcessProbe {
        async fn snapshot(&self, pid: u32) -> Result<ProcessState> {
            *self.call_count.lock().unwrap() += 1;

            if !*self.available.lock().unwrap() {
                return Err(ProcessError::ProcessUnavailable(pid));
            }

            Ok(ProcessState {
                pid,
                parent_pid: Some(std::process::id()),
                name: "mock".to_string(),
                status: "Run".to_string(),
                memory_bytes: 1024 * 1024,
                virtual_memory_bytes: 4 * 1024 * 1024,
                cpu_usage_percent: 0.0,
                start_time_secs: 0,
                run_time_secs: 0,
                captured_at: Utc::now(),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_mock_probe_counts_calls() {
            let probe = MockProcessProbe::new();
            let state = probe.snapshot(7).await.unwrap();
            assert_eq!(state.pid, 7);

            probe.set_available(false);
            let err = probe.snapshot(7).await.unwrap_err();
            assert!(matches!(err, ProcessError::ProcessUnavailable(7)));
            assert_eq!(probe.call_count(), 2);
        }
    }
}
