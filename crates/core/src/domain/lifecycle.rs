// Process lifecycle types

use std::fmt;
use std::process::ExitStatus;

/// Offset added to a terminating signal number (shell convention, SIGKILL -> 137)
#[cfg(unix)]
const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Exit code reported when the OS gives neither a code nor a signal
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// Lifecycle state of a process handle
///
/// State transitions:
/// - Configured -> Started (start)
/// - Started -> Exited (OS exit notification, possibly driven by kill)
/// - any -> Disposed (dispose; terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Configured,
    Started,
    Exited,
    Disposed,
}

impl LifecycleState {
    /// Whether `start` may launch a process from this state
    pub fn can_start(&self) -> bool {
        matches!(self, LifecycleState::Configured)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Configured => "CONFIGURED",
            LifecycleState::Started => "STARTED",
            LifecycleState::Exited => "EXITED",
            LifecycleState::Disposed => "DISPOSED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a bounded wait for exit
///
/// `exit_code` is 0 when the process has not exited within the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitWait {
    pub exited: bool,
    pub exit_code: i32,
}

impl ExitWait {
    /// The process exited with `exit_code`
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exited: true,
            exit_code,
        }
    }

    /// The timeout elapsed first
    pub fn pending() -> Self {
        Self {
            exited: false,
            exit_code: 0,
        }
    }

    /// Exit code if the process exited
    pub fn code(&self) -> Option<i32> {
        self.exited.then_some(self.exit_code)
    }
}

impl From<ExitWait> for (bool, i32) {
    fn from(wait: ExitWait) -> Self {
        (wait.exited, wait.exit_code)
    }
}

/// Map an OS exit status to a single integer exit code
///
/// Normal exit yields its code. On Unix a signal-terminated process yields
/// `128 + signal`.
pub fn exit_code_from_status(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return SIGNAL_EXIT_OFFSET + signal;
        }
    }

    UNKNOWN_EXIT_CODE
}
