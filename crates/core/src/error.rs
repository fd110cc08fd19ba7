// Central Error Type for process handling

use thiserror::Error;

/// Process-level error type
///
/// Misuse errors (`InvalidConfiguration`, `NotStarted`, `InputClosed`) are raised
/// synchronously by the handle itself. OS-level errors carry the underlying
/// `std::io::Error` verbatim.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("The process has not yet been started. Cannot {0} before it is started.")]
    NotStarted(&'static str),

    #[error("Process must exit before its exit code can be determined")]
    NotExited,

    #[error("The process handle has been disposed")]
    Disposed,

    #[error("Standard input has already been closed")]
    InputClosed,

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill process: {0}")]
    Kill(#[source] std::io::Error),

    #[error("Process {0} is no longer available")]
    ProcessUnavailable(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// True for errors caused by calling an operation in the wrong state
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            ProcessError::InvalidConfiguration(_)
                | ProcessError::NotStarted(_)
                | ProcessError::NotExited
                | ProcessError::Disposed
                | ProcessError::InputClosed
        )
    }
}

/// Result type alias using ProcessError
pub type Result<T> = std::result::Result<T, ProcessError>;
