// Domain Layer - Command specification, lifecycle and state snapshot types

pub mod command;
pub mod lifecycle;
pub mod state;

// Re-exports
pub use command::{CommandSpec, LaunchConfig};
pub use lifecycle::{exit_code_from_status, ExitWait, LifecycleState, UNKNOWN_EXIT_CODE};
pub use state::ProcessState;
