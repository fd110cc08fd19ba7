// Application Layer - Signal hub and wait semantics

pub mod constants;
pub mod signal;
pub mod wait;

// Re-exports
pub use signal::{ExitSignal, LineSignal, Subscription};
pub use wait::{clamp_wait_millis, WaitTimeout};
