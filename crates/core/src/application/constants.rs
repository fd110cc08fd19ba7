// Process handle constants (no magic values)
use std::time::Duration;

/// Largest bounded wait in milliseconds (i32::MAX, ~24.8 days)
pub const MAX_WAIT_MILLIS: u32 = i32::MAX as u32;

/// How long the exit watcher waits for stdout/stderr to reach end-of-stream
/// after the OS reports exit, before publishing the exit anyway (2s)
pub const STREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
