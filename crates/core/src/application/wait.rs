// Bounded wait clamping
use std::time::Duration;

use super::constants::MAX_WAIT_MILLIS;

/// Anything usable as a bounded wait timeout
///
/// Conversion is total: every value maps into `[0, MAX_WAIT_MILLIS]`
/// milliseconds, so a degenerate timeout never turns into an error.
pub trait WaitTimeout {
    fn to_wait_millis(&self) -> u32;
}

impl WaitTimeout for u32 {
    fn to_wait_millis(&self) -> u32 {
        (*self).min(MAX_WAIT_MILLIS)
    }
}

impl WaitTimeout for Duration {
    fn to_wait_millis(&self) -> u32 {
        clamp_wait_millis(*self)
    }
}

/// Signed durations: negative values clamp to zero
impl WaitTimeout for chrono::Duration {
    fn to_wait_millis(&self) -> u32 {
        self.num_milliseconds().clamp(0, i64::from(MAX_WAIT_MILLIS)) as u32
    }
}

/// Clamp a duration into the representable millisecond range
pub fn clamp_wait_millis(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(MAX_WAIT_MILLIS)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_in_range_is_exact() {
        assert_eq!(clamp_wait_millis(Duration::from_millis(0)), 0);
        assert_eq!(clamp_wait_millis(Duration::from_millis(100)), 100);
        assert_eq!(Duration::from_secs(5).to_wait_millis(), 5000);
    }

    #[test]
    fn test_huge_duration_clamps_to_max() {
        assert_eq!(clamp_wait_millis(Duration::MAX), MAX_WAIT_MILLIS);
        assert_eq!(
            Duration::from_secs(u64::from(u32::MAX)).to_wait_millis(),
            MAX_WAIT_MILLIS
        );
        assert_eq!(u32::MAX.to_wait_millis(), MAX_WAIT_MILLIS);
    }

    #[test]
    fn test_negative_signed_duration_clamps_to_zero() {
        assert_eq!(chrono::Duration::milliseconds(-250).to_wait_millis(), 0);
        assert_eq!(chrono::Duration::milliseconds(250).to_wait_millis(), 250);
        assert_eq!(chrono::Duration::days(365).to_wait_millis(), MAX_WAIT_MILLIS);
    }
}
