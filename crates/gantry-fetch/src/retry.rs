use std::time::Duration;

/// Longest wait between two attempts at one piece.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Wait before retry `attempt` (0 for the first retry): `base * 2^attempt`,
/// capped at [`MAX_RETRY_DELAY`].
///
/// ```
/// use std::time::Duration;
/// use gantry_fetch::retry_delay;
///
/// assert_eq!(retry_delay(0, Duration::from_millis(250)), Duration::from_millis(250));
/// assert_eq!(retry_delay(2, Duration::from_millis(250)), Duration::from_secs(1));
/// ```
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt)).min(MAX_RETRY_DELAY)
}
