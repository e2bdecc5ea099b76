//! Retry delay computation.

/// Ceiling on any computed retry delay (24 hours). `base ^ attempts`
/// outgrows any useful horizon quickly and can overflow; delays clamp
/// here instead.
pub const MAX_DELAY_SECS: u64 = 86_400;

/// Delay in whole seconds before a failed job becomes ready again:
/// `floor(base ^ attempts)`, where `attempts` is the post-increment
/// attempt count. With base 2 and attempts 1, 2, 3 the delays are
/// 2, 4 and 8 seconds.
pub fn retry_delay(base: f64, attempts: i64) -> u64 {
    let exponent = attempts.clamp(0, i32::MAX as i64) as i32;
    let raw = base.powi(exponent);
    if !raw.is_finite() || raw >= MAX_DELAY_SECS as f64 {
        return MAX_DELAY_SECS;
    }
    raw.max(0.0).floor() as u64
}
