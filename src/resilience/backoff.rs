//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (1-based).
///
/// `base_ms * 2^(attempt-1)`, capped at `max_ms`. With `jitter` set, up to
/// 10% of the capped delay is added on top.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    let Some(exponent) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };

    let delay_ms = base_ms
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(max_ms);

    let extra_ms = match delay_ms / 10 {
        spread if jitter && spread > 0 => rand::thread_rng().gen_range(0..spread),
        _ => 0,
    };

    Duration::from_millis(delay_ms.saturating_add(extra_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        assert_eq!(calculate_backoff(1, 100, 2000, false), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, 100, 2000, false), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, 100, 2000, false), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, 100, 1000, false), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(0, 100, 1000, false), Duration::ZERO);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        for _ in 0..50 {
            let delay = calculate_backoff(2, 100, 2000, true).as_millis();
            assert!((200..220).contains(&delay));
        }
    }

    #[test]
    fn test_backoff_saturates() {
        let delay = calculate_backoff(200, u64::MAX, 30_000, false);
        assert_eq!(delay, Duration::from_millis(30_000));
    }
}
