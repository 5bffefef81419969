//! Interpolated percentiles over sorted samples.

/// Percentile `p ∈ [0, 1]` of an ascending slice.
///
/// Linear interpolation between the two closest ranks: with `k = (n-1)*p`,
/// the result is `sorted[floor(k)]*(1-f) + sorted[ceil(k)]*f`, `f = k - floor(k)`.
/// The result never leaves `[sorted[floor(k)], sorted[ceil(k)]]`.
/// Returns 0.0 for an empty slice. `p` is clamped into range.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let k = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lower = k.floor();
            let frac = k - lower;
            let lo = lower as usize;
            let hi = k.ceil() as usize;
            // Rounding may land one ulp outside the bracketing samples.
            (sorted[lo] * (1.0 - frac) + sorted[hi] * frac).clamp(sorted[lo], sorted[hi])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
    }

    #[test]
    fn test_interpolation() {
        let samples = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&samples, 0.0), 10.0);
        assert_eq!(percentile(&samples, 1.0), 40.0);
        // k = 1.5
        assert_eq!(percentile(&samples, 0.5), 25.0);
        // k = 2.97
        assert!((percentile(&samples, 0.99) - 39.7).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic() {
        let mut samples: Vec<f64> = (0..257).map(|i| ((i * 7919) % 1000) as f64 / 3.0).collect();
        samples.sort_by(f64::total_cmp);
        let p50 = percentile(&samples, 0.50);
        let p95 = percentile(&samples, 0.95);
        let p99 = percentile(&samples, 0.99);
        let max = samples[samples.len() - 1];
        assert!(p50 <= p95 && p95 <= p99 && p99 <= max);
    }

    #[test]
    fn test_equal_neighbours_do_not_overshoot() {
        let samples = [1.0, 446.6691895745618, 446.6691895745618, 446.6691895745618];
        for step in 0..=100 {
            let value = percentile(&samples, f64::from(step) / 100.0);
            assert!(value <= 446.6691895745618);
            assert!(value >= 1.0);
        }
    }
}
