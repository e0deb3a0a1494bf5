//! Crash Point Generator
//!
//! Draws the hidden multiplier at which a round ends from a fixed piecewise
//! distribution: heavy on the left, long-tailed on the right.
//!
//! One uniform draw `r ∈ [0, 1)` picks the bucket, a second uniform draw
//! places the value inside the bucket's range.
//!
//! | r range        | output range | weight |
//! |----------------|--------------|--------|
//! | [0.00, 0.10)   | 1.0          | 10%    |
//! | [0.10, 0.30)   | 1.0 – 1.5    | 20%    |
//! | [0.30, 0.60)   | 1.5 – 2.5    | 30%    |
//! | [0.60, 0.80)   | 2.5 – 4.5    | 20%    |
//! | [0.80, 0.95)   | 4.5 – 9.5    | 15%    |
//! | [0.95, 1.00)   | 9.5 – 30.0   | 5%     |

use rand::Rng;

/// Lowest possible crash point.
pub const MIN_CRASH_POINT: f64 = 1.0;

/// Highest possible crash point (exclusive).
pub const MAX_CRASH_POINT: f64 = 30.0;

/// One slice of the crash point distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrashBucket {
    /// Exclusive upper bound of the selector draw for this bucket.
    pub selector_end: f64,
    /// Lower bound of the output range.
    pub low: f64,
    /// Upper bound of the output range.
    pub high: f64,
}

impl CrashBucket {
    /// Probability mass of this bucket, given the previous bucket's end.
    pub fn weight(&self, selector_start: f64) -> f64 {
        self.selector_end - selector_start
    }
}

/// The distribution, ordered by selector range.
pub const CRASH_BUCKETS: [CrashBucket; 6] = [
    CrashBucket { selector_end: 0.10, low: 1.0, high: 1.0 },
    CrashBucket { selector_end: 0.30, low: 1.0, high: 1.5 },
    CrashBucket { selector_end: 0.60, low: 1.5, high: 2.5 },
    CrashBucket { selector_end: 0.80, low: 2.5, high: 4.5 },
    CrashBucket { selector_end: 0.95, low: 4.5, high: 9.5 },
    CrashBucket { selector_end: 1.00, low: 9.5, high: MAX_CRASH_POINT },
];

/// Index of the bucket a selector draw falls into.
#[inline]
pub fn bucket_index(selector: f64) -> usize {
    CRASH_BUCKETS
        .iter()
        .position(|b| selector < b.selector_end)
        .unwrap_or(CRASH_BUCKETS.len() - 1)
}

/// Map two uniform draws in `[0, 1)` to a crash point.
///
/// Kept separate from [`generate_crash_point`] so the bucket boundaries can be
/// checked without a random source.
pub fn crash_point_from_draws(selector: f64, position: f64) -> f64 {
    let bucket = CRASH_BUCKETS[bucket_index(selector)];
    let value = bucket.low + position.clamp(0.0, 1.0) * (bucket.high - bucket.low);
    value.max(MIN_CRASH_POINT)
}

/// Draw a fresh crash point.
///
/// Must only be called when a round is created. The result is fixed for the
/// lifetime of that round.
pub fn generate_crash_point<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let selector: f64 = rng.gen();
    let position: f64 = rng.gen();
    crash_point_from_draws(selector, position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bucket_weights_sum_to_one() {
        let mut start = 0.0;
        let mut total = 0.0;
        for bucket in CRASH_BUCKETS {
            total += bucket.weight(start);
            start = bucket.selector_end;
        }
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(crash_point_from_draws(0.0, 0.7), 1.0);
        assert_eq!(crash_point_from_draws(0.0999, 0.99), 1.0);
        assert_eq!(bucket_index(0.10), 1);
        assert_eq!(bucket_index(0.30), 2);
        assert_eq!(bucket_index(0.60), 3);
        assert_eq!(bucket_index(0.80), 4);
        assert_eq!(bucket_index(0.95), 5);
        assert_eq!(bucket_index(0.999_999), 5);

        assert!((crash_point_from_draws(0.45, 0.5) - 2.0).abs() < 1e-12);
        assert!((crash_point_from_draws(0.97, 1.0) - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_bucket_frequencies() {
        let mut rng = StdRng::seed_from_u64(0x1u64 << 40 | 7);
        let draws = 100_000;
        let mut counts = [0usize; 6];

        for _ in 0..draws {
            let selector: f64 = rng.gen();
            let position: f64 = rng.gen();
            let value = crash_point_from_draws(selector, position);
            let idx = bucket_index(selector);
            let bucket = CRASH_BUCKETS[idx];
            assert!(value >= bucket.low && value <= bucket.high);
            counts[idx] += 1;
        }

        let expected = [0.10, 0.20, 0.30, 0.20, 0.15, 0.05];
        for (count, want) in counts.iter().zip(expected) {
            let got = *count as f64 / draws as f64;
            // ~5 standard deviations at n = 100k
            assert!((got - want).abs() < 0.01, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_generated_value_ranges() {
        let mut rng = StdRng::seed_from_u64(99);
        let draws = 20_000;
        let mut immediate = 0usize;
        let mut long_tail = 0usize;

        for _ in 0..draws {
            let value = generate_crash_point(&mut rng);
            assert!((MIN_CRASH_POINT..=MAX_CRASH_POINT).contains(&value));
            if value == 1.0 {
                immediate += 1;
            }
            if value >= 9.5 {
                long_tail += 1;
            }
        }

        let immediate = immediate as f64 / draws as f64;
        let long_tail = long_tail as f64 / draws as f64;
        assert!((immediate - 0.10).abs() < 0.015);
        assert!((long_tail - 0.05).abs() < 0.01);
    }

    proptest! {
        #[test]
        fn prop_crash_point_at_least_one(selector in 0.0f64..1.0, position in 0.0f64..1.0) {
            let value = crash_point_from_draws(selector, position);
            prop_assert!(value >= MIN_CRASH_POINT);
            prop_assert!(value <= MAX_CRASH_POINT);
        }

        #[test]
        fn prop_seeded_draws_at_least_one(seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..32 {
                prop_assert!(generate_crash_point(&mut rng) >= MIN_CRASH_POINT);
            }
        }
    }
}
