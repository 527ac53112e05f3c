// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with full jitter.
///
/// The delay before attempt `n` (1-based) is drawn uniformly from
/// `[0, min(cap, base × factor^(n−1))]`. Full jitter spreads retries of a
/// burst of failed jobs instead of re-synchronizing them against a
/// recovering provider.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Upper bound of the delay window for a given attempt (1-based).
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let scaled = self
            .base
            .saturating_mul(self.factor.saturating_pow(exp));
        scaled.min(self.cap)
    }

    /// Jittered delay before the given attempt.
    pub fn delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=ceiling.as_millis() as u64))
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn ceiling_doubles_per_attempt() {
        let b = Backoff::default();
        assert_eq!(b.ceiling(1), Duration::from_secs(1));
        assert_eq!(b.ceiling(2), Duration::from_secs(2));
        assert_eq!(b.ceiling(3), Duration::from_secs(4));
        assert_eq!(b.ceiling(6), Duration::from_secs(32));
    }

    #[test]
    fn ceiling_caps_at_sixty_seconds() {
        let b = Backoff::default();
        assert_eq!(b.ceiling(7), Duration::from_secs(60));
        assert_eq!(b.ceiling(40), Duration::from_secs(60));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let b = Backoff::default();
        assert_eq!(b.ceiling(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn delay_stays_inside_the_window() {
        let b = Backoff::default();
        let mut rng = StdRng::seed_from_u64(11);
        for attempt in 1..=10 {
            for _ in 0..50 {
                let d = b.delay(attempt, &mut rng);
                assert!(d <= b.ceiling(attempt), "attempt {attempt}: {d:?}");
            }
        }
    }

    #[test]
    fn zero_base_yields_zero_delay() {
        let b = Backoff {
            base: Duration::ZERO,
            factor: 2,
            cap: Duration::from_secs(60),
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(b.delay(4, &mut rng), Duration::ZERO);
    }
}
