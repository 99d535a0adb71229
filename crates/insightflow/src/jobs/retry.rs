use crate::jobs::error_codes::ErrorCode;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_seconds: i64,
    pub max_seconds: i64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_seconds: 2,
            max_seconds: 15 * 60,
            jitter_pct: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
}

/// Only an explicit refusal from the content source skips the remaining
/// attempts. Everything else, including codes we don't know, gets retried.
pub fn classify(code: ErrorCode) -> ErrorClass {
    match code {
        ErrorCode::Rejected => ErrorClass::NonRetryable,
        ErrorCode::FetchUnavailable
        | ErrorCode::RateLimit
        | ErrorCode::Timeout
        | ErrorCode::MalformedContent
        | ErrorCode::Store
        | ErrorCode::Orphaned
        | ErrorCode::Stale
        | ErrorCode::Unknown => ErrorClass::Retryable,
    }
}

pub fn classify_error(code: &str) -> ErrorClass {
    classify(ErrorCode::from_str(code))
}

pub fn next_delay_seconds(attempt_no: i32, cfg: &RetryConfig, rng: &mut impl Rng) -> i64 {
    let attempt_no = attempt_no.max(1) as u32;

    // exponent = attempt_no - 1
    let exp = attempt_no.saturating_sub(1);

    // 2^exp, saturating; the cap below bounds it anyway.
    let pow2 = 1_i64.checked_shl(exp).unwrap_or(i64::MAX);

    let delay = cfg
        .base_seconds
        .max(0)
        .saturating_mul(pow2)
        .min(cfg.max_seconds);

    // jitter in range [-jitter_pct, +jitter_pct]
    let jitter_range = (delay as f64) * cfg.jitter_pct;
    let jitter = if jitter_range > 0.0 {
        rng.gen_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };

    let jittered = (delay as f64 + jitter).round() as i64;
    jittered.clamp(0, cfg.max_seconds.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn delay_doubles_then_caps() {
        let cfg = RetryConfig {
            base_seconds: 2,
            max_seconds: 10,
            jitter_pct: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<i64> = (1..=5)
            .map(|n| next_delay_seconds(n, &cfg, &mut rng))
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let cfg = RetryConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let d = next_delay_seconds(i32::MAX, &cfg, &mut rng);
        assert!(d <= cfg.max_seconds);
    }

    #[test]
    fn jitter_stays_within_band() {
        let cfg = RetryConfig {
            base_seconds: 100,
            max_seconds: 1000,
            jitter_pct: 0.2,
        };
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let d = next_delay_seconds(1, &cfg, &mut rng);
            assert!((80..=120).contains(&d), "delay {d}");
        }
    }

    #[test]
    fn only_rejection_is_permanent() {
        assert_eq!(classify_error("REJECTED"), ErrorClass::NonRetryable);
        assert_eq!(classify_error("FETCH_UNAVAILABLE"), ErrorClass::Retryable);
        assert_eq!(classify_error("MALFORMED_CONTENT"), ErrorClass::Retryable);
        assert_eq!(classify_error("something new"), ErrorClass::Retryable);
    }
}
