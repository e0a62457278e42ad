//! Per-key rate limiting for plugin-facing endpoints.
//!
//! Built on `governor` keyed limiters. State is process-local and in-memory:
//! limits are NOT enforced across multiple server instances. That is an
//! accepted degradation (the limits here are abuse brakes, not billing
//! meters); a shared counter store would be needed for exact enforcement
//! behind a load balancer.

use std::num::NonZeroU32;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

/// License register / credentials endpoints: 10 requests per minute per site.
const LICENSE_PER_MINUTE: u32 = 10;
/// Payment proxy endpoints: 100 requests per minute per site.
const PAYMENT_PER_MINUTE: u32 = 100;

pub struct RateLimits {
    license: DefaultKeyedRateLimiter<String>,
    payment: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl RateLimits {
    pub fn new() -> Self {
        Self {
            license: RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(LICENSE_PER_MINUTE).unwrap(),
            )),
            payment: RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(PAYMENT_PER_MINUTE).unwrap(),
            )),
            clock: DefaultClock::default(),
        }
    }

    /// Check the license-class limit for a key (e.g. `license:{site_url}`).
    /// Returns `Err(retry_after_secs)` when the caller is over limit.
    pub fn check_license(&self, key: &str) -> Result<(), u64> {
        self.check(&self.license, key)
    }

    /// Check the payment-class limit for a key (e.g. `payment:{site_url}`).
    pub fn check_payment(&self, key: &str) -> Result<(), u64> {
        self.check(&self.payment, key)
    }

    fn check(&self, limiter: &DefaultKeyedRateLimiter<String>, key: &str) -> Result<(), u64> {
        match limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                // Round up so clients never retry too early
                Err(wait.as_secs().max(1))
            }
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn license_class_limits_after_burst() {
        let limits = RateLimits::new();
        for _ in 0..LICENSE_PER_MINUTE {
            assert!(limits.check_license("license:https://example.com").is_ok());
        }
        let retry = limits
            .check_license("license:https://example.com")
            .unwrap_err();
        assert!(retry >= 1);
    }

    #[test]
    fn keys_are_independent() {
        let limits = RateLimits::new();
        for _ in 0..LICENSE_PER_MINUTE {
            let _ = limits.check_license("license:https://a.example");
        }
        assert!(limits.check_license("license:https://b.example").is_ok());
    }

    #[test]
    fn payment_class_allows_higher_volume() {
        let limits = RateLimits::new();
        for _ in 0..PAYMENT_PER_MINUTE {
            assert!(limits.check_payment("payment:https://example.com").is_ok());
        }
        assert!(limits.check_payment("payment:https://example.com").is_err());
    }
}
