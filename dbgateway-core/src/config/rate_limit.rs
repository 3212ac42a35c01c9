//! Rate limit ceilings.

use serde::{Deserialize, Serialize};

/// Ceilings enforced by the [`RateLimiter`](crate::rate_limit::RateLimiter).
///
/// All three ceilings are global to the gateway process, not per caller.
///
/// # Example
/// ```rust
/// use dbgateway_core::config::RateLimitPolicy;
///
/// let policy = RateLimitPolicy::default().with_max_per_minute(2);
/// assert_eq!(policy.max_per_minute, 2);
/// assert_eq!(policy.max_per_hour, 1000);
/// assert!(policy.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum admissions within any trailing 60 seconds
    pub max_per_minute: u32,
    /// Maximum admissions within any trailing hour
    pub max_per_hour: u32,
    /// Maximum admitted requests in flight at once
    pub max_concurrent: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_per_minute: 60,
            max_per_hour: 1000,
            max_concurrent: 10,
        }
    }
}

impl RateLimitPolicy {
    /// Validates that every ceiling admits at least one request.
    ///
    /// # Errors
    /// Returns a configuration error naming the first zero ceiling.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_per_minute == 0 {
            return Err(crate::GatewayError::configuration(
                "rate limit per minute must be greater than 0",
            ));
        }
        if self.max_per_hour == 0 {
            return Err(crate::GatewayError::configuration(
                "rate limit per hour must be greater than 0",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(crate::GatewayError::configuration(
                "concurrent query limit must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Builder method to set the per-minute ceiling.
    pub fn with_max_per_minute(mut self, max: u32) -> Self {
        self.max_per_minute = max;
        self
    }

    /// Builder method to set the per-hour ceiling.
    pub fn with_max_per_hour(mut self, max: u32) -> Self {
        self.max_per_hour = max;
        self
    }

    /// Builder method to set the concurrency ceiling.
    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_policy_defaults() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.max_per_minute, 60);
        assert_eq!(policy.max_per_hour, 1000);
        assert_eq!(policy.max_concurrent, 10);
    }

    #[test]
    fn test_rate_limit_policy_rejects_zero_ceilings() {
        assert!(RateLimitPolicy::default().with_max_per_minute(0).validate().is_err());
        assert!(RateLimitPolicy::default().with_max_per_hour(0).validate().is_err());
        assert!(RateLimitPolicy::default().with_max_concurrent(0).validate().is_err());
    }
}
