//! Configuration types for the gateway.
//!
//! - `GatewayConfig`: connection target, pool, timeout, result cap, write-mode
//! - `RateLimitPolicy`: per-minute, per-hour, and concurrency ceilings
//!
//! # Security
//! Passwords are held in [`Credentials`](crate::security::Credentials) and
//! never appear in `Display` output or error messages.

mod gateway;
mod rate_limit;

pub use gateway::{
    DEFAULT_MAX_RESULTS, DEFAULT_POOL_SIZE, DEFAULT_PORT, DEFAULT_QUERY_TIMEOUT, GatewayConfig,
};
pub use rate_limit::RateLimitPolicy;
