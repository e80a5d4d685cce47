//! Trigger endpoint protection for formsync
//!
//! This module provides:
//! - Shared bearer token verification
//! - Sliding-window rate limiting per caller identity

pub mod ratelimit;
pub mod token;

pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use token::{bearer_token, hash_token, verify_token, HashError, TriggerAuth};
