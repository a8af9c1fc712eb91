//! Seam over the short-TTL key/value store every gateway process shares.
//! All coordination between concurrent relays (probe locks, verified node
//! sets, service logs) flows through this cache; there is no shared mutable
//! in-process state.
//!
//! Cache failures never stop a relay. Callers treat every error as a cache
//! miss, log it and proceed.

use gateway_time::Duration;
use std::collections::HashMap;

pub mod keys;
mod redis;
pub mod testonly;

pub use crate::redis::RedisCache;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// The five operations the dispatcher needs from a Redis-like store, plus
/// the SET NX EX primitive backing probe locks.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// SET NX EX: stores `value` only if `key` is absent. Returns whether
    /// the write happened. The probe-lock primitive; at most one caller per
    /// TTL window observes `true`.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Atomically increments `field` of the hash at `key`, creating both as
    /// needed, and returns the new value.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}
