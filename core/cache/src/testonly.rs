//! In-memory cache backend for tests. Expiry follows the injected clock, so
//! TTL behavior is testable with a `FakeClock`.

use crate::{Cache, CacheError};
use gateway_time::{Clock, Duration, Instant};
use parking_lot::Mutex;
use std::collections::HashMap;

enum Value {
    Plain(String),
    Hash(HashMap<String, i64>),
}

struct Entry {
    value: Value,
    /// `None` for hashes created by `hincrby`, which persist until an
    /// explicit `expire`, matching redis semantics.
    expires_at: Option<Instant>,
}

pub struct InMemoryCache {
    clock: Clock,
    entries: Mutex<HashMap<String, Entry>>,
    failing: Mutex<bool>,
}

impl InMemoryCache {
    pub fn new(clock: Clock) -> Self {
        Self { clock, entries: Mutex::new(HashMap::new()), failing: Mutex::new(false) }
    }

    /// When set, every operation fails, simulating an unreachable backend.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Remaining TTL of a live entry, for assertions.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = live_entry(&mut entries, key, now)?;
        let expires_at = entry.expires_at?;
        Some(Duration::try_from(expires_at - now).unwrap_or(Duration::ZERO))
    }

    fn check_failing(&self) -> Result<(), CacheError> {
        if *self.failing.lock() {
            return Err(CacheError::Backend("injected failure".to_owned()));
        }
        Ok(())
    }
}

fn live_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if let Some(entry) = entries.get(key) {
        if entry.expires_at.is_some_and(|expires_at| expires_at <= now) {
            entries.remove(key);
            return None;
        }
    }
    entries.get_mut(key)
}

#[async_trait::async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_failing()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match live_entry(&mut entries, key, now).map(|entry| &entry.value) {
            Some(Value::Plain(value)) => Ok(Some(value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_failing()?;
        let expires_at = Some(self.clock.now() + ttl.unsigned_abs());
        self.entries
            .lock()
            .insert(key.to_owned(), Entry { value: Value::Plain(value.to_owned()), expires_at });
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        self.check_failing()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        let expires_at = Some(now + ttl.unsigned_abs());
        entries.insert(key.to_owned(), Entry { value: Value::Plain(value.to_owned()), expires_at });
        Ok(true)
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        self.check_failing()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        live_entry(&mut entries, key, now);
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry { value: Value::Hash(HashMap::new()), expires_at: None });
        match &mut entry.value {
            Value::Hash(hash) => {
                let counter = hash.entry(field.to_owned()).or_insert(0);
                *counter += delta;
                Ok(*counter)
            }
            Value::Plain(_) => {
                Err(CacheError::Backend("WRONGTYPE: not a hash".to_owned()))
            }
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check_failing()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match live_entry(&mut entries, key, now).map(|entry| &entry.value) {
            Some(Value::Hash(hash)) => Ok(hash
                .iter()
                .map(|(field, counter)| (field.clone(), counter.to_string()))
                .collect()),
            _ => Ok(HashMap::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_failing()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if let Some(entry) = live_entry(&mut entries, key, now) {
            entry.expires_at = Some(now + ttl.unsigned_abs());
        }
        Ok(())
    }
}
