use crate::{Cache, CacheError};
use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use gateway_time::Duration;
use std::collections::HashMap;

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

fn ttl_seconds(ttl: Duration) -> usize {
    ttl.whole_seconds().max(1) as usize
}

/// Cache backend speaking to a redis-compatible store. The connection
/// manager reconnects on its own; a relay observing a broken connection
/// just sees a cache miss.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(endpoint: &str) -> Result<RedisCache, CacheError> {
        let client = ::redis::Client::open(endpoint)?;
        let connection = client.get_tokio_connection_manager().await?;
        tracing::info!(target: "cache", %endpoint, "connected to cache backend");
        Ok(RedisCache { connection })
    }
}

#[async_trait::async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection.clone();
        Ok(connection.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        Ok(connection.set_ex(key, value, ttl_seconds(ttl)).await?)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut connection = self.connection.clone();
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut connection)
            .await?;
        Ok(reply.is_some())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, CacheError> {
        let mut connection = self.connection.clone();
        Ok(connection.hincr(key, field, delta).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut connection = self.connection.clone();
        Ok(connection.hgetall(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut connection = self.connection.clone();
        Ok(connection.expire(key, ttl_seconds(ttl)).await?)
    }
}
