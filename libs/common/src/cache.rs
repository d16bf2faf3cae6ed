//! Redis cache module
//!
//! Holds short-lived state that must survive across requests but not across
//! days, such as pending OAuth authorization flows. Values are stored with a
//! TTL so abandoned entries clean themselves up.

use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

use crate::error::CacheResult;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Prefix applied to every key written by this process
    pub key_prefix: String,
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_KEY_PREFIX`: Namespace for keys (default: "access")
    pub fn from_env() -> Self {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let key_prefix = std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "access".to_string());

        RedisConfig { url, key_prefix }
    }
}

/// Redis connection handle
///
/// Cloning is cheap; every operation opens a multiplexed connection on demand.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    key_prefix: String,
}

impl RedisPool {
    /// Create a handle for the configured Redis server.
    ///
    /// This only parses the URL; no connection is made until first use.
    pub fn new(config: &RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.clone())?;
        info!("Redis client initialized with URL: {}", config.url);
        Ok(RedisPool {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Set a key-value pair in Redis with optional TTL
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.key(key);

        if let Some(ttl) = ttl_seconds {
            let _: () = conn.set_ex(key, value, ttl).await?;
        } else {
            let _: () = conn.set(key, value).await?;
        }

        Ok(())
    }

    /// Get a value from Redis by key
    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    /// Read and delete a key in one round trip.
    ///
    /// Two concurrent callers can never both observe the same value.
    pub async fn take(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.get_connection().await?;
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    /// Delete a key from Redis
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let _: u64 = conn.del(self.key(key)).await?;
        Ok(())
    }

    /// Store a JSON-encoded value with a TTL
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> CacheResult<()> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, &encoded, Some(ttl_seconds)).await
    }

    /// Consume a JSON-encoded value written by [`RedisPool::set_json`]
    pub async fn take_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.take(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        let pool = RedisPool::new(&RedisConfig {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "access".to_string(),
        })
        .unwrap();

        assert_eq!(pool.key("oauth_state:abc"), "access:oauth_state:abc");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = RedisPool::new(&RedisConfig {
            url: "not a url".to_string(),
            key_prefix: "access".to_string(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_take_consumes_value() -> anyhow::Result<()> {
        let pool = RedisPool::new(&RedisConfig::from_env())?;

        pool.set("take_test", "value", Some(5)).await?;
        assert_eq!(pool.take("take_test").await?, Some("value".to_string()));
        assert_eq!(pool.take("take_test").await?, None);

        Ok(())
    }
}
