//! Key-value cache (spec §4.6).
//!
//! Read-through/write-through with per-domain TTLs. Backed by `redis`'s
//! `ConnectionManager`, which is already `Clone` and safe for concurrent
//! use, so `Cache` is held directly rather than behind the `Arc<Mutex<_>>`
//! the teacher uses for its synchronous Diesel connections.

use anyhow::{Context, Result};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Per-domain TTLs in seconds, exactly as enumerated in spec §4.6.
pub mod ttl {
    pub const USER: u64 = 3600;
    pub const SESSION: u64 = 1800;
    pub const SESSION_SUMMARY: u64 = 900;
    pub const MESSAGE_HISTORY: u64 = 300;
    pub const ANALYSIS: u64 = 300;
    pub const TOOL_SEARCH: u64 = 300;
    pub const APP_ROUTING: u64 = 300;
    pub const CONNECTION_STATUS: u64 = 300;
    pub const CONVERSATIONS_LIST: u64 = 600;
    pub const USER_CONNECTIONS: u64 = 600;
}

#[derive(Clone)]
pub struct Cache {
    manager: redis::aio::ConnectionManager,
}

impl Cache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid redis URL")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager })
    }

    /// Natural keys are hashed per spec §4.6: base64 over UTF-8, with
    /// `/`, `+`, `=` replaced by `_` so the result is ASCII-safe.
    pub fn hash_key(domain: &str, natural_key: &str) -> String {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(natural_key.as_bytes());
        let safe: String = encoded
            .chars()
            .map(|c| match c {
                '/' | '+' | '=' => '_',
                other => other,
            })
            .collect();
        format!("{}:{}", domain, safe)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .context("cache read failed")?;

        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("cache value deserialization failed")?,
            )),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        let raw = serde_json::to_string(value).context("cache value serialization failed")?;
        conn.set_ex::<_, _, ()>(key, raw, ttl_secs)
            .await
            .context("cache write failed")?;
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await.context("cache invalidate failed")?;
        Ok(())
    }

    /// Read-through helper: returns the cached value if present, otherwise
    /// calls `compute`, caches its result, and returns it. Mirrors the
    /// read-through contract in spec §4.1/§4.2/§4.3 uniformly across the
    /// stages that cache by domain-specific keys.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl_secs: u64,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await.unwrap_or_else(|e| {
            tracing::warn!("cache read error for {}: {} - treating as miss", key, e);
            None
        }) {
            return Ok(cached);
        }

        let value = compute().await?;
        if let Err(e) = self.set(key, &value, ttl_secs).await {
            tracing::warn!("cache write error for {}: {}", key, e);
        }
        Ok(value)
    }
}

pub fn ttl_duration(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_is_ascii_safe() {
        let key = Cache::hash_key("analysis", "some query|with special/chars+=");
        assert!(key.chars().all(|c| c.is_ascii()));
        assert!(!key.contains('/'));
        assert!(!key.contains('+'));
        assert!(!key.contains('='));
        assert!(key.starts_with("analysis:"));
    }

    #[test]
    fn hash_key_is_deterministic() {
        let a = Cache::hash_key("session", "abc");
        let b = Cache::hash_key("session", "abc");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_key_differs_by_domain() {
        let a = Cache::hash_key("session", "abc");
        let b = Cache::hash_key("user", "abc");
        assert_ne!(a, b);
    }
}
