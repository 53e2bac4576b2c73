//! Cache service (C11): TTL key-value store with a redis-backed primary and
//! a transparent in-process fallback, engaged whenever the primary is
//! unreachable or unconfigured. Never authoritative — every caller must be
//! able to recompute or reload from persistence on a cold cache.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct FallbackEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process fallback store, guarded by `parking_lot` (short critical
/// sections only — no `.await` held across the lock).
struct FallbackStore {
    entries: Mutex<HashMap<String, FallbackEntry>>,
}

impl FallbackStore {
    fn new() -> Self {
        FallbackStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            FallbackEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn delete_pattern(&self, pattern: &str) {
        let regex = glob_to_regex(pattern);
        let mut entries = self.entries.lock();
        entries.retain(|k, _| !regex.is_match(k));
    }

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let now = Instant::now();
        let live = entries.values().filter(|e| e.expires_at > now).count();
        CacheStats {
            backend: "fallback",
            live_keys: live,
        }
    }
}

fn glob_to_regex(pattern: &str) -> regex::Regex {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('^');
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            escaped.push_str(".*");
        }
        escaped.push_str(&regex::escape(part).replace(r"\?", "."));
    }
    escaped.push('$');
    regex::Regex::new(&escaped).unwrap_or_else(|_| regex::Regex::new("^$").unwrap())
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub backend: &'static str,
    pub live_keys: usize,
}

/// TTLs callers should use, per §4.11.
pub mod ttl {
    use std::time::Duration;
    pub const ARTICLE_LISTING: Duration = Duration::from_secs(60);
    pub const VOLUME_OR_SIMPLIFIED: Duration = Duration::from_secs(300);
}

pub struct CacheService {
    redis: Option<redis::aio::ConnectionManager>,
    fallback: FallbackStore,
}

impl CacheService {
    /// Connects to `redis_url` if given; any connection failure degrades
    /// silently to the in-process fallback rather than failing startup.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let redis = match redis_url {
            Some(url) => match redis::Client::open(url) {
                Ok(client) => match client.get_connection_manager().await {
                    Ok(manager) => {
                        debug!("cache: connected to redis primary");
                        Some(manager)
                    }
                    Err(e) => {
                        warn!("cache: redis connection failed, using in-process fallback: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!("cache: invalid redis url, using in-process fallback: {e}");
                    None
                }
            },
            None => None,
        };
        CacheService {
            redis,
            fallback: FallbackStore::new(),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> anyhow::Result<()> {
        let bytes = bincode::serialize(value)?;
        if let Some(manager) = &self.redis {
            let mut manager = manager.clone();
            let result: redis::RedisResult<()> = redis::cmd("SET")
                .arg(key)
                .arg(&bytes)
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut manager)
                .await;
            if let Err(e) = result {
                warn!("cache: redis SET failed, falling back in-process: {e}");
                self.fallback.set(key, bytes, ttl);
            }
            return Ok(());
        }
        self.fallback.set(key, bytes, ttl);
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        if let Some(manager) = &self.redis {
            let mut manager = manager.clone();
            let result: redis::RedisResult<Option<Vec<u8>>> =
                redis::cmd("GET").arg(key).query_async(&mut manager).await;
            match result {
                Ok(Some(bytes)) => return Ok(Some(bincode::deserialize(&bytes)?)),
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!("cache: redis GET failed, falling back in-process: {e}");
                }
            }
        }
        match self.fallback.get(key) {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        if let Some(manager) = &self.redis {
            let mut manager = manager.clone();
            let _: redis::RedisResult<()> = redis::cmd("DEL").arg(key).query_async(&mut manager).await;
        }
        self.fallback.delete(key);
        Ok(())
    }

    /// Glob-pattern deletion (`prefix:*`). Redis's native `KEYS` + pipelined
    /// `DEL` is used when the primary is live; the fallback matches the same
    /// glob semantics in-process.
    pub async fn delete_pattern(&self, pattern: &str) -> anyhow::Result<()> {
        if let Some(manager) = &self.redis {
            let mut manager = manager.clone();
            let keys: redis::RedisResult<Vec<String>> =
                redis::cmd("KEYS").arg(pattern).query_async(&mut manager).await;
            if let Ok(keys) = keys {
                if !keys.is_empty() {
                    let _: redis::RedisResult<()> =
                        redis::cmd("DEL").arg(keys).query_async(&mut manager).await;
                }
            }
        }
        self.fallback.delete_pattern(pattern);
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        if let Some(manager) = &self.redis {
            let mut manager = manager.clone();
            let result: redis::RedisResult<bool> =
                redis::cmd("EXISTS").arg(key).query_async(&mut manager).await;
            if let Ok(exists) = result {
                return Ok(exists);
            }
        }
        Ok(self.fallback.exists(key))
    }

    /// Read-through helper: returns the cached value, or computes, caches,
    /// and returns `compute`'s result on a miss.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await? {
            return Ok(cached);
        }
        let value = compute().await?;
        self.set(key, &value, ttl).await?;
        Ok(value)
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        if let Some(manager) = &self.redis {
            let mut manager = manager.clone();
            let _: redis::RedisResult<()> = redis::cmd("FLUSHDB").query_async(&mut manager).await;
        }
        self.fallback.clear();
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        if self.redis.is_some() {
            CacheStats {
                backend: "redis",
                live_keys: self.fallback.stats().live_keys,
            }
        } else {
            self.fallback.stats()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_within_ttl_then_miss_after_expiry() {
        let cache = CacheService::connect(None).await;
        cache.set("k", &"v".to_string(), Duration::from_millis(50)).await.unwrap();
        let hit: Option<String> = cache.get("k").await.unwrap();
        assert_eq!(hit, Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        let miss: Option<String> = cache.get("k").await.unwrap();
        assert_eq!(miss, None);
    }

    #[tokio::test]
    async fn delete_pattern_matches_glob_prefix() {
        let cache = CacheService::connect(None).await;
        cache.set("listing:a", &1i32, Duration::from_secs(60)).await.unwrap();
        cache.set("listing:b", &2i32, Duration::from_secs(60)).await.unwrap();
        cache.set("other:c", &3i32, Duration::from_secs(60)).await.unwrap();

        cache.delete_pattern("listing:*").await.unwrap();

        assert!(!cache.exists("listing:a").await.unwrap());
        assert!(!cache.exists("listing:b").await.unwrap());
        assert!(cache.exists("other:c").await.unwrap());
    }

    #[tokio::test]
    async fn get_or_set_computes_once_on_miss() {
        let cache = CacheService::connect(None).await;
        let value: i32 = cache
            .get_or_set("computed", Duration::from_secs(60), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let cached: i32 = cache
            .get_or_set("computed", Duration::from_secs(60), || async { Ok(99) })
            .await
            .unwrap();
        assert_eq!(cached, 7);
    }
}
