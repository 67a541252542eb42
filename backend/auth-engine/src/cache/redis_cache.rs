use super::{CacheStore, CounterState};
use crate::error::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Pipeline, Script};
use redis_utils::{with_timeout, RedisPool, SharedConnectionManager};
use std::time::Duration;
use tracing::debug;

/// INCR and set the window on first use, as one server-side step
static INCREMENT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local count = redis.call('INCR', KEYS[1])
        if count == 1 then
            redis.call('PEXPIRE', KEYS[1], ARGV[1])
        end
        return {count, redis.call('PTTL', KEYS[1])}
        "#,
    )
});

/// Redis-backed cache sharing the process-wide connection manager
#[derive(Clone)]
pub struct RedisCache {
    redis: SharedConnectionManager,
    command_timeout: Duration,
    key_prefix: String,
}

impl RedisCache {
    pub fn new(redis: SharedConnectionManager, command_timeout: Duration) -> Self {
        Self {
            redis,
            command_timeout,
            key_prefix: "parley:auth:".to_string(),
        }
    }

    pub fn from_pool(pool: &RedisPool) -> Self {
        Self::new(pool.manager(), pool.command_timeout())
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

/// Escape glob metacharacters so a prefix matches literally in SCAN MATCH
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.key(key);
        let value = with_timeout(self.command_timeout, async {
            let mut conn = self.redis.lock().await;
            conn.get::<_, Option<String>>(&key).await
        })
        .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = self.key(key);
        with_timeout(self.command_timeout, async {
            let mut conn = self.redis.lock().await;
            match ttl {
                Some(ttl) => {
                    let millis = ttl.as_millis().max(1) as u64;
                    conn.pset_ex::<_, _, ()>(&key, value, millis).await
                }
                None => conn.set::<_, _, ()>(&key, value).await,
            }
        })
        .await?;
        debug!(key = %key, "Cache set");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let key = self.key(key);
        let removed: u64 = with_timeout(self.command_timeout, async {
            let mut conn = self.redis.lock().await;
            conn.del(&key).await
        })
        .await?;
        Ok(removed > 0)
    }

    async fn remove_by_prefix(&self, prefix: &str) -> Result<usize> {
        let pattern = format!("{}*", escape_glob(&self.key(prefix)));
        let mut conn = self.redis.lock().await;
        let mut cursor: u64 = 0;
        let mut total_deleted = 0;

        loop {
            // Use SCAN instead of KEYS to avoid blocking
            let (next_cursor, keys): (u64, Vec<String>) = with_timeout(
                self.command_timeout,
                redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query_async(&mut *conn),
            )
            .await?;

            if !keys.is_empty() {
                let mut pipe = Pipeline::new();
                for key in &keys {
                    pipe.del(key);
                }
                with_timeout(self.command_timeout, pipe.query_async::<_, ()>(&mut *conn)).await?;
                total_deleted += keys.len();
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(pattern = %pattern, deleted = total_deleted, "Cache scan delete");
        Ok(total_deleted)
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let key = self.key(key);
        // GETDEL needs Redis >= 6.2
        let value = with_timeout(self.command_timeout, async {
            let mut conn = self.redis.lock().await;
            redis::cmd("GETDEL")
                .arg(&key)
                .query_async::<_, Option<String>>(&mut *conn)
                .await
        })
        .await?;
        Ok(value)
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<CounterState> {
        let key = self.key(key);
        let window_ms = window.as_millis().max(1) as u64;

        let (count, ttl_ms): (u64, i64) = with_timeout(self.command_timeout, async {
            let mut conn = self.redis.lock().await;
            INCREMENT_SCRIPT
                .key(&key)
                .arg(window_ms)
                .invoke_async(&mut *conn)
                .await
        })
        .await?;

        Ok(CounterState {
            count,
            // PTTL is negative when the key has no expiry
            ttl: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }
}
