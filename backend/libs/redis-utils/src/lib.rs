//! Shared Redis plumbing: one connection manager per process plus a helper that
//! bounds every command by a timeout so a stalled server cannot hang a request.
use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind, IntoConnectionInfo, RedisError, RedisResult};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Default bound applied to a single Redis round trip.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis connection pool backed by a reconnecting `ConnectionManager`.
pub struct RedisPool {
    manager: SharedConnectionManager,
    command_timeout: Duration,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_with_timeout(redis_url, DEFAULT_COMMAND_TIMEOUT).await
    }

    pub async fn connect_with_timeout(redis_url: &str, command_timeout: Duration) -> Result<Self> {
        let info = redis_url
            .into_connection_info()
            .context("failed to parse REDIS_URL connection string")?;
        let addr = format!("{:?}", info.addr);

        let client = Client::open(info).context("failed to construct Redis client")?;
        let connection_manager = timeout(command_timeout, ConnectionManager::new(client))
            .await
            .context("timed out connecting to Redis")?
            .context("failed to initialize Redis connection manager")?;

        info!(redis_addr = %addr, "Redis connection manager ready");

        Ok(Self {
            manager: Arc::new(Mutex::new(connection_manager)),
            command_timeout,
        })
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Round-trip a PING; used by readiness checks.
    pub async fn ping(&self) -> Result<()> {
        let manager = self.manager.clone();
        with_timeout(self.command_timeout, async move {
            let mut conn = manager.lock().await;
            redis::cmd("PING").query_async::<_, String>(&mut *conn).await
        })
        .await
        .context("Redis PING failed")?;
        Ok(())
    }
}

/// Run a Redis operation, converting an elapsed deadline into an `IoError`-kind `RedisError`.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> RedisResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "Redis operation timed out");
            Err(RedisError::from((ErrorKind::IoError, "redis operation timed out")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let value = with_timeout(Duration::from_millis(100), async { Ok::<_, RedisError>(7) })
            .await
            .expect("completes before deadline");
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed() {
        let result: RedisResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        let err = result.expect_err("should time out");
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        assert!(RedisPool::connect("not-a-url").await.is_err());
    }
}
