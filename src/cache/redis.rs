//! Redis-backed [`KvStore`].
//!
//! A single multiplexed `ConnectionManager` is opened at startup and shared by
//! every request; it reconnects on its own after transient failures. Command
//! errors are surfaced as [`StoreError::Redis`], never swallowed.

use super::store::{KvStore, StoreError};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::info;

/// Delete `KEYS[1]` only while it still holds `ARGV[1]`.
const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    release_script: redis::Script,
}

impl RedisStore {
    /// Open a client for `url` and establish the managed connection.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!(backend = "redis", "store connection established");
        Ok(Self {
            conn,
            release_script: redis::Script::new(COMPARE_AND_DELETE),
        })
    }
}

/// Redis rejects `PX 0`; a sub-millisecond lifetime rounds up to one.
fn as_px(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        marker: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        // SET key marker NX PX lease -> "OK" when created, nil when the key exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(marker)
            .arg("NX")
            .arg("PX")
            .arg(as_px(lease))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(as_px(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_rounds_up_to_one_millisecond() {
        assert_eq!(as_px(Duration::ZERO), 1);
        assert_eq!(as_px(Duration::from_micros(300)), 1);
        assert_eq!(as_px(Duration::from_millis(1500)), 1500);
        assert_eq!(as_px(Duration::from_secs(60)), 60_000);
    }
}
