use async_trait::async_trait;
use log::{debug, warn};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult, Script};
use tokio::sync::Mutex;

use super::{FinishedKind, JobStore};
use crate::config::QueueConfig;
use crate::errors::Result;
use crate::utils::mask_redis_url;

/// Pops the lowest-scored member if its score is <= ARGV[1].
/// KEYS[1]: pending sorted set
const CLAIM_SCRIPT: &str = r#"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #items == 0 then
  return false
end
redis.call('ZREM', KEYS[1], items[1])
return items[1]
"#;

/// Redis-backed store. Pending jobs live in a sorted set named after the
/// queue; history lists use `<queue>:completed` and `<queue>:failed`.
///
/// The connection is opened on first use and shared by every caller.
pub struct RedisStore {
    client: Client,
    url: String,
    pending_key: String,
    completed_key: String,
    failed_key: String,
    claim_script: Script,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Create a store for `queue_name`. No connection is made until first use.
    pub fn new(redis_url: &str, queue_name: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(RedisStore {
            client,
            url: redis_url.to_string(),
            pending_key: queue_name.to_string(),
            completed_key: format!("{}:completed", queue_name),
            failed_key: format!("{}:failed", queue_name),
            claim_script: Script::new(CLAIM_SCRIPT),
            conn: Mutex::new(None),
        })
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        Self::new(&config.redis_url, &config.queue_name)
    }

    fn history_key(&self, kind: FinishedKind) -> &str {
        match kind {
            FinishedKind::Completed => &self.completed_key,
            FinishedKind::Failed => &self.failed_key,
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Opening Redis connection to {}", mask_redis_url(&self.url));
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Drop the cached connection after a connection-level failure so the next call reconnects
    async fn check<T>(&self, result: RedisResult<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    warn!("Resetting Redis connection after error: {}", e);
                    *self.conn.lock().await = None;
                }
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn push(&self, member: &str, score: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("ZADD")
            .arg(&self.pending_key)
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await;
        self.check(result).await
    }

    async fn claim(&self, now: u64) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let result = self
            .claim_script
            .key(&self.pending_key)
            .arg(now)
            .invoke_async::<_, Option<String>>(&mut conn)
            .await;
        self.check(result).await
    }

    async fn remove(&self, member: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("ZREM")
            .arg(&self.pending_key)
            .arg(member)
            .query_async::<_, i64>(&mut conn)
            .await;
        Ok(self.check(result).await? > 0)
    }

    async fn range(&self, max_score: Option<u64>, limit: usize) -> Result<Vec<(String, u64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let max = max_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "+inf".to_string());

        let mut conn = self.connection().await?;
        let result = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.pending_key)
            .arg("-inf")
            .arg(max)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async::<_, Vec<(String, f64)>>(&mut conn)
            .await;

        Ok(self
            .check(result)
            .await?
            .into_iter()
            .map(|(member, score)| (member, score as u64))
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("ZCARD")
            .arg(&self.pending_key)
            .query_async::<_, usize>(&mut conn)
            .await;
        self.check(result).await
    }

    async fn record_finished(&self, kind: FinishedKind, member: &str, keep: usize) -> Result<()> {
        if keep == 0 {
            return Ok(());
        }
        let key = self.history_key(kind);

        let mut conn = self.connection().await?;
        let result = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(key)
            .arg(member)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(keep as isize - 1)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await;
        self.check(result).await
    }

    async fn finished(&self, kind: FinishedKind, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let result = redis::cmd("LRANGE")
            .arg(self.history_key(kind))
            .arg(0)
            .arg(limit as isize - 1)
            .query_async::<_, Vec<String>>(&mut conn)
            .await;
        self.check(result).await
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("DEL")
            .arg(&self.pending_key)
            .arg(&self.completed_key)
            .arg(&self.failed_key)
            .query_async::<_, ()>(&mut conn)
            .await;
        self.check(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    // Requires a Redis server on localhost; skipped when none is reachable
    async fn test_store() -> Option<RedisStore> {
        let queue_name = format!("jobrs-test-{}", Uuid::new_v4());
        let store = RedisStore::new("redis://127.0.0.1:6379", &queue_name).ok()?;
        store.len().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn test_redis_claim_is_ordered_and_bounded() {
        let Some(store) = test_store().await else {
            return;
        };

        store.push("b", 200).await.unwrap();
        store.push("a", 100).await.unwrap();

        assert_eq!(store.claim(50).await.unwrap(), None);
        assert_eq!(store.claim(250).await.unwrap(), Some("a".to_string()));
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(
            store.range(None, 10).await.unwrap(),
            vec![("b".to_string(), 200)]
        );

        store.clear().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redis_concurrent_claims_hand_out_a_member_once() {
        let Some(store) = test_store().await else {
            return;
        };
        let store = std::sync::Arc::new(store);
        store.push("only", 10).await.unwrap();

        let claims = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim(100).await.unwrap() })
        });
        let claimed: Vec<String> = futures::future::join_all(claims)
            .await
            .into_iter()
            .filter_map(|result| result.unwrap())
            .collect();

        assert_eq!(claimed, vec!["only".to_string()]);
        assert_eq!(store.len().await.unwrap(), 0);

        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_history_is_capped() {
        let Some(store) = test_store().await else {
            return;
        };

        for i in 0..4 {
            store
                .record_finished(FinishedKind::Failed, &i.to_string(), 2)
                .await
                .unwrap();
        }
        assert_eq!(
            store.finished(FinishedKind::Failed, 10).await.unwrap(),
            vec!["3".to_string(), "2".to_string()]
        );

        store.clear().await.unwrap();
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(RedisStore::new("not a url", "q").is_err());
    }
}
