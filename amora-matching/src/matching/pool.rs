use std::collections::HashSet;

use amora_shared::clients::RedisClient;
use amora_shared::{AppError, AppResult};
use async_trait::async_trait;

use crate::domain::{UserId, WaitingEntry};
use crate::ports::WaitingPool;

/// Conditional two-member delete. Runs server-side, so no other pool mutation
/// can slip between the existence checks and the deletes.
const REMOVE_PAIR_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 1 and redis.call('HEXISTS', KEYS[1], ARGV[2]) == 1 then
    redis.call('HDEL', KEYS[1], ARGV[1], ARGV[2])
    return 1
end
return 0
"#;

/// Waiting pool stored as one Redis hash: field = user id, value = the
/// serialized entry. A single HSET makes upsert last-writer-wins.
pub struct RedisWaitingPool {
    redis: RedisClient,
    key: String,
    lock_prefix: String,
}

impl RedisWaitingPool {
    pub fn new(redis: RedisClient, key: impl Into<String>) -> Self {
        let key = key.into();
        let lock_prefix = format!("{key}:lock");
        Self { redis, key, lock_prefix }
    }

    fn lock_key(&self, user: UserId) -> String {
        format!("{}:{}", self.lock_prefix, user)
    }
}

#[async_trait]
impl WaitingPool for RedisWaitingPool {
    async fn upsert(&self, entry: &WaitingEntry) -> AppResult<()> {
        let data = serde_json::to_string(entry)
            .map_err(|e| AppError::internal(format!("failed to serialize pool entry: {e}")))?;
        self.redis
            .hset(&self.key, &entry.user_id.to_string(), &data)
            .await?;
        Ok(())
    }

    async fn remove(&self, user: UserId) -> AppResult<bool> {
        let removed = self.redis.hdel(&self.key, &user.to_string()).await?;
        Ok(removed > 0)
    }

    async fn remove_pair(&self, a: UserId, b: UserId) -> AppResult<bool> {
        let mut conn = self.redis.connection();
        let removed: i64 = redis::Script::new(REMOVE_PAIR_SCRIPT)
            .key(&self.key)
            .arg(a.to_string())
            .arg(b.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn candidates(&self, excluding: &HashSet<UserId>) -> AppResult<Vec<WaitingEntry>> {
        let raw = self.redis.hgetall(&self.key).await?;
        let mut entries: Vec<WaitingEntry> = Vec::with_capacity(raw.len());
        for (field, value) in raw {
            match serde_json::from_str::<WaitingEntry>(&value) {
                Ok(entry) => {
                    if !excluding.contains(&entry.user_id) {
                        entries.push(entry);
                    }
                }
                Err(error) => {
                    tracing::warn!(field = %field, %error, "skipping unreadable pool entry");
                }
            }
        }
        entries.sort_by_key(|e| (e.enqueued_at, e.user_id));
        Ok(entries)
    }

    async fn contains(&self, user: UserId) -> AppResult<bool> {
        Ok(self.redis.hexists(&self.key, &user.to_string()).await?)
    }

    async fn try_lock(&self, user: UserId, ttl_secs: u64) -> AppResult<bool> {
        Ok(self.redis.set_nx(&self.lock_key(user), "1", ttl_secs).await?)
    }

    async fn unlock(&self, user: UserId) -> AppResult<()> {
        self.redis.del(&self.lock_key(user)).await?;
        Ok(())
    }
}
