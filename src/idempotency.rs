use crate::cache::TtlCache;
use redis::AsyncCommands;
use tokio::time::Duration;
use uuid::Uuid;

const KEY_PREFIX: &str = "flipscout:idempotency:";

/// Maps an `Idempotency-Key` to the job it created. Redis when configured,
/// otherwise an in-process cache with the same TTL.
pub struct IdempotencyStore {
    redis: Option<redis::Client>,
    local: TtlCache<String, Uuid>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(redis: Option<redis::Client>, max_entries: usize, ttl: Duration) -> Self {
        Self {
            redis,
            local: TtlCache::new(max_entries, ttl),
            ttl,
        }
    }

    pub async fn get(&self, owner_id: &str, key: &str) -> Option<Uuid> {
        let scoped = scoped_key(owner_id, key);
        if let Some(client) = &self.redis {
            return redis_get(client, &scoped).await;
        }
        self.local.get(&scoped).await
    }

    pub async fn remember(&self, owner_id: &str, key: &str, job_id: Uuid) {
        let scoped = scoped_key(owner_id, key);
        if let Some(client) = &self.redis {
            redis_set(client, &scoped, job_id, self.ttl.as_secs()).await;
            return;
        }
        self.local.set(scoped, job_id).await;
    }
}

/// Keys are per owner so two callers never collide.
fn scoped_key(owner_id: &str, key: &str) -> String {
    format!("{KEY_PREFIX}{owner_id}:{}", key.trim())
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<Uuid> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(key).await.ok().flatten();
    s.and_then(|v| Uuid::parse_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, job_id: Uuid, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
        let _: Result<(), _> = conn.set_ex(key, job_id.to_string(), ttl_secs.max(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_fallback_remembers_per_owner() {
        let store = IdempotencyStore::new(None, 8, Duration::from_secs(60));
        let id = Uuid::new_v4();
        store.remember("owner-1", "scan-42", id).await;
        assert_eq!(store.get("owner-1", " scan-42 ").await, Some(id));
        assert_eq!(store.get("owner-2", "scan-42").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn local_entries_expire() {
        let store = IdempotencyStore::new(None, 8, Duration::from_secs(5));
        store.remember("owner-1", "scan-42", Uuid::new_v4()).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("owner-1", "scan-42").await, None);
    }
}
