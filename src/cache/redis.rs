//! Redis-backed aggregate total cache
//!
//! The total and its generation counter live next to each other in Redis so
//! every process sees the same slot and the same invalidations. The
//! generation check and the write of a fill run as one Lua script.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{CachedTotal, FillTicket, TotalCache};
use crate::config::CacheConfig;
use crate::error::{AppError, Result};

/// Store the total only if no invalidation happened since the ticket's lookup
const FILL_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[2]) or '0'
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
return 1
"#;

pub struct RedisTotalCache {
    client: redis::Client,
    key: String,
    generation_key: String,
    ttl: Duration,
    fill_script: redis::Script,
}

impl RedisTotalCache {
    /// Create a Redis cache from the configured URL, key and TTL
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| AppError::Cache("no Redis URL configured".to_string()))?;
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Cache(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            key: config.total_key.clone(),
            generation_key: format!("{}:generation", config.total_key),
            ttl: Duration::from_secs(config.ttl_seconds),
            fill_script: redis::Script::new(FILL_SCRIPT),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Cache(format!("Failed to get Redis connection: {}", e)))
    }
}

#[async_trait]
impl TotalCache for RedisTotalCache {
    async fn lookup(&self) -> Result<CachedTotal> {
        let mut conn = self.get_connection().await?;

        let (total, generation): (Option<i64>, Option<u64>) = redis::cmd("MGET")
            .arg(&self.key)
            .arg(&self.generation_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Cache(format!("Redis MGET failed: {}", e)))?;

        match total {
            Some(total) => {
                debug!("Cache HIT for total price");
                Ok(CachedTotal::Hit(total))
            }
            None => {
                debug!("Cache MISS for total price");
                Ok(CachedTotal::Miss(FillTicket(generation.unwrap_or(0))))
            }
        }
    }

    async fn fill(&self, ticket: FillTicket, total: i64) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let stored: i64 = self
            .fill_script
            .key(&self.key)
            .key(&self.generation_key)
            .arg(ticket.0)
            .arg(total)
            .arg(self.ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::Cache(format!("Redis fill script failed: {}", e)))?;

        Ok(stored == 1)
    }

    async fn invalidate(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;

        let () = redis::pipe()
            .atomic()
            .incr(&self.generation_key, 1)
            .ignore()
            .del(&self.key)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Cache(format!("Redis invalidate failed: {}", e)))?;

        debug!(key = %self.key, "Total price cache invalidated");
        Ok(())
    }
}
