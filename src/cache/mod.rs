//! Aggregate total price cache
//!
//! Holds the sum of all subscription prices. The slot is pure memoization:
//! it is dropped on every price change or subscription deletion and
//! recomputed from the store on the next listing request.
//!
//! [`AppCache`] keeps the slot in process with moka. [`RedisTotalCache`]
//! shares it between processes, which is required once workers in one
//! process change prices that another process serves.

mod redis;

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::Result;

pub use self::redis::RedisTotalCache;

/// Proof that a lookup missed, used to guard the later fill.
///
/// A fill is discarded if the slot was invalidated after the miss, so a sum
/// computed from pre-change rows never outlives the invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedTotal {
    Hit(i64),
    Miss(FillTicket),
}

/// Storage for the aggregate total price slot
#[async_trait]
pub trait TotalCache: Send + Sync {
    async fn lookup(&self) -> Result<CachedTotal>;

    /// Store a freshly computed total. Returns false when the ticket is stale
    /// and the value was not kept.
    async fn fill(&self, ticket: FillTicket, total: i64) -> Result<bool>;

    /// Drop the slot. Deleting an absent slot is not an error.
    async fn invalidate(&self) -> Result<()>;
}

/// Drop the aggregate total, logging instead of failing on cache errors
pub async fn invalidate_total(cache: &dyn TotalCache) {
    if let Err(e) = cache.invalidate().await {
        warn!(error = %e, "Failed to invalidate total price cache");
    }
}

/// In-process cache holding the aggregate total price
#[derive(Clone)]
pub struct AppCache {
    /// Slot key -> total price
    totals: Cache<String, i64>,
    key: String,
    /// Bumped on every invalidation
    generation: Arc<AtomicU64>,
}

impl AppCache {
    /// Create a new cache instance with the configured key and TTL
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            totals: Cache::builder()
                .time_to_live(Duration::from_secs(config.ttl_seconds))
                .build(),
            key: config.total_key.clone(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            key: self.key.clone(),
            total_cached: self.totals.contains_key(&self.key),
            generation: self.generation.load(Ordering::Acquire),
        }
    }
}

impl Default for AppCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl TotalCache for AppCache {
    async fn lookup(&self) -> Result<CachedTotal> {
        let ticket = FillTicket(self.generation.load(Ordering::Acquire));
        match self.totals.get(&self.key).await {
            Some(total) => {
                debug!("Cache HIT for total price");
                Ok(CachedTotal::Hit(total))
            }
            None => {
                debug!("Cache MISS for total price");
                Ok(CachedTotal::Miss(ticket))
            }
        }
    }

    async fn fill(&self, ticket: FillTicket, total: i64) -> Result<bool> {
        if self.generation.load(Ordering::Acquire) != ticket.0 {
            return Ok(false);
        }
        self.totals.insert(self.key.clone(), total).await;

        // An invalidation may have landed between the check and the insert.
        if self.generation.load(Ordering::Acquire) != ticket.0 {
            self.totals.invalidate(&self.key).await;
            return Ok(false);
        }
        Ok(true)
    }

    async fn invalidate(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.totals.invalidate(&self.key).await;
        debug!(key = %self.key, "Total price cache invalidated");
        Ok(())
    }
}

/// Snapshot of the in-process slot
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub key: String,
    pub total_cached: bool,
    pub generation: u64,
}
