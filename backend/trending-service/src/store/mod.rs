//! Persistence for usage history and derived scores
//!
//! Every operation is keyed by the trend kind name so one store handle can
//! back the statuses, tags and links calculators at once. Implementations
//! must make `add_usage` and `mark_active` atomic per key; the engine holds
//! no application-level locks around them.
//!
//! Moderation decisions from `set_allowed` are kept apart from score records.
//! Every read of a record or of meta applies the decision on top, so a refresh
//! rewriting a record can never undo one.

mod memory;
mod redis_store;

pub use self::memory::MemoryTrendStore;
pub use self::redis_store::{RedisTrendStore, SharedRedis};

use crate::bucket::BucketKey;
use crate::error::Result;
use crate::{AccountId, EntityId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cached, decayed score for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub entity_id: EntityId,
    pub score: f64,
    pub language: Option<String>,
    /// Moderation gate for public listings
    pub allowed: bool,
    pub updated_at: DateTime<Utc>,
    /// Last refresh that folded in new usage
    pub last_active_at: DateTime<Utc>,
    /// Bucket of `updated_at` and how many of its uses were already counted
    pub counted_bucket: BucketKey,
    pub counted_uses: u64,
}

/// Per-entity attributes captured when usage is recorded
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityMeta {
    pub language: Option<String>,
    pub allowed: bool,
}

#[async_trait]
pub trait TrendStore: Send + Sync {
    /// Add `account_id` to the distinct-account set of one bucket.
    /// Returns true when the account was not yet present.
    async fn add_usage(
        &self,
        kind: &str,
        entity_id: EntityId,
        bucket: BucketKey,
        account_id: AccountId,
        ttl: Duration,
    ) -> Result<bool>;

    /// Distinct-account counts for every bucket in `from..=to`
    async fn usage_counts(
        &self,
        kind: &str,
        entity_id: EntityId,
        from: BucketKey,
        to: BucketKey,
    ) -> Result<Vec<(BucketKey, u64)>>;

    /// Remember that `entity_id` was used in `bucket`, keeping the latest bucket
    async fn mark_active(&self, kind: &str, entity_id: EntityId, bucket: BucketKey) -> Result<()>;

    /// Entities whose latest usage bucket is `since` or newer
    async fn active_since(&self, kind: &str, since: BucketKey) -> Result<Vec<EntityId>>;

    /// Forget activity older than `before`; returns how many ids were dropped
    async fn prune_inactive(&self, kind: &str, before: BucketKey) -> Result<usize>;

    /// Record the language when known; set `allowed` only if it was never set.
    /// Meta expires `ttl` after the latest call.
    async fn put_meta(
        &self,
        kind: &str,
        entity_id: EntityId,
        language: Option<&str>,
        allowed_default: bool,
        ttl: Duration,
    ) -> Result<()>;

    /// `allowed` is the moderation decision when one exists
    async fn get_meta(&self, kind: &str, entity_id: EntityId) -> Result<Option<EntityMeta>>;

    async fn get_score(&self, kind: &str, entity_id: EntityId) -> Result<Option<ScoreRecord>>;

    async fn put_score(&self, kind: &str, record: &ScoreRecord) -> Result<()>;

    /// Ids of records with a score above zero
    async fn scored_ids(&self, kind: &str) -> Result<Vec<EntityId>>;

    /// Snapshot of records with a non-zero score of at least `min_score`
    async fn scored_records(&self, kind: &str, min_score: f64) -> Result<Vec<ScoreRecord>>;

    /// Moderation decision, applied to the current record and any later one.
    /// Returns true when a score record exists.
    async fn set_allowed(&self, kind: &str, entity_id: EntityId, allowed: bool) -> Result<bool>;

    /// Take the refresh lock for `kind` if nobody else holds it
    async fn acquire_refresh_lock(&self, kind: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock if it is still held by `token`
    async fn release_refresh_lock(&self, kind: &str, token: &str) -> Result<()>;
}
