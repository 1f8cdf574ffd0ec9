//! Usage history
//!
//! Write side of the trends engine: which distinct accounts used an entity in
//! each time bucket, plus the set of recently active entity ids so a refresh
//! only rescores what moved.

use crate::bucket::{BucketKey, Granularity};
use crate::config::TrendOptions;
use crate::error::{Result, TrendsError};
use crate::store::TrendStore;
use crate::{AccountId, EntityId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How far ahead of the local clock a usage timestamp may be
const MAX_CLOCK_SKEW_SECS: i64 = 300;

#[derive(Clone)]
pub struct UsageHistory {
    store: Arc<dyn TrendStore>,
    kind: &'static str,
    granularity: Granularity,
    retention_buckets: u32,
    ttl: Duration,
}

impl UsageHistory {
    pub fn new(store: Arc<dyn TrendStore>, kind: &'static str, options: &TrendOptions) -> Self {
        Self {
            store,
            kind,
            granularity: options.granularity,
            retention_buckets: options.retention_buckets,
            ttl: options.usage_ttl(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Oldest bucket still inside the retention window ending at `as_of`
    pub fn window_start(&self, as_of: DateTime<Utc>) -> BucketKey {
        let current = self.granularity.bucket_for(as_of);
        current.back(i64::from(self.retention_buckets) - 1)
    }

    /// How long usage sets and entity meta are kept
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Rejects timestamps before the epoch or beyond the allowed clock skew
    pub fn check_timestamp(&self, at: DateTime<Utc>) -> Result<()> {
        if at.timestamp() < 0 {
            return Err(TrendsError::InvalidInput(format!(
                "implausible usage timestamp {}",
                at
            )));
        }

        let latest = Utc::now() + ChronoDuration::seconds(MAX_CLOCK_SKEW_SECS);
        if at > latest {
            return Err(TrendsError::InvalidInput(format!(
                "usage timestamp {} is in the future",
                at
            )));
        }
        Ok(())
    }

    /// Record that `account_id` used `entity_id` at `at`.
    ///
    /// Idempotent per bucket: returns false when the account was already
    /// counted there.
    pub async fn record(
        &self,
        entity_id: EntityId,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_timestamp(at)?;

        let bucket = self.granularity.bucket_for(at);
        let added = self
            .store
            .add_usage(self.kind, entity_id, bucket, account_id, self.ttl)
            .await?;
        self.store.mark_active(self.kind, entity_id, bucket).await?;

        debug!(
            kind = %self.kind,
            entity_id = entity_id,
            bucket = %bucket,
            added = added,
            "Recorded trend usage"
        );
        Ok(added)
    }

    /// Entities with at least one observation inside the retention window
    pub async fn recently_active_entity_ids(&self, as_of: DateTime<Utc>) -> Result<Vec<EntityId>> {
        self.store
            .active_since(self.kind, self.window_start(as_of))
            .await
    }

    /// Distinct-account count for one bucket
    pub async fn usage_count(&self, entity_id: EntityId, bucket: BucketKey) -> Result<u64> {
        let counts = self
            .store
            .usage_counts(self.kind, entity_id, bucket, bucket)
            .await?;
        Ok(counts.first().map(|(_, count)| *count).unwrap_or(0))
    }

    /// Counts for every bucket from `from` through `to`, clipped to the
    /// retention window ending at `to`
    pub async fn usage_counts(
        &self,
        entity_id: EntityId,
        from: BucketKey,
        to: BucketKey,
    ) -> Result<Vec<(BucketKey, u64)>> {
        let earliest = to.back(i64::from(self.retention_buckets) - 1);
        self.store
            .usage_counts(self.kind, entity_id, from.max(earliest), to)
            .await
    }

    /// Drop activity that fell out of the retention window
    pub async fn prune(&self, as_of: DateTime<Utc>) -> Result<usize> {
        self.store
            .prune_inactive(self.kind, self.window_start(as_of))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTrendStore;
    use chrono::Duration as ChronoDuration;

    fn history() -> UsageHistory {
        UsageHistory::new(
            Arc::new(MemoryTrendStore::new()),
            "tags",
            &TrendOptions::tags(),
        )
    }

    fn day(n: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(n * 86_400, 0).unwrap()
    }

    #[tokio::test]
    async fn test_record_same_bucket_counts_once() {
        let history = history();
        let t1 = day(100) + ChronoDuration::hours(1);
        let t2 = day(100) + ChronoDuration::hours(20);

        assert!(history.record(1, 42, t1).await.unwrap());
        assert!(!history.record(1, 42, t2).await.unwrap());

        let bucket = history.granularity().bucket_for(t1);
        assert_eq!(history.usage_count(1, bucket).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recently_active_respects_window() {
        let history = history();
        history.record(1, 1, day(100)).await.unwrap();
        history.record(2, 1, day(105)).await.unwrap();

        let active = history.recently_active_entity_ids(day(106)).await.unwrap();
        assert_eq!(active, vec![1, 2]);

        let active = history.recently_active_entity_ids(day(107)).await.unwrap();
        assert_eq!(active, vec![2]);
    }

    #[tokio::test]
    async fn test_prune_drops_stale_ids() {
        let history = history();
        history.record(1, 1, day(100)).await.unwrap();
        history.record(2, 1, day(110)).await.unwrap();

        assert_eq!(history.prune(day(110)).await.unwrap(), 1);
        let bucket = history.granularity().bucket_for(day(100));
        assert_eq!(history.usage_count(1, bucket).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_pre_epoch_timestamp() {
        let history = history();
        let result = history.record(1, 1, day(-1)).await;
        assert!(matches!(result, Err(TrendsError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_usage_counts_clipped_to_retention() {
        let history = history();
        let counts = history
            .usage_counts(1, BucketKey(0), BucketKey(100))
            .await
            .unwrap();
        assert_eq!(counts.len(), 7);
        assert_eq!(counts.first().map(|(b, _)| *b), Some(BucketKey(94)));
    }

    #[tokio::test]
    async fn test_rejects_future_timestamp() {
        let history = history();
        let ahead = Utc::now() + ChronoDuration::days(3650);

        let result = history.record(1, 1, ahead).await;
        assert!(matches!(result, Err(TrendsError::InvalidInput(_))));
        assert!(history
            .recently_active_entity_ids(ahead)
            .await
            .unwrap()
            .is_empty());

        let slightly_ahead = Utc::now() + ChronoDuration::seconds(30);
        assert!(history.record(1, 1, slightly_ahead).await.unwrap());
    }
}
