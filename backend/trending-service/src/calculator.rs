//! Trend calculator
//!
//! One calculator per kind orchestrates the three phases:
//! - `add`: domain events record usage, best effort, never failing the caller
//! - `refresh`: the scheduler folds new usage into decayed scores
//! - `query`: API handlers read ranked, filtered records

use crate::bucket::BucketKey;
use crate::config::TrendOptions;
use crate::decay::DecayEngine;
use crate::error::{Result, TrendsError};
use crate::history::UsageHistory;
use crate::kind::{ReviewState, TrendKind, Trendable};
use crate::metrics::TrendsMetrics;
use crate::query::Query;
use crate::store::{ScoreRecord, TrendStore};
use crate::{AccountId, EntityId};
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Summary of one refresh pass
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub kind: &'static str,
    pub at: DateTime<Utc>,
    pub processed: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Entities whose score fell to zero in this pass
    pub decayed: usize,
    /// Ids dropped from the active set
    pub pruned: usize,
    /// Entities that crossed the review threshold without being allowed
    pub pending_review: Vec<EntityId>,
}

impl RefreshReport {
    fn new(kind: &'static str, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            at,
            processed: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            decayed: 0,
            pruned: 0,
            pending_review: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EntityOutcome {
    Skipped,
    Updated {
        decayed: bool,
        needs_review: bool,
    },
}

pub struct TrendCalculator<K: TrendKind> {
    store: Arc<dyn TrendStore>,
    history: UsageHistory,
    engine: DecayEngine,
    options: TrendOptions,
    metrics: TrendsMetrics,
    _kind: PhantomData<K>,
}

impl<K: TrendKind> TrendCalculator<K> {
    /// Calculator with the kind's default options
    pub fn new(store: Arc<dyn TrendStore>) -> Result<Self> {
        Self::with_options(store, K::default_options())
    }

    /// Fails with `InvalidConfig` when `options` would produce nonsensical decay
    pub fn with_options(store: Arc<dyn TrendStore>, options: TrendOptions) -> Result<Self> {
        options.validate()?;

        let engine = DecayEngine::new(
            options.score_halflife(),
            options.max_score_halflife(),
            options.decay_floor,
        );

        Ok(Self {
            history: UsageHistory::new(store.clone(), K::NAME, &options),
            store,
            engine,
            options,
            metrics: TrendsMetrics::new(),
            _kind: PhantomData,
        })
    }

    pub fn kind(&self) -> &'static str {
        K::NAME
    }

    pub fn options(&self) -> &TrendOptions {
        &self.options
    }

    pub fn history(&self) -> &UsageHistory {
        &self.history
    }

    pub(crate) fn store(&self) -> &Arc<dyn TrendStore> {
        &self.store
    }

    /// Record that `account_id` interacted with `entity` at `at`.
    ///
    /// Ineligible entities and self-interactions are ignored. Storage errors
    /// and timeouts are logged and the observation is dropped.
    pub async fn add(&self, entity: &K::Entity, account_id: AccountId, at: DateTime<Utc>) {
        let entity_id = entity.trend_id();

        if !entity.is_eligible() || !entity.accepts_from(account_id) {
            debug!(kind = %K::NAME, entity_id = entity_id, "Ignoring ineligible trend usage");
            self.metrics.record_observation(K::NAME, "rejected");
            return;
        }

        let budget = self.options.add_timeout();
        let outcome = match tokio::time::timeout(budget, self.record(entity, account_id, at)).await {
            Ok(result) => result,
            Err(_) => Err(TrendsError::Timeout(budget)),
        };

        match outcome {
            Ok(true) => self.metrics.record_observation(K::NAME, "recorded"),
            Ok(false) => self.metrics.record_observation(K::NAME, "duplicate"),
            Err(TrendsError::InvalidInput(reason)) => {
                debug!(kind = %K::NAME, entity_id = entity_id, reason = %reason, "Ignoring invalid trend usage");
                self.metrics.record_observation(K::NAME, "rejected");
            }
            Err(e) => {
                warn!(
                    kind = %K::NAME,
                    entity_id = entity_id,
                    account_id = account_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Dropping trend usage"
                );
                self.metrics.record_observation(K::NAME, "dropped");
            }
        }
    }

    async fn record(
        &self,
        entity: &K::Entity,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let entity_id = entity.trend_id();
        self.history.check_timestamp(at)?;
        self.store
            .put_meta(
                K::NAME,
                entity_id,
                entity.language(),
                entity.review_state() == ReviewState::Approved,
                self.history.ttl(),
            )
            .await?;
        self.history.record(entity_id, account_id, at).await
    }

    /// Fire-and-forget `add` for event handlers that must not wait
    pub fn add_detached(
        self: &Arc<Self>,
        entity: K::Entity,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> JoinHandle<()> {
        let calculator = Arc::clone(self);
        tokio::spawn(async move { calculator.add(&entity, account_id, at).await })
    }

    /// Rescore every recently active entity and every entity with a live score.
    ///
    /// Each entity is an independent unit: a failure is logged and counted,
    /// and the pass moves on. Calling this twice with the same `now` changes
    /// nothing the second time.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        let started = Instant::now();
        let mut report = RefreshReport::new(K::NAME, now);

        let mut ids = self.history.recently_active_entity_ids(now).await?;
        ids.extend(self.store.scored_ids(K::NAME).await?);
        ids.sort_unstable();
        ids.dedup();

        for entity_id in ids {
            report.processed += 1;
            match self.refresh_entity(entity_id, now).await {
                Ok(EntityOutcome::Skipped) => report.skipped += 1,
                Ok(EntityOutcome::Updated {
                    decayed,
                    needs_review,
                }) => {
                    report.updated += 1;
                    if decayed {
                        report.decayed += 1;
                    }
                    if needs_review {
                        report.pending_review.push(entity_id);
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        kind = %K::NAME,
                        entity_id = entity_id,
                        error_kind = e.kind(),
                        error = %e,
                        "Failed to refresh trend score, keeping previous"
                    );
                }
            }
        }

        match self.history.prune(now).await {
            Ok(pruned) => report.pruned = pruned,
            Err(e) => warn!(kind = %K::NAME, error = %e, "Failed to prune trend history"),
        }

        self.metrics.record_refreshed(K::NAME, "updated", report.updated);
        self.metrics.record_refreshed(K::NAME, "skipped", report.skipped);
        self.metrics.record_refreshed(K::NAME, "failed", report.failed);
        self.metrics.record_refreshed(K::NAME, "decayed", report.decayed);
        self.metrics
            .record_refresh_duration(K::NAME, started.elapsed().as_secs_f64());

        if !report.pending_review.is_empty() {
            info!(
                kind = %K::NAME,
                count = report.pending_review.len(),
                ids = ?report.pending_review,
                "Trends awaiting review"
            );
        }

        info!(
            kind = %K::NAME,
            processed = report.processed,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            decayed = report.decayed,
            pruned = report.pruned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Trend refresh completed"
        );

        Ok(report)
    }

    async fn refresh_entity(&self, entity_id: EntityId, now: DateTime<Utc>) -> Result<EntityOutcome> {
        let granularity = self.history.granularity();
        let now_bucket = granularity.bucket_for(now);
        let previous = self.store.get_score(K::NAME, entity_id).await?;

        if let Some(previous) = &previous {
            if now < previous.updated_at {
                debug!(
                    kind = %K::NAME,
                    entity_id = entity_id,
                    updated_at = %previous.updated_at,
                    now = %now,
                    "Refresh time precedes last update, keeping score"
                );
                return Ok(EntityOutcome::Skipped);
            }
        }

        let window_start = self.history.window_start(now);
        let from = match &previous {
            Some(previous) if granularity.buckets_between(window_start, previous.counted_bucket) >= 0 => {
                previous.counted_bucket
            }
            _ => window_start,
        };

        let mut increment = 0.0;
        let mut counted_uses = 0;
        for (bucket, count) in self.history.usage_counts(entity_id, from, now_bucket).await? {
            let already_counted = match &previous {
                Some(previous) if previous.counted_bucket == bucket => previous.counted_uses,
                _ => 0,
            };
            let fresh = count.saturating_sub(already_counted);
            if fresh > 0 {
                increment += fresh as f64 * self.bucket_weight(bucket, now);
            }
            if bucket == now_bucket {
                counted_uses = count;
            }
        }

        // Read after the record so a moderation decision made meanwhile wins
        let meta = self.store.get_meta(K::NAME, entity_id).await?;

        let record = match &previous {
            None => {
                let score = self.engine.clamp(increment);
                if score == 0.0 {
                    return Ok(EntityOutcome::Skipped);
                }
                ScoreRecord {
                    entity_id,
                    score,
                    allowed: meta.as_ref().map(|m| m.allowed).unwrap_or(false),
                    language: meta.and_then(|m| m.language),
                    updated_at: now,
                    last_active_at: now,
                    counted_bucket: now_bucket,
                    counted_uses,
                }
            }
            Some(previous) => ScoreRecord {
                entity_id,
                score: self.engine.decayed_score(
                    previous.score,
                    previous.updated_at,
                    previous.last_active_at,
                    increment,
                    now,
                ),
                allowed: meta.as_ref().map(|m| m.allowed).unwrap_or(previous.allowed),
                language: meta
                    .and_then(|m| m.language)
                    .or_else(|| previous.language.clone()),
                updated_at: now,
                last_active_at: if increment > 0.0 {
                    now
                } else {
                    previous.last_active_at
                },
                counted_bucket: now_bucket,
                counted_uses,
            },
        };

        self.store.put_score(K::NAME, &record).await?;

        let previous_score = previous.as_ref().map(|p| p.score).unwrap_or(0.0);
        let review_threshold = self.options.review_threshold;
        Ok(EntityOutcome::Updated {
            decayed: record.score == 0.0 && previous_score > 0.0,
            needs_review: !record.allowed
                && previous_score < review_threshold
                && record.score >= review_threshold,
        })
    }

    /// Recency weight for uses in `bucket`, measured from the bucket's end
    fn bucket_weight(&self, bucket: BucketKey, now: DateTime<Utc>) -> f64 {
        let closed_at = self.history.granularity().end_of(bucket);
        let age_secs = (now - closed_at).num_milliseconds() as f64 / 1000.0;
        self.engine.recency_weight(age_secs)
    }

    /// Current cached score, 0 when the entity has none
    pub async fn score(&self, entity_id: EntityId) -> Result<f64> {
        Ok(self
            .store
            .get_score(K::NAME, entity_id)
            .await?
            .map(|record| record.score)
            .unwrap_or(0.0))
    }

    /// Public listing: allowed entities at or above `threshold`
    pub fn query(&self) -> Query {
        Query::new(self.store.clone(), K::NAME, self.options.threshold, true)
    }

    /// Moderation listing: every entity at or above `review_threshold`
    pub fn review_query(&self) -> Query {
        Query::new(
            self.store.clone(),
            K::NAME,
            self.options.review_threshold,
            false,
        )
    }

    pub async fn currently_trending_ids(&self, limit: usize) -> Result<Vec<EntityId>> {
        self.query().limit(limit).ids().await
    }

    /// Moderation decision for one entity; also applies to records created later
    pub async fn set_allowed(&self, entity_id: EntityId, allowed: bool) -> Result<bool> {
        let updated = self.store.set_allowed(K::NAME, entity_id, allowed).await?;
        info!(
            kind = %K::NAME,
            entity_id = entity_id,
            allowed = allowed,
            had_record = updated,
            "Trend moderation flag set"
        );
        Ok(updated)
    }
}
