//! In-process store backed by concurrent maps

use super::{EntityMeta, ScoreRecord, TrendStore};
use crate::bucket::BucketKey;
use crate::error::Result;
use crate::{AccountId, EntityId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};

type EntityKey = (String, EntityId);
type UsageKey = (String, EntityId, BucketKey);

/// Store for tests and single-process deployments. Usage and meta TTLs are
/// not enforced; `prune_inactive` drops old buckets and orphaned meta instead.
#[derive(Default)]
pub struct MemoryTrendStore {
    usage: DashMap<UsageKey, HashSet<AccountId>>,
    active: DashMap<EntityKey, BucketKey>,
    meta: DashMap<EntityKey, EntityMeta>,
    records: DashMap<EntityKey, ScoreRecord>,
    /// Explicit moderation decisions, never written by refresh
    moderation: DashMap<EntityKey, bool>,
    locks: DashMap<String, (String, Instant)>,
}

impl MemoryTrendStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record as stored, with any explicit moderation decision applied
    fn moderated(&self, entity_key: &EntityKey, record: &ScoreRecord) -> ScoreRecord {
        let mut record = record.clone();
        if let Some(allowed) = self.moderation.get(entity_key) {
            record.allowed = *allowed;
        }
        record
    }
}

fn key(kind: &str, entity_id: EntityId) -> EntityKey {
    (kind.to_string(), entity_id)
}

#[async_trait]
impl TrendStore for MemoryTrendStore {
    async fn add_usage(
        &self,
        kind: &str,
        entity_id: EntityId,
        bucket: BucketKey,
        account_id: AccountId,
        _ttl: Duration,
    ) -> Result<bool> {
        let added = self
            .usage
            .entry((kind.to_string(), entity_id, bucket))
            .or_default()
            .insert(account_id);
        Ok(added)
    }

    async fn usage_counts(
        &self,
        kind: &str,
        entity_id: EntityId,
        from: BucketKey,
        to: BucketKey,
    ) -> Result<Vec<(BucketKey, u64)>> {
        let counts = from
            .through(to)
            .map(|bucket| {
                let count = self
                    .usage
                    .get(&(kind.to_string(), entity_id, bucket))
                    .map(|accounts| accounts.len() as u64)
                    .unwrap_or(0);
                (bucket, count)
            })
            .collect();
        Ok(counts)
    }

    async fn mark_active(&self, kind: &str, entity_id: EntityId, bucket: BucketKey) -> Result<()> {
        self.active
            .entry(key(kind, entity_id))
            .and_modify(|latest| *latest = (*latest).max(bucket))
            .or_insert(bucket);
        Ok(())
    }

    async fn active_since(&self, kind: &str, since: BucketKey) -> Result<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .active
            .iter()
            .filter(|entry| entry.key().0 == kind && *entry.value() >= since)
            .map(|entry| entry.key().1)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn prune_inactive(&self, kind: &str, before: BucketKey) -> Result<usize> {
        let stale: Vec<EntityKey> = self
            .active
            .iter()
            .filter(|entry| entry.key().0 == kind && *entry.value() < before)
            .map(|entry| entry.key().clone())
            .collect();
        let mut pruned = 0;
        for stale_key in &stale {
            if self
                .active
                .remove_if(stale_key, |_, latest| *latest < before)
                .is_some()
            {
                pruned += 1;
            }
        }
        self.usage
            .retain(|(usage_kind, _, bucket), _| usage_kind != kind || *bucket >= before);
        self.meta.retain(|entity_key, _| {
            entity_key.0 != kind
                || self.active.contains_key(entity_key)
                || self.records.contains_key(entity_key)
        });
        Ok(pruned)
    }

    async fn put_meta(
        &self,
        kind: &str,
        entity_id: EntityId,
        language: Option<&str>,
        allowed_default: bool,
        _ttl: Duration,
    ) -> Result<()> {
        let mut meta = self
            .meta
            .entry(key(kind, entity_id))
            .or_insert_with(|| EntityMeta {
                language: None,
                allowed: allowed_default,
            });
        if let Some(language) = language {
            meta.language = Some(language.to_string());
        }
        Ok(())
    }

    async fn get_meta(&self, kind: &str, entity_id: EntityId) -> Result<Option<EntityMeta>> {
        let entity_key = key(kind, entity_id);
        let decision = self.moderation.get(&entity_key).map(|allowed| *allowed);
        let meta = self.meta.get(&entity_key).map(|m| m.clone());
        Ok(match (meta, decision) {
            (Some(meta), Some(allowed)) => Some(EntityMeta { allowed, ..meta }),
            (Some(meta), None) => Some(meta),
            (None, Some(allowed)) => Some(EntityMeta {
                language: None,
                allowed,
            }),
            (None, None) => None,
        })
    }

    async fn get_score(&self, kind: &str, entity_id: EntityId) -> Result<Option<ScoreRecord>> {
        Ok(self
            .records
            .get(&key(kind, entity_id))
            .map(|r| self.moderated(r.key(), r.value())))
    }

    async fn put_score(&self, kind: &str, record: &ScoreRecord) -> Result<()> {
        self.records
            .insert(key(kind, record.entity_id), record.clone());
        Ok(())
    }

    async fn scored_ids(&self, kind: &str) -> Result<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind && entry.value().score > 0.0)
            .map(|entry| entry.key().1)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn scored_records(&self, kind: &str, min_score: f64) -> Result<Vec<ScoreRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                entry.key().0 == kind && record.score > 0.0 && record.score >= min_score
            })
            .map(|entry| self.moderated(entry.key(), entry.value()))
            .collect())
    }

    async fn set_allowed(&self, kind: &str, entity_id: EntityId, allowed: bool) -> Result<bool> {
        let entity_key = key(kind, entity_id);
        self.moderation.insert(entity_key.clone(), allowed);
        Ok(self.records.contains_key(&entity_key))
    }

    async fn acquire_refresh_lock(&self, kind: &str, token: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let acquired = match self.locks.entry(kind.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().1 <= now {
                    held.insert((token.to_string(), now + ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(free) => {
                free.insert((token.to_string(), now + ttl));
                true
            }
        };
        Ok(acquired)
    }

    async fn release_refresh_lock(&self, kind: &str, token: &str) -> Result<()> {
        self.locks.remove_if(kind, |_, (holder, _)| holder == token);
        Ok(())
    }
}
