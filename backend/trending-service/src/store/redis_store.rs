//! Redis-backed trend store
//!
//! - usage: one SET of account ids per entity and bucket, expiring after the
//!   retention window
//! - activity: a sorted set of entity ids scored by their latest bucket
//! - records: a hash of JSON score records plus a sorted set of non-zero scores,
//!   always written together in one MULTI block
//! - moderation: a hash of explicit decisions, applied over records on read
//! - meta: one hash per entity, expiring with its usage

use super::{EntityMeta, ScoreRecord, TrendStore};
use crate::bucket::BucketKey;
use crate::error::{Result, TrendsError};
use crate::keys::TrendKey;
use crate::{AccountId, EntityId};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared Redis connection manager
pub type SharedRedis = Arc<Mutex<ConnectionManager>>;

const META_LANGUAGE: &str = "language";
const META_ALLOWED: &str = "allowed";

/// Deletes the lock only while it still holds the caller's token
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisTrendStore {
    redis: SharedRedis,
}

impl RedisTrendStore {
    pub fn new(redis: SharedRedis) -> Self {
        Self { redis }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(Arc::new(Mutex::new(manager))))
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn parse_record(raw: &str) -> Result<ScoreRecord> {
    serde_json::from_str(raw).map_err(TrendsError::Serialization)
}

/// Parse a stored record and apply the moderation decision, if any
fn moderated_record(raw: &str, decision: Option<&str>) -> Result<ScoreRecord> {
    let mut record = parse_record(raw)?;
    if let Some(decision) = decision {
        record.allowed = decision == "1";
    }
    Ok(record)
}

#[async_trait]
impl TrendStore for RedisTrendStore {
    async fn add_usage(
        &self,
        kind: &str,
        entity_id: EntityId,
        bucket: BucketKey,
        account_id: AccountId,
        ttl: Duration,
    ) -> Result<bool> {
        let key = TrendKey::usage(kind, entity_id, bucket);
        let mut conn = self.redis.lock().await;

        let (added,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(&key)
            .arg(account_id)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut *conn)
            .await?;

        Ok(added > 0)
    }

    async fn usage_counts(
        &self,
        kind: &str,
        entity_id: EntityId,
        from: BucketKey,
        to: BucketKey,
    ) -> Result<Vec<(BucketKey, u64)>> {
        let buckets: Vec<BucketKey> = from.through(to).collect();
        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for bucket in &buckets {
            pipe.cmd("SCARD").arg(TrendKey::usage(kind, entity_id, *bucket));
        }

        let mut conn = self.redis.lock().await;
        let counts: Vec<u64> = pipe.query_async(&mut *conn).await?;

        Ok(buckets.into_iter().zip(counts).collect())
    }

    async fn mark_active(&self, kind: &str, entity_id: EntityId, bucket: BucketKey) -> Result<()> {
        let mut conn = self.redis.lock().await;
        redis::cmd("ZADD")
            .arg(TrendKey::active(kind))
            .arg("GT")
            .arg(bucket.0)
            .arg(entity_id)
            .query_async::<_, ()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn active_since(&self, kind: &str, since: BucketKey) -> Result<Vec<EntityId>> {
        let mut conn = self.redis.lock().await;
        let ids: Vec<EntityId> = redis::cmd("ZRANGEBYSCORE")
            .arg(TrendKey::active(kind))
            .arg(since.0)
            .arg("+inf")
            .query_async(&mut *conn)
            .await?;
        Ok(ids)
    }

    async fn prune_inactive(&self, kind: &str, before: BucketKey) -> Result<usize> {
        let mut conn = self.redis.lock().await;
        let removed: usize = redis::cmd("ZREMRANGEBYSCORE")
            .arg(TrendKey::active(kind))
            .arg("-inf")
            .arg(format!("({}", before.0))
            .query_async(&mut *conn)
            .await?;

        debug!(kind = %kind, before = %before, removed = removed, "Pruned inactive trend ids");
        Ok(removed)
    }

    async fn put_meta(
        &self,
        kind: &str,
        entity_id: EntityId,
        language: Option<&str>,
        allowed_default: bool,
        ttl: Duration,
    ) -> Result<()> {
        let key = TrendKey::meta(kind, entity_id);
        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(language) = language {
            pipe.hset(&key, META_LANGUAGE, language).ignore();
        }
        pipe.hset_nx(&key, META_ALLOWED, flag(allowed_default))
            .ignore()
            .expire(&key, ttl.as_secs().max(1) as i64)
            .ignore();

        let mut conn = self.redis.lock().await;
        pipe.query_async::<_, ()>(&mut *conn).await?;
        Ok(())
    }

    async fn get_meta(&self, kind: &str, entity_id: EntityId) -> Result<Option<EntityMeta>> {
        let mut conn = self.redis.lock().await;
        let (fields, decision): (HashMap<String, String>, Option<String>) = redis::pipe()
            .cmd("HGETALL")
            .arg(TrendKey::meta(kind, entity_id))
            .cmd("HGET")
            .arg(TrendKey::moderation(kind))
            .arg(entity_id)
            .query_async(&mut *conn)
            .await?;

        if fields.is_empty() && decision.is_none() {
            return Ok(None);
        }

        let allowed = decision
            .as_deref()
            .or_else(|| fields.get(META_ALLOWED).map(String::as_str))
            .map(|v| v == "1")
            .unwrap_or(false);

        Ok(Some(EntityMeta {
            language: fields.get(META_LANGUAGE).cloned(),
            allowed,
        }))
    }

    async fn get_score(&self, kind: &str, entity_id: EntityId) -> Result<Option<ScoreRecord>> {
        let mut conn = self.redis.lock().await;
        let (raw, decision): (Option<String>, Option<String>) = redis::pipe()
            .cmd("HGET")
            .arg(TrendKey::records(kind))
            .arg(entity_id)
            .cmd("HGET")
            .arg(TrendKey::moderation(kind))
            .arg(entity_id)
            .query_async(&mut *conn)
            .await?;

        raw.as_deref()
            .map(|raw| moderated_record(raw, decision.as_deref()))
            .transpose()
    }

    async fn put_score(&self, kind: &str, record: &ScoreRecord) -> Result<()> {
        let data = serde_json::to_string(record)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(TrendKey::records(kind), record.entity_id, data)
            .ignore();
        if record.score > 0.0 {
            pipe.zadd(TrendKey::scores(kind), record.entity_id, record.score)
                .ignore();
        } else {
            pipe.zrem(TrendKey::scores(kind), record.entity_id).ignore();
        }

        let mut conn = self.redis.lock().await;
        pipe.query_async::<_, ()>(&mut *conn).await?;
        Ok(())
    }

    async fn scored_ids(&self, kind: &str) -> Result<Vec<EntityId>> {
        let mut conn = self.redis.lock().await;
        let ids: Vec<EntityId> = redis::cmd("ZRANGEBYSCORE")
            .arg(TrendKey::scores(kind))
            .arg("(0")
            .arg("+inf")
            .query_async(&mut *conn)
            .await?;
        Ok(ids)
    }

    async fn scored_records(&self, kind: &str, min_score: f64) -> Result<Vec<ScoreRecord>> {
        let min = if min_score > 0.0 {
            min_score.to_string()
        } else {
            "(0".to_string()
        };

        let mut conn = self.redis.lock().await;
        let ids: Vec<EntityId> = redis::cmd("ZRANGEBYSCORE")
            .arg(TrendKey::scores(kind))
            .arg(min)
            .arg("+inf")
            .query_async(&mut *conn)
            .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (raw, decisions): (Vec<Option<String>>, Vec<Option<String>>) = redis::pipe()
            .cmd("HMGET")
            .arg(TrendKey::records(kind))
            .arg(&ids)
            .cmd("HMGET")
            .arg(TrendKey::moderation(kind))
            .arg(&ids)
            .query_async(&mut *conn)
            .await?;

        let mut records = Vec::with_capacity(raw.len());
        for ((entity_id, data), decision) in ids.iter().zip(raw).zip(decisions) {
            match data
                .as_deref()
                .map(|data| moderated_record(data, decision.as_deref()))
            {
                Some(Ok(record)) => records.push(record),
                Some(Err(e)) => {
                    warn!(kind = %kind, entity_id = entity_id, error = %e, "Skipping unreadable score record");
                }
                None => {
                    warn!(kind = %kind, entity_id = entity_id, "Score indexed without a record");
                }
            }
        }
        Ok(records)
    }

    async fn set_allowed(&self, kind: &str, entity_id: EntityId, allowed: bool) -> Result<bool> {
        let mut conn = self.redis.lock().await;
        let (has_record,): (bool,) = redis::pipe()
            .atomic()
            .hset(TrendKey::moderation(kind), entity_id, flag(allowed))
            .ignore()
            .hexists(TrendKey::records(kind), entity_id)
            .query_async(&mut *conn)
            .await?;
        Ok(has_record)
    }

    async fn acquire_refresh_lock(&self, kind: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.redis.lock().await;
        let reply: Option<String> = redis::cmd("SET")
            .arg(TrendKey::refresh_lock(kind))
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release_refresh_lock(&self, kind: &str, token: &str) -> Result<()> {
        let mut conn = self.redis.lock().await;
        let released: i64 = Script::new(RELEASE_LOCK_SCRIPT)
            .key(TrendKey::refresh_lock(kind))
            .arg(token)
            .invoke_async(&mut *conn)
            .await?;

        if released == 0 {
            warn!(kind = %kind, "Refresh lock was no longer held at release");
        }
        Ok(())
    }
}
