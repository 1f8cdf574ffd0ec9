//! Redis key schema for trend state
//!
//! Key format: v{VERSION}:trends:{kind}:{collection}[:identifier...]

use crate::bucket::BucketKey;
use crate::EntityId;

/// Key schema version - increment when changing key formats
pub const TRENDS_KEY_VERSION: u32 = 1;

/// Trend key builder
pub struct TrendKey;

impl TrendKey {
    /// Distinct accounts that used an entity within one bucket
    /// Format: v1:trends:{kind}:usage:{entity_id}:{bucket}
    pub fn usage(kind: &str, entity_id: EntityId, bucket: BucketKey) -> String {
        format!(
            "v{}:trends:{}:usage:{}:{}",
            TRENDS_KEY_VERSION, kind, entity_id, bucket
        )
    }

    /// Sorted set of entity ids scored by the latest bucket they were used in
    /// Format: v1:trends:{kind}:active
    pub fn active(kind: &str) -> String {
        format!("v{}:trends:{}:active", TRENDS_KEY_VERSION, kind)
    }

    /// Per-entity language and moderation defaults
    /// Format: v1:trends:{kind}:meta:{entity_id}
    pub fn meta(kind: &str, entity_id: EntityId) -> String {
        format!("v{}:trends:{}:meta:{}", TRENDS_KEY_VERSION, kind, entity_id)
    }

    /// Hash of serialized score records keyed by entity id
    /// Format: v1:trends:{kind}:records
    pub fn records(kind: &str) -> String {
        format!("v{}:trends:{}:records", TRENDS_KEY_VERSION, kind)
    }

    /// Explicit moderation decisions keyed by entity id
    /// Format: v1:trends:{kind}:moderation
    pub fn moderation(kind: &str) -> String {
        format!("v{}:trends:{}:moderation", TRENDS_KEY_VERSION, kind)
    }

    /// Sorted set of non-zero scores
    /// Format: v1:trends:{kind}:scores
    pub fn scores(kind: &str) -> String {
        format!("v{}:trends:{}:scores", TRENDS_KEY_VERSION, kind)
    }

    /// Refresh mutual exclusion
    /// Format: v1:trends:{kind}:refresh_lock
    pub fn refresh_lock(kind: &str) -> String {
        format!("v{}:trends:{}:refresh_lock", TRENDS_KEY_VERSION, kind)
    }
}
