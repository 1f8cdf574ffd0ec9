//! Time buckets
//!
//! Usage is aggregated per discrete interval. A bucket is identified by the
//! number of whole intervals since the Unix epoch, so keys are totally ordered
//! and the distance between two buckets is a plain subtraction.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bucket width for a trend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }

    /// Bucket width in seconds
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Hour => 3_600,
            Self::Day => 86_400,
        }
    }

    /// Bucket containing `at`
    pub fn bucket_for(&self, at: DateTime<Utc>) -> BucketKey {
        BucketKey(at.timestamp().div_euclid(self.seconds()))
    }

    /// Number of bucket boundaries crossed going from `from` to `to`.
    /// Negative when `to` precedes `from`.
    pub fn buckets_between(&self, from: BucketKey, to: BucketKey) -> i64 {
        to.0 - from.0
    }

    /// First instant covered by `bucket`
    pub fn start_of(&self, bucket: BucketKey) -> DateTime<Utc> {
        Utc.timestamp_opt(bucket.0 * self.seconds(), 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// First instant after `bucket`
    pub fn end_of(&self, bucket: BucketKey) -> DateTime<Utc> {
        self.start_of(bucket.next())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketKey(pub i64);

impl BucketKey {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Bucket `n` intervals earlier
    pub fn back(self, n: i64) -> Self {
        Self(self.0 - n)
    }

    /// Inclusive range of buckets from `self` to `to`
    pub fn through(self, to: BucketKey) -> impl Iterator<Item = BucketKey> {
        (self.0..=to.0).map(BucketKey)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
