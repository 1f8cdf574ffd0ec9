//! Nova trending engine
//!
//! Ranks statuses, tags and links by recent engagement:
//! - Usage history bucketed per hour or day, one count per account
//! - Scores that decay with a half-life stretching as entities go quiet
//! - Locale-aware ranked queries gated by a moderation flag
//! - Periodic refresh jobs guarded by a per-kind lock

pub mod bucket;
pub mod calculator;
pub mod config;
pub mod decay;
pub mod error;
pub mod history;
pub mod jobs;
pub mod keys;
pub mod kind;
pub mod metrics;
pub mod query;
pub mod store;

pub use bucket::{BucketKey, Granularity};
pub use calculator::{RefreshReport, TrendCalculator};
pub use config::{Config, SchedulerConfig, TrendOptions};
pub use decay::DecayEngine;
pub use error::{Result, TrendsError};
pub use history::UsageHistory;
pub use jobs::{run_refresh_loop, spawn_refresh_loops, JobContext, RefreshJob};
pub use kind::{
    LinkEntity, Links, ReviewState, StatusEntity, Statuses, TagEntity, Tags, TrendKind, Trendable,
};
pub use metrics::TrendsMetrics;
pub use query::{Query, Viewer};
pub use store::{MemoryTrendStore, RedisTrendStore, ScoreRecord, SharedRedis, TrendStore};

/// Id of a status, tag or link
pub type EntityId = i64;

pub type AccountId = i64;

pub type StatusTrends = TrendCalculator<Statuses>;
pub type TagTrends = TrendCalculator<Tags>;
pub type LinkTrends = TrendCalculator<Links>;
