use crate::bucket::Granularity;
use crate::error::{Result, TrendsError};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Tunables for one trend kind
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrendOptions {
    /// Minimum score for public listings
    pub threshold: f64,
    /// Minimum score for the moderation queue
    pub review_threshold: f64,
    /// Half-life right after new activity
    pub score_halflife_secs: u64,
    /// Half-life approached by entities that stay quiet
    pub max_score_halflife_secs: u64,
    pub granularity: Granularity,
    /// How many buckets of usage are read and kept
    pub retention_buckets: u32,
    pub decay_floor: f64,
    /// Budget for recording one observation before it is dropped
    pub add_timeout_ms: u64,
}

impl TrendOptions {
    /// Statuses: hourly buckets, short half-life
    pub fn statuses() -> Self {
        Self {
            threshold: 5.0,
            review_threshold: 3.0,
            score_halflife_secs: 3_600,
            max_score_halflife_secs: 6 * 3_600,
            granularity: Granularity::Hour,
            retention_buckets: 48,
            decay_floor: crate::decay::DEFAULT_DECAY_FLOOR,
            add_timeout_ms: 250,
        }
    }

    /// Tags: daily buckets, long half-life
    pub fn tags() -> Self {
        Self {
            threshold: 5.0,
            review_threshold: 3.0,
            score_halflife_secs: 12 * 3_600,
            max_score_halflife_secs: 2 * 86_400,
            granularity: Granularity::Day,
            retention_buckets: 7,
            decay_floor: crate::decay::DEFAULT_DECAY_FLOOR,
            add_timeout_ms: 250,
        }
    }

    /// Links: daily buckets, medium half-life
    pub fn links() -> Self {
        Self {
            threshold: 5.0,
            review_threshold: 3.0,
            score_halflife_secs: 8 * 3_600,
            max_score_halflife_secs: 2 * 86_400,
            granularity: Granularity::Day,
            retention_buckets: 7,
            decay_floor: crate::decay::DEFAULT_DECAY_FLOOR,
            add_timeout_ms: 250,
        }
    }

    /// Apply `{prefix}THRESHOLD`, `{prefix}SCORE_HALFLIFE_SECS`, ... overrides
    pub fn from_env_prefixed(prefix: &str, defaults: Self) -> Result<Self> {
        let overrides: TrendOptionsOverrides = envy::prefixed(prefix)
            .from_env()
            .map_err(|e| TrendsError::InvalidConfig(format!("{}*: {}", prefix, e)))?;
        Ok(overrides.apply(defaults))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("review_threshold", self.review_threshold),
            ("decay_floor", self.decay_floor),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TrendsError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.score_halflife_secs == 0 {
            return Err(TrendsError::InvalidConfig(
                "score_halflife_secs must be positive".to_string(),
            ));
        }

        if self.max_score_halflife_secs < self.score_halflife_secs {
            return Err(TrendsError::InvalidConfig(format!(
                "max_score_halflife_secs ({}) must be at least score_halflife_secs ({})",
                self.max_score_halflife_secs, self.score_halflife_secs
            )));
        }

        if self.retention_buckets == 0 {
            return Err(TrendsError::InvalidConfig(
                "retention_buckets must be at least 1".to_string(),
            ));
        }

        if self.add_timeout_ms == 0 {
            return Err(TrendsError::InvalidConfig(
                "add_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn score_halflife(&self) -> Duration {
        Duration::from_secs(self.score_halflife_secs)
    }

    pub fn max_score_halflife(&self) -> Duration {
        Duration::from_secs(self.max_score_halflife_secs)
    }

    pub fn add_timeout(&self) -> Duration {
        Duration::from_millis(self.add_timeout_ms)
    }

    /// Usage sets outlive the retention window by one bucket
    pub fn usage_ttl(&self) -> Duration {
        let buckets = u64::from(self.retention_buckets) + 1;
        Duration::from_secs(buckets * self.granularity.seconds() as u64)
    }
}

#[derive(Debug, Default, Deserialize)]
struct TrendOptionsOverrides {
    threshold: Option<f64>,
    review_threshold: Option<f64>,
    score_halflife_secs: Option<u64>,
    max_score_halflife_secs: Option<u64>,
    granularity: Option<Granularity>,
    retention_buckets: Option<u32>,
    decay_floor: Option<f64>,
    add_timeout_ms: Option<u64>,
}

impl TrendOptionsOverrides {
    fn apply(self, defaults: TrendOptions) -> TrendOptions {
        TrendOptions {
            threshold: self.threshold.unwrap_or(defaults.threshold),
            review_threshold: self.review_threshold.unwrap_or(defaults.review_threshold),
            score_halflife_secs: self
                .score_halflife_secs
                .unwrap_or(defaults.score_halflife_secs),
            max_score_halflife_secs: self
                .max_score_halflife_secs
                .unwrap_or(defaults.max_score_halflife_secs),
            granularity: self.granularity.unwrap_or(defaults.granularity),
            retention_buckets: self.retention_buckets.unwrap_or(defaults.retention_buckets),
            decay_floor: self.decay_floor.unwrap_or(defaults.decay_floor),
            add_timeout_ms: self.add_timeout_ms.unwrap_or(defaults.add_timeout_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub redis: RedisConfig,
    pub scheduler: SchedulerConfig,
    pub statuses: TrendOptions,
    pub tags: TrendOptions,
    pub links: TrendOptions,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub env: String,
    /// Port for `/health` and `/metrics`
    pub http_port: u16,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_lock_ttl_secs")]
    pub refresh_lock_ttl_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            refresh_lock_ttl_secs: default_refresh_lock_ttl_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_lock_ttl_secs.max(1))
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let scheduler: SchedulerConfig = envy::prefixed("TRENDS_")
            .from_env()
            .map_err(|e| TrendsError::InvalidConfig(format!("TRENDS_*: {}", e)))?;

        Ok(Config {
            service: ServiceConfig {
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "trending-service".to_string()),
                env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                http_port: env::var("HTTP_PORT")
                    .ok()
                    .map(|port| {
                        port.parse::<u16>()
                            .map_err(|e| TrendsError::InvalidConfig(format!("HTTP_PORT: {}", e)))
                    })
                    .transpose()?
                    .unwrap_or(8090),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            scheduler,
            statuses: TrendOptions::from_env_prefixed("TRENDS_STATUSES_", TrendOptions::statuses())?,
            tags: TrendOptions::from_env_prefixed("TRENDS_TAGS_", TrendOptions::tags())?,
            links: TrendOptions::from_env_prefixed("TRENDS_LINKS_", TrendOptions::links())?,
        })
    }
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_refresh_lock_ttl_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrendOptions::statuses().validate().is_ok());
        assert!(TrendOptions::tags().validate().is_ok());
        assert!(TrendOptions::links().validate().is_ok());
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let options = TrendOptions {
            threshold: -1.0,
            ..TrendOptions::tags()
        };
        assert!(matches!(
            options.validate(),
            Err(TrendsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_halflife() {
        let options = TrendOptions {
            score_halflife_secs: 0,
            ..TrendOptions::statuses()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_max_halflife_below_score_halflife() {
        let options = TrendOptions {
            score_halflife_secs: 7_200,
            max_score_halflife_secs: 3_600,
            ..TrendOptions::links()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_rejects_nan_floor() {
        let options = TrendOptions {
            decay_floor: f64::NAN,
            ..TrendOptions::tags()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_usage_ttl_covers_retention() {
        let options = TrendOptions::tags();
        assert_eq!(options.usage_ttl(), Duration::from_secs(8 * 86_400));
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let overrides = TrendOptionsOverrides {
            threshold: Some(12.0),
            granularity: Some(Granularity::Hour),
            ..Default::default()
        };
        let options = overrides.apply(TrendOptions::tags());
        assert_eq!(options.threshold, 12.0);
        assert_eq!(options.granularity, Granularity::Hour);
        assert_eq!(options.review_threshold, 3.0);
    }
}
