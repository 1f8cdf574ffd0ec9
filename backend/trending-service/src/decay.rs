//! Score decay
//!
//! Scores decay exponentially, but the half-life is not constant: it starts at
//! `score_halflife` when an entity was last active and stretches towards
//! `max_score_halflife` as the entity stays quiet,
//!
//! ```text
//! h(a) = h_max - (h_max - h_s) * 2^(-a / h_max)
//! ```
//!
//! where `a` is the age since the last refresh that folded in new usage.
//! Integrating `1 / h(a)` gives a closed-form decay factor between two ages,
//! so refreshing every minute or once an hour lands on the same score.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Scores below this are treated as zero unless configured otherwise
pub const DEFAULT_DECAY_FLOOR: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayEngine {
    score_halflife: f64,
    max_score_halflife: f64,
    floor: f64,
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

impl DecayEngine {
    /// Half-lives must be positive with `max_score_halflife >= score_halflife`;
    /// `TrendOptions::validate` checks this before an engine is built.
    pub fn new(score_halflife: Duration, max_score_halflife: Duration, floor: f64) -> Self {
        Self {
            score_halflife: score_halflife.as_secs_f64(),
            max_score_halflife: max_score_halflife.as_secs_f64(),
            floor,
        }
    }

    /// Effective half-life in seconds at `age_secs` since last activity
    pub fn halflife_at(&self, age_secs: f64) -> f64 {
        let h_max = self.max_score_halflife;
        let spread = h_max - self.score_halflife;
        h_max - spread * 2f64.powf(-age_secs.max(0.0) / h_max)
    }

    /// Multiplier applied to a score while its age grows from `from_age` to
    /// `to_age` (seconds). Never above 1.
    pub fn decay_factor(&self, from_age: f64, to_age: f64) -> f64 {
        let from_age = from_age.max(0.0);
        if to_age <= from_age {
            return 1.0;
        }

        let h_max = self.max_score_halflife;
        let spread = h_max - self.score_halflife;
        let stretch = (h_max - spread * 2f64.powf(-from_age / h_max))
            / (h_max - spread * 2f64.powf(-to_age / h_max));

        (2f64.powf(-(to_age - from_age) / h_max) * stretch).min(1.0)
    }

    /// Weight of uses from a bucket that closed `age_secs` ago.
    /// The current bucket has age 0 and full weight.
    pub fn recency_weight(&self, age_secs: f64) -> f64 {
        0.5f64.powf(age_secs.max(0.0) / self.score_halflife)
    }

    /// New score after decaying `previous_score` from `previous_updated_at` to
    /// `now` and adding `increment`.
    ///
    /// `last_active_at` anchors the half-life curve. A `now` before
    /// `previous_updated_at` (clock skew) returns `previous_score` untouched.
    pub fn decayed_score(
        &self,
        previous_score: f64,
        previous_updated_at: DateTime<Utc>,
        last_active_at: DateTime<Utc>,
        increment: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        if now < previous_updated_at {
            return previous_score.max(0.0);
        }

        let from_age = seconds_between(last_active_at, previous_updated_at);
        let to_age = seconds_between(last_active_at, now);
        let decayed = previous_score.max(0.0) * self.decay_factor(from_age, to_age);

        self.clamp(decayed + increment.max(0.0))
    }

    /// Zero out scores that fell below the floor
    pub fn clamp(&self, score: f64) -> f64 {
        if !score.is_finite() || score < self.floor {
            0.0
        } else {
            score
        }
    }
}
