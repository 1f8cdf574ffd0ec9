//! Trend kinds and the entities they rank
//!
//! A kind is a zero-sized marker selecting the storage namespace, the default
//! options and the entity type a `TrendCalculator` accepts.

use crate::config::TrendOptions;
use crate::{AccountId, EntityId};
use serde::{Deserialize, Serialize};

/// Moderation state carried by the source entity.
///
/// Mirrors a nullable `trendable` attribute: unset means nobody reviewed it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    PendingReview,
    Rejected,
}

impl ReviewState {
    pub fn from_trendable(trendable: Option<bool>) -> Self {
        match trendable {
            Some(true) => Self::Approved,
            Some(false) => Self::Rejected,
            None => Self::PendingReview,
        }
    }
}

/// Something that can trend
pub trait Trendable: Send + Sync {
    fn trend_id(&self) -> EntityId;

    fn language(&self) -> Option<&str>;

    fn review_state(&self) -> ReviewState;

    /// Whether a use by `account_id` counts at all
    fn accepts_from(&self, _account_id: AccountId) -> bool {
        true
    }

    fn is_eligible(&self) -> bool {
        self.review_state() != ReviewState::Rejected
    }
}

pub trait TrendKind: Send + Sync + 'static {
    /// Storage namespace and log label
    const NAME: &'static str;

    type Entity: Trendable + 'static;

    fn default_options() -> TrendOptions;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Statuses;

#[derive(Debug, Clone, Copy, Default)]
pub struct Tags;

#[derive(Debug, Clone, Copy, Default)]
pub struct Links;

impl TrendKind for Statuses {
    const NAME: &'static str = "statuses";
    type Entity = StatusEntity;

    fn default_options() -> TrendOptions {
        TrendOptions::statuses()
    }
}

impl TrendKind for Tags {
    const NAME: &'static str = "tags";
    type Entity = TagEntity;

    fn default_options() -> TrendOptions {
        TrendOptions::tags()
    }
}

impl TrendKind for Links {
    const NAME: &'static str = "links";
    type Entity = LinkEntity;

    fn default_options() -> TrendOptions {
        TrendOptions::links()
    }
}

/// A status being reblogged or favourited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntity {
    pub id: EntityId,
    pub account_id: AccountId,
    pub language: Option<String>,
    pub trendable: Option<bool>,
    /// The author's own `trendable` flag, consulted when the status has none
    pub account_trendable: Option<bool>,
    /// Whether moderators have reviewed the author
    pub account_reviewed: bool,
    pub public: bool,
    pub sensitive: bool,
    pub reply: bool,
}

impl Trendable for StatusEntity {
    fn trend_id(&self) -> EntityId {
        self.id
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn review_state(&self) -> ReviewState {
        if !self.public || self.sensitive || self.reply {
            return ReviewState::Rejected;
        }
        if self.trendable.is_some() {
            return ReviewState::from_trendable(self.trendable);
        }

        // Unset on the status: the author's standing decides, and only an
        // unreviewed author needs a moderator
        match (self.account_trendable, self.account_reviewed) {
            (Some(true), _) => ReviewState::Approved,
            (_, false) => ReviewState::PendingReview,
            (_, true) => ReviewState::Rejected,
        }
    }

    /// Authors boosting their own posts do not count
    fn accepts_from(&self, account_id: AccountId) -> bool {
        account_id != self.account_id
    }
}

/// A hashtag used in a status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagEntity {
    pub id: EntityId,
    pub name: String,
    /// Language of the status the tag was used in
    pub language: Option<String>,
    pub usable: bool,
    pub trendable: Option<bool>,
}

impl Trendable for TagEntity {
    fn trend_id(&self) -> EntityId {
        self.id
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn review_state(&self) -> ReviewState {
        if !self.usable {
            return ReviewState::Rejected;
        }
        ReviewState::from_trendable(self.trendable)
    }
}

/// A link preview card shared in statuses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEntity {
    pub id: EntityId,
    pub url: String,
    pub language: Option<String>,
    pub trendable: Option<bool>,
}

impl Trendable for LinkEntity {
    fn trend_id(&self) -> EntityId {
        self.id
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn review_state(&self) -> ReviewState {
        ReviewState::from_trendable(self.trendable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> StatusEntity {
        StatusEntity {
            id: 1,
            account_id: 10,
            language: Some("en".to_string()),
            trendable: None,
            account_trendable: None,
            account_reviewed: false,
            public: true,
            sensitive: false,
            reply: false,
        }
    }

    #[test]
    fn test_review_state_from_trendable() {
        assert_eq!(ReviewState::from_trendable(Some(true)), ReviewState::Approved);
        assert_eq!(ReviewState::from_trendable(Some(false)), ReviewState::Rejected);
        assert_eq!(ReviewState::from_trendable(None), ReviewState::PendingReview);
    }

    #[test]
    fn test_status_eligibility() {
        assert!(status().is_eligible());
        assert!(!StatusEntity { reply: true, ..status() }.is_eligible());
        assert!(!StatusEntity { public: false, ..status() }.is_eligible());
        assert!(!StatusEntity { sensitive: true, ..status() }.is_eligible());
        assert!(!StatusEntity { trendable: Some(false), ..status() }.is_eligible());
    }

    #[test]
    fn test_status_falls_back_to_account() {
        let trusted = StatusEntity {
            account_trendable: Some(true),
            account_reviewed: true,
            ..status()
        };
        assert_eq!(trusted.review_state(), ReviewState::Approved);

        let unreviewed = status();
        assert_eq!(unreviewed.review_state(), ReviewState::PendingReview);

        let declined = StatusEntity {
            account_trendable: Some(false),
            account_reviewed: true,
            ..status()
        };
        assert_eq!(declined.review_state(), ReviewState::Rejected);

        let overridden = StatusEntity {
            trendable: Some(true),
            ..declined.clone()
        };
        assert_eq!(overridden.review_state(), ReviewState::Approved);
    }

    #[test]
    fn test_status_ignores_author() {
        let status = status();
        assert!(!status.accepts_from(10));
        assert!(status.accepts_from(11));
    }

    #[test]
    fn test_unusable_tag_rejected() {
        let tag = TagEntity {
            id: 5,
            name: "cats".to_string(),
            language: None,
            usable: false,
            trendable: Some(true),
        };
        assert_eq!(tag.review_state(), ReviewState::Rejected);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Statuses::NAME, "statuses");
        assert_eq!(Tags::NAME, "tags");
        assert_eq!(Links::NAME, "links");
    }
}
