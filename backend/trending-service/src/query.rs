//! Ranked trend queries
//!
//! A `Query` is an immutable description of what to read. Modifiers return a
//! new value, so one base query can be specialised per request without
//! leaking state between callers. Nothing touches the store until `records`.

use crate::error::Result;
use crate::store::{ScoreRecord, TrendStore};
use crate::{AccountId, EntityId};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The account a listing is personalised for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub account_id: AccountId,
    /// Languages the account chose to see. Matches rank together, in no
    /// preference order.
    pub chosen_languages: Option<Vec<String>>,
}

/// Primary language subtag, lowercased: "pt-BR" -> "pt"
fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[derive(Clone)]
pub struct Query {
    store: Arc<dyn TrendStore>,
    kind: &'static str,
    min_score: f64,
    allowed_only: bool,
    locale: Option<String>,
    chosen_languages: Option<Vec<String>>,
    offset: usize,
    limit: Option<usize>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("kind", &self.kind)
            .field("min_score", &self.min_score)
            .field("allowed_only", &self.allowed_only)
            .field("locale", &self.locale)
            .field("chosen_languages", &self.chosen_languages)
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .finish()
    }
}

impl Query {
    pub(crate) fn new(
        store: Arc<dyn TrendStore>,
        kind: &'static str,
        min_score: f64,
        allowed_only: bool,
    ) -> Self {
        Self {
            store,
            kind,
            min_score,
            allowed_only,
            locale: None,
            chosen_languages: None,
            offset: 0,
            limit: None,
        }
    }

    /// Rank entities in `locale` ahead of the rest. Other languages are kept.
    pub fn in_locale(&self, locale: &str) -> Self {
        let locale = primary_subtag(locale);
        Self {
            locale: (!locale.is_empty()).then_some(locale),
            ..self.clone()
        }
    }

    /// Rank entities in the viewer's chosen languages ahead of the rest.
    /// A viewer without chosen languages leaves the ordering unchanged.
    pub fn filtered_for(&self, viewer: &Viewer) -> Self {
        let chosen = viewer.chosen_languages.as_ref().map(|languages| {
            languages
                .iter()
                .map(|language| primary_subtag(language))
                .filter(|language| !language.is_empty())
                .collect::<Vec<_>>()
        });
        Self {
            chosen_languages: chosen.filter(|languages| !languages.is_empty()),
            ..self.clone()
        }
    }

    pub fn offset(&self, offset: usize) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    pub fn limit(&self, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    /// 0: matches the locale and a chosen language, 1: locale only,
    /// 2: chosen language only, 3: neither. A modifier that is not set
    /// counts as matched.
    fn group(&self, record: &ScoreRecord) -> u8 {
        let language = record.language.as_deref().map(primary_subtag);

        let locale_match = match (&self.locale, &language) {
            (None, _) => true,
            (Some(locale), Some(language)) => locale == language,
            (Some(_), None) => false,
        };

        let chosen_match = match (&self.chosen_languages, &language) {
            (None, _) => true,
            (Some(chosen), Some(language)) => chosen.iter().any(|c| c == language),
            (Some(_), None) => false,
        };

        (u8::from(!locale_match) << 1) | u8::from(!chosen_match)
    }

    fn compare(&self, a: &ScoreRecord, b: &ScoreRecord) -> Ordering {
        self.group(a)
            .cmp(&self.group(b))
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    }

    /// Execute against the store. Each call reads a fresh snapshot.
    pub async fn records(&self) -> Result<Vec<ScoreRecord>> {
        let mut records: Vec<ScoreRecord> = self
            .store
            .scored_records(self.kind, self.min_score)
            .await?
            .into_iter()
            .filter(|record| !self.allowed_only || record.allowed)
            .collect();

        records.sort_by(|a, b| self.compare(a, b));

        let page: Vec<ScoreRecord> = records
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();

        debug!(
            kind = %self.kind,
            locale = ?self.locale,
            returned = page.len(),
            "Executed trend query"
        );
        Ok(page)
    }

    pub async fn ids(&self) -> Result<Vec<EntityId>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .map(|record| record.entity_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketKey;
    use crate::store::MemoryTrendStore;
    use chrono::Utc;

    fn record(entity_id: EntityId, score: f64, language: Option<&str>, allowed: bool) -> ScoreRecord {
        let now = Utc::now();
        ScoreRecord {
            entity_id,
            score,
            language: language.map(str::to_string),
            allowed,
            updated_at: now,
            last_active_at: now,
            counted_bucket: BucketKey(0),
            counted_uses: 0,
        }
    }

    async fn seeded(records: Vec<ScoreRecord>) -> Arc<dyn TrendStore> {
        let store: Arc<dyn TrendStore> = Arc::new(MemoryTrendStore::new());
        for record in &records {
            store.put_score("statuses", record).await.unwrap();
        }
        store
    }

    #[test]
    fn test_primary_subtag() {
        assert_eq!(primary_subtag("pt-BR"), "pt");
        assert_eq!(primary_subtag("zh_Hant"), "zh");
        assert_eq!(primary_subtag("EN"), "en");
        assert_eq!(primary_subtag(""), "");
    }

    #[tokio::test]
    async fn test_orders_by_score_then_id() {
        let store = seeded(vec![
            record(3, 2.0, None, true),
            record(1, 9.0, None, true),
            record(2, 2.0, None, true),
        ])
        .await;
        let query = Query::new(store, "statuses", 0.0, true);
        assert_eq!(query.ids().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_allowed_only_and_min_score() {
        let store = seeded(vec![
            record(1, 9.0, None, false),
            record(2, 6.0, None, true),
            record(3, 4.0, None, true),
            record(4, 0.0, None, true),
        ])
        .await;

        let public = Query::new(store.clone(), "statuses", 5.0, true);
        assert_eq!(public.ids().await.unwrap(), vec![2]);

        let review = Query::new(store, "statuses", 3.0, false);
        assert_eq!(review.ids().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_locale_first_then_rest() {
        let store = seeded(vec![
            record(1, 10.0, Some("en"), true),
            record(2, 5.0, Some("es"), true),
            record(3, 1.0, Some("en"), true),
        ])
        .await;
        let query = Query::new(store, "statuses", 0.0, true);
        assert_eq!(query.in_locale("es").ids().await.unwrap(), vec![2, 1, 3]);
        assert_eq!(query.ids().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_locale_and_chosen_languages_combine() {
        let store = seeded(vec![
            record(1, 50.0, Some("fr"), true),
            record(2, 40.0, Some("de"), true),
            record(3, 30.0, Some("en"), true),
            record(4, 20.0, Some("en-GB"), true),
            record(5, 10.0, None, true),
        ])
        .await;
        let viewer = Viewer {
            account_id: 99,
            chosen_languages: Some(vec!["de".to_string(), "en".to_string()]),
        };

        let query = Query::new(store, "statuses", 0.0, true)
            .in_locale("en-US")
            .filtered_for(&viewer);

        // en (locale + chosen), then de (chosen only), then fr and unknown
        assert_eq!(query.ids().await.unwrap(), vec![3, 4, 2, 1, 5]);
    }

    #[tokio::test]
    async fn test_chosen_language_order_is_ignored() {
        let store = seeded(vec![
            record(1, 50.0, Some("fr"), true),
            record(2, 40.0, Some("de"), true),
            record(3, 30.0, Some("en"), true),
        ])
        .await;

        let mut ranked = Vec::new();
        for languages in [["en", "de"], ["de", "en"]] {
            let viewer = Viewer {
                account_id: 99,
                chosen_languages: Some(languages.iter().map(|l| l.to_string()).collect()),
            };
            let query = Query::new(store.clone(), "statuses", 0.0, true).filtered_for(&viewer);
            ranked.push(query.ids().await.unwrap());
        }

        // Chosen languages rank by score, then the rest
        assert_eq!(ranked[0], vec![2, 3, 1]);
        assert_eq!(ranked[0], ranked[1]);
    }

    #[tokio::test]
    async fn test_viewer_without_languages_is_noop() {
        let store = seeded(vec![
            record(1, 1.0, Some("ja"), true),
            record(2, 2.0, Some("en"), true),
        ])
        .await;
        let query = Query::new(store, "statuses", 0.0, true).filtered_for(&Viewer::default());
        assert_eq!(query.ids().await.unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_pagination() {
        let store = seeded((1..=5).map(|id| record(id, id as f64, None, true)).collect()).await;
        let query = Query::new(store, "statuses", 0.0, true);
        assert_eq!(query.offset(1).limit(2).ids().await.unwrap(), vec![4, 3]);
        assert_eq!(query.offset(10).ids().await.unwrap(), Vec::<EntityId>::new());
    }

    #[tokio::test]
    async fn test_records_rereads_store() {
        let store = seeded(vec![record(1, 3.0, None, true)]).await;
        let query = Query::new(store.clone(), "statuses", 0.0, true);
        assert_eq!(query.ids().await.unwrap(), vec![1]);

        store.put_score("statuses", &record(2, 8.0, None, true)).await.unwrap();
        assert_eq!(query.ids().await.unwrap(), vec![2, 1]);
    }
}
