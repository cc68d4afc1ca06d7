//! # Action Index
//!
//! Immutable, platform-partitioned semantic index over the catalog.
//!
//! ```text
//! query(text, platform, k)
//!   │
//!   ├─ filter excludes everything? ──▶ []
//!   ├─ embed(text)                  ──▶ IndexError::Unavailable on failure
//!   └─ cosine vs. each candidate ──▶ sort desc, ties by id ──▶ top k
//! ```
//!
//! Built once at startup and shared behind an `Arc`; queries take `&self`.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::descriptor::{ActionDescriptor, Platform};
use super::embedding::{cosine_similarity, Embedder};
use crate::error::IndexError;

/// A candidate returned by the index
#[derive(Debug, Clone)]
pub struct ScoredAction {
    pub descriptor: Arc<ActionDescriptor>,
    pub similarity: f32,
}

impl ScoredAction {
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }
}

/// Read-only retrieval capability used by the mapper and the search route
#[async_trait]
pub trait ActionSearch: Send + Sync {
    async fn query(
        &self,
        text: &str,
        platform: Option<Platform>,
        k: usize,
    ) -> Result<Vec<ScoredAction>, IndexError>;

    /// Number of indexed actions
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Platforms with at least one indexed action
    fn platforms(&self) -> Vec<Platform>;
}

pub struct ActionIndex {
    by_platform: BTreeMap<Platform, Vec<Arc<ActionDescriptor>>>,
    embedder: Box<dyn Embedder>,
}

impl ActionIndex {
    /// Build from a corpus. Duplicate ids keep the first occurrence.
    pub fn build(corpus: Vec<ActionDescriptor>, embedder: Box<dyn Embedder>) -> Self {
        let mut seen = HashSet::new();
        let mut by_platform: BTreeMap<Platform, Vec<Arc<ActionDescriptor>>> = BTreeMap::new();

        for descriptor in corpus {
            if !seen.insert(descriptor.id.clone()) {
                tracing::warn!(id = %descriptor.id, "Duplicate action id in corpus, keeping first");
                continue;
            }
            by_platform
                .entry(descriptor.platform)
                .or_default()
                .push(Arc::new(descriptor));
        }

        tracing::info!(
            actions = seen.len(),
            platforms = by_platform.len(),
            embedder = %embedder.name(),
            "Action index built"
        );

        Self {
            by_platform,
            embedder,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ActionDescriptor>> {
        self.by_platform
            .values()
            .flatten()
            .find(|d| d.id == id)
            .cloned()
    }

    fn candidates(&self, platform: Option<Platform>) -> Vec<&Arc<ActionDescriptor>> {
        match platform {
            Some(p) => self
                .by_platform
                .get(&p)
                .map(|v| v.iter().collect())
                .unwrap_or_default(),
            None => self.by_platform.values().flatten().collect(),
        }
    }

    /// Score and order candidates against an already-embedded query.
    pub fn rank(&self, query: &[f32], platform: Option<Platform>, k: usize) -> Vec<ScoredAction> {
        let mut scored: Vec<ScoredAction> = self
            .candidates(platform)
            .into_iter()
            .filter_map(|descriptor| {
                if descriptor.embedding.len() != query.len() {
                    tracing::warn!(
                        id = %descriptor.id,
                        expected = query.len(),
                        actual = descriptor.embedding.len(),
                        "Skipping action with mismatched embedding dimension"
                    );
                    return None;
                }
                Some(ScoredAction {
                    similarity: cosine_similarity(query, &descriptor.embedding),
                    descriptor: Arc::clone(descriptor),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id().cmp(b.id()))
        });
        scored.truncate(k);
        scored
    }
}

#[async_trait]
impl ActionSearch for ActionIndex {
    #[tracing::instrument(skip(self, text), fields(platform = ?platform, k))]
    async fn query(
        &self,
        text: &str,
        platform: Option<Platform>,
        k: usize,
    ) -> Result<Vec<ScoredAction>, IndexError> {
        if k == 0 || self.candidates(platform).is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(text).await?;
        let results = self.rank(&embedding, platform, k);
        tracing::debug!(results = results.len(), "Index query complete");
        Ok(results)
    }

    fn len(&self) -> usize {
        self.by_platform.values().map(Vec::len).sum()
    }

    fn platforms(&self) -> Vec<Platform> {
        self.by_platform.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::embedding::HashingEmbedder;
    use tokio_test::{assert_err, assert_ok};

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
            Err(IndexError::unavailable("embedding service down"))
        }

        fn name(&self) -> String {
            "down".into()
        }
    }

    fn descriptor(id: &str, platform: Platform, title: &str, description: &str) -> ActionDescriptor {
        let embedder = HashingEmbedder::default();
        let mut d = ActionDescriptor {
            id: id.into(),
            platform,
            title: title.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            embedding: vec![],
        };
        d.embedding = embedder.vectorize(&format!("{} {}", title, description));
        d
    }

    fn corpus() -> Vec<ActionDescriptor> {
        vec![
            descriptor("pa:send-email", Platform::PowerAutomate, "Send email", "Send an email message"),
            descriptor("pa:read-excel", Platform::PowerAutomate, "Read from Excel worksheet", "Read cells from a worksheet"),
            descriptor("ui:send-mail", Platform::UiPath, "Send SMTP mail message", "Send an email message over SMTP"),
        ]
    }

    fn index() -> ActionIndex {
        ActionIndex::build(corpus(), Box::new(HashingEmbedder::default()))
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let index = index();
        let results = index.query("send email message", None, 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id(), "pa:send-email");
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.similarity)));
    }

    #[tokio::test]
    async fn test_platform_filter() {
        let index = index();
        let results = index
            .query("send email message", Some(Platform::UiPath), 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].descriptor.platform, Platform::UiPath);
    }

    #[test]
    fn test_filter_excluding_everything_skips_embedder() {
        tokio_test::block_on(async {
            let index = ActionIndex::build(corpus(), Box::new(DownEmbedder));
            let results =
                assert_ok!(index.query("anything", Some(Platform::AutomationAnywhere), 5).await);
            assert!(results.is_empty());
        });
    }

    #[test]
    fn test_empty_corpus_is_empty_result() {
        tokio_test::block_on(async {
            let index = ActionIndex::build(vec![], Box::new(DownEmbedder));
            assert!(assert_ok!(index.query("anything", None, 5).await).is_empty());
            assert!(index.is_empty());
        });
    }

    #[test]
    fn test_embedder_failure_is_unavailable() {
        tokio_test::block_on(async {
            let index = ActionIndex::build(corpus(), Box::new(DownEmbedder));
            let err = assert_err!(index.query("send email", None, 5).await);
            assert!(matches!(err, IndexError::Unavailable(_)));
        });
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let index = index();
        let first = index.query("read excel", None, 3).await.unwrap();
        let second = index.query("read excel", None, 3).await.unwrap();
        let ids = |r: &[ScoredAction]| r.iter().map(|s| (s.id().to_string(), s.similarity)).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_ties_break_by_id() {
        let mut a = descriptor("b-action", Platform::UiPath, "Click button", "Click");
        let mut b = descriptor("a-action", Platform::UiPath, "Click button", "Click");
        a.embedding = vec![1.0, 0.0];
        b.embedding = vec![1.0, 0.0];
        let index = ActionIndex::build(vec![a, b], Box::new(HashingEmbedder::new(2)));
        let ranked = index.rank(&[1.0, 0.0], None, 2);
        assert_eq!(ranked[0].id(), "a-action");
        assert_eq!(ranked[1].id(), "b-action");
    }

    #[test]
    fn test_dimension_mismatch_is_skipped() {
        let mut short = descriptor("short", Platform::UiPath, "Click", "Click");
        short.embedding = vec![1.0];
        let index = ActionIndex::build(vec![short], Box::new(HashingEmbedder::new(2)));
        assert!(index.rank(&[1.0, 0.0], None, 5).is_empty());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let first = descriptor("dup", Platform::UiPath, "First", "first");
        let second = descriptor("dup", Platform::PowerAutomate, "Second", "second");
        let index = ActionIndex::build(vec![first, second], Box::new(HashingEmbedder::default()));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("dup").unwrap().title, "First");
        assert_eq!(index.platforms(), vec![Platform::UiPath]);
    }
}
