//! In-memory document store
//!
//! Backend for tests and local development. Implements the same contract
//! as the Qdrant backend: cosine k-NN and term-scored full-text search,
//! both behind the push-down filter.

use async_trait::async_trait;
use parking_lot::RwLock;
use ragline_core::Payload;

use crate::store::{DocumentStore, ScoredPoint, StoreError, StoreFilter};

/// A seeded document chunk.
#[derive(Debug, Clone)]
pub struct MemoryDoc {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// In-process store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<Vec<MemoryDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: MemoryDoc) {
        self.docs.write().push(doc);
    }

    pub fn insert_all(&self, docs: impl IntoIterator<Item = MemoryDoc>) {
        self.docs.write().extend(docs);
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn matches_filter(payload: &Payload, filter: &StoreFilter) -> bool {
        if payload.tenant != filter.tenant {
            return false;
        }
        if !payload
            .acl
            .iter()
            .any(|p| filter.principals.iter().any(|q| q == p))
        {
            return false;
        }
        if !filter.languages.is_empty() && !filter.languages.iter().any(|l| *l == payload.lang) {
            return false;
        }
        true
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    /// Same sqrt-TF scoring shape as the Qdrant backend's client-side
    /// ranking, so test corpora behave like production ones.
    fn term_score(terms: &[String], content: &str) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }
        let content_lower = content.to_lowercase();
        let words: Vec<&str> = content_lower.split_whitespace().collect();
        let doc_len = words.len().max(1) as f32;

        let mut total = 0.0f32;
        let mut matched = 0usize;
        for term in terms {
            let tf = words.iter().filter(|w| **w == term.as_str()).count() as f32;
            if tf > 0.0 {
                matched += 1;
                let idf_approx = (1.0 + term.len() as f32).ln();
                let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());
                total += tf.sqrt() * idf_approx * length_norm;
            }
        }
        let coverage_bonus = matched as f32 / terms.len() as f32 * 0.3;
        let raw = total + coverage_bonus;
        (raw / (raw + 1.0)).min(1.0)
    }

    fn sorted_top(mut results: Vec<ScoredPoint>, top_k: usize) -> Vec<ScoredPoint> {
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);
        results
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn knn_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &StoreFilter,
        _ef: Option<u64>,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let docs = self.docs.read();
        let results = docs
            .iter()
            .filter(|d| Self::matches_filter(&d.payload, filter))
            .map(|d| ScoredPoint {
                id: d.id.clone(),
                score: Self::cosine(vector, &d.vector),
                content: d.content.clone(),
                payload: d.payload.clone(),
            })
            .collect();
        Ok(Self::sorted_top(results, top_k))
    }

    async fn text_search(
        &self,
        terms: &[String],
        top_k: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let docs = self.docs.read();
        let results = docs
            .iter()
            .filter(|d| Self::matches_filter(&d.payload, filter))
            .map(|d| ScoredPoint {
                id: d.id.clone(),
                score: Self::term_score(terms, &d.content),
                content: d.content.clone(),
                payload: d.payload.clone(),
            })
            .filter(|p| p.score > 0.0)
            .collect();
        Ok(Self::sorted_top(results, top_k))
    }

    async fn fetch_siblings(
        &self,
        doc_id: &str,
        section_prefix: &str,
        limit: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let docs = self.docs.read();
        Ok(docs
            .iter()
            .filter(|d| {
                d.payload.doc_id == doc_id
                    && Self::matches_filter(&d.payload, filter)
                    && d.payload
                        .section_path
                        .as_deref()
                        .is_some_and(|p| p.starts_with(section_prefix))
            })
            .take(limit)
            .map(|d| ScoredPoint {
                id: d.id.clone(),
                score: 0.0,
                content: d.content.clone(),
                payload: d.payload.clone(),
            })
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<ScoredPoint>, StoreError> {
        let docs = self.docs.read();
        Ok(docs
            .iter()
            .filter(|d| ids.iter().any(|id| *id == d.id))
            .map(|d| ScoredPoint {
                id: d.id.clone(),
                score: 0.0,
                content: d.content.clone(),
                payload: d.payload.clone(),
            })
            .collect())
    }

    async fn sample_contents(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.read();
        Ok(docs.iter().take(limit).map(|d| d.content.clone()).collect())
    }

    async fn probe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tenant: &str) -> Payload {
        Payload {
            tenant: tenant.into(),
            acl: vec!["g.readers".into()],
            lang: "en".into(),
            doc_id: "doc-1".into(),
            ..Default::default()
        }
    }

    fn filter(tenant: &str) -> StoreFilter {
        StoreFilter {
            tenant: tenant.into(),
            principals: vec!["g.readers".into()],
            languages: vec!["en".into()],
        }
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(MemoryDoc {
            id: "a".into(),
            content: "a day in isharoth lasts 31 hours".into(),
            vector: vec![1.0, 0.0],
            payload: payload("tenantA"),
        });
        store.insert(MemoryDoc {
            id: "b".into(),
            content: "artistry skill tiers from novice to mythic".into(),
            vector: vec![0.0, 1.0],
            payload: payload("tenantA"),
        });
        store.insert(MemoryDoc {
            id: "c".into(),
            content: "a day in isharoth lasts 31 hours".into(),
            vector: vec![1.0, 0.0],
            payload: payload("tenantB"),
        });
        store
    }

    #[tokio::test]
    async fn test_knn_respects_tenant_filter() {
        let store = store();
        let hits = store
            .knn_search(&[1.0, 0.0], 10, &filter("tenantA"), None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.payload.tenant == "tenantA"));
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_text_search_scores_hits() {
        let store = store();
        let hits = store
            .text_search(
                &["isharoth".into(), "hours".into()],
                10,
                &filter("tenantA"),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_fetch_siblings_by_prefix() {
        let store = MemoryStore::new();
        for part in 0..3 {
            let mut p = payload("tenantA");
            p.section_path = Some(format!("block_9/part_{part}"));
            store.insert(MemoryDoc {
                id: format!("s{part}"),
                content: format!("part {part}"),
                vector: vec![0.0, 0.0],
                payload: p,
            });
        }
        let siblings = store
            .fetch_siblings("doc-1", "block_9", 10, &filter("tenantA"))
            .await
            .unwrap();
        assert_eq!(siblings.len(), 3);
    }
}
