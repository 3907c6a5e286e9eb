//! Qdrant document store backend
//!
//! Dense k-NN runs server-side with the push-down filter. Keyword search
//! uses the store's full-text payload index to pre-filter and a
//! term-coverage score computed client-side, since the scroll API returns
//! no relevance score of its own.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        condition::ConditionOneOf, point_id::PointIdOptions, r#match::MatchValue, value::Kind,
        Condition, CreateFieldIndexCollectionBuilder, FieldCondition, FieldType, Filter,
        GetPointsBuilder, Match, PointId, RepeatedStrings, ScrollPointsBuilder,
        SearchParamsBuilder, SearchPointsBuilder, Value,
    },
    Qdrant,
};
use ragline_core::Payload;

use crate::store::{DocumentStore, ScoredPoint, StoreError, StoreFilter};

/// Qdrant connection configuration.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
    /// HNSW ef pushed down on k-NN searches when set.
    pub ef_search: Option<u64>,
}

/// Qdrant-backed document store.
pub struct QdrantStore {
    client: Qdrant,
    config: QdrantConfig,
}

impl QdrantStore {
    /// Connect to Qdrant. API keys are applied when configured.
    pub fn new(config: QdrantConfig) -> Result<Self, StoreError> {
        let mut builder = Qdrant::from_url(&config.endpoint);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("qdrant connection using API key authentication");
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Ensure the payload indexes retrieval depends on. Collection
    /// creation itself belongs to ingestion; the engine only maintains
    /// indexes on the fields it filters by.
    pub async fn ensure_payload_indexes(&self) -> Result<(), StoreError> {
        let keyword_fields = ["tenant", "acl", "lang", "docId"];
        for field in keyword_fields {
            let request =
                CreateFieldIndexCollectionBuilder::new(&self.config.collection, field, FieldType::Keyword);
            // Index creation is idempotent; an already-exists answer is fine.
            if let Err(e) = self.client.create_field_index(request).await {
                tracing::debug!(field, error = %e, "payload index creation skipped");
            }
        }
        let text_fields = ["content", "sectionPath"];
        for field in text_fields {
            let request =
                CreateFieldIndexCollectionBuilder::new(&self.config.collection, field, FieldType::Text);
            if let Err(e) = self.client.create_field_index(request).await {
                tracing::debug!(field, error = %e, "payload index creation skipped");
            }
        }
        Ok(())
    }

    fn keyword_condition(key: &str, value: String) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: key.to_string(),
                r#match: Some(Match {
                    match_value: Some(MatchValue::Keyword(value)),
                }),
                ..Default::default()
            })),
        }
    }

    fn any_keyword_condition(key: &str, values: Vec<String>) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: key.to_string(),
                r#match: Some(Match {
                    match_value: Some(MatchValue::Keywords(RepeatedStrings { strings: values })),
                }),
                ..Default::default()
            })),
        }
    }

    fn text_condition(key: &str, text: String) -> Condition {
        Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: key.to_string(),
                r#match: Some(Match {
                    match_value: Some(MatchValue::Text(text)),
                }),
                ..Default::default()
            })),
        }
    }

    /// The push-down form of the access filter.
    fn base_filter(filter: &StoreFilter) -> Filter {
        let mut must = vec![Self::keyword_condition("tenant", filter.tenant.clone())];
        must.push(Self::any_keyword_condition(
            "acl",
            filter.principals.clone(),
        ));
        if !filter.languages.is_empty() {
            must.push(Self::any_keyword_condition(
                "lang",
                filter.languages.clone(),
            ));
        }
        Filter {
            must,
            ..Default::default()
        }
    }

    fn point_id_to_string(id: Option<PointId>) -> String {
        id.and_then(|pid| pid.point_id_options)
            .map(|options| match options {
                PointIdOptions::Uuid(u) => u,
                PointIdOptions::Num(n) => n.to_string(),
            })
            .unwrap_or_default()
    }

    fn parse_payload(
        raw: HashMap<String, Value>,
    ) -> Result<(String, Payload), StoreError> {
        let mut content = String::new();
        let mut payload = Payload::default();

        for (key, value) in raw {
            match (key.as_str(), value.kind) {
                ("content", Some(Kind::StringValue(s))) => content = s,
                ("tenant", Some(Kind::StringValue(s))) => payload.tenant = s,
                ("lang", Some(Kind::StringValue(s))) => payload.lang = s,
                ("docId", Some(Kind::StringValue(s))) => payload.doc_id = s,
                ("sectionPath", Some(Kind::StringValue(s))) => payload.section_path = Some(s),
                ("url", Some(Kind::StringValue(s))) => payload.url = Some(s),
                ("timestamp", Some(Kind::IntegerValue(n))) => payload.timestamp = Some(n),
                ("acl", Some(Kind::ListValue(list))) => {
                    payload.acl = list
                        .values
                        .into_iter()
                        .filter_map(|v| match v.kind {
                            Some(Kind::StringValue(s)) => Some(s),
                            _ => None,
                        })
                        .collect();
                }
                ("headers", Some(Kind::ListValue(list))) => {
                    payload.headers = list
                        .values
                        .into_iter()
                        .filter_map(|v| match v.kind {
                            Some(Kind::StringValue(s)) => Some(s),
                            _ => None,
                        })
                        .collect();
                }
                (other, Some(Kind::StringValue(s))) => {
                    payload.extra.insert(other.to_string(), s);
                }
                _ => {}
            }
        }

        if payload.tenant.is_empty() || payload.doc_id.is_empty() {
            return Err(StoreError::Malformed(
                "point missing tenant or docId payload".into(),
            ));
        }
        Ok((content, payload))
    }

    /// Term-coverage relevance for scroll hits, which carry no score.
    /// sqrt-TF with a word-length IDF stand-in and a coverage bonus.
    fn coverage_score(terms: &[String], content: &str) -> f32 {
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
}

#[async_trait]
impl DocumentStore for QdrantStore {
    async fn knn_search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &StoreFilter,
        ef: Option<u64>,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let mut builder = SearchPointsBuilder::new(
            &self.config.collection,
            vector.to_vec(),
            top_k as u64,
        )
        .with_payload(true)
        .filter(Self::base_filter(filter));

        if let Some(ef) = ef.or(self.config.ef_search) {
            builder = builder.params(SearchParamsBuilder::default().hnsw_ef(ef));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let id = Self::point_id_to_string(point.id);
            let (content, payload) = Self::parse_payload(point.payload)?;
            results.push(ScoredPoint {
                id,
                score: point.score,
                content,
                payload,
            });
        }
        Ok(results)
    }

    async fn text_search(
        &self,
        terms: &[String],
        top_k: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Full-text pre-filter server-side: any term must hit the content
        // index. Relevance ordering happens client-side.
        let mut base = Self::base_filter(filter);
        let text_filter = Filter {
            should: terms
                .iter()
                .map(|t| Self::text_condition("content", t.clone()))
                .collect(),
            ..Default::default()
        };
        base.must.push(Condition {
            condition_one_of: Some(ConditionOneOf::Filter(text_filter)),
        });

        // Over-fetch so client-side scoring has something to rank.
        let scroll_limit = (top_k * 3).max(top_k) as u32;
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.config.collection)
                    .filter(base)
                    .limit(scroll_limit)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let id = Self::point_id_to_string(point.id);
            let (content, payload) = Self::parse_payload(point.payload)?;
            let score = Self::coverage_score(terms, &content);
            results.push(ScoredPoint {
                id,
                score,
                content,
                payload,
            });
        }
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn fetch_siblings(
        &self,
        doc_id: &str,
        section_prefix: &str,
        limit: usize,
        filter: &StoreFilter,
    ) -> Result<Vec<ScoredPoint>, StoreError> {
        let mut base = Self::base_filter(filter);
        base.must
            .push(Self::keyword_condition("docId", doc_id.to_string()));
        base.must.push(Self::text_condition(
            "sectionPath",
            section_prefix.to_string(),
        ));

        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.config.collection)
                    .filter(base)
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let id = Self::point_id_to_string(point.id);
            let (content, payload) = Self::parse_payload(point.payload)?;
            results.push(ScoredPoint {
                id,
                score: 0.0,
                content,
                payload,
            });
        }
        Ok(results)
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<ScoredPoint>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(id.clone())).collect();
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.config.collection, point_ids).with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let id = Self::point_id_to_string(point.id);
            let (content, payload) = Self::parse_payload(point.payload)?;
            results.push(ScoredPoint {
                id,
                score: 0.0,
                content,
                payload,
            });
        }
        Ok(results)
    }

    async fn sample_contents(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.config.collection)
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StoreError::Search(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| match Self::parse_payload(point.payload) {
                Ok((content, _)) if !content.is_empty() => Some(content),
                _ => None,
            })
            .collect())
    }

    async fn probe(&self) -> bool {
        self.client
            .collection_exists(&self.config.collection)
            .await
            .unwrap_or(false)
    }
}
