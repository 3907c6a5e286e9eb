//! Corpus statistics
//!
//! Process-wide IDF, PMI and co-occurrence tables consumed by the query
//! analyzer and the domain-less keyword reranker. Rebuilt from a store
//! sample on a bounded interval; requests read an immutable snapshot
//! acquired at entry, so a refresh never tears an in-flight request.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::store::DocumentStore;

/// Unique terms per document considered for co-occurrence counting.
/// Bounds pair-table memory on long chunks.
const COOCCUR_TERMS_PER_DOC: usize = 30;

/// Lowercased alphanumeric tokens, length ≥ 2.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_string)
        .collect()
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Immutable statistics snapshot.
#[derive(Debug, Default)]
pub struct CorpusStats {
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
    cooccur: HashMap<(String, String), usize>,
    version: u64,
}

impl CorpusStats {
    /// Build from sampled chunk contents.
    pub fn build(contents: &[String], version: u64) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut cooccur: HashMap<(String, String), usize> = HashMap::new();

        for content in contents {
            let mut seen = HashSet::new();
            let mut ordered = Vec::new();
            for token in tokenize(content) {
                if seen.insert(token.clone()) {
                    ordered.push(token);
                }
            }
            for term in &ordered {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            let window = &ordered[..ordered.len().min(COOCCUR_TERMS_PER_DOC)];
            for i in 0..window.len() {
                for j in (i + 1)..window.len() {
                    *cooccur.entry(pair_key(&window[i], &window[j])).or_insert(0) += 1;
                }
            }
        }

        Self {
            doc_count: contents.len(),
            doc_freq,
            cooccur,
            version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    /// Smoothed IDF in natural log space. Unknown terms get the maximum,
    /// so rare query vocabulary is treated as highly selective.
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.doc_count.max(1) as f32;
        let df = self.doc_freq(term) as f32;
        ((n + 1.0) / (df + 1.0)).ln() + 1.0
    }

    pub fn cooccurrence(&self, a: &str, b: &str) -> usize {
        self.cooccur.get(&pair_key(a, b)).copied().unwrap_or(0)
    }

    /// Pointwise mutual information of a term pair, 0 when unseen.
    pub fn pmi(&self, a: &str, b: &str) -> f32 {
        let n = self.doc_count.max(1) as f32;
        let p_a = self.doc_freq(a) as f32 / n;
        let p_b = self.doc_freq(b) as f32 / n;
        let p_ab = self.cooccurrence(a, b) as f32 / n;
        if p_a == 0.0 || p_b == 0.0 || p_ab == 0.0 {
            return 0.0;
        }
        (p_ab / (p_a * p_b)).ln()
    }

    /// Whether two terms are mutually exclusive in this corpus: both are
    /// established vocabulary yet essentially never co-occur.
    pub fn is_exclusive_pair(&self, a: &str, b: &str) -> bool {
        let min_df = (self.doc_count / 50).max(3);
        self.doc_freq(a) >= min_df && self.doc_freq(b) >= min_df && self.cooccurrence(a, b) == 0
    }
}

/// Shared handle; readers clone the `Arc` snapshot, the refresher swaps it.
#[derive(Clone, Default)]
pub struct CorpusStatsHandle {
    inner: Arc<RwLock<Arc<CorpusStats>>>,
}

impl CorpusStatsHandle {
    pub fn new(stats: CorpusStats) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(stats))),
        }
    }

    pub fn snapshot(&self) -> Arc<CorpusStats> {
        Arc::clone(&self.inner.read())
    }

    pub fn swap(&self, stats: CorpusStats) {
        *self.inner.write() = Arc::new(stats);
    }

    /// Readiness: statistics must have been loaded at least once.
    pub fn is_loaded(&self) -> bool {
        !self.snapshot().is_empty()
    }
}

/// Background refresher sampling the store on an interval.
pub struct StatsRefresher {
    store: Arc<dyn DocumentStore>,
    handle: CorpusStatsHandle,
    sample_size: usize,
    interval: Duration,
}

impl StatsRefresher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        handle: CorpusStatsHandle,
        sample_size: usize,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            handle,
            sample_size,
            interval,
        }
    }

    /// One refresh; used at startup and by the loop.
    pub async fn refresh_once(&self) -> bool {
        match self.store.sample_contents(self.sample_size).await {
            Ok(contents) => {
                let version = self.handle.snapshot().version() + 1;
                let stats = CorpusStats::build(&contents, version);
                tracing::info!(
                    docs = stats.doc_count(),
                    terms = stats.doc_freq.len(),
                    version,
                    "corpus statistics refreshed"
                );
                self.handle.swap(stats);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "corpus statistics refresh failed; keeping snapshot");
                false
            }
        }
    }

    /// Run forever; spawn on the runtime at startup.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.refresh_once().await;
        }
    }
}
