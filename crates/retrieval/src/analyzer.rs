//! Query analyzer
//!
//! Unsupervised keyphrase extraction (noun-phrase heuristics over stopword
//! runs, weighted by IDF and co-occurrence), intent classification, and
//! per-query search-weight selection. Deterministic for a given query and
//! language-pack version, and cheap enough to never need a timeout.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::stats::{tokenize, CorpusStats};

/// Language-pack version; bump when stopword lists change.
pub const PACK_VERSION: &str = "2026-03";

static STOPWORDS_EN: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has",
        "had", "do", "does", "did", "will", "would", "could", "should", "may", "might", "must",
        "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into",
        "through", "during", "before", "after", "and", "or", "but", "if", "then", "else",
        "i", "me", "my", "we", "our", "you", "your", "he", "she", "it", "its", "they", "them",
        "their", "what", "which", "who", "whom", "this", "that", "these", "those", "there",
        "please", "show", "tell", "give", "about", "how", "long", "many", "much", "when",
        "where", "why",
    ]
    .into_iter()
    .collect()
});

static STOPWORDS_DE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "der", "die", "das", "ein", "eine", "und", "oder", "aber", "ist", "sind", "war",
        "waren", "ich", "du", "wir", "ihr", "sie", "es", "mit", "von", "zu", "auf", "für",
        "wie", "was", "wer", "wo", "wann", "bitte", "nicht", "auch", "noch", "nur",
    ]
    .into_iter()
    .collect()
});

fn stopwords_for(lang: &str) -> &'static HashSet<&'static str> {
    match lang {
        "de" => &STOPWORDS_DE,
        _ => &STOPWORDS_EN,
    }
}

/// Query intent classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Definition,
    Measurement,
    Procedure,
    EntityLookup,
    Exploratory,
}

impl QueryIntent {
    /// Initial vector/keyword weights per intent. Focused factual intents
    /// lean on keywords as much as vectors; lookups and open exploration
    /// favour the semantic side.
    pub fn search_weights(&self) -> (f32, f32) {
        match self {
            QueryIntent::Definition | QueryIntent::Measurement | QueryIntent::Procedure => {
                (0.5, 0.5)
            }
            QueryIntent::EntityLookup | QueryIntent::Exploratory => (0.7, 0.3),
        }
    }
}

/// A keyphrase with its weight, highest first in the analysis output.
#[derive(Debug, Clone, Serialize)]
pub struct WeightedPhrase {
    pub text: String,
    /// Constituent tokens, lowercased.
    pub terms: Vec<String>,
    pub weight: f32,
}

/// Analyzer output.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub keyphrases: Vec<WeightedPhrase>,
    pub intent: QueryIntent,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub language: String,
    pub pack_version: &'static str,
}

impl QueryAnalysis {
    /// Flat term list for the keyword search arm, deduplicated, order
    /// preserved by phrase weight.
    pub fn search_terms(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        for phrase in &self.keyphrases {
            for term in &phrase.terms {
                if seen.insert(term.clone()) {
                    terms.push(term.clone());
                }
            }
        }
        terms
    }
}

/// The analyzer itself; stateless besides the language packs.
#[derive(Debug, Default)]
pub struct QueryAnalyzer;

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(
        &self,
        query: &str,
        languages: &[String],
        stats: &CorpusStats,
    ) -> QueryAnalysis {
        let language = languages
            .first()
            .cloned()
            .unwrap_or_else(|| "en".to_string());
        let stopwords = stopwords_for(&language);

        let intent = classify_intent(query);
        let (vector_weight, keyword_weight) = intent.search_weights();

        let keyphrases = extract_keyphrases(query, stopwords, stats);

        QueryAnalysis {
            keyphrases,
            intent,
            vector_weight,
            keyword_weight,
            language,
            pack_version: PACK_VERSION,
        }
    }
}

fn classify_intent(query: &str) -> QueryIntent {
    let q = query.to_lowercase();

    const MEASUREMENT_CUES: &[&str] = &[
        "how long", "how many", "how much", "how far", "how old", "how often", "how big",
        "how tall", "how heavy",
    ];
    const PROCEDURE_CUES: &[&str] = &[
        "how do", "how to", "how can", "steps to", "procedure", "process for", "guide to",
    ];
    const DEFINITION_CUES: &[&str] = &[
        "what is", "what are", "what does", "define", "definition of", "meaning of",
    ];
    const LOOKUP_CUES: &[&str] = &[
        "show me", "who is", "who are", "where is", "where are", "which", "list the",
        "find the", "look up", "lookup",
    ];

    if MEASUREMENT_CUES.iter().any(|c| q.contains(c)) {
        QueryIntent::Measurement
    } else if PROCEDURE_CUES.iter().any(|c| q.contains(c)) {
        QueryIntent::Procedure
    } else if DEFINITION_CUES.iter().any(|c| q.contains(c)) {
        QueryIntent::Definition
    } else if LOOKUP_CUES.iter().any(|c| q.contains(c)) {
        QueryIntent::EntityLookup
    } else {
        QueryIntent::Exploratory
    }
}

/// Runs of consecutive non-stopword tokens form phrase candidates (a crude
/// but language-agnostic noun-phrase stand-in); phrases are weighted by
/// mean IDF, a length bonus, and intra-phrase co-occurrence support.
fn extract_keyphrases(
    query: &str,
    stopwords: &HashSet<&'static str>,
    stats: &CorpusStats,
) -> Vec<WeightedPhrase> {
    let tokens = tokenize(query);

    let mut runs: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for token in tokens {
        if stopwords.contains(token.as_str()) {
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    let mut phrases: Vec<WeightedPhrase> = Vec::new();
    for run in runs {
        // Whole runs longer than 3 tokens are split into trigrams.
        for window in run.chunks(3) {
            let terms: Vec<String> = window.to_vec();
            let mean_idf =
                terms.iter().map(|t| stats.idf(t)).sum::<f32>() / terms.len() as f32;
            let length_bonus = 1.0 + 0.15 * (terms.len() as f32 - 1.0);

            let mut cohesion = 1.0;
            for pair in terms.windows(2) {
                if stats.cooccurrence(&pair[0], &pair[1]) > 0 {
                    cohesion += 0.1;
                }
            }

            phrases.push(WeightedPhrase {
                text: terms.join(" "),
                weight: mean_idf * length_bonus * cohesion,
                terms,
            });
        }
    }

    phrases.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.text.cmp(&b.text))
    });
    phrases.truncate(8);
    phrases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> CorpusStats {
        CorpusStats::build(
            &[
                "the skill table for artistry lists seven tiers".to_string(),
                "a day in isharoth lasts 31 hours".to_string(),
                "gold can be exchanged at the market".to_string(),
            ],
            1,
        )
    }

    #[test]
    fn test_intent_classification() {
        assert_eq!(
            classify_intent("How long is a day in Isharoth?"),
            QueryIntent::Measurement
        );
        assert_eq!(
            classify_intent("What is artistry?"),
            QueryIntent::Definition
        );
        assert_eq!(
            classify_intent("How do I exchange gold?"),
            QueryIntent::Procedure
        );
        assert_eq!(
            classify_intent("Can you show me the Skill Table for Artistry please?"),
            QueryIntent::EntityLookup
        );
        assert_eq!(
            classify_intent("Tales of the eastern provinces"),
            QueryIntent::Exploratory
        );
    }

    #[test]
    fn test_weights_per_intent() {
        assert_eq!(QueryIntent::Measurement.search_weights(), (0.5, 0.5));
        assert_eq!(QueryIntent::EntityLookup.search_weights(), (0.7, 0.3));
    }

    #[test]
    fn test_keyphrases_skip_stopwords() {
        let analysis =
            QueryAnalyzer::new().analyze("What is the Skill Table for Artistry?", &[], &stats());
        let all_terms = analysis.search_terms();
        assert!(all_terms.contains(&"artistry".to_string()));
        assert!(all_terms.contains(&"skill".to_string()));
        assert!(!all_terms.contains(&"the".to_string()));
    }

    #[test]
    fn test_analysis_deterministic() {
        let analyzer = QueryAnalyzer::new();
        let stats = stats();
        let a = analyzer.analyze("How long is a day in Isharoth?", &[], &stats);
        let b = analyzer.analyze("How long is a day in Isharoth?", &[], &stats);
        let texts_a: Vec<&str> = a.keyphrases.iter().map(|p| p.text.as_str()).collect();
        let texts_b: Vec<&str> = b.keyphrases.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts_a, texts_b);
        assert_eq!(a.intent, b.intent);
    }

    #[test]
    fn test_search_terms_dedup() {
        let analysis = QueryAnalyzer::new().analyze("artistry artistry tiers", &[], &stats());
        let terms = analysis.search_terms();
        let unique: std::collections::HashSet<&String> = terms.iter().collect();
        assert_eq!(terms.len(), unique.len());
    }
}
