//! Citation extraction
//!
//! Parses inline `[^n]` markers from the model's answer, resolves them
//! against the packed context, deduplicates by document, renumbers to a
//! contiguous `[1..N]` prefix and attaches freshness. Markers that do not
//! resolve to a packed candidate are removed from the answer text.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use ragline_core::{Citation, FreshnessInfo, RetrievedChunk};

static MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\^(\d+)\]").unwrap());

const EXCERPT_CHARS: usize = 200;

/// Context metadata the extractor needs beyond the envelope view.
#[derive(Debug, Clone)]
pub struct CitationSource {
    pub chunk: RetrievedChunk,
    pub source_url: Option<String>,
    pub timestamp: Option<i64>,
}

/// Extraction result: the rewritten answer plus the citation list.
#[derive(Debug)]
pub struct ExtractedCitations {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Extract and renumber citations.
///
/// `sources[i]` corresponds to marker `[^i+1]` in the prompt. Citations
/// keep first-occurrence order, are deduplicated by `docId`, and the
/// answer text is rewritten to the new numbering.
pub fn extract_citations(
    answer: &str,
    sources: &[CitationSource],
    now: DateTime<Utc>,
) -> ExtractedCitations {
    // First pass: assign new numbers by first occurrence, one per document.
    let mut doc_to_number: HashMap<String, usize> = HashMap::new();
    let mut old_to_new: HashMap<usize, Option<usize>> = HashMap::new();
    let mut citations: Vec<Citation> = Vec::new();

    for captures in MARKER.captures_iter(answer) {
        let old: usize = match captures[1].parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if old_to_new.contains_key(&old) {
            continue;
        }

        let Some(source) = old.checked_sub(1).and_then(|i| sources.get(i)) else {
            // Hallucinated marker: drop it from the text.
            old_to_new.insert(old, None);
            continue;
        };

        let doc_id = source.chunk.doc_id.clone();
        let number = match doc_to_number.get(&doc_id) {
            Some(&existing) => existing,
            None => {
                let number = citations.len() + 1;
                doc_to_number.insert(doc_id.clone(), number);
                citations.push(Citation {
                    number,
                    doc_id,
                    excerpt: excerpt(&source.chunk.content),
                    source_url: source.source_url.clone(),
                    freshness: source
                        .timestamp
                        .and_then(|ts| FreshnessInfo::from_timestamp(ts, now)),
                    score: source.chunk.score,
                });
                number
            }
        };
        old_to_new.insert(old, Some(number));
    }

    // Second pass: rewrite markers in place.
    let rewritten = MARKER.replace_all(answer, |captures: &Captures| {
        let old: usize = captures[1].parse().unwrap_or(0);
        match old_to_new.get(&old) {
            Some(Some(new)) => format!("[^{new}]"),
            _ => String::new(),
        }
    });

    // Collapse doubled spaces left behind by removed markers.
    let answer = rewritten.replace("  ", " ").trim().to_string();

    ExtractedCitations { answer, citations }
}

fn excerpt(content: &str) -> String {
    if content.chars().count() <= EXCERPT_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(doc_id: &str, content: &str) -> CitationSource {
        CitationSource {
            chunk: RetrievedChunk {
                id: format!("chunk-{doc_id}"),
                doc_id: doc_id.into(),
                content: content.into(),
                score: 0.8,
                section_path: None,
                completeness: None,
            },
            source_url: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_contiguous_renumbering() {
        let sources = vec![source("a", "one"), source("b", "two"), source("c", "three")];
        // The model cited sources 3 and 1, in that order.
        let extracted =
            extract_citations("Fact one.[^3] Fact two.[^1]", &sources, Utc::now());
        assert_eq!(extracted.answer, "Fact one.[^1] Fact two.[^2]");
        assert_eq!(extracted.citations.len(), 2);
        assert_eq!(extracted.citations[0].doc_id, "c");
        assert_eq!(extracted.citations[0].number, 1);
        assert_eq!(extracted.citations[1].doc_id, "a");
    }

    #[test]
    fn test_dedup_by_doc_id_keeps_first() {
        let mut sources = vec![source("a", "one"), source("a", "one again")];
        sources[1].chunk.id = "chunk-a2".into();
        let extracted = extract_citations("X.[^1] Y.[^2]", &sources, Utc::now());
        assert_eq!(extracted.citations.len(), 1);
        assert_eq!(extracted.answer, "X.[^1] Y.[^1]");
    }

    #[test]
    fn test_hallucinated_marker_removed() {
        let sources = vec![source("a", "one")];
        let extracted = extract_citations("Real.[^1] Fake.[^7]", &sources, Utc::now());
        assert_eq!(extracted.citations.len(), 1);
        assert!(!extracted.answer.contains("[^7]"));
        assert!(extracted.answer.contains("[^1]"));
    }

    #[test]
    fn test_unreferenced_sources_not_cited() {
        let sources = vec![source("a", "one"), source("b", "two")];
        let extracted = extract_citations("Only one fact.[^2]", &sources, Utc::now());
        assert_eq!(extracted.citations.len(), 1);
        assert_eq!(extracted.citations[0].doc_id, "b");
    }

    #[test]
    fn test_no_markers_yields_empty_citations() {
        let sources = vec![source("a", "one")];
        let extracted = extract_citations("An uncited answer.", &sources, Utc::now());
        assert!(extracted.citations.is_empty());
        assert_eq!(extracted.answer, "An uncited answer.");
    }

    #[test]
    fn test_excerpt_truncated() {
        let long = "word ".repeat(100);
        let sources = vec![source("a", &long)];
        let extracted = extract_citations("Fact.[^1]", &sources, Utc::now());
        assert!(extracted.citations[0].excerpt.chars().count() <= EXCERPT_CHARS + 1);
    }

    #[test]
    fn test_freshness_attached_from_timestamp() {
        let now = Utc::now();
        let mut s = source("a", "content");
        s.timestamp = Some(now.timestamp() - 5 * 86_400);
        let extracted = extract_citations("Fact.[^1]", &[s], now);
        let freshness = extracted.citations[0].freshness.unwrap();
        assert_eq!(freshness.age_days, 5);
    }
}
