//! Relevance scoring
//!
//! Scores are computed from posting statistics only (term frequency and
//! document length recorded at index time), so scoring never re-reads or
//! re-tokenizes trait content.

use crate::index::PostingEntry;
use rustc_hash::FxHashMap;

// ============================================================================
// ScorerContext
// ============================================================================

/// Corpus-level statistics for one query
#[derive(Debug, Clone, Default)]
pub struct ScorerContext {
    /// Total documents in corpus (for IDF calculation)
    pub total_docs: usize,

    /// Document frequency per query term
    pub doc_freqs: FxHashMap<String, usize>,

    /// Average document length in tokens
    pub avg_doc_len: f32,
}

impl ScorerContext {
    /// Create a context for a corpus of `total_docs` documents
    pub fn new(total_docs: usize) -> Self {
        ScorerContext {
            total_docs,
            ..Default::default()
        }
    }

    /// Compute IDF for a term
    ///
    /// IDF(t) = ln((N - df + 0.5) / (df + 0.5) + 1)
    pub fn idf(&self, term: &str) -> f32 {
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        let n = self.total_docs as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Record the document frequency of a term
    pub fn add_doc_freq(&mut self, term: &str, count: usize) {
        self.doc_freqs.insert(term.to_string(), count);
    }

    /// Set average document length
    pub fn with_avg_doc_len(mut self, len: f32) -> Self {
        self.avg_doc_len = len;
        self
    }
}

// ============================================================================
// Scorer Trait
// ============================================================================

/// Pluggable scoring interface
///
/// A document's score is the sum of its per-term scores over the query terms
/// it contains. Higher is more relevant.
pub trait Scorer: Send + Sync {
    /// Score one query term occurring in a document
    fn score_term(&self, term: &str, entry: &PostingEntry, ctx: &ScorerContext) -> f32;

    /// Name for debugging and logging
    fn name(&self) -> &str;
}

// ============================================================================
// BM25LiteScorer
// ============================================================================

/// BM25-Lite scorer
///
/// For each query term t:
/// score += IDF(t) * (tf * (k1 + 1)) / (tf + k1 * (1 - b + b * dl/avgdl))
///
/// Where:
/// - tf = term frequency in document
/// - dl = document length
/// - avgdl = average document length
/// - k1 = term saturation parameter (default 1.2)
/// - b = length normalization parameter (default 0.75)
#[derive(Debug, Clone)]
pub struct BM25LiteScorer {
    k1: f32,
    b: f32,
}

impl Default for BM25LiteScorer {
    fn default() -> Self {
        BM25LiteScorer { k1: 1.2, b: 0.75 }
    }
}

impl BM25LiteScorer {
    /// Create a scorer with custom parameters
    pub fn new(k1: f32, b: f32) -> Self {
        BM25LiteScorer { k1, b }
    }
}

impl Scorer for BM25LiteScorer {
    fn score_term(&self, term: &str, entry: &PostingEntry, ctx: &ScorerContext) -> f32 {
        if entry.tf == 0 {
            return 0.0;
        }
        let tf = entry.tf as f32;
        let doc_len = entry.doc_len as f32;
        let avg_len = ctx.avg_doc_len.max(1.0);
        let tf_component =
            (tf * (self.k1 + 1.0)) / (tf + self.k1 * (1.0 - self.b + self.b * doc_len / avg_len));
        ctx.idf(term) * tf_component
    }

    fn name(&self) -> &str {
        "bm25-lite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exocore_core::TraitRef;

    fn entry(tf: u32, doc_len: u32) -> PostingEntry {
        PostingEntry::new(TraitRef::new("e1", "t1"), tf, doc_len)
    }

    #[test]
    fn test_idf_rare_terms_score_higher() {
        let mut ctx = ScorerContext::new(100);
        ctx.add_doc_freq("rare", 1);
        ctx.add_doc_freq("common", 90);
        assert!(ctx.idf("rare") > ctx.idf("common"));
        assert!(ctx.idf("common") > 0.0);
    }

    #[test]
    fn test_higher_tf_scores_higher() {
        let scorer = BM25LiteScorer::default();
        let mut ctx = ScorerContext::new(10).with_avg_doc_len(10.0);
        ctx.add_doc_freq("hello", 2);
        let low = scorer.score_term("hello", &entry(1, 10), &ctx);
        let high = scorer.score_term("hello", &entry(3, 10), &ctx);
        assert!(high > low);
    }

    #[test]
    fn test_shorter_docs_score_higher() {
        let scorer = BM25LiteScorer::default();
        let mut ctx = ScorerContext::new(10).with_avg_doc_len(10.0);
        ctx.add_doc_freq("hello", 2);
        let short = scorer.score_term("hello", &entry(1, 2), &ctx);
        let long = scorer.score_term("hello", &entry(1, 40), &ctx);
        assert!(short > long);
    }

    #[test]
    fn test_zero_tf_scores_zero() {
        let scorer = BM25LiteScorer::default();
        let ctx = ScorerContext::new(10);
        assert_eq!(scorer.score_term("hello", &entry(0, 5), &ctx), 0.0);
        assert_eq!(scorer.name(), "bm25-lite");
    }
}
