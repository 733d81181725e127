//! Inverted index over trait text fields
//!
//! Each indexed document is one trait, identified by its `TraitRef`; its
//! text is the concatenation of the trait's text-flagged fields. The index
//! stores references and term statistics only, never trait content.
//!
//! # Thread Safety
//!
//! Uses DashMap for concurrent access. Updates of one document must be
//! serialized by the caller (the trait index holds the entity write lock);
//! updates of different documents may run in parallel.

use crate::scorer::{Scorer, ScorerContext};
use crate::tokenizer::tokenize;
use dashmap::DashMap;
use exocore_core::TraitRef;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// ============================================================================
// PostingEntry
// ============================================================================

/// Entry in a posting list
#[derive(Debug, Clone, PartialEq)]
pub struct PostingEntry {
    /// Trait containing the term
    pub doc_ref: TraitRef,
    /// Term frequency in this trait
    pub tf: u32,
    /// Trait text length in tokens
    pub doc_len: u32,
}

impl PostingEntry {
    /// Create a new posting entry
    pub fn new(doc_ref: TraitRef, tf: u32, doc_len: u32) -> Self {
        PostingEntry {
            doc_ref,
            tf,
            doc_len,
        }
    }
}

// ============================================================================
// PostingList
// ============================================================================

/// Documents containing a term
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    /// Document entries
    pub entries: Vec<PostingEntry>,
}

impl PostingList {
    /// Create a new empty posting list
    pub fn new() -> Self {
        PostingList { entries: vec![] }
    }

    /// Add an entry to the posting list
    pub fn add(&mut self, entry: PostingEntry) {
        self.entries.push(entry);
    }

    /// Remove entries of a document, returning how many were removed
    pub fn remove(&mut self, doc_ref: &TraitRef) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| &e.doc_ref != doc_ref);
        before - self.entries.len()
    }

    /// Number of documents containing this term
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if posting list is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// InvertedIndex
// ============================================================================

/// Inverted index for trait text search
///
/// The version field is a watermark incremented on every update, used by
/// callers to detect that the index changed between two reads.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    /// Term -> PostingList mapping
    postings: DashMap<String, PostingList>,

    /// Term -> document frequency
    doc_freqs: DashMap<String, usize>,

    /// Document -> (length, distinct terms), for exact removal
    documents: DashMap<TraitRef, (u32, Vec<String>)>,

    /// Total documents indexed
    total_docs: AtomicUsize,

    /// Sum of all document lengths
    total_doc_len: AtomicUsize,

    /// Version watermark
    version: AtomicU64,
}

impl InvertedIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Current version watermark
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Total number of indexed documents
    pub fn total_docs(&self) -> usize {
        self.total_docs.load(Ordering::Acquire)
    }

    /// Document frequency for a term
    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freqs.get(term).map(|r| *r).unwrap_or(0)
    }

    /// Average document length
    pub fn avg_doc_len(&self) -> f32 {
        let total = self.total_docs.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        self.total_doc_len.load(Ordering::Acquire) as f32 / total as f32
    }

    /// Whether a document is indexed
    pub fn contains(&self, doc_ref: &TraitRef) -> bool {
        self.documents.contains_key(doc_ref)
    }

    // ========================================================================
    // Index Updates
    // ========================================================================

    /// Index a document, replacing any previous version of it
    ///
    /// Text without any usable token removes the document.
    pub fn index_document(&self, doc_ref: &TraitRef, text: &str) {
        if self.documents.contains_key(doc_ref) {
            self.remove_document(doc_ref);
        }

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let doc_len = tokens.len() as u32;

        let mut tf_map: FxHashMap<String, u32> = FxHashMap::default();
        for token in tokens {
            *tf_map.entry(token).or_insert(0) += 1;
        }

        let mut terms = Vec::with_capacity(tf_map.len());
        for (term, tf) in tf_map {
            self.postings
                .entry(term.clone())
                .or_default()
                .add(PostingEntry::new(doc_ref.clone(), tf, doc_len));
            self.doc_freqs
                .entry(term.clone())
                .and_modify(|c| *c += 1)
                .or_insert(1);
            terms.push(term);
        }

        self.documents.insert(doc_ref.clone(), (doc_len, terms));
        self.total_docs.fetch_add(1, Ordering::Relaxed);
        self.total_doc_len
            .fetch_add(doc_len as usize, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Remove a document from the index
    pub fn remove_document(&self, doc_ref: &TraitRef) {
        let Some((_, (doc_len, terms))) = self.documents.remove(doc_ref) else {
            return;
        };

        for term in terms {
            let now_empty = match self.postings.get_mut(&term) {
                Some(mut list) => {
                    list.remove(doc_ref);
                    list.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.postings.remove_if(&term, |_, list| list.is_empty());
            }
            let zero = match self.doc_freqs.get_mut(&term) {
                Some(mut count) => {
                    *count = count.saturating_sub(1);
                    *count == 0
                }
                None => false,
            };
            if zero {
                self.doc_freqs.remove_if(&term, |_, count| *count == 0);
            }
        }

        self.total_docs.fetch_sub(1, Ordering::Relaxed);
        self.total_doc_len
            .fetch_sub(doc_len as usize, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::Release);
    }

    // ========================================================================
    // Query
    // ========================================================================

    /// Documents containing a term
    pub fn lookup(&self, term: &str) -> Option<PostingList> {
        self.postings.get(term).map(|r| r.clone())
    }

    /// All terms in the index
    pub fn terms(&self) -> Vec<String> {
        self.postings.iter().map(|r| r.key().clone()).collect()
    }

    /// Corpus statistics for a set of query terms
    pub fn scorer_context(&self, terms: &[String]) -> ScorerContext {
        let mut ctx = ScorerContext::new(self.total_docs()).with_avg_doc_len(self.avg_doc_len());
        for term in terms {
            ctx.add_doc_freq(term, self.doc_freq(term));
        }
        ctx
    }

    /// Score every document containing at least one of `terms`
    ///
    /// OR semantics: a document's score is the sum of its per-term scores.
    pub fn search(&self, terms: &[String], scorer: &dyn Scorer) -> FxHashMap<TraitRef, f32> {
        let ctx = self.scorer_context(terms);
        let mut scores: FxHashMap<TraitRef, f32> = FxHashMap::default();
        for term in terms {
            if let Some(list) = self.postings.get(term) {
                for entry in &list.entries {
                    *scores.entry(entry.doc_ref.clone()).or_insert(0.0) +=
                        scorer.score_term(term, entry, &ctx);
                }
            }
        }
        scores
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::BM25LiteScorer;

    fn doc(e: &str, t: &str) -> TraitRef {
        TraitRef::new(e, t)
    }

    #[test]
    fn test_index_and_lookup() {
        let index = InvertedIndex::new();
        index.index_document(&doc("e1", "t1"), "hello world");
        index.index_document(&doc("e2", "t1"), "hello there");

        let list = index.lookup("hello").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(index.doc_freq("hello"), 2);
        assert_eq!(index.doc_freq("world"), 1);
        assert_eq!(index.total_docs(), 2);
        assert!(index.lookup("missing").is_none());
    }

    #[test]
    fn test_reindex_replaces_document() {
        let index = InvertedIndex::new();
        let d = doc("e1", "t1");
        index.index_document(&d, "hello world");
        index.index_document(&d, "goodbye world");

        assert!(index.lookup("hello").is_none());
        assert_eq!(index.doc_freq("hello"), 0);
        assert_eq!(index.lookup("goodbye").unwrap().len(), 1);
        assert_eq!(index.doc_freq("world"), 1);
        assert_eq!(index.total_docs(), 1);
        assert_eq!(index.avg_doc_len(), 2.0);
    }

    #[test]
    fn test_remove_document() {
        let index = InvertedIndex::new();
        index.index_document(&doc("e1", "t1"), "hello world");
        index.index_document(&doc("e2", "t1"), "hello");
        let v = index.version();

        index.remove_document(&doc("e1", "t1"));
        assert!(index.version() > v);
        assert!(!index.contains(&doc("e1", "t1")));
        assert_eq!(index.total_docs(), 1);
        assert_eq!(index.avg_doc_len(), 1.0);
        assert!(index.lookup("world").is_none());
        assert_eq!(index.lookup("hello").unwrap().len(), 1);

        // removing twice is a no-op
        index.remove_document(&doc("e1", "t1"));
        assert_eq!(index.total_docs(), 1);
    }

    #[test]
    fn test_text_without_tokens_not_indexed() {
        let index = InvertedIndex::new();
        index.index_document(&doc("e1", "t1"), "a . b");
        assert!(!index.contains(&doc("e1", "t1")));
        assert_eq!(index.total_docs(), 0);
    }

    #[test]
    fn test_search_or_semantics_and_ranking() {
        let index = InvertedIndex::new();
        index.index_document(&doc("e1", "t1"), "hello world");
        index.index_document(&doc("e2", "t1"), "hello");
        index.index_document(&doc("e3", "t1"), "something else entirely");

        let terms = vec!["hello".to_string(), "world".to_string()];
        let scores = index.search(&terms, &BM25LiteScorer::default());
        assert_eq!(scores.len(), 2);
        // e1 matches both terms
        assert!(scores[&doc("e1", "t1")] > scores[&doc("e2", "t1")]);
        assert!(!scores.contains_key(&doc("e3", "t1")));
    }
}
