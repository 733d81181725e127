//! Full-text search for trait text fields
//!
//! This crate provides:
//! - Tokenizer shared by indexing and querying
//! - InvertedIndex with posting lists keyed by trait
//! - Scorer trait and BM25LiteScorer default implementation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod index;
pub mod scorer;
pub mod tokenizer;

pub use index::{InvertedIndex, PostingEntry, PostingList};
pub use scorer::{BM25LiteScorer, Scorer, ScorerContext};
pub use tokenizer::{tokenize, tokenize_unique};
