//! Scry - query-aware auto-complete for the card search language
//!
//! Completes field names, field values and boolean operators of a partially
//! typed query, backed by a value cache over the corpus reader and a
//! persisted, approximately searchable suggestion index (Tantivy).
//! Also rewrites span-near queries whose alternatives differ in length into
//! disjunctions of fixed-length near queries.

pub mod builder;
pub mod config;
pub mod corpus;
pub mod engine;
pub mod interface;
pub mod models;
pub mod ranking;
pub mod span;
pub mod spellcheck;
pub mod tokenizer;
pub mod values;
pub mod version;

pub use builder::{BuildResult, ProgressCallback, SpellcheckIndexBuilder};
pub use config::SuggestConfig;
pub use corpus::{CardCorpus, MemoryTermSource, TermSource};
pub use engine::SuggestionEngine;
pub use interface::*;
pub use models::{Discriminator, FieldCatalog, FieldKind, UserField, ANY_FIELD};
pub use span::{Query, SpanNear, SpanOr, SpanQuery};
pub use tokenizer::{unescape, QueryTokenizer, TokenClassifier};
pub use values::ValueCache;
pub use version::{IndexState, IndexVersion, SUGGEST_INDEX_FORMAT};
