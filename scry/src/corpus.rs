//! Corpus term sources
//!
//! The suggestion engine only needs the distinct terms of each indexed field
//! and a document count bound. `CardCorpus` serves both from tantivy term
//! dictionaries; `MemoryTermSource` is a plain map for small corpora.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tantivy::directory::MmapDirectory;
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, RawTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};

use crate::interface::SuggestResult;
use crate::models::FieldCatalog;

/// Keyword analyzer: the whole value is one lowercased term
pub(crate) const KEYWORD_TOKENIZER: &str = "keyword_lower";

/// Read-only access to the distinct terms of a corpus
pub trait TermSource: Send + Sync {
    /// Distinct terms of `field` in lexicographic byte order.
    /// An unknown field yields an empty list.
    fn terms(&self, field: &str) -> Vec<String>;

    /// Upper bound on the number of documents
    fn approx_doc_count(&self) -> usize;

    fn contains(&self, field: &str, term: &str) -> bool {
        self.terms(field).iter().any(|t| t == term)
    }

    /// Localized fields are only complete once translations were loaded
    fn is_localization_loaded(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IN-MEMORY
// ─────────────────────────────────────────────────────────────────────────────

/// Map-backed term source
#[derive(Debug, Default)]
pub struct MemoryTermSource {
    terms: BTreeMap<String, BTreeSet<String>>,
    doc_count: usize,
    localization_loaded: bool,
}

impl MemoryTermSource {
    pub fn new() -> Self {
        Self { localization_loaded: true, ..Self::default() }
    }

    /// Add one document given as (indexed field, term) pairs
    pub fn add_document<'a>(&mut self, values: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (field, term) in values {
            self.insert(field, term);
        }
        self.doc_count += 1;
    }

    pub fn insert(&mut self, field: &str, term: &str) {
        self.terms
            .entry(field.to_string())
            .or_default()
            .insert(term.to_string());
    }

    pub fn set_doc_count(&mut self, doc_count: usize) {
        self.doc_count = doc_count;
    }

    pub fn set_localization_loaded(&mut self, loaded: bool) {
        self.localization_loaded = loaded;
    }
}

impl TermSource for MemoryTermSource {
    fn terms(&self, field: &str) -> Vec<String> {
        self.terms
            .get(field)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn approx_doc_count(&self) -> usize {
        self.doc_count
    }

    fn contains(&self, field: &str, term: &str) -> bool {
        self.terms.get(field).is_some_and(|set| set.contains(term))
    }

    fn is_localization_loaded(&self) -> bool {
        self.localization_loaded
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TANTIVY
// ─────────────────────────────────────────────────────────────────────────────

/// Tantivy-backed card corpus. One text field per indexed field of the catalog.
pub struct CardCorpus {
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    schema: Schema,
    localization_loaded: AtomicBool,
}

impl CardCorpus {
    /// Open or create a corpus at the given path
    pub fn new(path: &Path, catalog: &FieldCatalog) -> SuggestResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let schema = Self::build_schema(catalog);
        let index = Index::open_or_create(dir, schema.clone())?;
        Self::register_tokenizer(&index);

        let writer = index.writer(50_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Ok(Self::from_parts(writer, reader, schema))
    }

    /// Create an in-memory corpus
    pub fn new_in_memory(catalog: &FieldCatalog) -> SuggestResult<Self> {
        let schema = Self::build_schema(catalog);
        let index = Index::create_in_ram(schema.clone());
        Self::register_tokenizer(&index);

        let writer = index.writer(15_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Ok(Self::from_parts(writer, reader, schema))
    }

    fn from_parts(writer: IndexWriter, reader: IndexReader, schema: Schema) -> Self {
        Self {
            schema,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
            localization_loaded: AtomicBool::new(true),
        }
    }

    fn build_schema(catalog: &FieldCatalog) -> Schema {
        let mut builder = Schema::builder();
        for (name, field) in catalog.indexed_fields() {
            // Analyzed fields are split into words, everything else is one keyword
            let indexing = if field.analyzed {
                TextFieldIndexing::default()
                    .set_tokenizer("default")
                    .set_index_option(IndexRecordOption::WithFreqsAndPositions)
            } else {
                TextFieldIndexing::default()
                    .set_tokenizer(KEYWORD_TOKENIZER)
                    .set_index_option(IndexRecordOption::Basic)
            };
            let options = TextOptions::default().set_indexing_options(indexing).set_stored();
            builder.add_text_field(&name, options);
        }
        builder.build()
    }

    fn register_tokenizer(index: &Index) {
        let tokenizer = TextAnalyzer::builder(RawTokenizer::default())
            .filter(LowerCaser)
            .build();
        index.tokenizers().register(KEYWORD_TOKENIZER, tokenizer);
    }

    /// Add one card given as (indexed field, value) pairs
    pub fn add_document<'a>(
        &self,
        values: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> SuggestResult<()> {
        let writer = self.writer.read();
        let mut doc = tantivy::TantivyDocument::default();
        for (name, value) in values {
            let field = self.schema.get_field(name)?;
            doc.add_text(field, value);
        }
        writer.add_document(doc)?;
        Ok(())
    }

    pub fn commit(&self) -> SuggestResult<()> {
        self.writer.write().commit()?;
        self.reader.write().reload()?;
        Ok(())
    }

    pub fn set_localization_loaded(&self, loaded: bool) {
        self.localization_loaded.store(loaded, Ordering::SeqCst);
    }

    /// Get the number of documents in the corpus
    pub fn num_docs(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }
}

impl TermSource for CardCorpus {
    fn terms(&self, field: &str) -> Vec<String> {
        let Ok(field) = self.schema.get_field(field) else {
            return Vec::new();
        };
        let searcher = self.reader.read().searcher();

        // Segments have their own dictionaries; merge them
        let mut terms = BTreeSet::new();
        for segment_reader in searcher.segment_readers() {
            let Ok(inverted_index) = segment_reader.inverted_index(field) else {
                continue;
            };
            let Ok(mut stream) = inverted_index.terms().stream() else {
                continue;
            };
            while stream.advance() {
                if let Ok(term) = std::str::from_utf8(stream.key()) {
                    terms.insert(term.to_string());
                }
            }
        }
        terms.into_iter().collect()
    }

    fn approx_doc_count(&self) -> usize {
        let searcher = self.reader.read().searcher();
        searcher
            .segment_readers()
            .iter()
            .map(|segment| segment.max_doc() as usize)
            .sum()
    }

    fn contains(&self, field: &str, term: &str) -> bool {
        let Ok(field) = self.schema.get_field(field) else {
            return false;
        };
        let searcher = self.reader.read().searcher();
        searcher.segment_readers().iter().any(|segment_reader| {
            segment_reader
                .inverted_index(field)
                .ok()
                .and_then(|inverted_index| inverted_index.terms().get(term.as_bytes()).ok())
                .flatten()
                .is_some()
        })
    }

    fn is_localization_loaded(&self) -> bool {
        self.localization_loaded.load(Ordering::SeqCst)
    }
}
