//! Persisted suggestion index
//!
//! One tantivy document per (discriminator, word). Words are recalled
//! through two pathways: a fuzzy prefix query on the lowercased keyword and
//! an OR of character n-grams. Recalled words are then re-ranked by
//! similarity, so the index only has to get good candidates into the top
//! `CANDIDATE_FACTOR * max_count`.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use parking_lot::RwLock;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, FuzzyTermQuery, Occur, Query, TermQuery};
use tantivy::schema::*;
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, RawTokenizer, TextAnalyzer, TokenStream};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::corpus::TermSource;
use crate::interface::SuggestResult;
use crate::models::Discriminator;
use crate::ranking::{max_edit_distance, rank_by_similarity};

const WORD_TOKENIZER: &str = "suggest_word";
const GRAM_TOKENIZER: &str = "suggest_grams";

/// How many recalled words are re-ranked per requested suggestion
const CANDIDATE_FACTOR: usize = 10;

#[derive(Clone, Copy)]
struct SuggestFields {
    discriminator: Field,
    word: Field,
    grams: Field,
}

impl SuggestFields {
    fn from_schema(schema: &Schema) -> SuggestResult<Self> {
        Ok(Self {
            discriminator: schema.get_field("discriminator")?,
            word: schema.get_field("word")?,
            grams: schema.get_field("grams")?,
        })
    }
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("discriminator", STRING | STORED);

    // Whole word as a single lowercased term, stored with original case
    let word_indexing = TextFieldIndexing::default()
        .set_tokenizer(WORD_TOKENIZER)
        .set_index_option(IndexRecordOption::Basic);
    builder.add_text_field(
        "word",
        TextOptions::default().set_indexing_options(word_indexing).set_stored(),
    );

    let gram_indexing = TextFieldIndexing::default()
        .set_tokenizer(GRAM_TOKENIZER)
        .set_index_option(IndexRecordOption::WithFreqs);
    builder.add_text_field("grams", TextOptions::default().set_indexing_options(gram_indexing));
    builder.build()
}

fn register_tokenizers(index: &Index) -> SuggestResult<()> {
    let word = TextAnalyzer::builder(RawTokenizer::default())
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(WORD_TOKENIZER, word);

    let grams = TextAnalyzer::builder(NgramTokenizer::new(2, 3, false)?)
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(GRAM_TOKENIZER, grams);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// WRITER
// ─────────────────────────────────────────────────────────────────────────────

/// In-progress suggestion index. Appends may come from several threads.
pub struct SuggestionIndexWriter {
    writer: RwLock<IndexWriter>,
    fields: SuggestFields,
}

impl SuggestionIndexWriter {
    /// Start an empty index in `path`
    pub fn create(path: &Path) -> SuggestResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let schema = build_schema();
        let index = Index::create(dir, schema.clone(), tantivy::IndexSettings::default())?;
        register_tokenizers(&index)?;
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            writer: RwLock::new(writer),
            fields: SuggestFields::from_schema(&schema)?,
        })
    }

    /// Append one word. Callers deduplicate per discriminator first.
    pub fn index_word(&self, discriminator: &Discriminator, word: &str) -> SuggestResult<()> {
        let writer = self.writer.read();
        let mut doc = tantivy::TantivyDocument::default();
        doc.add_text(self.fields.discriminator, discriminator.as_str());
        doc.add_text(self.fields.word, word);
        doc.add_text(self.fields.grams, word);
        writer.add_document(doc)?;
        Ok(())
    }

    /// Commit and wait for merges so the directory can be moved
    pub fn finish(self) -> SuggestResult<()> {
        let mut writer = self.writer.into_inner();
        writer.commit()?;
        writer.wait_merging_threads()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// READER
// ─────────────────────────────────────────────────────────────────────────────

/// Opened, read-only suggestion index
pub struct SuggestionIndex {
    index: Index,
    reader: IndexReader,
    fields: SuggestFields,
}

impl SuggestionIndex {
    pub fn open(path: &Path) -> SuggestResult<Self> {
        let dir = MmapDirectory::open(path)?;
        let index = Index::open(dir)?;
        register_tokenizers(&index)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
        let fields = SuggestFields::from_schema(&index.schema())?;
        Ok(Self { index, reader, fields })
    }

    /// Number of (discriminator, word) entries
    pub fn num_words(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Every (discriminator, word) entry, for inspection
    pub fn entries(&self) -> SuggestResult<BTreeSet<(String, String)>> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;
        let mut entries = BTreeSet::new();
        for address in addresses {
            let doc: tantivy::TantivyDocument = searcher.doc(address)?;
            let discriminator = doc
                .get_first(self.fields.discriminator)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let word = doc
                .get_first(self.fields.word)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            entries.insert((discriminator, word));
        }
        Ok(entries)
    }

    /// Words indexed under any of `discriminators`, present in at least one
    /// of `fields` of the corpus, ranked by similarity to `word`.
    pub fn suggest_similar(
        &self,
        word: &str,
        max_count: usize,
        discriminators: &[Discriminator],
        fields: &[String],
        source: Option<&dyn TermSource>,
    ) -> SuggestResult<Vec<String>> {
        if discriminators.is_empty() || max_count == 0 {
            return Ok(Vec::new());
        }

        let query = self.build_query(&word.to_lowercase(), discriminators);
        let searcher = self.reader.searcher();
        let limit = max_count.saturating_mul(CANDIDATE_FACTOR);
        let top_docs = searcher.search(query.as_ref(), &TopDocs::with_limit(limit).order_by_score())?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(top_docs.len());
        for (_score, address) in top_docs {
            let doc: tantivy::TantivyDocument = searcher.doc(address)?;
            let Some(found) = doc.get_first(self.fields.word).and_then(|v| v.as_str()) else {
                continue;
            };
            if !seen.insert(found.to_string()) {
                continue;
            }
            let in_corpus = match source {
                Some(source) => fields.iter().any(|f| source.contains(f, found)),
                None => true,
            };
            if in_corpus {
                candidates.push(found.to_string());
            }
        }

        Ok(rank_by_similarity(&candidates, &word.to_lowercase(), max_count))
    }

    fn build_query(&self, word_lower: &str, discriminators: &[Discriminator]) -> Box<dyn Query> {
        let scope: Vec<(Occur, Box<dyn Query>)> = discriminators
            .iter()
            .map(|d| {
                let term = Term::from_field_text(self.fields.discriminator, d.as_str());
                let q: Box<dyn Query> = Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Should, q)
            })
            .collect();
        let scope: Box<dyn Query> = Box::new(BooleanQuery::new(scope));

        if word_lower.is_empty() {
            return scope;
        }

        let mut recall: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let distance = max_edit_distance(word_lower.chars().count());
        let prefix_term = Term::from_field_text(self.fields.word, word_lower);
        recall.push((
            Occur::Should,
            Box::new(FuzzyTermQuery::new_prefix(prefix_term, distance, true)),
        ));
        for gram in self.grams(word_lower) {
            recall.push((Occur::Should, Box::new(TermQuery::new(gram, IndexRecordOption::WithFreqs))));
        }

        Box::new(BooleanQuery::new(vec![
            (Occur::Must, scope),
            (Occur::Must, Box::new(BooleanQuery::new(recall)) as Box<dyn Query>),
        ]))
    }

    fn grams(&self, text: &str) -> Vec<Term> {
        let Some(mut tokenizer) = self.index.tokenizers().get(GRAM_TOKENIZER) else {
            return Vec::new();
        };
        let mut stream = tokenizer.token_stream(text);
        let mut terms = Vec::new();
        while let Some(token) = stream.next() {
            terms.push(Term::from_field_text(self.fields.grams, &token.text));
        }
        terms
    }
}
