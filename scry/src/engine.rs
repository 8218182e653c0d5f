//! SuggestionEngine - query-aware auto-complete
//!
//! Per keystroke: classify the token under the caret, then complete field
//! names, field values or boolean operators. Values come from the in-memory
//! value cache while the user has not typed anything yet (or for fields kept
//! out of the suggestion index) and from the persisted suggestion index
//! otherwise.
//!
//! Loading a corpus reader opens the persisted index when its version is up
//! to date and rebuilds it otherwise. The build blocks the caller;
//! `spawn_load` moves it onto a tokio blocking thread.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::builder::{in_progress_callback, BuildResult, SpellcheckIndexBuilder};
use crate::config::SuggestConfig;
use crate::corpus::TermSource;
use crate::interface::{
    BuildOutcome, IndexingProgress, SuggestError, SuggestResult, SuggestionResult, TokenType,
};
use crate::models::{Discriminator, FieldCatalog, UserField, ANY_FIELD};
use crate::ranking::{compare_invariant, contains_invariant, looks_numeric, numeric_matches, rank_by_similarity};
use crate::spellcheck::SuggestionIndex;
use crate::tokenizer::{unescape, QueryTokenizer, TokenClassifier};
use crate::values::ValueCache;
use crate::version::{IndexVersion, SUGGEST_INDEX_FORMAT};

/// Global fallback Tokio runtime for background loads started outside any runtime
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

/// Operator completions, in this fixed order
static BOOLEAN_OPERATORS: Lazy<Vec<String>> = Lazy::new(|| {
    ["AND", "OR", "NOT", "&&", "||", "!", "+", "-"]
        .iter()
        .map(|op| op.to_string())
        .collect()
});

pub struct SuggestionEngine {
    catalog: Arc<FieldCatalog>,
    classifier: Box<dyn TokenClassifier>,
    /// `name:` completions in invariant order
    field_completions: Vec<String>,
    values: ValueCache,
    version: Arc<IndexVersion>,
    builder: SpellcheckIndexBuilder,
    /// Held by `load` from the reader swap until the index is installed
    loading: Mutex<()>,
    index: RwLock<Option<SuggestionIndex>>,
    max_count: AtomicUsize,
}

impl SuggestionEngine {
    pub fn new(catalog: FieldCatalog, config: &SuggestConfig) -> Self {
        Self::with_classifier(catalog, config, Box::new(QueryTokenizer))
    }

    pub fn with_classifier(
        catalog: FieldCatalog,
        config: &SuggestConfig,
        classifier: Box<dyn TokenClassifier>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let version = Arc::new(IndexVersion::new(&config.index_dir, SUGGEST_INDEX_FORMAT));
        let builder = SpellcheckIndexBuilder::new(
            Arc::clone(&catalog),
            Arc::clone(&version),
            config.parallelism,
        );

        Self {
            field_completions: catalog.field_completions(),
            catalog,
            classifier,
            values: ValueCache::new(),
            version,
            builder,
            loading: Mutex::new(()),
            index: RwLock::new(None),
            max_count: AtomicUsize::new(config.max_count),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // LIFECYCLE
    // ─────────────────────────────────────────────────────────────────────────

    /// Install a corpus reader and open or build the suggestion index for it.
    /// Blocks for the whole build.
    pub fn load(&self, source: Arc<dyn TermSource>) -> SuggestResult<BuildOutcome> {
        let Some(_loading) = self.loading.try_lock() else {
            return Err(SuggestError::BuildInProgress);
        };
        self.values.reset(Some(source));
        *self.index.write() = None;

        if self.version.is_up_to_date() {
            match SuggestionIndex::open(self.version.directory()) {
                Ok(index) => {
                    tracing::info!(
                        directory = %self.version.directory().display(),
                        words = index.num_words(),
                        "suggestion index opened"
                    );
                    *self.index.write() = Some(index);
                    return Ok(BuildOutcome::Opened);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "suggestion index unreadable, rebuilding");
                    self.version.invalidate()?;
                }
            }
        }

        match self.builder.build(&self.values)? {
            BuildResult::Built(index) => {
                *self.index.write() = Some(index);
                Ok(BuildOutcome::Built)
            }
            BuildResult::Aborted => Ok(BuildOutcome::Aborted),
        }
    }

    /// `load` on a tokio blocking thread
    pub fn spawn_load(
        self: &Arc<Self>,
        source: Arc<dyn TermSource>,
    ) -> tokio::task::JoinHandle<SuggestResult<BuildOutcome>> {
        let engine = Arc::clone(self);
        runtime_handle().spawn_blocking(move || engine.load(source))
    }

    /// Delete the persisted index so the next load rebuilds it
    pub fn invalidate_index(&self) -> SuggestResult<()> {
        self.version.invalidate()
    }

    /// Cancel an in-flight load and wait for it to wind down.
    /// Called from a progress callback it returns at once; the load then
    /// ends with `BuildOutcome::Aborted`.
    pub fn abort_build(&self) {
        self.builder.cancel();
        if in_progress_callback() {
            return;
        }
        let _idle = self.loading.lock();
        self.builder.reset_cancel();
        tracing::debug!("suggestion load quiescent");
    }

    /// Callbacks run on the building threads
    pub fn subscribe(&self, callback: impl Fn(IndexingProgress) + Send + Sync + 'static) {
        self.builder.subscribe(Arc::new(callback));
    }

    pub fn is_loaded(&self) -> bool {
        self.index.read().is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_locked()
    }

    /// An abort was requested and the running build has not wound down yet
    pub fn is_aborting(&self) -> bool {
        self.builder.is_cancelled()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.version.is_up_to_date()
    }

    pub fn indexed_tasks(&self) -> usize {
        self.builder.indexed_tasks()
    }

    pub fn total_tasks(&self) -> usize {
        self.builder.total_tasks()
    }

    pub fn index_directory(&self) -> &Path {
        self.version.directory()
    }

    pub fn max_count(&self) -> usize {
        self.max_count.load(Ordering::Relaxed)
    }

    pub fn set_max_count(&self, max_count: usize) {
        self.max_count.store(max_count, Ordering::Relaxed);
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    // ─────────────────────────────────────────────────────────────────────────
    // SUGGEST
    // ─────────────────────────────────────────────────────────────────────────

    /// Completions for the token at byte offset `caret` of `query`
    pub fn suggest(&self, language: &str, query: &str, caret: usize) -> SuggestionResult {
        #[cfg(feature = "perf-log")]
        let t0 = std::time::Instant::now();

        let result = self.suggest_token(language, query, caret);

        #[cfg(feature = "perf-log")]
        tracing::debug!(
            elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0,
            candidates = result.len(),
            "[perf] suggest"
        );
        result
    }

    fn suggest_token(&self, language: &str, query: &str, caret: usize) -> SuggestionResult {
        let Some(mut token) = self.classifier.classify(query, caret) else {
            return SuggestionResult::empty();
        };
        if token.token_type == TokenType::ModifierValue {
            return SuggestionResult::empty();
        }

        let user_field = token.parent_field.clone().unwrap_or_default();
        let is_any_field = user_field == ANY_FIELD;
        let field = self.catalog.get(&user_field);
        let is_field_invalid = !user_field.is_empty() && !is_any_field && field.is_none();

        // Whole-phrase values are completed from the opening quote
        if !field.is_some_and(|f| f.is_analyzed_in(language)) {
            if let Some(start) = token.phrase_start.take() {
                token = *start;
            }
        }

        let value_part = unescape(query.get(token.position..caret).unwrap_or("")).to_lowercase();

        match token.token_type {
            TokenType::FieldValue => {
                let values = match field {
                    _ if is_field_invalid => Vec::new(),
                    Some(field) if !is_any_field => self.suggest_values(field, language, &value_part),
                    _ => self.suggest_all_field_values(&value_part, language),
                };
                if !user_field.is_empty() {
                    return SuggestionResult::uniform(token, values, TokenType::FieldValue);
                }
                let fields = self.suggest_fields(&value_part);
                SuggestionResult::fields_then_values(token, fields, values)
            }
            TokenType::Field => {
                let fields = self.suggest_all_fields(&value_part);
                SuggestionResult::uniform(token, fields, TokenType::Field)
            }
            TokenType::Boolean => {
                SuggestionResult::uniform(token, BOOLEAN_OPERATORS.clone(), TokenType::Boolean)
            }
            _ => SuggestionResult::empty(),
        }
    }

    /// Cached values, unless the user is typing into a field served by the
    /// suggestion index
    fn cached_values(&self, field: &UserField, language: &str, value: &str) -> Option<Arc<[String]>> {
        if value.is_empty() || !field.suggest_indexed {
            Some(self.values.get(field, language))
        } else {
            None
        }
    }

    fn suggest_values(&self, field: &UserField, language: &str, value: &str) -> Vec<String> {
        let max_count = self.max_count();
        if let Some(cache) = self.cached_values(field, language, value) {
            return if field.is_numeric() {
                numeric_matches(&cache, value, max_count)
            } else {
                rank_by_similarity(&cache, value, max_count)
            };
        }

        let discriminators = [field.discriminator(language)];
        let fields = [field.indexed_field(language)];
        self.query_index(value, &discriminators, &fields).unwrap_or_default()
    }

    fn suggest_all_field_values(&self, value: &str, language: &str) -> Vec<String> {
        let value_is_numeric = looks_numeric(value);
        let mut found: HashSet<String> = HashSet::new();
        let mut uncached_fields: Vec<String> = Vec::new();
        let mut discriminators = Vec::new();

        for field in self.catalog.fields() {
            if field.is_numeric() && !value_is_numeric {
                continue;
            }
            match self.cached_values(field, language, value) {
                Some(values) => found.extend(values.iter().cloned()),
                None => {
                    let indexed = field.indexed_field(language);
                    if !uncached_fields.contains(&indexed) {
                        uncached_fields.push(indexed);
                    }
                    let discriminator = field.discriminator(language);
                    if !discriminators.contains(&discriminator) {
                        discriminators.push(discriminator);
                    }
                }
            }
        }

        if !uncached_fields.is_empty() {
            if let Some(values) = self.query_index(value, &discriminators, &uncached_fields) {
                found.extend(values);
            }
        }

        let mut candidates: Vec<String> = found.into_iter().collect();
        candidates.sort_by(|a, b| compare_invariant(a, b));
        rank_by_similarity(&candidates, value, self.max_count())
    }

    /// `None` when the suggestion index is not loaded
    fn query_index(
        &self,
        value: &str,
        discriminators: &[Discriminator],
        fields: &[String],
    ) -> Option<Vec<String>> {
        let guard = self.index.read();
        let index = guard.as_ref()?;
        let source = self.values.source();
        match index.suggest_similar(value, self.max_count(), discriminators, fields, source.as_deref()) {
            Ok(values) => Some(values),
            Err(e) => {
                tracing::warn!(error = %e, "suggestion index lookup failed");
                Some(Vec::new())
            }
        }
    }

    /// Field names containing the fragment, most similar first
    fn suggest_fields(&self, fragment: &str) -> Vec<String> {
        let matching: Vec<String> = self
            .field_completions
            .iter()
            .filter(|name| contains_invariant(name, fragment))
            .cloned()
            .collect();
        rank_by_similarity(&matching, fragment, usize::MAX)
    }

    /// Every field name, most similar first
    fn suggest_all_fields(&self, fragment: &str) -> Vec<String> {
        if fragment.is_empty() {
            return self.field_completions.clone();
        }
        rank_by_similarity(&self.field_completions, fragment, usize::MAX)
    }
}

impl Drop for SuggestionEngine {
    fn drop(&mut self) {
        self.abort_build();
    }
}

/// Current runtime if there is one, the global fallback otherwise
fn runtime_handle() -> tokio::runtime::Handle {
    tokio::runtime::Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
}
