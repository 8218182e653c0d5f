//! Suggestion index builder
//!
//! Fans the (field, language) tasks of the catalog out over a dedicated,
//! low-priority rayon pool. Every task reads the distinct values of its
//! field, keeps the ones not yet seen under its discriminator and appends
//! them to the staging index. Only a complete, non-cancelled build is
//! committed.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::interface::{IndexingProgress, SuggestError, SuggestResult};
use crate::models::{Discriminator, FieldCatalog, UserField};
use crate::spellcheck::{SuggestionIndex, SuggestionIndexWriter};
use crate::values::ValueCache;
use crate::version::IndexVersion;

/// Progress observer
pub type ProgressCallback = Arc<dyn Fn(IndexingProgress) + Send + Sync>;

/// Shards of the discriminator -> seen words table
const SEEN_SHARDS: usize = 16;

type SeenShard = Mutex<HashMap<Discriminator, HashSet<String>>>;

thread_local! {
    /// Set while this thread runs progress observers of a build
    static NOTIFYING: Cell<bool> = const { Cell::new(false) };
}

/// True on a thread that is inside a progress callback
pub(crate) fn in_progress_callback() -> bool {
    NOTIFYING.with(Cell::get)
}

pub enum BuildResult {
    Built(SuggestionIndex),
    Aborted,
}

pub struct SpellcheckIndexBuilder {
    catalog: Arc<FieldCatalog>,
    version: Arc<IndexVersion>,
    parallelism: usize,
    /// Held for the whole duration of a build
    gate: Mutex<()>,
    cancel: Mutex<CancellationToken>,
    indexed_tasks: AtomicUsize,
    total_tasks: AtomicUsize,
    observers: RwLock<Vec<ProgressCallback>>,
}

impl SpellcheckIndexBuilder {
    pub fn new(catalog: Arc<FieldCatalog>, version: Arc<IndexVersion>, parallelism: usize) -> Self {
        Self {
            catalog,
            version,
            parallelism: parallelism.max(1),
            gate: Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
            indexed_tasks: AtomicUsize::new(0),
            total_tasks: AtomicUsize::new(0),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Observers run on the building threads. An observer may call `abort`,
    /// which then only requests cancellation instead of waiting.
    pub fn subscribe(&self, callback: ProgressCallback) {
        self.observers.write().push(callback);
    }

    pub fn indexed_tasks(&self) -> usize {
        self.indexed_tasks.load(Ordering::SeqCst)
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks.load(Ordering::SeqCst)
    }

    pub fn is_building(&self) -> bool {
        self.gate.is_locked()
    }

    /// Cancel the running build, if any, and wait until it has released
    /// every shared structure. From a progress callback the build cannot be
    /// waited for; the request is recorded and the build winds down after
    /// the callback returns.
    pub fn abort(&self) {
        self.cancel();
        if in_progress_callback() {
            return;
        }
        let _quiescent = self.gate.lock();
        self.reset_cancel();
        tracing::debug!("suggestion index build quiescent");
    }

    /// Request cancellation without waiting
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// An abort was requested and the build has not wound down yet
    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    pub(crate) fn reset_cancel(&self) {
        *self.cancel.lock() = CancellationToken::new();
    }

    /// Build the suggestion index from the reader installed in `values`.
    /// Blocks until every task finished or observed cancellation.
    pub fn build(&self, values: &ValueCache) -> SuggestResult<BuildResult> {
        let Some(_building) = self.gate.try_lock() else {
            return Err(SuggestError::BuildInProgress);
        };
        let source = values.source().ok_or(SuggestError::NotLoaded)?;
        if !source.is_localization_loaded() {
            return Err(SuggestError::CorpusNotReady);
        }
        let token = self.cancel.lock().clone();

        let tasks = self.catalog.suggest_tasks();
        let total = tasks.len();
        self.total_tasks.store(total, Ordering::SeqCst);
        self.indexed_tasks.store(0, Ordering::SeqCst);
        tracing::info!(tasks = total, parallelism = self.parallelism, "building suggestion index");

        let staging = self.version.begin_build()?;
        let writer = match SuggestionIndexWriter::create(&staging) {
            Ok(writer) => writer,
            Err(e) => {
                self.version.discard(&staging)?;
                return Err(e);
            }
        };

        let seen: Vec<SeenShard> = (0..SEEN_SHARDS).map(|_| Mutex::new(HashMap::new())).collect();
        let processed = Mutex::new(0usize);

        let run_task = |(field, language): &(UserField, String)| -> SuggestResult<()> {
            if token.is_cancelled() {
                return Ok(());
            }
            let discriminator = field.discriminator(language);
            let words = values.get_indexed(&field.indexed_field(language), field.kind);
            let shard = &seen[discriminator.shard(seen.len())];

            let mut added = 0usize;
            for word in words.iter() {
                if token.is_cancelled() {
                    break;
                }
                let fresh = shard
                    .lock()
                    .entry(discriminator.clone())
                    .or_default()
                    .insert(word.clone());
                if fresh {
                    writer.index_word(&discriminator, word)?;
                    added += 1;
                }
            }
            tracing::debug!(%discriminator, language = %language, added, "suggest task done");

            // Emitted under the lock so observers see a monotonic count
            let mut done = processed.lock();
            *done += 1;
            self.indexed_tasks.store(*done, Ordering::SeqCst);
            self.notify(IndexingProgress { indexed: *done, total, complete: false });
            Ok(())
        };

        let outcome = match self.pool() {
            Some(pool) => pool.install(|| tasks.par_iter().try_for_each(run_task)),
            None => tasks.iter().try_for_each(run_task),
        };

        if let Err(e) = outcome {
            drop(writer);
            self.version.discard(&staging)?;
            return Err(e);
        }

        if token.is_cancelled() {
            drop(writer);
            self.version.discard(&staging)?;
            // The next build starts with a live token even if nobody waited
            self.reset_cancel();
            tracing::info!(indexed = self.indexed_tasks(), total, "suggestion index build aborted");
            return Ok(BuildResult::Aborted);
        }

        if let Err(e) = writer.finish().and_then(|()| self.version.commit(&staging)) {
            self.version.discard(&staging)?;
            return Err(e);
        }
        let index = match SuggestionIndex::open(self.version.directory()) {
            Ok(index) => index,
            Err(e) => {
                self.version.invalidate()?;
                return Err(e);
            }
        };
        tracing::info!(words = index.num_words(), "suggestion index committed");

        self.notify(IndexingProgress { indexed: self.indexed_tasks(), total, complete: true });
        Ok(BuildResult::Built(index))
    }

    /// Dedicated pool with lowered thread priority; `None` runs tasks inline
    fn pool(&self) -> Option<rayon::ThreadPool> {
        if self.parallelism <= 1 {
            return None;
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .thread_name(|i| format!("scry-build-{}", i))
            .start_handler(|_| {
                // Keep keystroke-driven lookups responsive while building
                use thread_priority::*;
                let _ = set_current_thread_priority(ThreadPriority::Min);
            })
            .build();
        match pool {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(error = %e, "build pool unavailable, indexing sequentially");
                None
            }
        }
    }

    fn notify(&self, progress: IndexingProgress) {
        let outer = NOTIFYING.with(|flag| flag.replace(true));
        for observer in self.observers.read().iter() {
            observer(progress);
        }
        NOTIFYING.with(|flag| flag.set(outer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::MemoryTermSource;
    use crate::corpus::TermSource;
    use crate::version::SUGGEST_INDEX_FORMAT;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn catalog() -> Arc<FieldCatalog> {
        Arc::new(FieldCatalog::new(
            vec![
                UserField::text("name").localized().suggest_indexed(),
                UserField::text("artist").suggest_indexed(),
                UserField::text("set"),
            ],
            vec!["en".to_string(), "ru".to_string()],
        ))
    }

    fn corpus() -> Arc<dyn TermSource> {
        let mut source = MemoryTermSource::new();
        source.add_document([("name_en", "shock"), ("name_ru", "шок"), ("artist", "jon foster"), ("set", "m21")]);
        source.add_document([("name_en", "goblin guide"), ("name_ru", "гоблин-проводник"), ("artist", "mark poole"), ("set", "zen")]);
        source.add_document([("name_en", "lightning bolt"), ("name_ru", "шок"), ("artist", "christopher moeller"), ("set", "lea")]);
        Arc::new(source)
    }

    fn builder(dir: &TempDir, parallelism: usize) -> SpellcheckIndexBuilder {
        let version = Arc::new(IndexVersion::new(dir.path(), SUGGEST_INDEX_FORMAT));
        SpellcheckIndexBuilder::new(catalog(), version, parallelism)
    }

    fn cache_with(source: Arc<dyn TermSource>) -> ValueCache {
        let cache = ValueCache::new();
        cache.reset(Some(source));
        cache
    }

    fn built(result: BuildResult) -> SuggestionIndex {
        match result {
            BuildResult::Built(index) => index,
            BuildResult::Aborted => panic!("build was aborted"),
        }
    }

    #[test]
    fn test_build_indexes_every_task() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 1);
        let index = built(builder.build(&cache_with(corpus())).unwrap());

        let entries = index.entries().unwrap();
        assert!(entries.contains(&("name.en".to_string(), "shock".to_string())));
        assert!(entries.contains(&("name.ru".to_string(), "шок".to_string())));
        assert!(entries.contains(&("artist".to_string(), "mark poole".to_string())));
        // not suggest-indexed
        assert!(!entries.iter().any(|(d, _)| d == "set"));
        assert_eq!(builder.total_tasks(), 3);
        assert_eq!(builder.indexed_tasks(), 3);
    }

    #[test]
    fn test_rebuild_yields_same_entries() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 4);
        let cache = cache_with(corpus());

        let first: BTreeSet<_> = built(builder.build(&cache).unwrap()).entries().unwrap();
        assert!(builder.version.is_up_to_date());
        let second: BTreeSet<_> = built(builder.build(&cache).unwrap()).entries().unwrap();
        assert!(builder.version.is_up_to_date());
        assert_eq!(first, second);
    }

    #[test]
    fn test_words_deduplicated_per_discriminator() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 2);
        let index = built(builder.build(&cache_with(corpus())).unwrap());
        let entries = index.entries().unwrap();
        let shock_ru = entries.iter().filter(|(d, w)| d == "name.ru" && w == "шок").count();
        assert_eq!(shock_ru, 1);
        assert_eq!(index.num_words() as usize, entries.len());
    }

    #[test]
    fn test_progress_is_monotonic_and_completes() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 3);
        let seen = Arc::new(Mutex::new(Vec::<IndexingProgress>::new()));
        let sink = Arc::clone(&seen);
        builder.subscribe(Arc::new(move |p: IndexingProgress| sink.lock().push(p)));

        built(builder.build(&cache_with(corpus())).unwrap());

        let events = seen.lock();
        assert_eq!(events.len(), 4);
        assert!(events.windows(2).all(|w| w[0].indexed <= w[1].indexed));
        let last = events.last().unwrap();
        assert!(last.complete);
        assert_eq!(last.indexed, 3);
        assert_eq!(last.total, 3);
        assert!(events[..3].iter().all(|p| !p.complete));
    }

    #[test]
    fn test_localization_not_loaded_is_rejected() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 1);
        let mut source = MemoryTermSource::new();
        source.set_localization_loaded(false);

        let result = builder.build(&cache_with(Arc::new(source)));
        assert!(matches!(result, Err(SuggestError::CorpusNotReady)));
        assert!(!builder.version.is_up_to_date());
    }

    #[test]
    fn test_build_without_reader_fails() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 1);
        assert!(matches!(builder.build(&ValueCache::new()), Err(SuggestError::NotLoaded)));
    }

    #[test]
    fn test_cancelled_build_is_not_committed() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 1);
        builder.cancel.lock().cancel();

        let result = builder.build(&cache_with(corpus())).unwrap();
        assert!(matches!(result, BuildResult::Aborted));
        assert!(!builder.version.is_up_to_date());
        assert!(!builder.version.directory().exists());

        // abort resets the token so the next build runs to completion
        builder.abort();
        built(builder.build(&cache_with(corpus())).unwrap());
        assert!(builder.version.is_up_to_date());
    }

    #[test]
    fn test_abort_from_observer_stops_build() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(builder(&temp, 1));
        let weak = Arc::downgrade(&builder);
        builder.subscribe(Arc::new(move |_: IndexingProgress| {
            if let Some(builder) = weak.upgrade() {
                builder.cancel.lock().cancel();
            }
        }));

        let result = builder.build(&cache_with(corpus())).unwrap();
        assert!(matches!(result, BuildResult::Aborted));
        assert_eq!(builder.indexed_tasks(), 1);
        assert!(!builder.version.is_up_to_date());
    }

    #[test]
    fn test_abort_inside_callback_does_not_block() {
        let temp = TempDir::new().unwrap();
        let builder = Arc::new(builder(&temp, 1));
        let weak = Arc::downgrade(&builder);
        builder.subscribe(Arc::new(move |_: IndexingProgress| {
            if let Some(builder) = weak.upgrade() {
                builder.abort();
            }
        }));

        let result = builder.build(&cache_with(corpus())).unwrap();
        assert!(matches!(result, BuildResult::Aborted));
        assert_eq!(builder.indexed_tasks(), 1);
        assert!(!builder.is_building());
        // the aborted build left a live token behind
        assert!(!builder.is_cancelled());
    }

    #[test]
    fn test_abort_from_other_thread_waits_for_build() {
        use std::sync::mpsc;

        let temp = TempDir::new().unwrap();
        let builder = Arc::new(builder(&temp, 1));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let paused = std::sync::atomic::AtomicBool::new(false);
        builder.subscribe(Arc::new(move |_: IndexingProgress| {
            if !paused.swap(true, Ordering::SeqCst) {
                entered_tx.send(()).unwrap();
                release_rx.lock().recv().unwrap();
            }
        }));

        let building = {
            let builder = Arc::clone(&builder);
            std::thread::spawn(move || builder.build(&cache_with(corpus())).unwrap())
        };
        entered_rx.recv().unwrap();
        assert!(builder.is_building());

        let aborting = {
            let builder = Arc::clone(&builder);
            std::thread::spawn(move || builder.abort())
        };
        while !builder.is_cancelled() {
            std::thread::yield_now();
        }
        release_tx.send(()).unwrap();
        aborting.join().unwrap();

        // abort returned, so the build has released the gate
        assert!(!builder.is_building());
        assert!(!builder.version.is_up_to_date());
        assert!(matches!(building.join().unwrap(), BuildResult::Aborted));
        assert!(builder.indexed_tasks() < builder.total_tasks());

        built(builder.build(&cache_with(corpus())).unwrap());
        assert!(builder.version.is_up_to_date());
    }

    #[test]
    fn test_failed_commit_removes_staging() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 1);
        // a plain file where the committed directory goes
        std::fs::write(builder.version.directory(), b"occupied").unwrap();

        assert!(builder.build(&cache_with(corpus())).is_err());
        assert_eq!(builder.version.state(), crate::version::IndexState::Stale);
        let staging = temp.path().join(format!("{}.building", SUGGEST_INDEX_FORMAT));
        assert!(!staging.exists());
    }

    #[test]
    fn test_concurrent_build_rejected() {
        let temp = TempDir::new().unwrap();
        let builder = builder(&temp, 1);
        let _held = builder.gate.lock();
        assert!(builder.is_building());
        assert!(matches!(
            builder.build(&cache_with(corpus())),
            Err(SuggestError::BuildInProgress)
        ));
    }
}
