use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use scry::{FieldCatalog, MemoryTermSource, SpanQuery, SuggestConfig, SuggestionEngine};
use tempfile::TempDir;

const SYLLABLES: &[&str] = &["gob", "lin", "dra", "gon", "elf", "ward", "storm", "fire", "bolt", "shade"];

/// Synthetic corpus of `count` cards with pronounceable names
fn synthetic_corpus(count: usize) -> MemoryTermSource {
    let mut source = MemoryTermSource::new();
    for i in 0..count {
        let name = format!(
            "{}{} {}",
            SYLLABLES[i % SYLLABLES.len()],
            SYLLABLES[(i / 7) % SYLLABLES.len()],
            SYLLABLES[(i / 13) % SYLLABLES.len()]
        );
        let artist = format!("artist {}", i % 300);
        let set = format!("s{:02}", i % 40);
        let cmc = (i % 12).to_string();
        source.add_document([
            ("name_en", name.as_str()),
            ("artist", artist.as_str()),
            ("set", set.as_str()),
            ("cmc", cmc.as_str()),
        ]);
    }
    source
}

fn setup_engine(dir: &TempDir) -> SuggestionEngine {
    let config = SuggestConfig::default().with_index_dir(dir.path());
    let engine = SuggestionEngine::new(FieldCatalog::card_fields(), &config);
    engine
        .load(Arc::new(synthetic_corpus(20_000)))
        .expect("Failed to build suggestion index");
    engine
}

fn bench_suggest(c: &mut Criterion) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let engine = setup_engine(&dir);

    let queries = vec![
        ("field_name", "art"),
        ("cached_values", "set:s1"),
        ("numeric_values", "cmc:1"),
        ("indexed_prefix", "name:gobl"),
        ("indexed_typo", "name:\"dargon stor"),
        ("all_fields", "storm"),
        ("boolean", "name:elf AND"),
    ];

    let mut group = c.benchmark_group("suggest");
    group.sample_size(20);

    for (name, query) in queries {
        group.bench_function(name, |b| b.iter(|| engine.suggest("en", query, query.len())));
    }
    group.finish();
}

fn bench_span_rewrite(c: &mut Criterion) {
    let branch = |i: usize| {
        if i % 2 == 0 {
            SpanQuery::term("text", &format!("w{}", i))
        } else {
            SpanQuery::near(
                vec![SpanQuery::term("text", "a"), SpanQuery::term("text", &format!("w{}", i))],
                0,
                true,
            )
        }
    };
    let query = SpanQuery::near(
        (0..4).map(|clause| SpanQuery::or((0..4).map(|i| branch(clause * 4 + i)).collect())).collect(),
        2,
        true,
    );

    c.bench_function("span_rewrite", |b| b.iter(|| query.rewrite()));
}

criterion_group!(benches, bench_suggest, bench_span_rewrite);
criterion_main!(benches);
