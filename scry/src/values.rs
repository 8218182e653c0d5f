//! Per-field value cache
//!
//! Distinct term values of an indexed field, enumerated once from the corpus
//! reader and kept sorted: numerically for numeric fields, by the invariant
//! string order otherwise. Entries live as long as the reader they were
//! read from; installing a new reader drops them all.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::corpus::TermSource;
use crate::models::{FieldKind, UserField};
use crate::ranking::compare_invariant;

#[derive(Default)]
struct CacheState {
    source: Option<Arc<dyn TermSource>>,
    entries: HashMap<String, Arc<[String]>>,
}

/// Lazily filled, reader-scoped value lists
#[derive(Default)]
pub struct ValueCache {
    state: RwLock<CacheState>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new corpus reader (or none) and drop every cached list
    pub fn reset(&self, source: Option<Arc<dyn TermSource>>) {
        let mut state = self.state.write();
        state.source = source;
        state.entries.clear();
    }

    pub fn source(&self) -> Option<Arc<dyn TermSource>> {
        self.state.read().source.clone()
    }

    /// Sorted distinct values of `field` in `language`.
    /// Empty when no reader is installed.
    pub fn get(&self, field: &UserField, language: &str) -> Arc<[String]> {
        self.get_indexed(&field.indexed_field(language), field.kind)
    }

    pub(crate) fn get_indexed(&self, indexed_field: &str, kind: FieldKind) -> Arc<[String]> {
        let source = {
            let state = self.state.read();
            if let Some(values) = state.entries.get(indexed_field) {
                return Arc::clone(values);
            }
            match &state.source {
                Some(source) => Arc::clone(source),
                None => return Arc::from(Vec::<String>::new()),
            }
        };

        // Enumerate outside the lock; a concurrent fill of the same field
        // produces the same list and the first one wins.
        let values: Arc<[String]> = Arc::from(collect_values(source.as_ref(), indexed_field, kind));
        tracing::debug!(field = indexed_field, count = values.len(), "value cache filled");

        let mut state = self.state.write();
        let same_reader = state
            .source
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &source));
        if !same_reader {
            return values;
        }
        Arc::clone(
            state
                .entries
                .entry(indexed_field.to_string())
                .or_insert(values),
        )
    }
}

/// Read, normalize, sort and deduplicate the terms of one field.
/// Enumeration stops after `approx_doc_count + 1` terms.
fn collect_values(source: &dyn TermSource, indexed_field: &str, kind: FieldKind) -> Vec<String> {
    let cap = source.approx_doc_count().saturating_add(1);
    let mut values: Vec<String> = source
        .terms(indexed_field)
        .into_iter()
        .take(cap)
        .map(|term| normalize_numeric(term, kind))
        .collect();

    match kind {
        FieldKind::Text => values.sort_by(|a, b| compare_invariant(a, b)),
        FieldKind::Int | FieldKind::Float => {
            values.sort_by(|a, b| compare_numeric(a, b, kind))
        }
    }
    values.dedup();
    values
}

fn parse_numeric(value: &str, kind: FieldKind) -> Option<f64> {
    match kind {
        FieldKind::Int => value.trim().parse::<i64>().ok().map(|v| v as f64),
        FieldKind::Float => value.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        FieldKind::Text => None,
    }
}

/// Canonical string form, so "1.50" and "1.5" collapse into one value
fn normalize_numeric(term: String, kind: FieldKind) -> String {
    match kind {
        FieldKind::Int => term.trim().parse::<i64>().map(|v| v.to_string()).unwrap_or(term),
        FieldKind::Float => match parse_numeric(&term, kind) {
            Some(v) => v.to_string(),
            None => term,
        },
        FieldKind::Text => term,
    }
}

/// Parseable values in ascending numeric order, then unparseable ones in
/// invariant string order
fn compare_numeric(a: &str, b: &str, kind: FieldKind) -> Ordering {
    match (parse_numeric(a, kind), parse_numeric(b, kind)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => compare_invariant(a, b),
    }
}
