//! Span queries and the near-query rewriter
//!
//! A span-near query matches its clauses within `slop` positions of each
//! other. When one of its clauses is an `Or` whose branches cover a
//! different number of positions, the near query cannot be evaluated with a
//! single fixed layout. `SpanNear::rewrite` splits it into one near query per
//! branch length and ORs them together.

use std::fmt;
use std::sync::OnceLock;

/// A node of a span query tree
#[derive(Debug, Clone, PartialEq)]
pub enum SpanQuery {
    Term { field: String, text: String, boost: f32 },
    /// A phrase that analyzed to no tokens; matches zero positions
    EmptyPhrase { field: String, boost: f32 },
    /// Spans of `include` not overlapping `exclude`
    Not { include: Box<SpanQuery>, exclude: Box<SpanQuery>, boost: f32 },
    /// Wildcard, prefix or fuzzy expansion; every expansion is a single term
    MultiTerm { field: String, pattern: String, boost: f32 },
    Or(SpanOr),
    Near(SpanNear),
}

impl SpanQuery {
    pub fn term(field: &str, text: &str) -> Self {
        Self::Term { field: field.to_string(), text: text.to_string(), boost: 1.0 }
    }

    pub fn empty_phrase(field: &str) -> Self {
        Self::EmptyPhrase { field: field.to_string(), boost: 1.0 }
    }

    pub fn not(include: SpanQuery, exclude: SpanQuery) -> Self {
        Self::Not { include: Box::new(include), exclude: Box::new(exclude), boost: 1.0 }
    }

    pub fn multi_term(field: &str, pattern: &str) -> Self {
        Self::MultiTerm { field: field.to_string(), pattern: pattern.to_string(), boost: 1.0 }
    }

    pub fn or(clauses: Vec<SpanQuery>) -> Self {
        Self::Or(SpanOr::new(clauses))
    }

    pub fn near(clauses: Vec<SpanQuery>, slop: u32, in_order: bool) -> Self {
        Self::Near(SpanNear::new(clauses, slop, in_order))
    }

    pub fn boost(&self) -> f32 {
        match self {
            Self::Term { boost, .. }
            | Self::EmptyPhrase { boost, .. }
            | Self::Not { boost, .. }
            | Self::MultiTerm { boost, .. } => *boost,
            Self::Or(or) => or.boost,
            Self::Near(near) => near.boost,
        }
    }

    pub fn with_boost(mut self, value: f32) -> Self {
        match &mut self {
            Self::Term { boost, .. }
            | Self::EmptyPhrase { boost, .. }
            | Self::Not { boost, .. }
            | Self::MultiTerm { boost, .. } => *boost = value,
            Self::Or(or) => or.boost = value,
            Self::Near(near) => near.boost = value,
        }
        self
    }

    /// Number of positions every match of this node covers, `None` when
    /// matches can differ in length
    pub fn span_length(&self) -> Option<usize> {
        match self {
            Self::Term { .. } | Self::Not { .. } | Self::MultiTerm { .. } => Some(1),
            Self::EmptyPhrase { .. } => Some(0),
            Self::Or(or) => or.span_length(),
            Self::Near(near) => near.span_length(),
        }
    }

    /// Rewrite near queries into length-homogeneous form; other nodes are
    /// returned as they are
    pub fn rewrite(&self) -> Query {
        match self {
            Self::Near(near) => near.rewrite(),
            other => Query::Span(other.clone()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OR
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpanOr {
    clauses: Vec<SpanQuery>,
    boost: f32,
    length: OnceLock<Option<usize>>,
}

impl SpanOr {
    pub fn new(clauses: Vec<SpanQuery>) -> Self {
        Self { clauses, boost: 1.0, length: OnceLock::new() }
    }

    pub fn clauses(&self) -> &[SpanQuery] {
        &self.clauses
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    /// Common length of the branches; an empty `Or` covers nothing
    pub fn span_length(&self) -> Option<usize> {
        *self.length.get_or_init(|| {
            let lengths: Vec<Option<usize>> = self.clauses.iter().map(SpanQuery::span_length).collect();
            if lengths.is_empty() {
                return Some(0);
            }
            if is_uniform(&lengths) {
                lengths[0]
            } else {
                None
            }
        })
    }
}

impl PartialEq for SpanOr {
    fn eq(&self, other: &Self) -> bool {
        self.clauses == other.clauses && self.boost == other.boost
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NEAR
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SpanNear {
    clauses: Vec<SpanQuery>,
    slop: u32,
    in_order: bool,
    boost: f32,
    length: OnceLock<Option<usize>>,
}

impl SpanNear {
    pub fn new(clauses: Vec<SpanQuery>, slop: u32, in_order: bool) -> Self {
        Self { clauses, slop, in_order, boost: 1.0, length: OnceLock::new() }
    }

    pub fn clauses(&self) -> &[SpanQuery] {
        &self.clauses
    }

    pub fn slop(&self) -> u32 {
        self.slop
    }

    pub fn in_order(&self) -> bool {
        self.in_order
    }

    /// Sum of the clause lengths
    pub fn span_length(&self) -> Option<usize> {
        *self
            .length
            .get_or_init(|| self.clauses.iter().map(SpanQuery::span_length).sum())
    }

    /// Split the first `Or` clause whose branches differ in length into one
    /// alternative per length group, recursively, until every `Or` clause
    /// left is homogeneous.
    ///
    /// Alternatives are ordered: the one with the clause dropped (for a
    /// zero-length group) first, then one per fixed length in order of
    /// first appearance, then one per variable-length branch.
    pub fn rewrite(&self) -> Query {
        for (i, clause) in self.clauses.iter().enumerate() {
            let SpanQuery::Or(or) = clause else {
                continue;
            };
            let lengths: Vec<Option<usize>> = or.clauses.iter().map(SpanQuery::span_length).collect();
            if is_uniform(&lengths) {
                continue;
            }

            let mut groups: Vec<(usize, Vec<SpanQuery>)> = Vec::new();
            let mut variable = Vec::new();
            for (branch, length) in or.clauses.iter().zip(&lengths) {
                match length {
                    Some(length) => match groups.iter_mut().find(|(l, _)| l == length) {
                        Some((_, group)) => group.push(branch.clone()),
                        None => groups.push((*length, vec![branch.clone()])),
                    },
                    None => variable.push(branch.clone()),
                }
            }

            let mut alternatives = Vec::new();
            if groups.iter().any(|(length, _)| *length == 0) {
                let mut clauses = self.clauses.clone();
                clauses.remove(i);
                alternatives.push(self.with_clauses(clauses));
            }
            for (length, group) in groups {
                if length == 0 {
                    continue;
                }
                alternatives.push(self.substitute(i, merge_group(group, or.boost)));
            }
            for branch in variable {
                alternatives.push(self.substitute(i, branch));
            }

            return Query::Disjunction(alternatives.iter().map(SpanNear::rewrite).collect());
        }

        Query::Span(SpanQuery::Near(self.clone()))
    }

    fn with_clauses(&self, clauses: Vec<SpanQuery>) -> SpanNear {
        SpanNear {
            clauses,
            slop: self.slop,
            in_order: self.in_order,
            boost: self.boost,
            length: OnceLock::new(),
        }
    }

    fn substitute(&self, index: usize, clause: SpanQuery) -> SpanNear {
        let mut clauses = self.clauses.clone();
        clauses[index] = clause;
        self.with_clauses(clauses)
    }
}

impl PartialEq for SpanNear {
    fn eq(&self, other: &Self) -> bool {
        self.clauses == other.clauses
            && self.slop == other.slop
            && self.in_order == other.in_order
            && self.boost == other.boost
    }
}

/// All lengths known and equal. Vacuously true for no lengths.
fn is_uniform(lengths: &[Option<usize>]) -> bool {
    match lengths.first() {
        None => true,
        Some(first) => first.is_some() && lengths.iter().all(|l| l == first),
    }
}

/// One clause standing for a group of equal-length branches
fn merge_group(mut group: Vec<SpanQuery>, boost: f32) -> SpanQuery {
    match group.len() {
        0 => unreachable!("length groups are never empty"),
        1 => {
            let branch = group.remove(0);
            let combined = branch.boost() * boost;
            branch.with_boost(combined)
        }
        _ => SpanQuery::or(group).with_boost(boost),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// QUERY
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a rewrite
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Span(SpanQuery),
    /// Any alternative may match; scores are not scaled by how many matched
    Disjunction(Vec<Query>),
}

impl Query {
    pub fn as_span(&self) -> Option<&SpanQuery> {
        match self {
            Query::Span(span) => Some(span),
            Query::Disjunction(_) => None,
        }
    }

    pub fn alternatives(&self) -> &[Query] {
        match self {
            Query::Span(_) => &[],
            Query::Disjunction(alternatives) => alternatives,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DISPLAY
// ─────────────────────────────────────────────────────────────────────────────

fn write_boost(f: &mut fmt::Formatter<'_>, boost: f32) -> fmt::Result {
    if boost != 1.0 {
        write!(f, "^{:?}", boost)?;
    }
    Ok(())
}

fn write_list(f: &mut fmt::Formatter<'_>, clauses: &[SpanQuery]) -> fmt::Result {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", clause)?;
    }
    Ok(())
}

impl fmt::Display for SpanQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term { field, text, boost } => {
                write!(f, "{}:{}", field, text)?;
                write_boost(f, *boost)
            }
            Self::EmptyPhrase { field, boost } => {
                write!(f, "{}:\"\"", field)?;
                write_boost(f, *boost)
            }
            Self::Not { include, exclude, boost } => {
                write!(f, "spanNot({}, {})", include, exclude)?;
                write_boost(f, *boost)
            }
            Self::MultiTerm { field, pattern, boost } => {
                write!(f, "SpanMultiTermQueryWrapper({}:{})", field, pattern)?;
                write_boost(f, *boost)
            }
            Self::Or(or) => write!(f, "{}", or),
            Self::Near(near) => write!(f, "{}", near),
        }
    }
}

impl fmt::Display for SpanOr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("spanOr([")?;
        write_list(f, &self.clauses)?;
        f.write_str("])")?;
        write_boost(f, self.boost)
    }
}

impl fmt::Display for SpanNear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("spanNear([")?;
        write_list(f, &self.clauses)?;
        write!(f, "], {}, {})", self.slop, self.in_order)?;
        write_boost(f, self.boost)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Span(span) => write!(f, "{}", span),
            Query::Disjunction(alternatives) => {
                for (i, alternative) in alternatives.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    match alternative {
                        Query::Disjunction(_) => write!(f, "({})", alternative)?,
                        Query::Span(_) => write!(f, "{}", alternative)?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(text: &str) -> SpanQuery {
        SpanQuery::term("text", text)
    }

    fn near(clauses: Vec<SpanQuery>) -> SpanQuery {
        SpanQuery::near(clauses, 0, true)
    }

    fn span(query: SpanQuery) -> Query {
        Query::Span(query)
    }

    #[test]
    fn test_span_lengths() {
        assert_eq!(SpanQuery::empty_phrase("text").span_length(), Some(0));
        assert_eq!(t("a").span_length(), Some(1));
        assert_eq!(SpanQuery::not(t("a"), t("b")).span_length(), Some(1));
        assert_eq!(SpanQuery::multi_term("text", "gob*").span_length(), Some(1));
        assert_eq!(near(vec![t("a"), t("b")]).span_length(), Some(2));
        assert_eq!(SpanQuery::or(vec![t("a"), near(vec![t("b"), t("c")])]).span_length(), None);
        assert_eq!(SpanQuery::or(vec![t("a"), t("b")]).span_length(), Some(1));
    }

    #[test]
    fn test_empty_or_and_near_cover_nothing() {
        assert_eq!(SpanQuery::or(vec![]).span_length(), Some(0));
        assert_eq!(near(vec![]).span_length(), Some(0));
    }

    #[test]
    fn test_unknown_length_propagates_through_near() {
        let mixed = SpanQuery::or(vec![t("a"), near(vec![t("b"), t("c")])]);
        assert_eq!(near(vec![mixed, t("d")]).span_length(), None);
    }

    #[test]
    fn test_length_is_memoized() {
        let or = SpanOr::new(vec![t("a"), t("b")]);
        assert!(or.length.get().is_none());
        assert_eq!(or.span_length(), Some(1));
        assert_eq!(or.length.get(), Some(&Some(1)));
    }

    #[test]
    fn test_rewrite_splits_mixed_or() {
        let query = SpanQuery::near(
            vec![SpanQuery::or(vec![t("a"), near(vec![t("b"), t("c")])]), t("d")],
            1,
            true,
        );

        let rewritten = query.rewrite();
        assert_eq!(
            rewritten,
            Query::Disjunction(vec![
                span(SpanQuery::near(vec![t("a"), t("d")], 1, true)),
                span(SpanQuery::near(vec![near(vec![t("b"), t("c")]), t("d")], 1, true)),
            ])
        );
    }

    #[test]
    fn test_homogeneous_near_is_unchanged() {
        let query = SpanQuery::near(vec![SpanQuery::or(vec![t("a"), t("b")]), t("c")], 2, false);
        assert_eq!(query.rewrite(), span(query.clone()));

        let plain = near(vec![t("a"), t("b")]);
        assert_eq!(plain.rewrite(), span(plain.clone()));
    }

    #[test]
    fn test_non_near_is_returned_as_is() {
        let or = SpanQuery::or(vec![t("a"), near(vec![t("b"), t("c")])]);
        assert_eq!(or.rewrite(), span(or.clone()));
    }

    #[test]
    fn test_zero_length_branch_drops_clause_first() {
        let query = near(vec![
            t("x"),
            SpanQuery::or(vec![t("a"), SpanQuery::empty_phrase("text")]),
            t("y"),
        ]);

        assert_eq!(
            query.rewrite(),
            Query::Disjunction(vec![
                span(near(vec![t("x"), t("y")])),
                span(near(vec![t("x"), t("a"), t("y")])),
            ])
        );
    }

    #[test]
    fn test_equal_length_branches_grouped_in_first_seen_order() {
        let two = near(vec![t("b"), t("c")]);
        let query = near(vec![
            SpanQuery::or(vec![two.clone(), t("a"), t("e")]).with_boost(3.0),
            t("z"),
        ]);

        assert_eq!(
            query.rewrite(),
            Query::Disjunction(vec![
                span(near(vec![two.with_boost(3.0), t("z")])),
                span(near(vec![SpanQuery::or(vec![t("a"), t("e")]).with_boost(3.0), t("z")])),
            ])
        );
    }

    #[test]
    fn test_single_branch_group_multiplies_boost() {
        let query = near(vec![
            SpanQuery::or(vec![t("a").with_boost(2.0), near(vec![t("b"), t("c")])]).with_boost(1.5),
        ]);
        let rewritten = query.rewrite();
        let first = rewritten.alternatives()[0].as_span().unwrap();
        let SpanQuery::Near(first) = first else {
            panic!("expected near");
        };
        assert_eq!(first.clauses()[0].boost(), 3.0);
    }

    #[test]
    fn test_variable_length_branches_come_last() {
        let variable = SpanQuery::or(vec![t("p"), near(vec![t("q"), t("r")])]);
        let query = near(vec![SpanQuery::or(vec![variable.clone(), t("a")]), t("z")]);

        let rewritten = query.rewrite();
        let alternatives = rewritten.alternatives();
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0], span(near(vec![t("a"), t("z")])));
        // The substituted branch is mixed itself and gets split in turn
        assert_eq!(
            alternatives[1],
            Query::Disjunction(vec![
                span(near(vec![t("p"), t("z")])),
                span(near(vec![near(vec![t("q"), t("r")]), t("z")])),
            ])
        );
        assert_ne!(alternatives[1], span(near(vec![variable, t("z")])));
    }

    #[test]
    fn test_second_mixed_clause_rewritten_recursively() {
        let mixed = |x: &str, y: &str, z: &str| SpanQuery::or(vec![t(x), near(vec![t(y), t(z)])]);
        let query = near(vec![mixed("a", "b", "c"), mixed("d", "e", "f")]);

        let rewritten = query.rewrite();
        assert_eq!(rewritten.alternatives().len(), 2);
        for alternative in rewritten.alternatives() {
            let Query::Disjunction(inner) = alternative else {
                panic!("expected nested disjunction");
            };
            assert_eq!(inner.len(), 2);
            assert!(inner.iter().all(|q| q.as_span().and_then(SpanQuery::span_length).is_some()));
        }
        assert_eq!(
            rewritten.alternatives()[0].alternatives()[0],
            span(near(vec![t("a"), t("d")]))
        );
    }

    #[test]
    fn test_rewrite_keeps_slop_order_and_boost() {
        let query = SpanQuery::near(
            vec![SpanQuery::or(vec![t("a"), near(vec![t("b"), t("c")])])],
            5,
            false,
        )
        .with_boost(2.0);
        for alternative in query.rewrite().alternatives() {
            let Some(SpanQuery::Near(near)) = alternative.as_span() else {
                panic!("expected near");
            };
            assert_eq!(near.slop(), 5);
            assert!(!near.in_order());
            assert_eq!(near.boost, 2.0);
        }
    }

    #[test]
    #[should_panic(expected = "length groups are never empty")]
    fn test_empty_group_is_a_bug() {
        merge_group(Vec::new(), 1.0);
    }

    #[test]
    fn test_display() {
        let query = SpanQuery::near(
            vec![SpanQuery::or(vec![t("a"), near(vec![t("b"), t("c")])]), t("d").with_boost(2.0)],
            1,
            true,
        );
        assert_eq!(
            query.to_string(),
            "spanNear([spanOr([text:a, spanNear([text:b, text:c], 0, true)]), text:d^2.0], 1, true)"
        );
        assert_eq!(
            query.rewrite().to_string(),
            "spanNear([text:a, text:d^2.0], 1, true) spanNear([spanNear([text:b, text:c], 0, true), text:d^2.0], 1, true)"
        );
    }
}
