//! Scry public interface
//!
//! Request-scoped records shared by the classifier, the suggestion engine and
//! callers, plus the crate error type.

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Semantic kind of a query token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Field name before the colon (`type` in `type:goblin`)
    Field,
    /// A value, with or without a field in front of it
    FieldValue,
    /// Boolean operator (`AND`, `||`, `-`, ...)
    Boolean,
    /// Modifier operator (`~`, `^`)
    Modifier,
    /// The number after a modifier (`2` in `~2`); never completed on its own
    ModifierValue,
    Open,
    Close,
    Quote,
}

/// Result of a suggestion index load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// An up-to-date index was found on disk and opened
    Opened,
    /// The index was built from the corpus and committed
    Built,
    /// The build was cancelled; nothing was committed
    Aborted,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// The token under the caret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token_type: TokenType,
    /// Raw token text as typed, escapes included
    pub value: String,
    /// Byte offset of the token start in the query text
    pub position: usize,
    /// Field the token belongs to, `None` when no field was typed
    pub parent_field: Option<String>,
    /// First token of the quoted phrase this token belongs to
    pub phrase_start: Option<Box<Token>>,
}

impl Token {
    pub fn new(token_type: TokenType, value: &str, position: usize) -> Self {
        Self {
            token_type,
            value: value.to_string(),
            position,
            parent_field: None,
            phrase_start: None,
        }
    }
}

/// Ranked completions for one request.
/// `values` and `types` are parallel: `types[i]` tags `values[i]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SuggestionResult {
    pub token: Option<Token>,
    values: Vec<String>,
    types: Vec<TokenType>,
}

impl SuggestionResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All candidates share one token type
    pub fn uniform(token: Token, values: Vec<String>, token_type: TokenType) -> Self {
        let types = vec![token_type; values.len()];
        Self { token: Some(token), values, types }
    }

    /// Field names first, then values
    pub fn fields_then_values(token: Token, fields: Vec<String>, values: Vec<String>) -> Self {
        let mut types = vec![TokenType::Field; fields.len()];
        types.extend(std::iter::repeat(TokenType::FieldValue).take(values.len()));
        let mut all = fields;
        all.extend(values);
        Self { token: Some(token), values: all, types }
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn types(&self) -> &[TokenType] {
        &self.types
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Candidates tagged with `token_type`, in ranked order
    pub fn values_of(&self, token_type: TokenType) -> Vec<&str> {
        self.values
            .iter()
            .zip(&self.types)
            .filter(|(_, t)| **t == token_type)
            .map(|(v, _)| v.as_str())
            .collect()
    }
}

/// Build progress, emitted once per finished task and once on completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingProgress {
    pub indexed: usize,
    pub total: usize,
    /// Set only on the final notification, after the index was committed
    pub complete: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for scry operations.
///
/// Missing data (unknown field, cold cache, unloaded index) is never an
/// error; those paths return empty results.
#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("Directory error: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Version file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Corpus must finish loading localizations before the suggestion index is built")]
    CorpusNotReady,
    #[error("A suggestion index build is already in progress")]
    BuildInProgress,
    #[error("No corpus reader is loaded")]
    NotLoaded,
}

pub type SuggestResult<T> = Result<T, SuggestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_then_values_types_are_parallel() {
        let token = Token::new(TokenType::FieldValue, "go", 0);
        let result = SuggestionResult::fields_then_values(
            token,
            vec!["type:".to_string()],
            vec!["goblin".to_string(), "golem".to_string()],
        );
        assert_eq!(result.len(), result.types().len());
        assert_eq!(
            result.types(),
            &[TokenType::Field, TokenType::FieldValue, TokenType::FieldValue]
        );
        assert_eq!(result.values_of(TokenType::FieldValue), vec!["goblin", "golem"]);
    }

    #[test]
    fn test_empty_result() {
        let result = SuggestionResult::empty();
        assert!(result.is_empty());
        assert!(result.token.is_none());
    }
}
