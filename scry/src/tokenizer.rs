//! Query token classifier
//!
//! Lexes the structured query language (`field:value`, quoted phrases,
//! parenthesized groups, boolean operators, `~N` / `^N` modifiers) just far
//! enough to tell what sits under the caret and which field it belongs to.

use crate::interface::{Token, TokenType};

/// Classifies the token under a caret
pub trait TokenClassifier: Send + Sync {
    /// `caret` is a byte offset into `query`. `None` when the caret is out of
    /// range or not on a char boundary.
    fn classify(&self, query: &str, caret: usize) -> Option<Token>;
}

/// Words that act as boolean operators when typed on their own
const BOOLEAN_WORDS: [&str; 3] = ["AND", "OR", "NOT"];

/// Default classifier for the card query language
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTokenizer;

impl TokenClassifier for QueryTokenizer {
    fn classify(&self, query: &str, caret: usize) -> Option<Token> {
        if caret > query.len() || !query.is_char_boundary(caret) {
            return None;
        }

        let lexed = Lexer::new(query, caret).run();

        let touching = lexed
            .tokens
            .iter()
            .find(|t| t.token.position < caret && caret <= t.end)
            .or_else(|| lexed.tokens.iter().find(|t| t.token.position == caret && t.end > caret));
        if let Some(spanned) = touching {
            return Some(spanned.token.clone());
        }

        // Caret sits in whitespace: an empty value is being started here
        let context = lexed.caret_context.unwrap_or_default();
        let mut token = Token::new(TokenType::FieldValue, "", caret);
        token.parent_field = context.field;
        token.phrase_start = context.phrase_start.map(Box::new);
        Some(token)
    }
}

/// Remove query-syntax backslash escapes
pub fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                result.push(escaped);
            }
        } else {
            result.push(c);
        }
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// LEXER
// ─────────────────────────────────────────────────────────────────────────────

struct Spanned {
    token: Token,
    end: usize,
}

#[derive(Default)]
struct CaretContext {
    field: Option<String>,
    phrase_start: Option<Token>,
}

struct Phrase {
    field: Option<String>,
    first: Option<Token>,
}

struct Lexed {
    tokens: Vec<Spanned>,
    caret_context: Option<CaretContext>,
}

struct Lexer<'a> {
    query: &'a str,
    chars: Vec<(usize, char)>,
    caret: usize,
    tokens: Vec<Spanned>,
    /// Field typed right before the colon, waiting for its value
    pending_field: Option<String>,
    /// Field of each open parenthesis, innermost last
    groups: Vec<Option<String>>,
    phrase: Option<Phrase>,
    caret_context: Option<CaretContext>,
}

impl<'a> Lexer<'a> {
    fn new(query: &'a str, caret: usize) -> Self {
        Self {
            query,
            chars: query.char_indices().collect(),
            caret,
            tokens: Vec::new(),
            pending_field: None,
            groups: Vec::new(),
            phrase: None,
            caret_context: None,
        }
    }

    fn offset(&self, i: usize) -> usize {
        self.chars.get(i).map_or(self.query.len(), |(pos, _)| *pos)
    }

    fn char_at(&self, i: usize) -> Option<char> {
        self.chars.get(i).map(|(_, c)| *c)
    }

    fn group_field(&self) -> Option<String> {
        self.groups.iter().rev().find_map(|f| f.clone())
    }

    fn current_field(&self) -> Option<String> {
        self.pending_field.clone().or_else(|| self.group_field())
    }

    fn push(&mut self, token_type: TokenType, start: usize, end: usize) -> Token {
        let token = Token::new(token_type, &self.query[start..end], start);
        self.tokens.push(Spanned { token: token.clone(), end });
        token
    }

    fn snapshot_caret(&mut self, i: usize) {
        if self.caret_context.is_none() && self.offset(i) == self.caret {
            let context = match &self.phrase {
                Some(phrase) => CaretContext {
                    field: phrase.field.clone(),
                    phrase_start: phrase.first.clone(),
                },
                None => CaretContext { field: self.current_field(), phrase_start: None },
            };
            self.caret_context = Some(context);
        }
    }

    fn run(mut self) -> Lexed {
        let mut i = 0;
        while i < self.chars.len() {
            self.snapshot_caret(i);
            i = if self.phrase.is_some() { self.lex_in_phrase(i) } else { self.lex(i) };
        }
        self.snapshot_caret(i);
        Lexed { tokens: self.tokens, caret_context: self.caret_context }
    }

    /// Index just past a word starting at `i`, honoring backslash escapes
    fn scan_word(&self, mut i: usize, stop: impl Fn(char) -> bool) -> usize {
        while let Some(c) = self.char_at(i) {
            if c == '\\' {
                i += if self.char_at(i + 1).is_some() { 2 } else { 1 };
                continue;
            }
            if c.is_whitespace() || stop(c) {
                break;
            }
            i += 1;
        }
        i
    }

    fn lex_in_phrase(&mut self, i: usize) -> usize {
        let c = self.chars[i].1;
        if c == '"' {
            self.push(TokenType::Quote, self.offset(i), self.offset(i + 1));
            self.phrase = None;
            return i + 1;
        }
        if c.is_whitespace() {
            return i + 1;
        }

        let end = self.scan_word(i, |c| c == '"');
        let (start, stop) = (self.offset(i), self.offset(end));
        let Some(phrase) = self.phrase.as_mut() else {
            return end;
        };
        let mut token = Token::new(TokenType::FieldValue, &self.query[start..stop], start);
        token.parent_field = phrase.field.clone();
        let first = phrase.first.get_or_insert_with(|| token.clone()).clone();
        token.phrase_start = Some(Box::new(first));
        self.tokens.push(Spanned { token, end: stop });
        end
    }

    fn lex(&mut self, i: usize) -> usize {
        let c = self.chars[i].1;
        let next = self.char_at(i + 1);
        let start = self.offset(i);

        match c {
            c if c.is_whitespace() => i + 1,
            '(' => {
                self.push(TokenType::Open, start, self.offset(i + 1));
                let field = self.pending_field.take();
                self.groups.push(field);
                i + 1
            }
            ')' => {
                self.push(TokenType::Close, start, self.offset(i + 1));
                self.groups.pop();
                i + 1
            }
            '"' => {
                self.push(TokenType::Quote, start, self.offset(i + 1));
                let field = self.current_field();
                self.pending_field = None;
                self.phrase = Some(Phrase { field, first: None });
                i + 1
            }
            '~' | '^' => {
                self.push(TokenType::Modifier, start, self.offset(i + 1));
                let mut j = i + 1;
                while self.char_at(j).is_some_and(|c| c.is_ascii_digit() || c == '.') {
                    j += 1;
                }
                if j > i + 1 {
                    self.push(TokenType::ModifierValue, self.offset(i + 1), self.offset(j));
                }
                j
            }
            '&' if next == Some('&') => {
                self.push(TokenType::Boolean, start, self.offset(i + 2));
                i + 2
            }
            '|' if next == Some('|') => {
                self.push(TokenType::Boolean, start, self.offset(i + 2));
                i + 2
            }
            '+' | '-' | '!' => {
                self.push(TokenType::Boolean, start, self.offset(i + 1));
                i + 1
            }
            _ => self.lex_word(i),
        }
    }

    fn lex_word(&mut self, i: usize) -> usize {
        let end = self.scan_word(i, |c| matches!(c, '(' | ')' | '"' | ':' | '~' | '^'));
        let (start, stop) = (self.offset(i), self.offset(end));
        if end == i {
            // A lone special character such as a stray colon
            return i + 1;
        }
        let word = &self.query[start..stop];

        if self.char_at(end) == Some(':') {
            self.push(TokenType::Field, start, stop);
            self.pending_field = Some(word.to_string());
            return end + 1;
        }

        if BOOLEAN_WORDS.contains(&word) {
            self.push(TokenType::Boolean, start, stop);
            return end;
        }

        let field = self.current_field();
        self.pending_field = None;
        let mut token = self.push(TokenType::FieldValue, start, stop);
        token.parent_field = field;
        if let Some(last) = self.tokens.last_mut() {
            last.token = token;
        }
        end
    }
}
