//! Field catalog for the card query language
//!
//! A `UserField` is what a user types before the colon. Depending on the
//! field it maps to one indexed field per language (localized fields) or
//! to a single shared one.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Marker for "search in any field" (`*:value`)
pub const ANY_FIELD: &str = "*";

// ─────────────────────────────────────────────────────────────────────────────
// FIELDS
// ─────────────────────────────────────────────────────────────────────────────

/// How term values of a field are interpreted when sorted and matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Int,
    Float,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Float)
    }
}

/// A user-facing query attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserField {
    pub name: String,
    pub kind: FieldKind,
    /// Values are split into words by the language analyzer.
    /// Non-analyzed values are suggested as whole phrases.
    #[serde(default)]
    pub analyzed: bool,
    /// One indexed field per language (`name_{lang}`)
    #[serde(default)]
    pub localized: bool,
    /// Values are served from the persisted suggestion index rather than
    /// from the in-memory value cache once the user starts typing.
    #[serde(default)]
    pub suggest_indexed: bool,
}

impl UserField {
    pub fn text(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Text,
            analyzed: false,
            localized: false,
            suggest_indexed: false,
        }
    }

    pub fn int(name: &str) -> Self {
        Self { kind: FieldKind::Int, ..Self::text(name) }
    }

    pub fn float(name: &str) -> Self {
        Self { kind: FieldKind::Float, ..Self::text(name) }
    }

    pub fn analyzed(mut self) -> Self {
        self.analyzed = true;
        self
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn suggest_indexed(mut self) -> Self {
        self.suggest_indexed = true;
        self
    }

    pub fn is_numeric(&self) -> bool {
        self.kind.is_numeric()
    }

    /// Name of the field inside the corpus index for `language`
    pub fn indexed_field(&self, language: &str) -> String {
        if self.localized {
            format!("{}_{}", self.name, language)
        } else {
            self.name.clone()
        }
    }

    /// Dedup key of this field's words in the suggestion index
    pub fn discriminator(&self, language: &str) -> Discriminator {
        if self.localized {
            Discriminator(format!("{}.{}", self.name, language))
        } else {
            Discriminator(self.name.clone())
        }
    }

    pub fn is_analyzed_in(&self, _language: &str) -> bool {
        self.analyzed
    }
}

/// Key used to deduplicate suggestion-index entries.
/// Fields that are not localized share a single discriminator across languages.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Discriminator(pub String);

impl Discriminator {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable shard index for this discriminator
    pub fn shard(&self, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        self.0.hash(&mut hasher);
        (hasher.finish() % shards.max(1) as u64) as usize
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CATALOG
// ─────────────────────────────────────────────────────────────────────────────

/// Language of a catalog that names none
pub const FALLBACK_LANGUAGE: &str = "en";

/// The set of user fields and languages a corpus is indexed with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "CatalogFile")]
pub struct FieldCatalog {
    fields: Vec<UserField>,
    languages: Vec<String>,
}

/// Catalog as written in a config file; loading goes through `FieldCatalog::new`
#[derive(Deserialize)]
struct CatalogFile {
    fields: Vec<UserField>,
    #[serde(default)]
    languages: Vec<String>,
}

impl From<CatalogFile> for FieldCatalog {
    fn from(file: CatalogFile) -> Self {
        Self::new(file.fields, file.languages)
    }
}

impl FieldCatalog {
    pub fn new(fields: Vec<UserField>, languages: Vec<String>) -> Self {
        let mut languages = languages;
        if languages.is_empty() {
            languages.push(FALLBACK_LANGUAGE.to_string());
        }
        Self { fields, languages }
    }

    /// Card fields of the deck builder
    pub fn card_fields() -> Self {
        let fields = vec![
            UserField::text("name").localized().suggest_indexed(),
            UserField::text("type").analyzed().localized().suggest_indexed(),
            UserField::text("text").analyzed().localized().suggest_indexed(),
            UserField::text("flavor").analyzed().localized().suggest_indexed(),
            UserField::text("artist").suggest_indexed(),
            UserField::text("set"),
            UserField::text("rarity"),
            UserField::text("color"),
            UserField::text("layout"),
            UserField::text("keywords"),
            UserField::float("cmc"),
            UserField::text("power"),
            UserField::text("toughness"),
            UserField::int("loyalty"),
        ];
        let languages = ["en", "ru", "de", "fr", "it", "es", "pt", "jp", "cn", "ko"]
            .iter()
            .map(|l| l.to_string())
            .collect();
        Self::new(fields, languages)
    }

    pub fn fields(&self) -> &[UserField] {
        &self.fields
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn default_language(&self) -> &str {
        self.languages.first().map_or(FALLBACK_LANGUAGE, String::as_str)
    }

    /// Case-insensitive lookup by user field name
    pub fn get(&self, name: &str) -> Option<&UserField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Languages the field is indexed in
    pub fn field_languages(&self, field: &UserField) -> Vec<String> {
        if field.localized {
            self.languages.clone()
        } else {
            vec![self.default_language().to_string()]
        }
    }

    /// Every (field, language) combination eligible for the suggestion index
    pub fn suggest_tasks(&self) -> Vec<(UserField, String)> {
        self.fields
            .iter()
            .filter(|f| f.suggest_indexed)
            .flat_map(|f| {
                self.field_languages(f)
                    .into_iter()
                    .map(move |lang| (f.clone(), lang))
            })
            .collect()
    }

    /// Every indexed field name of the corpus
    pub fn indexed_fields(&self) -> Vec<(String, &UserField)> {
        self.fields
            .iter()
            .flat_map(|f| {
                self.field_languages(f)
                    .into_iter()
                    .map(move |lang| (f.indexed_field(&lang), f))
            })
            .collect()
    }

    /// User field names followed by a colon, in query-completion order
    pub fn field_completions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fields.iter().map(|f| format!("{}:", f.name)).collect();
        names.sort_by(|a, b| crate::ranking::compare_invariant(a, b));
        names
    }
}
