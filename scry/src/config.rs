//! Engine configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::interface::SuggestResult;

/// Default cap on value suggestions per request
pub const DEFAULT_MAX_COUNT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestConfig {
    /// Maximum number of value suggestions returned
    pub max_count: usize,
    /// Worker threads of the index build; 1 builds sequentially
    pub parallelism: usize,
    /// Parent directory of the versioned suggestion index
    pub index_dir: PathBuf,
    pub default_language: String,
}

impl Default for SuggestConfig {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_MAX_COUNT,
            parallelism: default_parallelism(),
            index_dir: PathBuf::from("index/suggest"),
            default_language: "en".to_string(),
        }
    }
}

impl SuggestConfig {
    pub fn with_index_dir(mut self, index_dir: impl Into<PathBuf>) -> Self {
        self.index_dir = index_dir.into();
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Load from a JSON file; missing keys take their defaults
    pub fn from_json_file(path: &Path) -> SuggestResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// All cores but two, at least one
fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .saturating_sub(2)
        .max(1)
}
