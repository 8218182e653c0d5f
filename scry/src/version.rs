//! Suggestion index version marker
//!
//! The persisted index lives in `<parent>/<format>`. A `version.json` inside
//! it records that the directory holds a fully committed build, so a
//! restarted process can open it instead of rebuilding. Builds are written
//! to a sibling staging directory and only moved into place on commit.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::interface::SuggestResult;

/// Bump when the layout of the suggestion index changes
pub const SUGGEST_INDEX_FORMAT: &str = "1";

const VERSION_FILE: &str = "version.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Stale,
    Building,
    UpToDate,
}

#[derive(Debug, Serialize, Deserialize)]
struct VersionFile {
    format: String,
    state: IndexState,
    committed_at: DateTime<Utc>,
}

pub struct IndexVersion {
    directory: PathBuf,
    format: String,
    state: RwLock<IndexState>,
}

impl IndexVersion {
    pub fn new(parent: &Path, format: &str) -> Self {
        let directory = parent.join(format);
        let state = match read_version_file(&directory) {
            Some(file) if file.format == format && file.state == IndexState::UpToDate => {
                IndexState::UpToDate
            }
            _ => IndexState::Stale,
        };
        Self {
            directory,
            format: format.to_string(),
            state: RwLock::new(state),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn staging_directory(&self) -> PathBuf {
        let mut name = self.directory.as_os_str().to_owned();
        name.push(".building");
        PathBuf::from(name)
    }

    pub fn state(&self) -> IndexState {
        *self.state.read()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.state() == IndexState::UpToDate
    }

    /// Forget the committed build; the next load rebuilds
    pub fn invalidate(&self) -> SuggestResult<()> {
        let mut state = self.state.write();
        remove_dir_if_exists(&self.directory)?;
        *state = IndexState::Stale;
        tracing::info!(directory = %self.directory.display(), "suggestion index invalidated");
        Ok(())
    }

    /// Prepare an empty staging directory for a new build
    pub fn begin_build(&self) -> SuggestResult<PathBuf> {
        let staging = self.staging_directory();
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)?;
        *self.state.write() = IndexState::Building;
        Ok(staging)
    }

    /// Move a finished build into place and mark it up to date
    pub fn commit(&self, staging: &Path) -> SuggestResult<()> {
        let mut state = self.state.write();
        remove_dir_if_exists(&self.directory)?;
        if let Some(parent) = self.directory.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staging, &self.directory)?;

        let file = VersionFile {
            format: self.format.clone(),
            state: IndexState::UpToDate,
            committed_at: Utc::now(),
        };
        fs::write(self.directory.join(VERSION_FILE), serde_json::to_vec_pretty(&file)?)?;
        *state = IndexState::UpToDate;
        Ok(())
    }

    /// Drop an unfinished build
    pub fn discard(&self, staging: &Path) -> SuggestResult<()> {
        let mut state = self.state.write();
        remove_dir_if_exists(staging)?;
        if *state == IndexState::Building {
            *state = IndexState::Stale;
        }
        Ok(())
    }
}

fn read_version_file(directory: &Path) -> Option<VersionFile> {
    let bytes = fs::read(directory.join(VERSION_FILE)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn remove_dir_if_exists(path: &Path) -> SuggestResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_directory_is_stale() {
        let temp = TempDir::new().unwrap();
        let version = IndexVersion::new(temp.path(), SUGGEST_INDEX_FORMAT);
        assert_eq!(version.state(), IndexState::Stale);
        assert_eq!(version.directory(), temp.path().join(SUGGEST_INDEX_FORMAT));
    }

    #[test]
    fn test_commit_survives_restart() {
        let temp = TempDir::new().unwrap();
        let version = IndexVersion::new(temp.path(), "7");
        let staging = version.begin_build().unwrap();
        assert_eq!(version.state(), IndexState::Building);
        fs::write(staging.join("segment"), b"data").unwrap();

        version.commit(&staging).unwrap();
        assert!(version.is_up_to_date());
        assert!(!staging.exists());
        assert!(version.directory().join("segment").exists());

        let reopened = IndexVersion::new(temp.path(), "7");
        assert!(reopened.is_up_to_date());
    }

    #[test]
    fn test_other_format_is_not_up_to_date() {
        let temp = TempDir::new().unwrap();
        let version = IndexVersion::new(temp.path(), "7");
        let staging = version.begin_build().unwrap();
        version.commit(&staging).unwrap();

        assert!(!IndexVersion::new(temp.path(), "8").is_up_to_date());
    }

    #[test]
    fn test_discard_leaves_version_stale() {
        let temp = TempDir::new().unwrap();
        let version = IndexVersion::new(temp.path(), "7");
        let staging = version.begin_build().unwrap();
        version.discard(&staging).unwrap();

        assert_eq!(version.state(), IndexState::Stale);
        assert!(!staging.exists());
        assert!(!IndexVersion::new(temp.path(), "7").is_up_to_date());
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let temp = TempDir::new().unwrap();
        let version = IndexVersion::new(temp.path(), "7");
        let staging = version.begin_build().unwrap();
        version.commit(&staging).unwrap();

        version.invalidate().unwrap();
        assert!(!version.is_up_to_date());
        assert!(!version.directory().exists());
        assert!(!IndexVersion::new(temp.path(), "7").is_up_to_date());
    }
}
