use std::path::PathBuf;

use super::config::MomentsConfig;

/// Directory holding the lock, recovery log and pending undo record
pub const STATE_DIR: &str = ".moments";

/// A discovered moments project
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory containing `moments.toml` (or the working directory when
    /// there is none)
    pub root: PathBuf,
    pub config: MomentsConfig,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, config: MomentsConfig) -> Self {
        Project {
            root: root.into(),
            config,
        }
    }

    /// The notes document. Relative paths resolve against the project root.
    pub fn document_path(&self) -> PathBuf {
        self.root.join(&self.config.file.path)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }
}
