use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::io::recovery::atomic_write;
use crate::model::undo::DeletedEntryInfo;

const STATE_FILE: &str = "state.json";

/// State carried between `mo` invocations (written to `.moments/state.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// The most recent deletion, kept for undo
    #[serde(default)]
    pub pending_undo: Option<DeletedEntryInfo>,
}

pub fn state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATE_FILE)
}

/// Read the state file. Missing or malformed files read as `None`.
pub fn read_state(state_dir: &Path) -> Option<StoreState> {
    let content = fs::read_to_string(state_path(state_dir)).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn write_state(state_dir: &Path, state: &StoreState) -> Result<(), std::io::Error> {
    fs::create_dir_all(state_dir)?;
    let content = serde_json::to_string_pretty(state)?;
    atomic_write(&state_path(state_dir), content.as_bytes())
}
