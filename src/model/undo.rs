use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How long a deleted entry can be restored.
pub const UNDO_WINDOW: Duration = Duration::minutes(5);

/// Where a restored (or newly captured) block goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InsertionHint {
    Prepend,
    Append,
    AfterId,
    /// First block of the archive section
    ArchiveTop,
}

/// The single pending undo record for a delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEntryInfo {
    /// Raw source text of the deleted block, marker line included
    pub entry_block: String,
    pub insertion_hint: InsertionHint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<String>,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedEntryInfo {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.deleted_at > UNDO_WINDOW
    }
}
