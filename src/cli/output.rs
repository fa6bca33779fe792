use chrono::DateTime;
use serde::Serialize;

use crate::model::entry::{Entry, ParsedDocument};
use crate::model::undo::DeletedEntryInfo;
use crate::parse::TimestampFormat;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct EntryJson {
    pub id: String,
    /// Creation time as RFC 3339 (UTC)
    pub created_at: String,
    /// Creation time rendered with the configured pattern
    pub timestamp: String,
    pub text: String,
    pub archived: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub id_missing: bool,
}

#[derive(Debug, Serialize)]
pub struct EntryListJson {
    pub entries: Vec<EntryJson>,
}

#[derive(Debug, Serialize)]
pub struct CapturedJson {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedJson {
    pub id: String,
    pub block: String,
    pub undo_until: String,
}

#[derive(Debug, Serialize)]
pub struct UndoJson {
    pub restored: bool,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub fn entry_to_json(entry: &Entry, archived: bool, format: &TimestampFormat) -> EntryJson {
    EntryJson {
        id: entry.id.clone(),
        created_at: DateTime::from_timestamp_millis(entry.created_at)
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            .unwrap_or_default(),
        timestamp: format.format_millis(entry.created_at),
        text: entry.raw.clone(),
        archived,
        id_missing: entry.id_missing,
    }
}

/// Entries in document order: active first, then archived, filtered by the
/// list flags.
pub fn selected_entries(
    doc: &ParsedDocument,
    archived: bool,
    all: bool,
) -> Vec<(&Entry, bool)> {
    let active = doc.entries.iter().map(|e| (e, false));
    let archive = doc.archive_entries.iter().map(|e| (e, true));
    if all {
        active.chain(archive).collect()
    } else if archived {
        archive.collect()
    } else {
        active.collect()
    }
}

pub fn deleted_to_json(id: &str, record: &DeletedEntryInfo) -> DeletedJson {
    DeletedJson {
        id: id.to_string(),
        block: record.entry_block.clone(),
        undo_until: (record.deleted_at + crate::model::undo::UNDO_WINDOW)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    }
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

/// Format an entry as a one-line summary
pub fn format_entry_line(entry: &Entry, archived: bool, format: &TimestampFormat) -> String {
    let mark = if archived { 'a' } else { ' ' };
    let extra = if entry.raw.lines().nth(1).is_some() {
        " …"
    } else {
        ""
    };
    format!(
        "[{}] {}  {}  {}{}",
        mark,
        entry.id,
        format.format_millis(entry.created_at),
        entry.first_line(),
        extra
    )
}

/// Format the full entry
pub fn format_entry_detail(entry: &Entry, archived: bool, format: &TimestampFormat) -> Vec<String> {
    let mut lines = vec![
        format!("id: {}", entry.id),
        format!("time: {}", format.format_millis(entry.created_at)),
    ];
    if archived {
        lines.push("archived: yes".to_string());
    }
    if entry.id_missing {
        lines.push("marker: missing (id assigned for this read only)".to_string());
    }
    lines.push(String::new());
    lines.extend(entry.raw.lines().map(|l| l.to_string()));
    lines
}
