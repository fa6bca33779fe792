use chrono::{DateTime, Utc};

use crate::model::entry::ParsedDocument;
use crate::model::undo::{DeletedEntryInfo, InsertionHint};
use crate::ops::entry_ops::{InsertPosition, delete_entry_span, restore_entry_block};
use crate::parse::parse_document;

/// A deletion applied to a text snapshot, with the record needed to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub text: String,
    pub record: DeletedEntryInfo,
}

/// Delete entry `id` from `text`, capturing its source block and where it
/// sat so it can be put back. Returns `None` if the id is not in the text.
pub fn delete_with_record(
    text: &str,
    id: &str,
    timestamp_format: &str,
    now: DateTime<Utc>,
) -> Option<Deletion> {
    let doc = parse_document(text, timestamp_format);
    let span = doc.span(id)?.clone();
    let block = span.slice(text)?.to_string();
    let (insertion_hint, after_id) = hint_for(&doc, id)?;

    Some(Deletion {
        text: delete_entry_span(text, &span),
        record: DeletedEntryInfo {
            entry_block: block,
            insertion_hint,
            after_id,
            deleted_at: now,
        },
    })
}

/// The entry before `id` in its own list anchors the restore; the first
/// active entry goes back to the top of the document and the first archived
/// one to the top of the archive.
fn hint_for(doc: &ParsedDocument, id: &str) -> Option<(InsertionHint, Option<String>)> {
    let (list, archived) = if doc.find_active(id).is_some() {
        (&doc.entries, false)
    } else if doc.is_archived(id) {
        (&doc.archive_entries, true)
    } else {
        return None;
    };

    let index = list.iter().position(|e| e.id == id)?;
    if index > 0 {
        return Some((InsertionHint::AfterId, Some(list[index - 1].id.clone())));
    }
    if archived {
        Some((InsertionHint::ArchiveTop, None))
    } else {
        Some((InsertionHint::Prepend, None))
    }
}

pub fn insert_position(record: &DeletedEntryInfo) -> InsertPosition {
    match (record.insertion_hint, &record.after_id) {
        (InsertionHint::AfterId, Some(id)) => InsertPosition::After(id.clone()),
        (InsertionHint::Append, _) => InsertPosition::Append,
        (InsertionHint::ArchiveTop, _) => InsertPosition::ArchiveTop,
        _ => InsertPosition::Prepend,
    }
}

/// Put a deleted block back. Returns `None` when the record has expired or
/// its id is already present again.
pub fn apply_undo(
    text: &str,
    record: &DeletedEntryInfo,
    timestamp_format: &str,
    now: DateTime<Utc>,
) -> Option<String> {
    if record.is_expired(now) {
        return None;
    }
    let doc = parse_document(text, timestamp_format);
    let restored_ids = parse_document(&record.entry_block, timestamp_format);
    if restored_ids
        .spans
        .keys()
        .any(|id| doc.spans.contains_key(id))
    {
        return None;
    }
    Some(restore_entry_block(
        text,
        &record.entry_block,
        &insert_position(record),
        timestamp_format,
    ))
}

/// Holder for the single pending undo record. A new deletion replaces any
/// earlier record.
#[derive(Debug, Default)]
pub struct UndoSlot {
    pending: Option<DeletedEntryInfo>,
}

impl UndoSlot {
    pub fn new(pending: Option<DeletedEntryInfo>) -> Self {
        UndoSlot { pending }
    }

    pub fn set(&mut self, record: DeletedEntryInfo) {
        self.pending = Some(record);
    }

    pub fn peek(&self) -> Option<&DeletedEntryInfo> {
        self.pending.as_ref()
    }

    /// The record if it is still inside the undo window. An expired record
    /// is dropped.
    pub fn current(&mut self, now: DateTime<Utc>) -> Option<DeletedEntryInfo> {
        if self.pending.as_ref().is_some_and(|r| r.is_expired(now)) {
            self.pending = None;
        }
        self.pending.clone()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
