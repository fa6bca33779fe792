use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use chrono::{DateTime, Local, Utc};

use crate::io::lock::{FileLock, LockError};
use crate::io::recovery::{RecoveryCategory, RecoveryEntry, log_recovery};
use crate::io::state::{StoreState, read_state, write_state};
use crate::io::storage::{FsStorage, Storage, StorageError};
use crate::model::entry::ParsedDocument;
use crate::model::project::Project;
use crate::model::undo::DeletedEntryInfo;
use crate::ops::entry_ops::{
    InsertPosition, insert_entry_at, move_to_archive, replace_entry_span_at,
};
use crate::ops::undo_ops::{UndoSlot, apply_undo, delete_with_record};
use crate::parse::{TimestampFormat, parse_document_at};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("no entry with id {0}")]
    NotFound(String),
    #[error("entry {0} is already archived")]
    AlreadyArchived(String),
    #[error("nothing to capture: text is empty")]
    EmptyContent,
}

type Subscriber = Box<dyn Fn(&ParsedDocument) + Send + Sync>;

/// Owns one notes document and runs every change to it as a single
/// read-parse-transform-write cycle.
///
/// Mutations are strictly sequential: an in-process mutex orders callers
/// and a file lock in `.moments/` orders processes. Each cycle re-reads the
/// current text, so spans are never reused across writes.
pub struct MomentStore<S: Storage = FsStorage> {
    storage: S,
    project: Project,
    format: TimestampFormat,
    queue: Mutex<()>,
    undo: Mutex<UndoSlot>,
    /// Writes this store made whose change events have not been consumed yet
    self_writes: AtomicU64,
    cached: Mutex<Option<ParsedDocument>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MomentStore<FsStorage> {
    pub fn open(project: Project) -> Self {
        MomentStore::with_storage(FsStorage, project)
    }
}

impl<S: Storage> MomentStore<S> {
    /// Build a store over `storage`. A pending undo record persisted by an
    /// earlier run is picked up from `.moments/state.json`.
    pub fn with_storage(storage: S, project: Project) -> Self {
        let pending = read_state(&project.state_dir()).and_then(|s| s.pending_undo);
        MomentStore {
            storage,
            format: TimestampFormat::new(&project.config.format.timestamp),
            project,
            queue: Mutex::new(()),
            undo: Mutex::new(UndoSlot::new(pending)),
            self_writes: AtomicU64::new(0),
            cached: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn document_path(&self) -> PathBuf {
        self.project.document_path()
    }

    pub fn timestamp_format(&self) -> &TimestampFormat {
        &self.format
    }

    /// The document as of the last load or mutation.
    pub fn document(&self) -> Option<ParsedDocument> {
        locked(&self.cached).clone()
    }

    /// Register an observer called with the freshly parsed document after
    /// every load and every mutation.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&ParsedDocument) + Send + Sync + 'static,
    {
        locked(&self.subscribers).push(Box::new(callback));
    }

    /// Returns true (and consumes it) if a write made by this store has not
    /// been matched to a change event yet.
    pub fn consume_self_write(&self) -> bool {
        self.self_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Read and parse the document, creating it first when the config allows.
    /// Entries that were missing identity markers are noted in the recovery
    /// log.
    pub fn load(&self) -> Result<ParsedDocument, StoreError> {
        let _queue = locked(&self.queue);
        let path = self.document_path();
        self.storage
            .ensure_exists(&path, self.project.config.file.auto_create)?;
        let text = self.storage.read(&path)?;
        let doc = self.parse(&text);

        if !doc.errors.is_empty() {
            let body = doc
                .errors
                .iter()
                .map(|d| format!("{} ({})", d.message, d.context))
                .collect::<Vec<_>>()
                .join("\n");
            log_recovery(
                &self.project.state_dir(),
                RecoveryEntry::new(
                    RecoveryCategory::Parser,
                    format!("{} entries without identity markers", doc.errors.len()),
                )
                .field("Document", path.display().to_string())
                .body(body),
            );
        }

        self.publish(&doc);
        Ok(doc)
    }

    /// Reload after a change event from the watcher. Returns `None` when the
    /// event was caused by this store's own write.
    pub fn reload_if_external(&self) -> Result<Option<ParsedDocument>, StoreError> {
        if self.consume_self_write() {
            return Ok(None);
        }
        self.load().map(Some)
    }

    /// Capture a new entry at the configured position. Returns its id.
    pub fn capture(&self, content: &str) -> Result<String, StoreError> {
        self.capture_at(content, self.project.config.capture.position.into())
    }

    pub fn capture_at(&self, content: &str, position: InsertPosition) -> Result<String, StoreError> {
        let content = self.prepare_content(content)?;
        self.mutate(|text, _doc| {
            let insertion = insert_entry_at(text, &content, &position, &self.format, &Local::now());
            Ok((insertion.text, insertion.id))
        })
    }

    /// Replace the body of entry `id`. The creation timestamp is kept unless
    /// `keep_timestamp` is false.
    pub fn edit(&self, id: &str, content: &str, keep_timestamp: bool) -> Result<(), StoreError> {
        let content = self.prepare_content(content)?;
        self.mutate(|text, doc| {
            let span = match (doc.find_entry(id), doc.span(id)) {
                (Some(_), Some(span)) => span.clone(),
                _ => return Err(StoreError::NotFound(id.to_string())),
            };
            let new_text = replace_entry_span_at(
                text,
                &span,
                &content,
                &self.format,
                keep_timestamp,
                &Local::now(),
            );
            Ok((new_text, ()))
        })
    }

    /// Delete entry `id` and keep it as the pending undo record. The block is
    /// also written to the recovery log.
    pub fn delete(&self, id: &str) -> Result<DeletedEntryInfo, StoreError> {
        self.mutate_then(
            |text, _doc| {
                let deletion = delete_with_record(text, id, self.format.pattern(), Utc::now())
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                Ok((deletion.text, deletion.record))
            },
            |record| {
                log_recovery(
                    &self.project.state_dir(),
                    RecoveryEntry::new(RecoveryCategory::Delete, format!("entry {} deleted", id))
                        .field("Entry", id)
                        .field("Document", self.document_path().display().to_string())
                        .body(record.entry_block.clone()),
                );
                let mut slot = locked(&self.undo);
                slot.set(record.clone());
                self.persist_undo(&slot);
            },
        )
    }

    /// Restore the most recent deletion. Returns false when nothing is
    /// pending, the undo window has passed, or the entry is back already.
    pub fn undo_delete(&self) -> Result<bool, StoreError> {
        self.undo_delete_at(Utc::now())
    }

    /// The record stays pending until the restored text has been written.
    pub fn undo_delete_at(&self, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.mutate_then(
            |text, _doc| {
                let restored = self
                    .current_undo(now)
                    .and_then(|record| apply_undo(text, &record, self.format.pattern(), now));
                match restored {
                    Some(restored) => Ok((restored, true)),
                    None => Ok((text.to_string(), false)),
                }
            },
            |_| {
                let mut slot = locked(&self.undo);
                if slot.peek().is_some() {
                    slot.clear();
                    self.persist_undo(&slot);
                }
            },
        )
    }

    /// The pending record if it is inside the window at `now`. An expired
    /// record is dropped from the slot and from the saved state.
    fn current_undo(&self, now: DateTime<Utc>) -> Option<DeletedEntryInfo> {
        let mut slot = locked(&self.undo);
        let had_record = slot.peek().is_some();
        let record = slot.current(now);
        if had_record && record.is_none() {
            self.persist_undo(&slot);
        }
        record
    }

    /// The pending undo record, if one is still inside the window.
    pub fn pending_undo(&self) -> Option<DeletedEntryInfo> {
        locked(&self.undo)
            .peek()
            .filter(|r| !r.is_expired(Utc::now()))
            .cloned()
    }

    /// Move active entry `id` into the archive section.
    pub fn archive(&self, id: &str) -> Result<(), StoreError> {
        self.mutate(|text, doc| {
            if doc.is_archived(id) {
                return Err(StoreError::AlreadyArchived(id.to_string()));
            }
            let Some(span) = doc.find_active(id).and(doc.span(id)) else {
                return Err(StoreError::NotFound(id.to_string()));
            };
            Ok((move_to_archive(text, span, self.format.pattern()), ()))
        })
    }

    fn prepare_content(&self, content: &str) -> Result<String, StoreError> {
        let content = if self.project.config.capture.trim_input {
            content.trim()
        } else {
            content
        };
        if content.trim().is_empty() {
            return Err(StoreError::EmptyContent);
        }
        Ok(content.to_string())
    }

    fn parse(&self, text: &str) -> ParsedDocument {
        parse_document_at(text, &self.format, &Local::now())
    }

    /// One read-parse-transform-write cycle. `transform` gets the current
    /// text and its parse and returns the new text plus a result value. The
    /// document is written only when the text changed.
    fn mutate<T, F>(&self, transform: F) -> Result<T, StoreError>
    where
        F: FnOnce(&str, &ParsedDocument) -> Result<(String, T), StoreError>,
    {
        self.mutate_then(transform, |_| {})
    }

    /// [`mutate`](Self::mutate) with a hook that runs once the new text is
    /// saved (or needed no write), before the next queued mutation starts.
    /// The hook does not run when the transform or the write fails.
    fn mutate_then<T, F, G>(&self, transform: F, committed: G) -> Result<T, StoreError>
    where
        F: FnOnce(&str, &ParsedDocument) -> Result<(String, T), StoreError>,
        G: FnOnce(&T),
    {
        let _queue = locked(&self.queue);
        let state_dir = self.project.state_dir();
        let _lock = FileLock::acquire_default(&state_dir)?;

        let path = self.document_path();
        self.storage
            .ensure_exists(&path, self.project.config.file.auto_create)?;
        let text = self.storage.read(&path)?;
        self.note_external_change(&text);

        let doc = self.parse(&text);
        let (new_text, value) = transform(&text, &doc)?;

        if new_text == text {
            committed(&value);
            self.publish(&doc);
            return Ok(value);
        }

        self.self_writes.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.storage.write(&path, &new_text) {
            let _ = self
                .self_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            log_recovery(
                &state_dir,
                RecoveryEntry::new(RecoveryCategory::Write, "document write failed")
                    .field("Document", path.display().to_string())
                    .field("Error", e.to_string())
                    .body(new_text),
            );
            return Err(e.into());
        }

        committed(&value);
        let doc = self.parse(&new_text);
        self.publish(&doc);
        Ok(value)
    }

    /// Log a conflict when the text on disk no longer matches what this
    /// store last saw. The mutation proceeds on the fresh text.
    fn note_external_change(&self, text: &str) {
        let cached = locked(&self.cached);
        let Some(doc) = cached.as_ref() else {
            return;
        };
        if doc.original_text != text {
            log_recovery(
                &self.project.state_dir(),
                RecoveryEntry::new(
                    RecoveryCategory::Conflict,
                    "document changed on disk since last load; reloaded",
                )
                .field("Document", self.document_path().display().to_string()),
            );
        }
    }

    fn publish(&self, doc: &ParsedDocument) {
        *locked(&self.cached) = Some(doc.clone());
        for callback in locked(&self.subscribers).iter() {
            callback(doc);
        }
    }

    fn persist_undo(&self, slot: &UndoSlot) {
        let state = StoreState {
            pending_undo: slot.peek().cloned(),
        };
        if let Err(e) = write_state(&self.project.state_dir(), &state) {
            eprintln!("warning: could not save undo record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use chrono::Duration as TimeDelta;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::io::recovery::read_recovery_entries;
    use crate::io::storage::memory::MemoryStorage;
    use crate::model::config::{CapturePosition, MomentsConfig};

    const DOC: &str = "\
---
moments-plugin: true
---

- 2026-01-03 08:00 First
  ^m-first1

- 2026-01-02 09:15 Second
  ^m-secnd2
";

    fn project(root: &Path) -> Project {
        Project::new(root, MomentsConfig::default())
    }

    fn store_with(tmp: &TempDir, text: &str) -> MomentStore<MemoryStorage> {
        let project = project(tmp.path());
        let storage = MemoryStorage::with(&project.document_path(), text);
        MomentStore::with_storage(storage, project)
    }

    fn text_of(store: &MomentStore<MemoryStorage>) -> String {
        store.storage.get(&store.document_path()).unwrap()
    }

    #[test]
    fn load_creates_missing_document() {
        let tmp = TempDir::new().unwrap();
        let store = MomentStore::open(project(tmp.path()));
        let doc = store.load().unwrap();
        assert!(doc.is_moments_document());
        assert!(tmp.path().join("Moments.md").exists());
    }

    #[test]
    fn load_without_auto_create_fails() {
        let tmp = TempDir::new().unwrap();
        let mut config = MomentsConfig::default();
        config.file.auto_create = false;
        let store = MomentStore::open(Project::new(tmp.path(), config));
        assert!(matches!(
            store.load(),
            Err(StoreError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[test]
    fn load_logs_missing_markers() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, "- 2026-01-02 09:15 no marker\n");
        let doc = store.load().unwrap();
        assert_eq!(doc.errors.len(), 1);

        let log = read_recovery_entries(&store.project().state_dir(), None);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].category, RecoveryCategory::Parser);
        assert!(log[0].body.contains("no marker"));
    }

    #[test]
    fn capture_prepends_and_returns_id() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        let id = store.capture("  Fresh thought  ").unwrap();

        let doc = store.document().unwrap();
        assert_eq!(doc.entries[0].id, id);
        assert_eq!(doc.entries[0].raw, "Fresh thought");
        assert_eq!(doc.entries.len(), 3);
        assert!(text_of(&store).contains(&format!("  ^{}\n", id)));
    }

    #[test]
    fn capture_append_position() {
        let tmp = TempDir::new().unwrap();
        let mut config = MomentsConfig::default();
        config.capture.position = CapturePosition::Append;
        let project = Project::new(tmp.path(), config);
        let storage = MemoryStorage::with(&project.document_path(), DOC);
        let store = MomentStore::with_storage(storage, project);

        let id = store.capture("Last").unwrap();
        let doc = store.document().unwrap();
        assert_eq!(doc.entries.last().unwrap().id, id);
    }

    #[test]
    fn capture_rejects_blank_text() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        assert!(matches!(store.capture(" \n\t "), Err(StoreError::EmptyContent)));
        assert_eq!(store.storage.write_count(), 0);
    }

    #[test]
    fn edit_keeps_timestamp_and_id() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.edit("m-secnd2", "Second, revised", true).unwrap();
        assert!(
            text_of(&store).contains("- 2026-01-02 09:15 Second, revised\n  ^m-secnd2\n")
        );
    }

    #[test]
    fn edit_unknown_id() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        assert!(matches!(
            store.edit("m-nope00", "x", true),
            Err(StoreError::NotFound(id)) if id == "m-nope00"
        ));
        assert_eq!(text_of(&store), DOC);
    }

    #[test]
    fn delete_then_undo_restores_text() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        let record = store.delete("m-secnd2").unwrap();
        assert_eq!(record.after_id.as_deref(), Some("m-first1"));
        assert!(!text_of(&store).contains("m-secnd2"));
        assert!(store.pending_undo().is_some());

        assert!(store.undo_delete().unwrap());
        assert_eq!(text_of(&store), DOC);
        assert!(!store.undo_delete().unwrap());
    }

    #[test]
    fn delete_is_logged_for_recovery() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.delete("m-first1").unwrap();
        let log = read_recovery_entries(&store.project().state_dir(), None);
        assert_eq!(log[0].category, RecoveryCategory::Delete);
        assert_eq!(log[0].body, "- 2026-01-03 08:00 First\n  ^m-first1");
    }

    #[test]
    fn undo_record_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.delete("m-first1").unwrap();
        let after_delete = text_of(&store);

        let project = project(tmp.path());
        let storage = MemoryStorage::with(&project.document_path(), &after_delete);
        let reopened = MomentStore::with_storage(storage, project);
        assert!(reopened.undo_delete().unwrap());
        assert_eq!(text_of(&reopened), DOC);
    }

    #[test]
    fn undo_after_window_is_refused() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.delete("m-first1").unwrap();
        let later = Utc::now() + TimeDelta::minutes(6);
        assert!(!store.undo_delete_at(later).unwrap());
        assert!(store.pending_undo().is_none());
    }

    #[test]
    fn failed_undo_write_keeps_record() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.delete("m-secnd2").unwrap();
        let after_delete = text_of(&store);

        *store.storage.fail_writes.lock().unwrap() = true;
        assert!(matches!(store.undo_delete(), Err(StoreError::Storage(_))));
        assert_eq!(text_of(&store), after_delete);
        assert!(store.pending_undo().is_some());
        let saved = read_state(&store.project().state_dir()).unwrap();
        assert!(saved.pending_undo.is_some());

        *store.storage.fail_writes.lock().unwrap() = false;
        assert!(store.undo_delete().unwrap());
        assert_eq!(text_of(&store), DOC);
        assert!(store.pending_undo().is_none());
    }

    #[test]
    fn failed_delete_write_keeps_previous_record() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        let first = store.delete("m-first1").unwrap();

        *store.storage.fail_writes.lock().unwrap() = true;
        assert!(store.delete("m-secnd2").is_err());
        assert_eq!(store.pending_undo(), Some(first));
    }

    #[test]
    fn undo_of_archived_entry_stays_archived() {
        let tmp = TempDir::new().unwrap();
        let text = format!(
            "{}\n***\n## Archive\n\n- 2025-06-01 10:00 Old\n  ^m-old001\n",
            DOC
        );
        let store = store_with(&tmp, &text);
        store.delete("m-old001").unwrap();
        assert!(store.undo_delete().unwrap());
        assert_eq!(text_of(&store), text);
        assert!(store.document().unwrap().is_archived("m-old001"));
    }

    #[test]
    fn concurrent_deletes_keep_the_last_written_record() {
        let tmp = TempDir::new().unwrap();
        let ids = ["m-aaaaa1", "m-aaaaa2", "m-aaaaa3", "m-aaaaa4", "m-aaaaa5", "m-aaaaa6"];
        let text: String = ids
            .iter()
            .map(|id| format!("- 2026-01-01 07:00 note {}\n  ^{}\n", id, id))
            .collect::<Vec<_>>()
            .join("\n");
        let store = Arc::new(store_with(&tmp, &text));

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let store = Arc::clone(&store);
                let id = id.to_string();
                std::thread::spawn(move || store.delete(&id).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Delete log records are written in write order, newest first on read
        let log = read_recovery_entries(&store.project().state_dir(), None);
        assert_eq!(log.len(), ids.len());
        let pending = store.pending_undo().unwrap();
        assert_eq!(pending.entry_block, log[0].body);
        let saved = read_state(&store.project().state_dir()).unwrap();
        assert_eq!(saved.pending_undo, Some(pending));
    }

    #[test]
    fn archive_moves_entry() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.archive("m-first1").unwrap();
        let doc = store.document().unwrap();
        assert_eq!(doc.entries.len(), 1);
        assert!(doc.is_archived("m-first1"));
        assert!(matches!(
            store.archive("m-first1"),
            Err(StoreError::AlreadyArchived(_))
        ));
        assert!(matches!(store.archive("m-nope00"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn failed_write_is_logged_and_leaves_document() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        *store.storage.fail_writes.lock().unwrap() = true;

        assert!(matches!(store.capture("lost?"), Err(StoreError::Storage(_))));
        assert_eq!(text_of(&store), DOC);
        assert!(!store.consume_self_write());

        let log = read_recovery_entries(&store.project().state_dir(), None);
        assert_eq!(log[0].category, RecoveryCategory::Write);
        assert!(log[0].body.contains("lost?"));
    }

    #[test]
    fn self_writes_are_consumed_once() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.capture("one").unwrap();
        assert!(store.consume_self_write());
        assert!(!store.consume_self_write());
        assert!(store.reload_if_external().unwrap().is_some());
    }

    #[test]
    fn external_change_is_noted_as_conflict() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        store.load().unwrap();
        store
            .storage
            .put(&store.document_path(), &format!("{}\n- 2026-01-01 07:00 Outside\n  ^m-outsd1\n", DOC));
        store.capture("inside").unwrap();

        let doc = store.document().unwrap();
        assert!(doc.find_entry("m-outsd1").is_some());
        let log = read_recovery_entries(&store.project().state_dir(), None);
        assert!(log.iter().any(|e| e.category == RecoveryCategory::Conflict));
    }

    #[test]
    fn subscribers_see_every_change() {
        let tmp = TempDir::new().unwrap();
        let store = store_with(&tmp, DOC);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        store.subscribe(move |doc| {
            counter.store(doc.entries.len(), Ordering::SeqCst);
        });

        store.load().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        store.capture("third").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        store.delete("m-first1").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_captures_are_serialized() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store_with(&tmp, DOC));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.capture(&format!("thread {}", i)).unwrap())
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let doc = store.load().unwrap();
        assert_eq!(doc.entries.len(), 10);
        for id in ids {
            assert!(doc.find_active(&id).is_some());
        }
    }
}
