use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Events sent from the watcher thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// The document was created, modified or replaced.
    Changed,
    /// The document was removed.
    Removed,
}

/// Watches one notes document for changes made on disk.
///
/// notify watches the parent directory, since atomic writes (ours and most
/// editors') replace the file rather than modifying it in place.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<DocumentEvent>,
}

impl DocumentWatcher {
    pub fn start(document: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        let target = document.to_path_buf();
        let file_name = target.file_name().map(|n| n.to_os_string());
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let Ok(event) = result else {
                    return;
                };
                let touches_document = event
                    .paths
                    .iter()
                    .any(|p| *p == target || p.file_name() == file_name.as_deref());
                if !touches_document {
                    return;
                }
                let kind = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => DocumentEvent::Changed,
                    EventKind::Remove(_) => DocumentEvent::Removed,
                    _ => return,
                };
                let _ = tx.send(kind);
            },
            Config::default(),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        Ok(DocumentWatcher {
            _watcher: watcher,
            rx,
        })
    }

    /// Non-blocking poll. Returns all queued events (may be empty).
    pub fn poll(&self) -> Vec<DocumentEvent> {
        let mut events = Vec::new();
        while let Ok(evt) = self.rx.try_recv() {
            events.push(evt);
        }
        events
    }

    /// Block up to `timeout` for the first event, then drain the rest so a
    /// burst of notifications (temp file, rename, metadata) reads as one.
    pub fn wait(&self, timeout: Duration) -> Vec<DocumentEvent> {
        let Ok(first) = self.rx.recv_timeout(timeout) else {
            return Vec::new();
        };
        std::thread::sleep(Duration::from_millis(50));
        let mut events = vec![first];
        events.extend(self.poll());
        events
    }
}
