use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One captured moment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier (`m-` + lowercase alphanumerics)
    pub id: String,
    /// Creation instant in epoch milliseconds
    pub created_at: i64,
    /// Body with timestamp prefix and identity marker removed
    pub raw: String,
    /// Body including the timestamp prefix (identity marker still removed)
    pub raw_with_prefix: String,
    /// True when the source block had no identity marker and one was assigned
    #[serde(default)]
    pub id_missing: bool,
}

impl Entry {
    /// First line of the body, used for listings.
    pub fn first_line(&self) -> &str {
        self.raw.lines().next().unwrap_or("")
    }
}

/// Byte range of one entry's block within a specific text snapshot.
///
/// Both ends are inclusive: `start` is the `-` of the list marker and `end`
/// is the last byte before the block's trailing newline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpan {
    pub id: String,
    pub start: usize,
    pub end: usize,
}

impl EntrySpan {
    pub fn new(id: impl Into<String>, start: usize, end: usize) -> Self {
        EntrySpan {
            id: id.into(),
            start,
            end,
        }
    }

    /// The exact source bytes of the block in `text`, if the span fits it.
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        if self.start > self.end {
            return None;
        }
        text.get(self.start..=self.end)
    }
}

/// A frontmatter value after flat `key: value` coercion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FrontmatterValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl FrontmatterValue {
    /// Coerce a raw value: `true`/`false` become booleans, all-digit strings
    /// become integers, anything else stays a string.
    pub fn coerce(raw: &str) -> Self {
        match raw {
            "true" => FrontmatterValue::Bool(true),
            "false" => FrontmatterValue::Bool(false),
            _ if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => raw
                .parse()
                .map(FrontmatterValue::Int)
                .unwrap_or_else(|_| FrontmatterValue::Str(raw.to_string())),
            _ => FrontmatterValue::Str(raw.to_string()),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            FrontmatterValue::Bool(b) => *b,
            FrontmatterValue::Int(n) => *n != 0,
            FrontmatterValue::Str(s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for FrontmatterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontmatterValue::Bool(b) => write!(f, "{}", b),
            FrontmatterValue::Int(n) => write!(f, "{}", n),
            FrontmatterValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// A non-fatal problem found (and repaired) while parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDiagnostic {
    pub message: String,
    /// First 50 characters of the affected entry body
    pub context: String,
}

/// Frontmatter key that marks a document as a moments file.
pub const FORMAT_MARKER_KEY: &str = "moments-plugin";

/// The result of parsing one text snapshot
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub frontmatter: IndexMap<String, FrontmatterValue>,
    /// Active entries in document order
    pub entries: Vec<Entry>,
    /// Entries below the archive separator, in document order
    pub archive_entries: Vec<Entry>,
    pub errors: Vec<ParseDiagnostic>,
    /// The exact text the spans refer to
    pub original_text: String,
    pub spans: HashMap<String, EntrySpan>,
    /// Byte offset of the `***` separator line, if the document has an archive
    pub archive_start_offset: Option<usize>,
}

impl ParsedDocument {
    /// Whether the frontmatter carries the format marker with a truthy value.
    pub fn is_moments_document(&self) -> bool {
        self.frontmatter
            .get(FORMAT_MARKER_KEY)
            .is_some_and(FrontmatterValue::is_truthy)
    }

    pub fn find_entry(&self, id: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .chain(self.archive_entries.iter())
            .find(|e| e.id == id)
    }

    pub fn find_active(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn is_archived(&self, id: &str) -> bool {
        self.archive_entries.iter().any(|e| e.id == id)
    }

    pub fn span(&self, id: &str) -> Option<&EntrySpan> {
        self.spans.get(id)
    }

    /// Total number of entries across the active list and the archive.
    pub fn len(&self) -> usize {
        self.entries.len() + self.archive_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
