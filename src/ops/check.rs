use indexmap::IndexMap;
use serde::Serialize;

use crate::model::entry::ParsedDocument;

/// Structured result from `mo check`, suitable for --json output.
#[derive(Debug, Default, Serialize)]
pub struct CheckResult {
    pub valid: bool,
    pub entries: usize,
    pub archived: usize,
    pub errors: Vec<CheckError>,
    pub warnings: Vec<CheckWarning>,
}

/// Something that makes span-based editing unreliable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CheckError {
    /// Several blocks carry the same marker; only the last one is
    /// addressable by id
    #[serde(rename = "duplicate_id")]
    DuplicateId { id: String, count: usize },
}

/// A non-critical issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CheckWarning {
    /// Block has no identity marker; the id was synthesized for this parse
    /// only
    #[serde(rename = "missing_id")]
    MissingId { id: String, context: String },
    /// Block does not start with a timestamp in the configured pattern
    #[serde(rename = "missing_timestamp")]
    MissingTimestamp { id: String },
    /// Frontmatter does not carry the format marker
    #[serde(rename = "unmarked_document")]
    UnmarkedDocument,
}

/// Validate a parsed document. Read-only.
///
/// Checks performed:
/// 1. Identity markers are unique across active and archived entries
/// 2. Every block carries an identity marker
/// 3. Every block starts with a parseable timestamp
/// 4. The frontmatter carries the format marker
pub fn check_document(doc: &ParsedDocument) -> CheckResult {
    let mut result = CheckResult {
        entries: doc.entries.len(),
        archived: doc.archive_entries.len(),
        ..Default::default()
    };

    let mut counts: IndexMap<&str, usize> = IndexMap::new();
    for entry in doc.entries.iter().chain(doc.archive_entries.iter()) {
        *counts.entry(entry.id.as_str()).or_default() += 1;
    }
    for (id, count) in counts {
        if count > 1 {
            result.errors.push(CheckError::DuplicateId {
                id: id.to_string(),
                count,
            });
        }
    }

    for entry in doc.entries.iter().chain(doc.archive_entries.iter()) {
        if entry.id_missing {
            let context = doc
                .errors
                .iter()
                .find(|d| d.message.ends_with(&entry.id))
                .map(|d| d.context.clone())
                .unwrap_or_default();
            result.warnings.push(CheckWarning::MissingId {
                id: entry.id.clone(),
                context,
            });
        }
        if entry.raw == entry.raw_with_prefix {
            result.warnings.push(CheckWarning::MissingTimestamp {
                id: entry.id.clone(),
            });
        }
    }

    if !doc.is_moments_document() {
        result.warnings.push(CheckWarning::UnmarkedDocument);
    }

    result.valid = result.errors.is_empty();
    result
}
