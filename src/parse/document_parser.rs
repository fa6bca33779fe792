use std::collections::HashSet;

use chrono::{DateTime, Local};

use crate::model::entry::{Entry, EntrySpan, FrontmatterValue, ParseDiagnostic, ParsedDocument};
use crate::parse::block_id::{generate_id, strip_id, take_trailing_marker};
use crate::parse::timestamp::{TimestampFormat, parse_timestamp_prefix};
use crate::parse::{ARCHIVE_HEADING, ARCHIVE_SEPARATOR, FRONTMATTER_FENCE, strip_indent};

const CONTEXT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frontmatter {
    NotSeen,
    Open,
    Closed,
}

/// An entry block being accumulated during the scan
#[derive(Debug)]
struct Block {
    lines: Vec<String>,
    /// Offset of the `-` list marker
    start: usize,
    /// Offset of the last byte of the last non-blank line
    end: usize,
    archived: bool,
}

/// Parse a moments document using the current instant as the fallback
/// creation time.
///
/// Never fails: problems are reported in `errors`.
pub fn parse_document(text: &str, timestamp_format: &str) -> ParsedDocument {
    parse_document_at(text, &TimestampFormat::new(timestamp_format), &Local::now())
}

/// Parse a moments document with an explicit "now".
pub fn parse_document_at(
    text: &str,
    format: &TimestampFormat,
    now: &DateTime<Local>,
) -> ParsedDocument {
    let mut doc = ParsedDocument {
        original_text: text.to_string(),
        ..Default::default()
    };
    let mut registered: HashSet<String> = HashSet::new();

    let mut frontmatter = Frontmatter::NotSeen;
    let mut seen_content = false;
    let mut in_archive = false;
    let mut current: Option<Block> = None;

    let mut offset = 0;
    for raw_line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += raw_line.len();
        let line = raw_line.strip_suffix('\n').unwrap_or(raw_line);
        let content = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = content.trim();
        let line_end = line_start + line.len().saturating_sub(1);

        if frontmatter == Frontmatter::Open {
            if trimmed == FRONTMATTER_FENCE {
                frontmatter = Frontmatter::Closed;
            } else if let Some((key, value)) = content.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    doc.frontmatter
                        .insert(key.to_string(), FrontmatterValue::coerce(value.trim()));
                }
            }
            continue;
        }

        // Continuation of the open block: two-space indented or blank
        if let Some(block) = current.as_mut() {
            if trimmed.is_empty() {
                block.lines.push(strip_indent(content).to_string());
                continue;
            }
            if content.starts_with("  ") {
                block.lines.push(strip_indent(content).to_string());
                block.end = line_end;
                continue;
            }
        }

        if frontmatter == Frontmatter::NotSeen && !seen_content && trimmed == FRONTMATTER_FENCE {
            frontmatter = Frontmatter::Open;
            continue;
        }

        if trimmed == ARCHIVE_SEPARATOR {
            finish_block(current.take(), format, now, &mut doc, &mut registered);
            if doc.archive_start_offset.is_none() {
                doc.archive_start_offset = Some(line_start);
            }
            in_archive = true;
            seen_content = true;
            continue;
        }

        if in_archive && trimmed == ARCHIVE_HEADING {
            finish_block(current.take(), format, now, &mut doc, &mut registered);
            continue;
        }

        if let Some(first) = content.strip_prefix("- ") {
            finish_block(current.take(), format, now, &mut doc, &mut registered);
            current = Some(Block {
                lines: vec![first.to_string()],
                start: line_start,
                end: line_end,
                archived: in_archive,
            });
            seen_content = true;
            continue;
        }

        if !trimmed.is_empty() {
            // Any other top-level line ends the block and is not content
            finish_block(current.take(), format, now, &mut doc, &mut registered);
            seen_content = true;
        }
    }
    finish_block(current.take(), format, now, &mut doc, &mut registered);

    doc
}

/// Offset just past the closing frontmatter fence line (its newline
/// included), or `None` if the text has no closed frontmatter.
///
/// Uses the same opening rule as the parser: the fence must be the first
/// non-blank line.
pub fn frontmatter_end(text: &str) -> Option<usize> {
    let mut offset = 0;
    let mut open = false;
    for raw_line in text.split_inclusive('\n') {
        offset += raw_line.len();
        let trimmed = raw_line.trim();
        if open {
            if trimmed == FRONTMATTER_FENCE {
                return Some(offset);
            }
        } else if trimmed == FRONTMATTER_FENCE {
            open = true;
        } else if !trimmed.is_empty() {
            return None;
        }
    }
    None
}

/// Turn an accumulated block into an entry, or drop it if it has no text.
fn finish_block(
    block: Option<Block>,
    format: &TimestampFormat,
    now: &DateTime<Local>,
    doc: &mut ParsedDocument,
    registered: &mut HashSet<String>,
) {
    let Some(mut block) = block else {
        return;
    };

    let marker_id = take_trailing_marker(&mut block.lines);
    let swept = strip_id(&block.lines.join("\n"));
    let block_id = marker_id.or(swept.id);
    let text = swept.content;

    if text.trim().is_empty() {
        return;
    }

    let (created_at, raw) = match parse_timestamp_prefix(&text, format, now) {
        Some(prefix) => (prefix.millis, text[prefix.len..].trim_start().to_string()),
        None => (now.timestamp_millis(), text.clone()),
    };

    let (id, id_missing) = match block_id {
        Some(id) => (id, false),
        None => {
            let id = generate_id(Some(registered));
            doc.errors.push(ParseDiagnostic {
                message: format!("Entry missing block id, assigned: {}", id),
                context: raw.chars().take(CONTEXT_CHARS).collect(),
            });
            (id, true)
        }
    };

    registered.insert(id.clone());
    doc.spans
        .insert(id.clone(), EntrySpan::new(id.clone(), block.start, block.end));

    let entry = Entry {
        id,
        created_at,
        raw,
        raw_with_prefix: text,
        id_missing,
    };
    if block.archived {
        doc.archive_entries.push(entry);
    } else {
        doc.entries.push(entry);
    }
}
