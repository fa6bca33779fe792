use std::collections::HashSet;

use chrono::{DateTime, Local};

use crate::model::config::CapturePosition;
use crate::model::entry::EntrySpan;
use crate::parse::block_id::{generate_id, marker};
use crate::parse::timestamp::TimestampFormat;
use crate::parse::{ARCHIVE_HEADING, ARCHIVE_SEPARATOR, frontmatter_end, parse_document_at};

/// Where a new or restored block goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPosition {
    /// Directly after the frontmatter (top of the document otherwise)
    Prepend,
    /// Before the archive separator (end of the document otherwise)
    Append,
    /// Directly after the block with this id; prepends if it is gone
    After(String),
    /// First block of the archive section, which is created if missing
    ArchiveTop,
}

impl From<CapturePosition> for InsertPosition {
    fn from(p: CapturePosition) -> Self {
        match p {
            CapturePosition::Prepend => InsertPosition::Prepend,
            CapturePosition::Append => InsertPosition::Append,
        }
    }
}

/// Result of inserting a new entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insertion {
    pub text: String,
    pub id: String,
}

// ---------------------------------------------------------------------------
// Block construction
// ---------------------------------------------------------------------------

/// Build a canonical entry block (no trailing newline):
///
/// ```text
/// - <timestamp> <first line>
///   <continuation>
///   ^m-<id>
/// ```
pub fn build_block(content: &str, timestamp: &str, id: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let normalized = normalized.trim_start_matches('\n').trim_end();
    let mut lines = normalized.split('\n');

    let first = lines.next().unwrap_or("");
    let mut out = match (timestamp.is_empty(), first.is_empty()) {
        (true, _) => format!("- {}", first),
        (false, true) => format!("- {}", timestamp),
        (false, false) => format!("- {} {}", timestamp, first),
    };

    for line in lines {
        out.push('\n');
        if !line.trim().is_empty() {
            out.push_str("  ");
            out.push_str(line);
        }
    }

    out.push_str("\n  ");
    out.push_str(&marker(id));
    out
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Insert a new entry stamped with the current instant.
pub fn insert_entry(
    text: &str,
    content: &str,
    position: InsertPosition,
    timestamp_format: &str,
) -> String {
    insert_entry_at(
        text,
        content,
        &position,
        &TimestampFormat::new(timestamp_format),
        &Local::now(),
    )
    .text
}

/// Insert a new entry stamped with `now`, returning the new text and the
/// id assigned to the entry.
pub fn insert_entry_at(
    text: &str,
    content: &str,
    position: &InsertPosition,
    format: &TimestampFormat,
    now: &DateTime<Local>,
) -> Insertion {
    let doc = parse_document_at(text, format, now);
    let existing: HashSet<String> = doc
        .entries
        .iter()
        .chain(doc.archive_entries.iter())
        .map(|e| e.id.clone())
        .collect();
    let id = generate_id(Some(&existing));

    let block = build_block(content, &format.format(now), &id);
    Insertion {
        text: splice_block(text, position, &block, format, now),
        id,
    }
}

/// Replace the block at `span` with a rebuilt block for `new_content`.
///
/// The identity marker is always `span.id`. With `keep_original_timestamp`
/// the entry's current creation time is reused, otherwise it is restamped.
/// Returns `text` unchanged if the id is no longer in the document.
pub fn replace_entry_span(
    text: &str,
    span: &EntrySpan,
    new_content: &str,
    timestamp_format: &str,
    keep_original_timestamp: bool,
) -> String {
    replace_entry_span_at(
        text,
        span,
        new_content,
        &TimestampFormat::new(timestamp_format),
        keep_original_timestamp,
        &Local::now(),
    )
}

pub fn replace_entry_span_at(
    text: &str,
    span: &EntrySpan,
    new_content: &str,
    format: &TimestampFormat,
    keep_original_timestamp: bool,
    now: &DateTime<Local>,
) -> String {
    let doc = parse_document_at(text, format, now);
    let Some(entry) = doc.find_entry(&span.id) else {
        return text.to_string();
    };
    if span.slice(text).is_none() {
        return text.to_string();
    }

    let timestamp = if keep_original_timestamp {
        format.format_millis(entry.created_at)
    } else {
        format.format(now)
    };
    let block = build_block(new_content, &timestamp, &span.id);

    let mut out = String::with_capacity(text.len() + block.len());
    out.push_str(&text[..span.start]);
    out.push_str(&block);
    out.push_str(&text[span.end + 1..]);
    out
}

/// Remove the block at `span` together with its trailing newline.
///
/// Blank lines left at the seam are collapsed to one, or to none at the
/// start or end of the document.
pub fn delete_entry_span(text: &str, span: &EntrySpan) -> String {
    if span.slice(text).is_none() {
        return text.to_string();
    }

    let mut cut_end = span.end + 1;
    if text[cut_end..].starts_with('\n') {
        cut_end += 1;
    }
    let mut prefix = &text[..span.start];
    let mut suffix = &text[cut_end..];

    let leading = leading_blank_line_ends(suffix);
    let trailing = trailing_blank_line_starts(prefix);

    if suffix.trim().is_empty() {
        // Deleted the last block: drop the blank lines it leaves behind
        if let Some(&start) = trailing.last() {
            prefix = &prefix[..start];
        }
        if let Some(&end) = leading.last() {
            suffix = &suffix[end..];
        }
    } else if prefix.trim().is_empty() {
        if let Some(&end) = leading.last() {
            suffix = &suffix[end..];
        }
    } else {
        let mut excess = (leading.len() + trailing.len()).saturating_sub(1);
        let from_suffix = excess.min(leading.len());
        if from_suffix > 0 {
            suffix = &suffix[leading[from_suffix - 1]..];
            excess -= from_suffix;
        }
        if excess > 0 {
            prefix = &prefix[..trailing[excess - 1]];
        }
    }

    let mut out = String::with_capacity(prefix.len() + suffix.len());
    out.push_str(prefix);
    out.push_str(suffix);
    out
}

/// Move an active entry into the archive section, creating the section if
/// needed. The block's original bytes (marker line included) are kept
/// verbatim. Returns `text` unchanged if the id is not an active entry.
pub fn move_to_archive(text: &str, span: &EntrySpan, timestamp_format: &str) -> String {
    let format = TimestampFormat::new(timestamp_format);
    let now = Local::now();

    let doc = parse_document_at(text, &format, &now);
    if doc.find_active(&span.id).is_none() {
        return text.to_string();
    }
    let Some(fresh) = doc.span(&span.id).cloned() else {
        return text.to_string();
    };
    let Some(block) = fresh.slice(text) else {
        return text.to_string();
    };

    let remaining = delete_entry_span(text, &fresh);
    let base = if parse_document_at(&remaining, &format, &now)
        .archive_start_offset
        .is_some()
    {
        remaining
    } else {
        with_archive_section(&remaining)
    };
    place_block(&base, base.len(), block.trim_end_matches(['\r', '\n']))
}

/// Put an existing block back into the document verbatim.
pub fn restore_entry_block(
    text: &str,
    block: &str,
    position: &InsertPosition,
    timestamp_format: &str,
) -> String {
    let format = TimestampFormat::new(timestamp_format);
    splice_block(
        text,
        position,
        block.trim_end_matches(['\r', '\n']),
        &format,
        &Local::now(),
    )
}

// ---------------------------------------------------------------------------
// Placement helpers
// ---------------------------------------------------------------------------

fn splice_block(
    text: &str,
    position: &InsertPosition,
    block: &str,
    format: &TimestampFormat,
    now: &DateTime<Local>,
) -> String {
    if *position == InsertPosition::ArchiveTop
        && parse_document_at(text, format, now)
            .archive_start_offset
            .is_none()
    {
        let base = with_archive_section(text);
        return place_block(&base, base.len(), block);
    }
    let point = insertion_point(text, position, format, now);
    place_block(text, point, block)
}

fn insertion_point(
    text: &str,
    position: &InsertPosition,
    format: &TimestampFormat,
    now: &DateTime<Local>,
) -> usize {
    match position {
        InsertPosition::ArchiveTop => parse_document_at(text, format, now)
            .archive_start_offset
            .map_or(text.len(), |start| archive_body_start(text, start)),
        InsertPosition::Prepend => frontmatter_end(text).unwrap_or(0),
        InsertPosition::Append => parse_document_at(text, format, now)
            .archive_start_offset
            .unwrap_or(text.len()),
        InsertPosition::After(id) => {
            let doc = parse_document_at(text, format, now);
            match doc.span(id) {
                Some(span) if doc.find_entry(id).is_some() => {
                    let mut point = span.end + 1;
                    if text[point..].starts_with('\n') {
                        point += 1;
                    }
                    point
                }
                _ => frontmatter_end(text).unwrap_or(0),
            }
        }
    }
}

/// Offset just past the archive separator line at `separator` and the
/// `## Archive` heading that follows it, if there is one.
fn archive_body_start(text: &str, separator: usize) -> usize {
    let line_after = |from: usize| text[from..].find('\n').map_or(text.len(), |p| from + p + 1);
    let mut point = line_after(separator);
    let mut cursor = point;
    while cursor < text.len() {
        let next = line_after(cursor);
        let line = text[cursor..next].trim();
        if line.is_empty() {
            cursor = next;
            continue;
        }
        if line == ARCHIVE_HEADING {
            point = next;
        }
        break;
    }
    point
}

/// `text` with an empty archive section (separator and heading) appended.
fn with_archive_section(text: &str) -> String {
    let body = trim_trailing_blank_lines(text);
    let mut out = String::with_capacity(body.len() + 32);
    out.push_str(body);
    if !body.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(ARCHIVE_SEPARATOR);
    out.push('\n');
    out.push_str(ARCHIVE_HEADING);
    out.push('\n');
    out
}

/// Splice `block` in at `point` with exactly one blank line on each side
/// (none before it at the very top, none after it at the very end).
fn place_block(text: &str, point: usize, block: &str) -> String {
    let head = trim_trailing_blank_lines(&text[..point]);
    let tail = trim_leading_blank_lines(&text[point..]);

    let mut out = String::with_capacity(text.len() + block.len() + 4);
    if !head.is_empty() {
        out.push_str(head);
        out.push_str("\n\n");
    }
    out.push_str(block);
    out.push('\n');
    if !tail.is_empty() {
        out.push('\n');
        out.push_str(tail);
    }
    out
}

/// `s` without its trailing whitespace-only lines and without the newline
/// ending its last content line.
fn trim_trailing_blank_lines(s: &str) -> &str {
    let mut end = s.len();
    loop {
        let head = &s[..end];
        match head.rfind('\n') {
            Some(p) if head[p + 1..].trim().is_empty() => end = p,
            Some(_) => return head,
            None => return if head.trim().is_empty() { "" } else { head },
        }
    }
}

/// `s` starting at its first line that is not whitespace-only.
fn trim_leading_blank_lines(s: &str) -> &str {
    let mut start = 0;
    loop {
        let rest = &s[start..];
        match rest.find('\n') {
            Some(p) if rest[..p].trim().is_empty() => start += p + 1,
            Some(_) => return rest,
            None => return if rest.trim().is_empty() { "" } else { rest },
        }
    }
}

/// Offsets just past each whitespace-only line at the start of `s`.
fn leading_blank_line_ends(s: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut start = 0;
    while let Some(p) = s[start..].find('\n') {
        if !s[start..start + p].trim().is_empty() {
            break;
        }
        start += p + 1;
        ends.push(start);
    }
    ends
}

/// Start offsets of the whitespace-only lines at the end of `s`, nearest
/// first. `s` must end at a line boundary.
fn trailing_blank_line_starts(s: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut end = s.len();
    while end > 0 && s[..end].ends_with('\n') {
        let body = &s[..end - 1];
        let line_start = body.rfind('\n').map_or(0, |p| p + 1);
        if !body[line_start..].trim().is_empty() {
            break;
        }
        starts.push(line_start);
        end = line_start;
    }
    starts
}
