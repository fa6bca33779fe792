use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::Utc;
use rand::Rng;
use regex::Regex;

/// Prefix shared by every entry id.
pub const ID_PREFIX: &str = "m-";

const SUFFIX_LEN: usize = 6;
const MAX_ATTEMPTS: usize = 100;
const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A line that is nothing but an identity marker.
static MARKER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\^(m-[a-z0-9]+)\s*$").expect("valid regex"));

/// An identity marker at the end of a line, with any whitespace before it.
static MARKER_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\^(m-[a-z0-9]+)\s*$").expect("valid regex"));

/// Result of removing a trailing identity marker from a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedId {
    pub content: String,
    pub id: Option<String>,
}

/// Generate a fresh id (`m-` + 6 random lowercase alphanumerics).
///
/// Retries against `existing` up to 100 times, then falls back to a
/// timestamp-based id that is not re-checked.
pub fn generate_id(existing: Option<&HashSet<String>>) -> String {
    generate_id_with(existing, &mut rand::thread_rng())
}

fn generate_id_with(existing: Option<&HashSet<String>>, rng: &mut impl Rng) -> String {
    for _ in 0..MAX_ATTEMPTS {
        let id = format!("{}{}", ID_PREFIX, random_suffix(rng, SUFFIX_LEN));
        match existing {
            Some(set) if set.contains(&id) => continue,
            _ => return id,
        }
    }
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    format!(
        "{}{}{}",
        ID_PREFIX,
        to_base36(millis),
        random_suffix(rng, 3)
    )
}

fn random_suffix(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize] as char);
        n /= 36;
    }
    digits.iter().rev().collect()
}

/// Extract the id from a marker at the end of `line`, if any.
pub fn extract_id(line: &str) -> Option<String> {
    MARKER_SUFFIX
        .captures(line)
        .map(|caps| caps[1].to_string())
}

/// Render the canonical marker for an id (`^m-xxxxxx`).
pub fn marker(id: &str) -> String {
    format!("^{}", id)
}

/// Remove a trailing identity marker from a block's text.
///
/// Handles both placements: a marker on its own last line (the line and any
/// blank lines left before it are dropped) and a marker suffixed to the last
/// content line (only the marker is removed).
pub fn strip_id(text: &str) -> StrippedId {
    let mut lines: Vec<String> = text.split('\n').map(|l| l.to_string()).collect();
    let id = take_trailing_marker(&mut lines);
    StrippedId {
        content: lines.join("\n"),
        id,
    }
}

/// Line-level form of [`strip_id`], operating on an already-split block.
pub(crate) fn take_trailing_marker(lines: &mut Vec<String>) -> Option<String> {
    trim_blank_tail(lines);
    let last = lines.last()?;

    if let Some(caps) = MARKER_LINE.captures(last) {
        let id = caps[1].to_string();
        lines.pop();
        trim_blank_tail(lines);
        return Some(id);
    }

    if let Some(caps) = MARKER_SUFFIX.captures(last) {
        let id = caps[1].to_string();
        let cut = caps.get(0).map_or(last.len(), |m| m.start());
        let kept = last[..cut].to_string();
        if let Some(slot) = lines.last_mut() {
            *slot = kept;
        }
        return Some(id);
    }

    None
}

fn trim_blank_tail(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
}

/// Whether `id` has the shape of an entry id.
pub fn is_valid_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX).is_some_and(|rest| {
        !rest.is_empty()
            && rest
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    })
}
