use std::fmt::Write;

use chrono::format::{Item, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, NaiveTime, TimeZone};

/// Pattern tokens, longest first so `MMMM` wins over `MM`.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("M", "%-m"),
    ("dddd", "%A"),
    ("ddd", "%a"),
    ("DD", "%d"),
    ("D", "%-d"),
    ("HH", "%H"),
    ("H", "%-H"),
    ("hh", "%I"),
    ("h", "%-I"),
    ("mm", "%M"),
    ("m", "%-M"),
    ("ss", "%S"),
    ("s", "%-S"),
    ("SSS", "%3f"),
    ("A", "%p"),
    ("a", "%P"),
    ("ZZ", "%z"),
    ("Z", "%:z"),
];

/// A user-facing timestamp pattern (`YYYY-MM-DD HH:mm`) and its chrono
/// translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
    strftime: String,
}

impl TimestampFormat {
    pub fn new(pattern: &str) -> Self {
        TimestampFormat {
            pattern: pattern.to_string(),
            strftime: translate_pattern(pattern),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    fn has_date(&self) -> bool {
        ["%Y", "%y", "%B", "%b", "%m", "%-m", "%d", "%-d"]
            .iter()
            .any(|spec| self.strftime.contains(spec))
    }

    fn items(&self) -> Vec<Item<'_>> {
        StrftimeItems::new(&self.strftime).collect()
    }

    /// Format an instant. Returns an empty string if the pattern cannot be
    /// rendered for this instant.
    pub fn format<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut out = String::new();
        if write!(out, "{}", instant.format_with_items(self.items().into_iter())).is_err() {
            out.clear();
        }
        out
    }

    /// Format epoch milliseconds in the local zone.
    pub fn format_millis(&self, millis: i64) -> String {
        match Local.timestamp_millis_opt(millis).single() {
            Some(dt) => self.format(&dt),
            None => String::new(),
        }
    }

    /// Strictly parse `candidate` as a whole: chrono must accept it and
    /// re-formatting the result must reproduce it exactly. Returns epoch
    /// milliseconds.
    ///
    /// `now` supplies the date for time-only patterns.
    pub fn parse_strict(&self, candidate: &str, now: &DateTime<Local>) -> Option<i64> {
        if candidate.is_empty() || candidate.trim() != candidate {
            return None;
        }

        let mut parsed = Parsed::new();
        chrono::format::parse(&mut parsed, candidate, self.items().into_iter()).ok()?;

        let date = if self.has_date() {
            parsed.to_naive_date().ok()?
        } else {
            now.date_naive()
        };
        let time = parsed.to_naive_time().unwrap_or(NaiveTime::MIN);
        let naive = date.and_time(time);

        let instant: DateTime<FixedOffset> = match parsed.to_fixed_offset() {
            Ok(offset) => offset.from_local_datetime(&naive).single()?,
            Err(_) => Local.from_local_datetime(&naive).earliest()?.fixed_offset(),
        };

        if self.format(&instant) != candidate {
            return None;
        }
        Some(instant.timestamp_millis())
    }
}

/// Translate a date pattern into a chrono strftime string. Text inside
/// `[...]` is copied literally.
pub fn translate_pattern(pattern: &str) -> String {
    let mut out = String::new();
    let mut rest = pattern;

    'outer: while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(close) = rest.find(']') {
                push_literal(&mut out, &rest[1..close]);
                rest = &rest[close + 1..];
                continue;
            }
        }
        for (token, spec) in TOKENS {
            if let Some(after) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = after;
                continue 'outer;
            }
        }
        push_literal(&mut out, &rest[..c.len_utf8()]);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn push_literal(out: &mut String, literal: &str) {
    for c in literal.chars() {
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
    }
}

/// A timestamp found at the front of an entry body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPrefix {
    pub millis: i64,
    /// Byte length of the prefix within the text it was found in
    pub len: usize,
}

/// Look for a timestamp at the start of `text`.
///
/// Candidate prefixes are tried from `pattern length + 5` characters down to
/// `pattern length - 2`, and the first strict parse wins. For patterns whose
/// rendered width differs a lot from their own length (`MMMM`, `dddd`) this
/// can miss real timestamps or pick up a timestamp-looking run of free text.
pub fn parse_timestamp_prefix(
    text: &str,
    format: &TimestampFormat,
    now: &DateTime<Local>,
) -> Option<TimestampPrefix> {
    let pattern_len = format.pattern().chars().count();
    if pattern_len == 0 {
        return None;
    }

    // Byte offset after each char, so candidates never split a code point
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .collect();

    let shortest = pattern_len.saturating_sub(2).max(1);
    for len in (shortest..=pattern_len + 5).rev() {
        let Some(&end) = boundaries.get(len - 1) else {
            continue;
        };
        if let Some(millis) = format.parse_strict(&text[..end], now) {
            return Some(TimestampPrefix { millis, len: end });
        }
    }
    None
}
