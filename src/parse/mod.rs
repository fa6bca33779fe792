pub mod block_id;
pub mod document_parser;
pub mod timestamp;

pub use block_id::{extract_id, generate_id, strip_id};
pub use document_parser::{frontmatter_end, parse_document, parse_document_at};
pub use timestamp::TimestampFormat;

/// Line that opens and closes frontmatter.
pub const FRONTMATTER_FENCE: &str = "---";

/// Line that starts the archive section.
pub const ARCHIVE_SEPARATOR: &str = "***";

/// Heading written after the archive separator.
pub const ARCHIVE_HEADING: &str = "## Archive";

/// Strip the two-space continuation indent from a block line, if present.
pub fn strip_indent(line: &str) -> &str {
    line.strip_prefix("  ").unwrap_or(line)
}
