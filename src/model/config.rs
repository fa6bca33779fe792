use serde::{Deserialize, Serialize};

/// Configuration from moments.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MomentsConfig {
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Notes document, relative to the project directory
    #[serde(default = "default_path")]
    pub path: String,
    /// Create the document (with frontmatter) when it does not exist
    #[serde(default = "default_true")]
    pub auto_create: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            path: default_path(),
            auto_create: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Timestamp pattern prefixed to every entry (e.g. `YYYY-MM-DD HH:mm`)
    #[serde(default = "default_timestamp")]
    pub timestamp: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        FormatConfig {
            timestamp: default_timestamp(),
        }
    }
}

/// Where `capture` puts new entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturePosition {
    #[default]
    Prepend,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub position: CapturePosition,
    /// Trim surrounding whitespace from captured text
    #[serde(default = "default_true")]
    pub trim_input: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            position: CapturePosition::default(),
            trim_input: true,
        }
    }
}

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "YYYY-MM-DD HH:mm";

fn default_path() -> String {
    "Moments.md".to_string()
}

fn default_timestamp() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: MomentsConfig = toml::from_str("").unwrap();
        assert_eq!(config.file.path, "Moments.md");
        assert!(config.file.auto_create);
        assert_eq!(config.format.timestamp, "YYYY-MM-DD HH:mm");
        assert_eq!(config.capture.position, CapturePosition::Prepend);
        assert!(config.capture.trim_input);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: MomentsConfig = toml::from_str(
            r#"
[capture]
position = "append"

[format]
timestamp = "DD.MM.YYYY HH:mm:ss"
"#,
        )
        .unwrap();
        assert_eq!(config.capture.position, CapturePosition::Append);
        assert!(config.capture.trim_input);
        assert_eq!(config.format.timestamp, "DD.MM.YYYY HH:mm:ss");
        assert_eq!(config.file.path, "Moments.md");
    }
}
