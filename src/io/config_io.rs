use std::fs;
use std::path::{Path, PathBuf};

use crate::io::recovery::atomic_write;
use crate::model::config::{CapturePosition, MomentsConfig};
use crate::model::project::Project;

pub const CONFIG_FILE: &str = "moments.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse moments.toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not edit moments.toml: {0}")]
    Edit(#[from] toml_edit::TomlError),
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Walk up from `start` looking for a directory that holds `moments.toml`.
/// Returns `None` when no ancestor has one.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Discover and load the project for `start`. Without a `moments.toml`
/// anywhere above it, `start` itself is the project with default settings.
pub fn discover_project(start: &Path) -> Result<Project, ConfigError> {
    let root = find_project_root(start).unwrap_or_else(|| start.to_path_buf());
    let config = load_config(&root)?;
    Ok(Project::new(root, config))
}

/// Read `moments.toml` in `root`. A missing file yields the defaults.
pub fn load_config(root: &Path) -> Result<MomentsConfig, ConfigError> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(MomentsConfig::default());
    }
    let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.clone(),
        source: e,
    })?;
    Ok(toml::from_str(&text)?)
}

/// Read the config, returning both the parsed config and the raw toml_edit
/// document for round-trip-safe editing. A missing file reads as empty.
pub fn read_config(root: &Path) -> Result<(MomentsConfig, toml_edit::DocumentMut), ConfigError> {
    let path = root.join(CONFIG_FILE);
    let text = if path.exists() {
        fs::read_to_string(&path).map_err(|e| ConfigError::Read {
            path: path.clone(),
            source: e,
        })?
    } else {
        String::new()
    };
    let config: MomentsConfig = toml::from_str(&text)?;
    let doc: toml_edit::DocumentMut = text.parse()?;
    Ok((config, doc))
}

/// Write the config document back, preserving comments and layout.
pub fn write_config(root: &Path, doc: &toml_edit::DocumentMut) -> Result<(), ConfigError> {
    atomic_write(&root.join(CONFIG_FILE), doc.to_string().as_bytes())?;
    Ok(())
}

/// Kinds of value each settable key accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Str,
    Bool,
    Position,
}

const KEYS: &[(&str, KeyKind)] = &[
    ("file.path", KeyKind::Str),
    ("file.auto_create", KeyKind::Bool),
    ("format.timestamp", KeyKind::Str),
    ("capture.position", KeyKind::Position),
    ("capture.trim_input", KeyKind::Bool),
];

fn key_kind(key: &str) -> Result<KeyKind, ConfigError> {
    KEYS.iter()
        .find(|(k, _)| *k == key)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
}

/// The names accepted by [`get_config_value`] and [`set_config_value`].
pub fn config_keys() -> impl Iterator<Item = &'static str> {
    KEYS.iter().map(|(k, _)| *k)
}

/// The effective value of a dotted key (defaults included), as a string.
pub fn get_config_value(config: &MomentsConfig, key: &str) -> Result<String, ConfigError> {
    key_kind(key)?;
    let value = match key {
        "file.path" => config.file.path.clone(),
        "file.auto_create" => config.file.auto_create.to_string(),
        "format.timestamp" => config.format.timestamp.clone(),
        "capture.position" => match config.capture.position {
            CapturePosition::Prepend => "prepend".to_string(),
            CapturePosition::Append => "append".to_string(),
        },
        "capture.trim_input" => config.capture.trim_input.to_string(),
        _ => return Err(ConfigError::UnknownKey(key.to_string())),
    };
    Ok(value)
}

/// Set a dotted key in the config document, creating its table if needed.
pub fn set_config_value(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    raw: &str,
) -> Result<(), ConfigError> {
    let kind = key_kind(key)?;
    let invalid = |reason: &str| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let value = match kind {
        KeyKind::Str => {
            if raw.trim().is_empty() {
                return Err(invalid("must not be empty"));
            }
            toml_edit::value(raw)
        }
        KeyKind::Bool => match raw {
            "true" => toml_edit::value(true),
            "false" => toml_edit::value(false),
            _ => return Err(invalid("expected true or false")),
        },
        KeyKind::Position => match raw {
            "prepend" | "append" => toml_edit::value(raw),
            _ => return Err(invalid("expected prepend or append")),
        },
    };

    let Some((table, field)) = key.split_once('.') else {
        return Err(ConfigError::UnknownKey(key.to_string()));
    };
    if !doc.contains_key(table) {
        doc[table] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc[table][field] = value;
    Ok(())
}
