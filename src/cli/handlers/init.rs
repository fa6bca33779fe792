use std::fs;
use std::path::Path;

use crate::cli::commands::InitArgs;
use crate::io::config_io::{self, CONFIG_FILE};
use crate::io::storage::{FsStorage, Storage};
use crate::model::project::STATE_DIR;

const CONFIG_TEMPLATE: &str = r##"# moments: timestamped notes in one markdown file

[file]
# notes document, relative to this directory
path = "Moments.md"
# create the document (with its frontmatter marker) when it is missing
auto_create = true

[format]
# YYYY YY MMMM MMM MM M DD D dddd ddd HH H hh h mm m ss s SSS A a ZZ Z
# text in [brackets] is literal
timestamp = "YYYY-MM-DD HH:mm"

[capture]
position = "prepend"          # "prepend" or "append"
trim_input = true
"##;

/// Appended to an existing .gitignore
const GITIGNORE_ENTRY: &str = ".moments/\n";

pub fn cmd_init(args: InitArgs, dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = dir.join(CONFIG_FILE);
    if config_path.exists() && !args.force {
        return Err(format!(
            "{} already exists in {} (use --force to overwrite)",
            CONFIG_FILE,
            dir.display()
        )
        .into());
    }

    if let Some(parent) = dir.parent()
        && let Some(parent_root) = config_io::find_project_root(parent)
    {
        eprintln!("Note: parent project found at {}/", parent_root.display());
    }

    fs::create_dir_all(dir)?;
    fs::write(&config_path, CONFIG_TEMPLATE)?;
    fs::create_dir_all(dir.join(STATE_DIR))?;

    let project = config_io::discover_project(dir)?;
    let document = project.document_path();
    let existed = document.exists();
    FsStorage.ensure_exists(&document, true)?;

    let gitignore = dir.join(".gitignore");
    if gitignore.exists() {
        let current = fs::read_to_string(&gitignore)?;
        if !current.lines().any(|l| l.trim() == GITIGNORE_ENTRY.trim()) {
            let mut updated = current;
            if !updated.is_empty() && !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(GITIGNORE_ENTRY);
            fs::write(&gitignore, updated)?;
        }
    }

    println!("Initialized moments in {}", dir.display());
    if existed {
        println!("  using existing {}", project.config.file.path);
    } else {
        println!("  created {}", project.config.file.path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::MomentsConfig;
    use tempfile::TempDir;

    #[test]
    fn template_parses_to_defaults() {
        let config: MomentsConfig = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let defaults = MomentsConfig::default();
        assert_eq!(config.file.path, defaults.file.path);
        assert_eq!(config.format.timestamp, defaults.format.timestamp);
        assert_eq!(config.capture.position, defaults.capture.position);
    }

    #[test]
    fn init_creates_config_and_document() {
        let tmp = TempDir::new().unwrap();
        cmd_init(InitArgs { force: false }, tmp.path()).unwrap();
        assert!(tmp.path().join(CONFIG_FILE).exists());
        let doc = fs::read_to_string(tmp.path().join("Moments.md")).unwrap();
        assert_eq!(doc, "---\nmoments-plugin: true\n---\n");
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILE), "# mine\n").unwrap();
        assert!(cmd_init(InitArgs { force: false }, tmp.path()).is_err());
        assert_eq!(
            fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap(),
            "# mine\n"
        );
        cmd_init(InitArgs { force: true }, tmp.path()).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap(),
            CONFIG_TEMPLATE
        );
    }

    #[test]
    fn init_keeps_existing_document() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Moments.md"), "- 2026-01-02 09:15 kept\n  ^m-keep01\n").unwrap();
        cmd_init(InitArgs { force: false }, tmp.path()).unwrap();
        let doc = fs::read_to_string(tmp.path().join("Moments.md")).unwrap();
        assert!(doc.contains("^m-keep01"));
    }

    #[test]
    fn init_updates_gitignore_once() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".gitignore"), "target").unwrap();
        cmd_init(InitArgs { force: false }, tmp.path()).unwrap();
        cmd_init(InitArgs { force: true }, tmp.path()).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join(".gitignore")).unwrap(),
            "target\n.moments/\n"
        );
    }
}
