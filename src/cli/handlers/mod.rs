mod init;
pub use init::cmd_init;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::config_io::{self, ConfigError};
use crate::io::recovery;
use crate::io::store::MomentStore;
use crate::io::watcher::{DocumentEvent, DocumentWatcher};
use crate::model::project::Project;
use crate::ops::check::{self, CheckError, CheckWarning};
use crate::ops::entry_ops::InsertPosition;
use crate::parse::block_id::is_valid_id;

/// Global override for project directory (set by -C flag)
static PROJECT_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;

    if let Some(ref dir) = cli.project_dir {
        let abs = std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?;
        set_project_dir(abs);
    }

    match cli.command {
        Commands::Init(args) => cmd_init(args, &start_dir()?),

        // Read commands
        Commands::List(args) => cmd_list(args, json),
        Commands::Show(args) => cmd_show(args, json),
        Commands::Check => cmd_check(json),
        Commands::Config(args) => cmd_config(args, json),
        Commands::Recovery(args) => cmd_recovery(args, json),
        Commands::Watch => cmd_watch(json),

        // Write commands
        Commands::Add(args) => cmd_add(args, json),
        Commands::Edit(args) => cmd_edit(args),
        Commands::Delete(args) => cmd_delete(args, json),
        Commands::Undo => cmd_undo(json),
        Commands::Archive(args) => cmd_archive(args),
    }
}

fn set_project_dir(dir: PathBuf) {
    PROJECT_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .replace(dir);
}

/// The -C directory, or the working directory.
fn start_dir() -> Result<PathBuf, std::io::Error> {
    let override_dir = PROJECT_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    match override_dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir(),
    }
}

fn load_project_cwd() -> Result<Project, ConfigError> {
    config_io::discover_project(&start_dir()?)
}

fn open_store() -> Result<MomentStore, ConfigError> {
    Ok(MomentStore::open(load_project_cwd()?))
}

fn print_json<T: serde::Serialize>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Reject ids that cannot name an entry before touching the document.
fn entry_id(id: &str) -> Result<&str, String> {
    if is_valid_id(id) {
        Ok(id)
    } else {
        Err(format!(
            "invalid entry id '{}' (expected m- followed by lowercase letters and digits)",
            id
        ))
    }
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_list(args: ListArgs, json: bool) -> CmdResult {
    let store = open_store()?;
    let doc = store.load()?;
    let format = store.timestamp_format();
    let selected = selected_entries(&doc, args.archived, args.all);

    if json {
        return print_json(&EntryListJson {
            entries: selected
                .iter()
                .map(|(e, archived)| entry_to_json(e, *archived, format))
                .collect(),
        });
    }

    if selected.is_empty() {
        println!("(no entries)");
    }
    for (entry, archived) in selected {
        println!("{}", format_entry_line(entry, archived, format));
    }
    Ok(())
}

fn cmd_show(args: IdArg, json: bool) -> CmdResult {
    let id = entry_id(&args.id)?;
    let store = open_store()?;
    let doc = store.load()?;
    let entry = doc
        .find_entry(id)
        .ok_or_else(|| format!("entry not found: {}", args.id))?;
    let archived = doc.is_archived(id);
    let format = store.timestamp_format();

    if json {
        return print_json(&entry_to_json(entry, archived, format));
    }
    for line in format_entry_detail(entry, archived, format) {
        println!("{}", line);
    }
    Ok(())
}

fn cmd_check(json: bool) -> CmdResult {
    let store = open_store()?;
    let doc = store.load()?;
    let result = check::check_document(&doc);

    if json {
        print_json(&result)?;
    } else {
        if !result.errors.is_empty() {
            println!("Errors:");
            for err in &result.errors {
                match err {
                    CheckError::DuplicateId { id, count } => {
                        println!("  {} appears {} times", id, count);
                    }
                }
            }
        }
        if !result.warnings.is_empty() {
            if !result.errors.is_empty() {
                println!();
            }
            println!("Warnings:");
            for warning in &result.warnings {
                match warning {
                    CheckWarning::MissingId { context, .. } => {
                        println!("  entry without marker: {}", context);
                    }
                    CheckWarning::MissingTimestamp { id } => {
                        println!("  {} has no timestamp", id);
                    }
                    CheckWarning::UnmarkedDocument => {
                        println!("  frontmatter has no moments-plugin marker");
                    }
                }
            }
        }
        if result.errors.is_empty() && result.warnings.is_empty() {
            println!(
                "ok: {} entries, {} archived",
                result.entries, result.archived
            );
        }
    }

    if result.valid {
        Ok(())
    } else {
        Err(format!("{} error(s) found", result.errors.len()).into())
    }
}

fn cmd_config(args: ConfigArgs, json: bool) -> CmdResult {
    let root = load_project_cwd()?.root;
    let (config, mut doc) = config_io::read_config(&root)?;

    let Some(key) = args.key else {
        if json {
            let map: serde_json::Map<String, serde_json::Value> = config_io::config_keys()
                .map(|k| {
                    let v = config_io::get_config_value(&config, k).unwrap_or_default();
                    (k.to_string(), serde_json::Value::String(v))
                })
                .collect();
            return print_json(&map);
        }
        for k in config_io::config_keys() {
            println!("{} = {}", k, config_io::get_config_value(&config, k)?);
        }
        return Ok(());
    };

    match args.value {
        None => {
            let value = config_io::get_config_value(&config, &key)?;
            if json {
                print_json(&serde_json::json!({ key: value }))?;
            } else {
                println!("{}", value);
            }
        }
        Some(value) => {
            config_io::set_config_value(&mut doc, &key, &value)?;
            // Reject edits that leave the file unreadable
            toml::from_str::<crate::model::config::MomentsConfig>(&doc.to_string())?;
            config_io::write_config(&root, &doc)?;
            if !json {
                println!("{} = {}", key, value);
            }
        }
    }
    Ok(())
}

fn cmd_recovery(args: RecoveryCmd, json: bool) -> CmdResult {
    let project = load_project_cwd()?;
    let state_dir = project.state_dir();

    match args.action {
        Some(RecoveryAction::Path) => {
            println!("{}", recovery::recovery_log_path(&state_dir).display());
        }
        Some(RecoveryAction::Prune(prune)) => {
            let before = prune
                .before
                .as_deref()
                .map(parse_before)
                .transpose()?;
            let removed = recovery::prune_recovery(&state_dir, before, prune.all)?;
            if json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else {
                println!("removed {} entries", removed);
            }
        }
        None => {
            let entries =
                recovery::read_recovery_entries(&state_dir, Some(args.limit.unwrap_or(10)));
            if json {
                let values: Vec<serde_json::Value> = entries.iter().map(|e| e.to_json()).collect();
                return print_json(&values);
            }
            if entries.is_empty() {
                println!("(recovery log is empty)");
            }
            for entry in entries {
                print!("{}", entry.to_display_markdown());
            }
        }
    }
    Ok(())
}

/// Accept RFC 3339 or a bare date (midnight UTC).
fn parse_before(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| format!("invalid --before timestamp: {}", s))
}

fn cmd_watch(json: bool) -> CmdResult {
    let store = open_store()?;
    let doc = store.load()?;
    let path = store.document_path();
    println!("watching {} ({} entries)", path.display(), doc.entries.len());

    let watcher = DocumentWatcher::start(&path)?;
    loop {
        let events = watcher.wait(Duration::from_secs(3600));
        if events.is_empty() {
            continue;
        }
        if events.iter().all(|e| *e == DocumentEvent::Removed) && !path.exists() {
            println!("document removed");
            continue;
        }
        if let Some(doc) = store.reload_if_external()? {
            if json {
                print_json(&serde_json::json!({
                    "event": "changed",
                    "entries": doc.entries.len(),
                    "archived": doc.archive_entries.len(),
                }))?;
            } else {
                println!(
                    "changed: {} entries, {} archived",
                    doc.entries.len(),
                    doc.archive_entries.len()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_add(args: AddArgs, json: bool) -> CmdResult {
    let store = open_store()?;
    let text = args.text.join(" ");
    let id = if args.append {
        store.capture_at(&text, InsertPosition::Append)?
    } else if args.prepend {
        store.capture_at(&text, InsertPosition::Prepend)?
    } else {
        store.capture(&text)?
    };

    if json {
        print_json(&CapturedJson { id })
    } else {
        println!("{}", id);
        Ok(())
    }
}

fn cmd_edit(args: EditArgs) -> CmdResult {
    let id = entry_id(&args.id)?;
    let store = open_store()?;
    store.edit(id, &args.text, !args.restamp)?;
    println!("{}", args.id);
    Ok(())
}

fn cmd_delete(args: IdArg, json: bool) -> CmdResult {
    let id = entry_id(&args.id)?;
    let store = open_store()?;
    let record = store.delete(id)?;
    if json {
        print_json(&deleted_to_json(&args.id, &record))
    } else {
        println!("deleted {} (undo with `mo undo` within 5 minutes)", args.id);
        Ok(())
    }
}

fn cmd_undo(json: bool) -> CmdResult {
    let store = open_store()?;
    let restored = store.undo_delete()?;
    if json {
        return print_json(&UndoJson { restored });
    }
    if restored {
        println!("restored");
        Ok(())
    } else {
        Err("nothing to undo".into())
    }
}

fn cmd_archive(args: IdArg) -> CmdResult {
    let id = entry_id(&args.id)?;
    let store = open_store()?;
    store.archive(id)?;
    println!("archived {}", args.id);
    Ok(())
}
