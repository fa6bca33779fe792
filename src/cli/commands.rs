use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "mo", about = concat!("moments v", env!("CARGO_PKG_VERSION"), " - timestamped notes in one markdown file"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different project directory
    #[arg(short = 'C', long = "project-dir", global = true)]
    pub project_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create moments.toml and the notes document in the current directory
    Init(InitArgs),
    /// Capture a new entry
    Add(AddArgs),
    /// List entries (newest first, as they appear in the document)
    List(ListArgs),
    /// Show one entry
    Show(IdArg),
    /// Replace the text of an entry
    Edit(EditArgs),
    /// Delete an entry (undo within 5 minutes with `mo undo`)
    Delete(IdArg),
    /// Restore the most recently deleted entry
    Undo,
    /// Move an entry into the archive section
    Archive(IdArg),
    /// Validate the document (missing markers, duplicate ids)
    Check,
    /// Read or set a value in moments.toml
    Config(ConfigArgs),
    /// Watch the document and report external changes
    Watch,
    /// View or manage the recovery log
    Recovery(RecoveryCmd),
}

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing moments.toml
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct AddArgs {
    /// Entry text (joined with spaces; use quotes for newlines)
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,
    /// Put the entry at the end of the active list
    #[arg(long, conflicts_with = "prepend")]
    pub append: bool,
    /// Put the entry at the top of the document
    #[arg(long)]
    pub prepend: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// List archived entries instead of active ones
    #[arg(long, conflicts_with = "all")]
    pub archived: bool,
    /// List active and archived entries
    #[arg(long)]
    pub all: bool,
}

#[derive(Args)]
pub struct IdArg {
    /// Entry id (e.g. m-k3x9q2)
    pub id: String,
}

#[derive(Args)]
pub struct EditArgs {
    /// Entry id
    pub id: String,
    /// New entry text
    pub text: String,
    /// Stamp the entry with the current time instead of keeping its original one
    #[arg(long)]
    pub restamp: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Dotted key (e.g. format.timestamp); omit to list every key
    pub key: Option<String>,
    /// New value; omit to print the current one
    pub value: Option<String>,
}

// ---------------------------------------------------------------------------
// Recovery log
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct RecoveryCmd {
    #[command(subcommand)]
    pub action: Option<RecoveryAction>,
    /// Maximum number of entries to show (default: 10)
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Subcommand)]
pub enum RecoveryAction {
    /// Remove old entries
    Prune(RecoveryPruneArgs),
    /// Print the absolute path to the recovery log
    Path,
}

#[derive(Args)]
pub struct RecoveryPruneArgs {
    /// Remove entries older than this timestamp (default: 30 days ago)
    #[arg(long)]
    pub before: Option<String>,
    /// Remove all entries
    #[arg(long)]
    pub all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_joins_words() {
        let cli = Cli::parse_from(["mo", "add", "--append", "coffee", "with", "Ana"]);
        match cli.command {
            Commands::Add(args) => {
                assert!(args.append);
                assert_eq!(args.text.join(" "), "coffee with Ana");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["mo", "list", "--json", "-C", "/tmp/notes"]);
        assert!(cli.json);
        assert_eq!(cli.project_dir.as_deref(), Some("/tmp/notes"));
    }

    #[test]
    fn append_conflicts_with_prepend() {
        assert!(Cli::try_parse_from(["mo", "add", "--append", "--prepend", "x"]).is_err());
    }
}
