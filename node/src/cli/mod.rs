pub mod ledger;

use clap::{Args, Parser, Subcommand, ValueEnum};
pub use ledger::{LedgerParams, LedgerSettings, DEFAULT_CONFIG_FILE};
use sp_revision::FileFormat;
use std::path::PathBuf;

/// Strata schema-migration ledger
#[derive(Parser, Debug)]
#[command(name = "migrate", version, about, long_about = None)]
pub struct CliArgs {
    /// Configuration file (.toml, .json or .yaml). Defaults to `./strata.toml` when it exists.
    #[arg(env = "STRATA_CONFIG", long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log filter directives, such as `sc_ledger=debug`. Overrides `RUST_LOG`.
    #[arg(long, global = true, value_name = "FILTER")]
    pub log: Option<String>,

    #[clap(flatten)]
    pub ledger_params: LedgerParams,

    #[command(subcommand)]
    pub command: Commands,
}

/// Every command but `new` and `merge` opens the ledger store and holds its lock while running. Reads are serialized
/// with migration runs: they wait up to `--lock-timeout-ms`, then fail with exit code 3.
#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Create the script directory, a default configuration file and an empty ledger store
    Init,

    /// Generate a new revision file
    New(NewArgs),

    /// Generate a revision joining several heads
    Merge(MergeArgs),

    /// Apply pending revisions up to a target (default: `head`)
    Upgrade(MigrateArgs),

    /// Revert applied revisions down to a target (default: `-1`)
    Downgrade(MigrateArgs),

    /// List applied revisions in application order
    History(HistoryArgs),

    /// Show the most recently applied revision, or `none` when nothing is applied
    Current,

    /// List the heads of the revision graph
    Heads,

    /// Show one revision
    Show(ShowArgs),

    /// Print the current logical schema as JSON
    Schema,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum RevisionFormat {
    #[default]
    Yaml,
    Json,
}

impl From<RevisionFormat> for FileFormat {
    fn from(value: RevisionFormat) -> Self {
        match value {
            RevisionFormat::Yaml => Self::Yaml,
            RevisionFormat::Json => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct NewArgs {
    /// What the revision does, also used in the file name
    pub message: String,

    /// Parent revision. Defaults to the single current head.
    #[arg(long, value_name = "REV", conflicts_with = "root")]
    pub head: Option<String>,

    /// Start a new independent line of history. Needs `--branch-label` once the history has a root.
    #[arg(long)]
    pub root: bool,

    /// Label naming the line of history starting at this revision
    #[arg(long = "branch-label", value_name = "LABEL")]
    pub branch_labels: Vec<String>,

    /// Revision that must be applied first, even on another branch
    #[arg(long = "depends-on", value_name = "REV")]
    pub depends_on: Vec<String>,

    /// Explicit revision id instead of a generated one
    #[arg(long = "rev-id", value_name = "ID")]
    pub rev_id: Option<String>,

    #[arg(long, value_enum, default_value_t)]
    pub format: RevisionFormat,
}

#[derive(Debug, Clone, Args)]
pub struct MergeArgs {
    /// Heads to join
    #[arg(num_args = 2.., required = true, value_name = "REV")]
    pub revisions: Vec<String>,

    #[arg(short, long, default_value = "merge heads")]
    pub message: String,

    #[arg(long, value_enum, default_value_t)]
    pub format: RevisionFormat,
}

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// `head`, `heads`, `base`, `+N`, `-N`, a revision id or prefix, a branch label, `label@head` or `label@base`
    #[arg(allow_negative_numbers = true)]
    pub target: Option<String>,

    /// Print the steps without running them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct HistoryArgs {
    /// List every known revision with its applied state instead
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ShowArgs {
    /// Revision id, prefix or branch label
    pub revision: String,
}
