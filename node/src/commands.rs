//! Command handlers. Results are written to `out`, progress is logged to stderr.

use crate::cli::{Commands, HistoryArgs, MergeArgs, MigrateArgs, NewArgs};
use crate::cli::{LedgerSettings, DEFAULT_CONFIG_FILE};
use anyhow::Context;
use itertools::Itertools;
use sc_ledger::{Action, Direction, Ledger, ParentSelection, Revision, RevisionGraph, ScriptDirectory, Target};
use sp_revision::{RevisionDescriptor, RevisionId};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

pub fn run(
    command: Commands,
    settings: &LedgerSettings,
    config_file: Option<&Path>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match command {
        Commands::Init => init(settings, config_file, out),
        Commands::New(args) => new_revision(settings, args, out),
        Commands::Merge(args) => merge(settings, args, out),
        Commands::Upgrade(args) => migrate(settings, Direction::Upgrade, args, out),
        Commands::Downgrade(args) => migrate(settings, Direction::Downgrade, args, out),
        Commands::History(args) => history(settings, args, out),
        Commands::Current => current(settings, out),
        Commands::Heads => heads(settings, out),
        Commands::Show(args) => show(settings, &args.revision, out),
        Commands::Schema => schema(settings, out),
    }
}

fn open(settings: &LedgerSettings) -> anyhow::Result<Ledger> {
    let scripts = settings.scripts();
    Ledger::open(&settings.ledger_config(), &scripts)
        .with_context(|| format!("Opening ledger at {:?}", settings.db_path.display()))
}

fn init(settings: &LedgerSettings, config_file: Option<&Path>, out: &mut dyn Write) -> anyhow::Result<()> {
    let scripts = ScriptDirectory::init(&settings.script_location)?;
    writeln!(out, "Script directory: {}", scripts.versions_dir().display())?;

    let config_file = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    if config_file.exists() {
        tracing::info!("Keeping existing config file {:?}", config_file.display());
    } else {
        std::fs::write(config_file, settings.render(config_file)?)
            .with_context(|| format!("Writing config file {:?}", config_file.display()))?;
        writeln!(out, "Config file: {}", config_file.display())?;
    }

    // Opening creates the store and its lock directory.
    let ledger = open(settings)?;
    drop(ledger);
    writeln!(out, "Ledger store: {}", settings.db_path.display())?;
    Ok(())
}

fn new_revision(settings: &LedgerSettings, args: NewArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let NewArgs { message, head, root, branch_labels, depends_on, rev_id, format } = args;

    let mut descriptor = RevisionDescriptor::new(message);
    descriptor.id = rev_id.map(RevisionId::new).transpose().context("Invalid --rev-id")?;
    descriptor.branch_labels = branch_labels.into_iter().collect();
    descriptor.depends_on =
        depends_on.into_iter().map(RevisionId::new).collect::<Result<_, _>>().context("Invalid --depends-on")?;

    let parents = match (root, head) {
        (true, _) => ParentSelection::Root,
        (false, Some(head)) => ParentSelection::Explicit(vec![head]),
        (false, None) => ParentSelection::CurrentHead,
    };

    let (path, file) = settings.scripts().author(descriptor, parents, format.into())?;
    writeln!(out, "{} {}", file.header.id, path.display())?;
    Ok(())
}

fn merge(settings: &LedgerSettings, args: MergeArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let (path, file) = settings.scripts().merge(args.revisions, args.message, args.format.into())?;
    writeln!(out, "{} {}", file.header.id, path.display())?;
    Ok(())
}

fn migrate(
    settings: &LedgerSettings,
    direction: Direction,
    args: MigrateArgs,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let default_target = match direction {
        Direction::Upgrade => "head",
        Direction::Downgrade => "-1",
    };
    let target: Target = args.target.as_deref().unwrap_or(default_target).parse()?;
    let ledger = open(settings)?;

    if args.dry_run {
        let plan = match direction {
            Direction::Upgrade => ledger.plan_upgrade(&target)?,
            Direction::Downgrade => ledger.plan_downgrade(&target)?,
        };
        if plan.is_empty() {
            writeln!(out, "Nothing to {direction}")?;
        }
        for id in &plan.steps {
            writeln!(out, "{direction} {}", describe(ledger.graph(), id))?;
        }
        return Ok(());
    }

    let report = match direction {
        Direction::Upgrade => ledger.upgrade(&target)?,
        Direction::Downgrade => ledger.downgrade(&target)?,
    };
    if report.steps.is_empty() {
        writeln!(out, "Nothing to {direction}")?;
    }
    for id in &report.steps {
        writeln!(out, "{direction} {}", describe(ledger.graph(), id))?;
    }
    Ok(())
}

/// `<id> <message>`, or the bare id for revisions missing from the script directory.
fn describe(graph: &RevisionGraph, id: &RevisionId) -> String {
    match graph.get(id) {
        Some(revision) if !revision.header.message.is_empty() => format!("{id} {}", revision.header.message),
        _ => id.to_string(),
    }
}

fn labels(graph: &RevisionGraph, id: &RevisionId) -> String {
    let labels = graph.branches_of(id);
    if labels.is_empty() {
        String::new()
    } else {
        format!(" ({})", labels.iter().join(", "))
    }
}

fn history(settings: &LedgerSettings, args: HistoryArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    let ledger = open(settings)?;
    let graph = ledger.graph();

    if args.all {
        let marker = ledger.marker()?;
        let heads = graph.heads().into_iter().map(Revision::id).collect::<HashSet<_>>();
        for revision in ledger.revisions() {
            let id = revision.id();
            writeln!(
                out,
                "[{}] {}{}{}",
                if marker.is_applied(id) { "x" } else { " " },
                describe(graph, id),
                labels(graph, id),
                if heads.contains(id) { " (head)" } else { "" },
            )?;
        }
        return Ok(());
    }

    let history = ledger.history()?;
    if history.is_empty() {
        writeln!(out, "No revision applied")?;
    }
    for entry in &history {
        let missing = if entry.revision.is_none() { " (missing from script directory)" } else { "" };
        writeln!(out, "{} {}{missing}", entry.applied_at.format("%Y-%m-%d %H:%M:%S"), describe(graph, entry.id))?;
    }
    Ok(())
}

fn current(settings: &LedgerSettings, out: &mut dyn Write) -> anyhow::Result<()> {
    let ledger = open(settings)?;
    match ledger.current()? {
        None => writeln!(out, "none")?,
        Some(id) => {
            let is_head = ledger.graph().heads().iter().any(|head| head.id() == &id);
            writeln!(out, "{id}{}", if is_head { " (head)" } else { "" })?
        }
    }
    Ok(())
}

fn heads(settings: &LedgerSettings, out: &mut dyn Write) -> anyhow::Result<()> {
    let ledger = open(settings)?;
    for head in ledger.heads()? {
        let id = head.revision.id();
        writeln!(
            out,
            "{}{} ({})",
            describe(ledger.graph(), id),
            labels(ledger.graph(), id),
            if head.applied { "applied" } else { "pending" }
        )?;
    }
    Ok(())
}

fn write_action(out: &mut dyn Write, name: &str, action: Option<&Action>) -> anyhow::Result<()> {
    match action {
        None => writeln!(out, "{name}: irreversible")?,
        Some(Action::Native(_)) => writeln!(out, "{name}: <native>")?,
        Some(Action::Script(ops)) if ops.is_empty() => writeln!(out, "{name}: (empty)")?,
        Some(Action::Script(ops)) => {
            writeln!(out, "{name}:")?;
            for op in ops {
                writeln!(out, "  - {op}")?;
            }
        }
    }
    Ok(())
}

fn show(settings: &LedgerSettings, spec: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let ledger = open(settings)?;
    let revision = ledger.show(spec)?;
    let header = &revision.header;

    writeln!(out, "Revision: {}", header.id)?;
    writeln!(out, "Parents: {}", if header.is_root() { "<base>".to_string() } else { header.parents.iter().join(", ") })?;
    if !header.branch_labels.is_empty() {
        writeln!(out, "Branch labels: {}", header.branch_labels.iter().join(", "))?;
    }
    if !header.depends_on.is_empty() {
        writeln!(out, "Depends on: {}", header.depends_on.iter().join(", "))?;
    }
    writeln!(out, "Created: {}", header.created_at.to_rfc3339())?;
    if let Some(source) = &revision.source {
        writeln!(out, "Path: {}", source.display())?;
    }
    writeln!(out, "Applied: {}", ledger.marker()?.is_applied(revision.id()))?;
    writeln!(out, "\n    {}\n", header.message)?;
    write_action(out, "apply", Some(&revision.apply))?;
    write_action(out, "revert", revision.revert.as_ref())
}

fn schema(settings: &LedgerSettings, out: &mut dyn Write) -> anyhow::Result<()> {
    let ledger = open(settings)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&ledger.schema()?)?)?;
    Ok(())
}
