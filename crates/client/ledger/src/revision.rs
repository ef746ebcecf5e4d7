use crate::context::{MigrationContext, MigrationProgress};
use anyhow::Context as _;
use sp_revision::{RevisionFile, RevisionHeader, RevisionId, SchemaOp};
use std::fmt;
use std::path::{Path, PathBuf};

/// Signature of a revision operation written in Rust.
pub type MigrationFn = fn(&MigrationContext<'_>) -> anyhow::Result<()>;

/// One direction of a revision: the forward `apply` or the inverse `revert`.
#[derive(Clone)]
pub enum Action {
    /// Declarative ops, as read from a revision file.
    Script(Vec<SchemaOp>),
    /// Code compiled into the host program.
    Native(MigrationFn),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Script(ops) => f.debug_tuple("Script").field(ops).finish(),
            Action::Native(_) => f.write_str("Native(..)"),
        }
    }
}

impl Action {
    pub(crate) fn run(&self, ctx: &MigrationContext<'_>) -> anyhow::Result<()> {
        match self {
            Action::Script(ops) => {
                for (i, op) in ops.iter().enumerate() {
                    ctx.check_abort()?;
                    ctx.report_progress(MigrationProgress::new(i + 1, ops.len(), op.to_string()));
                    ctx.catalog().apply(op).with_context(|| format!("op #{} ({op})", i + 1))?;
                }
                Ok(())
            }
            Action::Native(migrate) => migrate(ctx),
        }
    }
}

/// An immutable, versioned unit of schema change with its forward and inverse operations.
#[derive(Debug, Clone)]
pub struct Revision {
    pub header: RevisionHeader,
    pub apply: Action,
    /// `None` for irreversible revisions.
    pub revert: Option<Action>,
    /// File the revision was loaded from.
    pub source: Option<PathBuf>,
}

impl Revision {
    pub fn from_file(file: RevisionFile, source: &Path) -> Self {
        Self {
            header: file.header,
            apply: Action::Script(file.apply),
            revert: file.revert.map(Action::Script),
            source: Some(source.to_path_buf()),
        }
    }

    pub fn script(header: RevisionHeader, apply: Vec<SchemaOp>, revert: Option<Vec<SchemaOp>>) -> Self {
        Self { header, apply: Action::Script(apply), revert: revert.map(Action::Script), source: None }
    }

    pub fn native(header: RevisionHeader, apply: MigrationFn, revert: Option<MigrationFn>) -> Self {
        Self { header, apply: Action::Native(apply), revert: revert.map(Action::Native), source: None }
    }

    pub fn id(&self) -> &RevisionId {
        &self.header.id
    }

    pub fn is_reversible(&self) -> bool {
        self.revert.is_some()
    }
}
