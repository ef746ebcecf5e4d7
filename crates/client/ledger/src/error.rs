use crate::catalog::CatalogError;
use crate::plan::Direction;
use itertools::Itertools;
use sp_revision::{RevisionFileError, RevisionId};
use std::path::PathBuf;

/// Exit code of the `migrate` binary for errors without a dedicated code.
pub const EXIT_OTHER: u8 = 1;
pub const EXIT_LOCK_CONTENTION: u8 = 3;
pub const EXIT_INTEGRITY: u8 = 4;
pub const EXIT_IRREVERSIBLE: u8 = 5;
pub const EXIT_CONFLICT: u8 = 6;

fn ids(ids: &[RevisionId]) -> String {
    ids.iter().join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to {direction} revision {revision}: {message}")]
    Integrity { revision: RevisionId, direction: Direction, message: String },

    #[error("Multiple heads are pending ({}), specify a target revision", ids(heads))]
    Conflict { heads: Vec<RevisionId> },

    #[error("Revision {revision} has no revert operation and cannot be downgraded")]
    Irreversible { revision: RevisionId },

    #[error("Ledger lock {path:?} is held by another migration run ({holder})")]
    LockContention { path: PathBuf, holder: String },

    #[error("Cannot {direction} revision {revision}: it is already {}", if *applied { "applied" } else { "unapplied" })]
    StateMismatch { revision: RevisionId, direction: Direction, applied: bool },

    #[error("Cannot {direction} revision {revision} before {}", ids(blocking))]
    FrontierViolation { revision: RevisionId, direction: Direction, blocking: Vec<RevisionId> },

    #[error("No revision matches `{0}`")]
    UnknownRevision(String),

    #[error("`{spec}` matches several revisions: {}", ids(candidates))]
    AmbiguousRevision { spec: String, candidates: Vec<RevisionId> },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Revision graph has a cycle through {}", ids(members))]
    Cycle { members: Vec<RevisionId> },

    #[error("Revision {0} is defined more than once")]
    DuplicateRevision(RevisionId),

    #[error("Revision {revision} references unknown revision {missing}")]
    MissingReference { revision: RevisionId, missing: RevisionId },

    #[error("Branch label `{label}` is declared by both {first} and {second}")]
    DuplicateBranchLabel { label: String, first: RevisionId, second: RevisionId },

    #[error("Root revision {0} needs a branch label, the history already has a root")]
    UnlabeledRoot(RevisionId),

    #[error("Invalid revision file {path:?}: {source}")]
    InvalidRevisionFile {
        path: PathBuf,
        #[source]
        source: RevisionFileError,
    },

    #[error("Store version {store_version} is newer than this binary supports ({binary_version})")]
    StoreNewerThanBinary { store_version: u32, binary_version: u32 },

    #[error("Ledger marker is corrupted: {0}")]
    CorruptedMarker(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration aborted")]
    Aborted,
}

impl LedgerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LedgerError::LockContention { .. } => EXIT_LOCK_CONTENTION,
            LedgerError::Integrity { .. } => EXIT_INTEGRITY,
            LedgerError::Irreversible { .. } => EXIT_IRREVERSIBLE,
            LedgerError::Conflict { .. } => EXIT_CONFLICT,
            _ => EXIT_OTHER,
        }
    }
}
