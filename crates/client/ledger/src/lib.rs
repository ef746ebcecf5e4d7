//! Schema-migration ledger.
//!
//! Revisions form a directed acyclic graph (see [`RevisionGraph`]). The [`Ledger`] applies and reverts them against a
//! logical schema [`catalog`] persisted in RocksDB, and records which revisions are applied in a [`LedgerMarker`]
//! written in the same transaction as each step.
//!
//! # Files
//!
//! - `<script_location>/versions/*.{yaml,yml,json}`: revision files, see [`ScriptDirectory`]
//! - `<db_path>/`: the RocksDB store (catalog, seed data, marker)
//! - `<db_path>/.strata.lock`: lock file held while a ledger is open

pub mod catalog;
mod context;
mod error;
mod graph;
mod ledger;
pub mod lock;
mod marker;
pub mod plan;
mod revision;
mod scripts;
pub mod store;

pub use catalog::{CatalogError, SchemaSnapshot};
pub use context::{MigrationContext, MigrationProgress, ProgressCallback};
pub use error::{LedgerError, EXIT_CONFLICT, EXIT_INTEGRITY, EXIT_IRREVERSIBLE, EXIT_LOCK_CONTENTION, EXIT_OTHER};
pub use graph::RevisionGraph;
pub use ledger::{HeadStatus, History, HistoryEntry, HistoryIter, Ledger, LedgerConfig, MigrationReport};
pub use lock::LockConfig;
pub use marker::{AppliedRevision, LedgerMarker};
pub use plan::{Direction, MigrationPlan, Target};
pub use revision::{Action, MigrationFn, Revision};
pub use scripts::{ParentSelection, ScriptDirectory, VERSIONS_DIR};
pub use store::StoreConfig;

#[cfg(test)]
mod tests;
