//! Revision data model shared by the ledger and the command line.
//!
//! A revision is an immutable unit of schema change: a [`RevisionHeader`] placing it in the history graph, and the
//! forward (`apply`) and inverse (`revert`) [`SchemaOp`] lists. [`RevisionFile`] is the serialized form written by
//! [`generate`] at authoring time and read back by the ledger.

mod file;
pub mod generate;
mod id;
mod op;
pub mod schema;

pub use file::{FileFormat, RevisionFile, RevisionFileError, RevisionHeader};
pub use generate::{generate, RevisionDescriptor};
pub use id::{RevisionId, RevisionIdError, RESERVED_IDS};
pub use op::SchemaOp;
