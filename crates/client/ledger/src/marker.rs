//! The persisted record of which revisions are applied.

use crate::store::{Store, Txn, META_COLUMN};
use crate::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sp_revision::RevisionId;

const META_LEDGER_MARKER_KEY: &[u8] = b"LEDGER_MARKER";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRevision {
    pub id: RevisionId,
    pub applied_at: DateTime<Utc>,
}

/// Applied revisions in application order.
///
/// Only ever read and written through the transaction of the step it describes, so the marker and the schema cannot
/// disagree after a crash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMarker {
    applied: Vec<AppliedRevision>,
}

impl LedgerMarker {
    pub(crate) fn load(store: &Store, txn: &Txn<'_>) -> Result<Self, LedgerError> {
        let Some(bytes) = txn.get_cf(store.column(META_COLUMN), META_LEDGER_MARKER_KEY)? else {
            return Ok(Self::default());
        };
        bincode::deserialize(&bytes).map_err(|e| LedgerError::CorruptedMarker(e.to_string()))
    }

    pub(crate) fn save(&self, store: &Store, txn: &Txn<'_>) -> Result<(), LedgerError> {
        txn.put_cf(store.column(META_COLUMN), META_LEDGER_MARKER_KEY, bincode::serialize(self)?)?;
        Ok(())
    }

    /// Most recently applied revision.
    pub fn current(&self) -> Option<&RevisionId> {
        self.applied.last().map(|entry| &entry.id)
    }

    pub fn applied(&self) -> &[AppliedRevision] {
        &self.applied
    }

    pub fn is_applied(&self, id: &RevisionId) -> bool {
        self.applied.iter().any(|entry| entry.id == *id)
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub(crate) fn record_applied(&mut self, id: RevisionId, applied_at: DateTime<Utc>) {
        debug_assert!(!self.is_applied(&id));
        self.applied.push(AppliedRevision { id, applied_at });
    }

    pub(crate) fn record_reverted(&mut self, id: &RevisionId) -> bool {
        let before = self.applied.len();
        self.applied.retain(|entry| entry.id != *id);
        before != self.applied.len()
    }
}
