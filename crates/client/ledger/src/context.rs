//! Migration context provided to each revision step.

use crate::catalog::Catalog;
use crate::plan::Direction;
use crate::LedgerError;
use sp_revision::RevisionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MigrationProgress {
    pub current_step: usize,
    pub total_steps: usize,
    pub message: String,
}

impl MigrationProgress {
    pub fn new(current_step: usize, total_steps: usize, message: impl Into<String>) -> Self {
        debug_assert!(current_step <= total_steps);
        Self { current_step, total_steps, message: message.into() }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&RevisionId, MigrationProgress) + Send + Sync>;

/// Context provided to each revision step.
///
/// Everything done through [`MigrationContext::catalog`] belongs to the step transaction: it is committed together with
/// the ledger marker, or discarded entirely when the step fails.
pub struct MigrationContext<'a> {
    catalog: Catalog<'a>,
    revision: &'a RevisionId,
    direction: Direction,
    progress_callback: Option<ProgressCallback>,
    abort_flag: Arc<AtomicBool>,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(
        catalog: Catalog<'a>,
        revision: &'a RevisionId,
        direction: Direction,
        abort_flag: Arc<AtomicBool>,
    ) -> Self {
        Self { catalog, revision, direction, progress_callback: None, abort_flag }
    }

    pub(crate) fn with_progress_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress_callback = callback;
        self
    }

    pub fn catalog(&self) -> &Catalog<'a> {
        &self.catalog
    }

    pub fn revision(&self) -> &RevisionId {
        self.revision
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn report_progress(&self, progress: MigrationProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(self.revision, progress);
        }
    }

    pub fn should_abort(&self) -> bool {
        self.abort_flag.load(Ordering::Relaxed)
    }

    /// Fails with [`LedgerError::Aborted`] once an abort was requested, rolling the step back.
    pub fn check_abort(&self) -> Result<(), LedgerError> {
        if self.should_abort() {
            return Err(LedgerError::Aborted);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreConfig};
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    fn with_context(
        abort_flag: Arc<AtomicBool>,
        callback: Option<ProgressCallback>,
        f: impl FnOnce(&MigrationContext<'_>),
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Store::open(dir.path(), &StoreConfig::default()).unwrap();
        let txn = store.transaction();
        let revision = RevisionId::new("aaaa").unwrap();
        let ctx = MigrationContext::new(Catalog::new(&store, &txn), &revision, Direction::Upgrade, abort_flag)
            .with_progress_callback(callback);
        f(&ctx);
    }

    #[test]
    fn test_report_progress_reaches_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: ProgressCallback = {
            let seen = Arc::clone(&seen);
            Arc::new(move |revision, progress| {
                seen.lock().unwrap().push((revision.to_string(), progress.current_step, progress.message));
            })
        };

        with_context(Arc::default(), Some(callback), |ctx| {
            ctx.report_progress(MigrationProgress::new(1, 2, "copying users"));
            ctx.report_progress(MigrationProgress::new(2, 2, "copying courses"));
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("aaaa".to_string(), 1, "copying users".to_string()),
                ("aaaa".to_string(), 2, "copying courses".to_string())
            ]
        );
    }

    #[test]
    fn test_report_progress_without_callback() {
        with_context(Arc::default(), None, |ctx| ctx.report_progress(MigrationProgress::new(0, 1, "idle")));
    }

    #[test]
    fn test_check_abort_follows_flag() {
        let abort_flag = Arc::new(AtomicBool::new(false));
        with_context(Arc::clone(&abort_flag), None, |ctx| {
            assert!(!ctx.should_abort());
            assert_matches!(ctx.check_abort(), Ok(()));

            abort_flag.store(true, Ordering::Relaxed);
            assert!(ctx.should_abort());
            assert_matches!(ctx.check_abort(), Err(LedgerError::Aborted));
        });
    }
}
