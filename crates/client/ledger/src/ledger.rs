//! The migration ledger: applies and reverts revisions against the store, one transaction per step.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Ledger                                 │
//! │  - Holds the advisory lock for its whole lifetime               │
//! │  - Plans steps from a target (see [`crate::plan`])              │
//! │  - Runs each step in its own store transaction                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Step transaction                           │
//! │  - Loads the marker, checks the revision state                  │
//! │  - Runs the apply / revert action through the catalog           │
//! │  - Saves the marker and commits, or rolls everything back       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::catalog::{Catalog, SchemaSnapshot};
use crate::context::{MigrationContext, MigrationProgress, ProgressCallback};
use crate::graph::RevisionGraph;
use crate::lock::{LedgerLock, LockConfig};
use crate::marker::{AppliedRevision, LedgerMarker};
use crate::plan::{self, Direction, MigrationPlan, Target};
use crate::scripts::ScriptDirectory;
use crate::store::{Store, StoreConfig};
use crate::{LedgerError, Revision};
use chrono::{DateTime, Utc};
use sp_revision::RevisionId;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Directory of the RocksDB store. The lock file lives there too.
    pub db_path: PathBuf,
    pub store: StoreConfig,
    pub lock: LockConfig,
}

impl LedgerConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into(), store: StoreConfig::default(), lock: LockConfig::default() }
    }
}

/// Outcome of an upgrade or downgrade run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub direction: Direction,
    /// Revisions transitioned, in execution order.
    pub steps: Vec<RevisionId>,
    pub elapsed: Duration,
}

/// A graph head and whether it is applied.
#[derive(Debug, Clone)]
pub struct HeadStatus<'a> {
    pub revision: &'a Revision,
    pub applied: bool,
}

/// One applied revision, as yielded by [`History`].
#[derive(Debug, Clone)]
pub struct HistoryEntry<'a> {
    pub id: &'a RevisionId,
    pub applied_at: DateTime<Utc>,
    /// `None` when the revision is no longer in the script directory.
    pub revision: Option<&'a Revision>,
}

/// Applied revisions in application order. Iterating does not consume it.
#[derive(Debug, Clone)]
pub struct History<'a> {
    graph: &'a RevisionGraph,
    applied: Vec<AppliedRevision>,
}

impl History<'_> {
    pub fn iter(&self) -> HistoryIter<'_> {
        HistoryIter { graph: self.graph, inner: self.applied.iter() }
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

impl<'h> IntoIterator for &'h History<'_> {
    type Item = HistoryEntry<'h>;
    type IntoIter = HistoryIter<'h>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct HistoryIter<'h> {
    graph: &'h RevisionGraph,
    inner: std::slice::Iter<'h, AppliedRevision>,
}

impl<'h> Iterator for HistoryIter<'h> {
    type Item = HistoryEntry<'h>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(HistoryEntry { id: &entry.id, applied_at: entry.applied_at, revision: self.graph.get(&entry.id) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

fn log_progress(revision: &RevisionId, progress: MigrationProgress) {
    tracing::debug!("   {revision}: [{}/{}] {}", progress.current_step, progress.total_steps, progress.message);
}

/// Maps a failed step to the error reported to the caller. Aborts keep their identity, everything else is an
/// integrity failure carrying the whole cause chain.
fn step_error(err: anyhow::Error, revision: &RevisionId, direction: Direction) -> LedgerError {
    if err.chain().any(|cause| matches!(cause.downcast_ref::<LedgerError>(), Some(LedgerError::Aborted))) {
        return LedgerError::Aborted;
    }
    LedgerError::Integrity { revision: revision.clone(), direction, message: format!("{err:#}") }
}

pub struct Ledger {
    graph: RevisionGraph,
    store: Store,
    abort_flag: Arc<AtomicBool>,
    progress_callback: ProgressCallback,
    // Dropped last, after the store is closed.
    _lock: LedgerLock,
}

impl Ledger {
    /// Opens the ledger over the revisions of a script directory.
    pub fn open(config: &LedgerConfig, scripts: &ScriptDirectory) -> Result<Self, LedgerError> {
        Self::open_with(config, scripts.load()?)
    }

    /// Opens the ledger over an explicit set of revisions, such as revisions written in Rust.
    pub fn open_with(config: &LedgerConfig, revisions: impl IntoIterator<Item = Revision>) -> Result<Self, LedgerError> {
        let graph = RevisionGraph::build(revisions)?;
        let lock = LedgerLock::acquire(&config.db_path, &config.lock)?;
        let store = Store::open(&config.db_path, &config.store)?;
        tracing::debug!("Ledger opened with {} revision(s)", graph.len());

        Ok(Self {
            graph,
            store,
            abort_flag: Arc::new(AtomicBool::new(false)),
            progress_callback: Arc::new(log_progress),
            _lock: lock,
        })
    }

    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    /// Flag checked between steps and by [`MigrationContext::check_abort`]. Setting it stops the current run.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort_flag)
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress_callback = callback;
    }

    pub fn marker(&self) -> Result<LedgerMarker, LedgerError> {
        LedgerMarker::load(&self.store, &self.store.transaction())
    }

    /// Most recently applied revision.
    pub fn current(&self) -> Result<Option<RevisionId>, LedgerError> {
        Ok(self.marker()?.current().cloned())
    }

    pub fn history(&self) -> Result<History<'_>, LedgerError> {
        Ok(History { graph: &self.graph, applied: self.marker()?.applied().to_vec() })
    }

    pub fn heads(&self) -> Result<Vec<HeadStatus<'_>>, LedgerError> {
        let marker = self.marker()?;
        Ok(self
            .graph
            .heads()
            .into_iter()
            .map(|revision| HeadStatus { revision, applied: marker.is_applied(revision.id()) })
            .collect())
    }

    /// Every revision, prerequisites first.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> + '_ {
        self.graph.iter_topological()
    }

    pub fn show(&self, spec: &str) -> Result<&Revision, LedgerError> {
        self.graph.resolve(spec)
    }

    pub fn schema(&self) -> Result<SchemaSnapshot, LedgerError> {
        let txn = self.store.transaction();
        let snapshot = Catalog::new(&self.store, &txn).snapshot()?;
        Ok(snapshot)
    }

    pub fn plan_upgrade(&self, target: &Target) -> Result<MigrationPlan, LedgerError> {
        plan::plan_upgrade(&self.graph, &self.marker()?, target)
    }

    pub fn plan_downgrade(&self, target: &Target) -> Result<MigrationPlan, LedgerError> {
        plan::plan_downgrade(&self.graph, &self.marker()?, target)
    }

    /// Applies every pending revision up to `target`, prerequisites first.
    pub fn upgrade(&self, target: &Target) -> Result<MigrationReport, LedgerError> {
        let plan = self.plan_upgrade(target)?;
        self.run_plan(plan)
    }

    /// Reverts applied revisions down to `target`, newest first. Nothing runs if one of them is irreversible.
    pub fn downgrade(&self, target: &Target) -> Result<MigrationReport, LedgerError> {
        let plan = self.plan_downgrade(target)?;
        self.run_plan(plan)
    }

    /// Applies a single revision. Its prerequisites must already be applied.
    pub fn apply(&self, spec: &str) -> Result<(), LedgerError> {
        let idx = self.graph.resolve_idx(spec)?;
        self.execute_step(idx, Direction::Upgrade)
    }

    /// Reverts a single revision. Nothing built on it may still be applied.
    pub fn revert(&self, spec: &str) -> Result<(), LedgerError> {
        let idx = self.graph.resolve_idx(spec)?;
        self.execute_step(idx, Direction::Downgrade)
    }

    fn run_plan(&self, plan: MigrationPlan) -> Result<MigrationReport, LedgerError> {
        let started = Instant::now();
        if plan.is_empty() {
            tracing::info!("✅ Nothing to {}, ledger is up to date", plan.direction);
            return Ok(MigrationReport { direction: plan.direction, steps: vec![], elapsed: started.elapsed() });
        }

        tracing::info!("🔄 Starting to {} {} revision(s)", plan.direction, plan.len());
        for (i, id) in plan.steps.iter().enumerate() {
            if self.abort_flag.load(Ordering::Relaxed) {
                tracing::warn!("⚠️  Migration aborted after {i} of {} step(s)", plan.len());
                return Err(LedgerError::Aborted);
            }
            let idx = self.graph.idx(id).ok_or_else(|| LedgerError::UnknownRevision(id.to_string()))?;
            self.execute_step(idx, plan.direction)?;
        }

        let elapsed = started.elapsed();
        tracing::info!("🎉 Completed {} step(s) in {:.2}s", plan.len(), elapsed.as_secs_f64());
        Ok(MigrationReport { direction: plan.direction, steps: plan.steps, elapsed })
    }

    fn check_transition(&self, idx: usize, direction: Direction, marker: &LedgerMarker) -> Result<(), LedgerError> {
        let revision = self.graph.id(idx);
        let applied = marker.is_applied(revision);
        let (blocking, wrong_state): (Vec<_>, _) = match direction {
            Direction::Upgrade => {
                (self.graph.prerequisites(idx).filter(|&i| !marker.is_applied(self.graph.id(i))).collect(), applied)
            }
            Direction::Downgrade => {
                (self.graph.successors(idx).filter(|&i| marker.is_applied(self.graph.id(i))).collect(), !applied)
            }
        };

        if wrong_state {
            return Err(LedgerError::StateMismatch { revision: revision.clone(), direction, applied });
        }
        if !blocking.is_empty() {
            let mut blocking = blocking.into_iter().map(|i| self.graph.id(i).clone()).collect::<Vec<_>>();
            blocking.sort();
            blocking.dedup();
            return Err(LedgerError::FrontierViolation { revision: revision.clone(), direction, blocking });
        }
        Ok(())
    }

    /// Runs one revision in one direction. The action, the catalog writes and the marker update share a single
    /// transaction.
    #[tracing::instrument(skip(self), fields(revision = %self.graph.id(idx)))]
    fn execute_step(&self, idx: usize, direction: Direction) -> Result<(), LedgerError> {
        let revision = self.graph.revision(idx);
        let id = revision.id();
        let started = Instant::now();

        let txn = self.store.transaction();
        let mut marker = LedgerMarker::load(&self.store, &txn)?;
        self.check_transition(idx, direction, &marker)?;

        let action = match direction {
            Direction::Upgrade => &revision.apply,
            Direction::Downgrade => {
                revision.revert.as_ref().ok_or_else(|| LedgerError::Irreversible { revision: id.clone() })?
            }
        };

        tracing::info!("📦 Running {direction} of revision {id} ({})", revision.header.message);
        let ctx = MigrationContext::new(Catalog::new(&self.store, &txn), id, direction, Arc::clone(&self.abort_flag))
            .with_progress_callback(Some(Arc::clone(&self.progress_callback)));

        let result = action.run(&ctx);
        drop(ctx);
        if let Err(err) = result {
            let err = step_error(err, id, direction);
            tracing::error!("❌ {err}");
            // Dropping the transaction discards its writes even when the rollback fails.
            if let Err(rollback_err) = txn.rollback() {
                tracing::warn!("Rolling back {direction} of revision {id} failed: {rollback_err}");
            }
            return Err(err);
        }

        match direction {
            Direction::Upgrade => marker.record_applied(id.clone(), Utc::now()),
            Direction::Downgrade => {
                marker.record_reverted(id);
            }
        }
        marker.save(&self.store, &txn)?;
        txn.commit()?;

        let elapsed = started.elapsed();
        tracing::info!(
            target: "ledger_steps",
            direction = %direction,
            revision = %id,
            elapsed_ms = elapsed.as_millis() as u64,
            "{direction} {id}"
        );
        Ok(())
    }
}
