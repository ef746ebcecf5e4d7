//! Migration targets and the planner turning a target into an ordered list of steps.

use crate::graph::RevisionGraph;
use crate::marker::LedgerMarker;
use crate::LedgerError;
use itertools::Itertools;
use sp_revision::RevisionId;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upgrade => write!(f, "apply"),
            Direction::Downgrade => write!(f, "revert"),
        }
    }
}

/// Where an upgrade or downgrade should stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The single head of the graph (`head`, `latest`).
    Head,
    /// Every head (`heads`).
    Heads,
    /// Nothing applied (`base`, `earliest`).
    Base,
    /// `+N` or `-N` steps from the current state.
    Relative(i64),
    /// A revision id, unique id prefix, branch label, `label@head` or `label@base`.
    Revision(String),
}

impl FromStr for Target {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(match s {
            "" => return Err(LedgerError::InvalidTarget("empty target".into())),
            "head" | "latest" => Target::Head,
            "heads" => Target::Heads,
            "base" | "earliest" => Target::Base,
            _ if s.starts_with(['+', '-']) => {
                let steps = s.parse::<i64>().map_err(|_| LedgerError::InvalidTarget(format!("`{s}` is not a step count")))?;
                Target::Relative(steps)
            }
            _ => Target::Revision(s.to_string()),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => write!(f, "head"),
            Target::Heads => write!(f, "heads"),
            Target::Base => write!(f, "base"),
            Target::Relative(steps) => write!(f, "{steps:+}"),
            Target::Revision(spec) => write!(f, "{spec}"),
        }
    }
}

/// Ordered steps of a migration, all in the same direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    pub direction: Direction,
    pub steps: Vec<RevisionId>,
}

impl MigrationPlan {
    fn new(direction: Direction, steps: Vec<RevisionId>) -> Self {
        Self { direction, steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

fn applied_set(graph: &RevisionGraph, marker: &LedgerMarker) -> HashSet<usize> {
    marker.applied().iter().filter_map(|entry| graph.idx(&entry.id)).collect()
}

fn upgrade_to(graph: &RevisionGraph, applied: &HashSet<usize>, targets: &[usize]) -> Vec<RevisionId> {
    let pending = targets
        .iter()
        .flat_map(|&idx| graph.ancestors(idx).into_iter().chain([idx]))
        .filter(|idx| !applied.contains(idx))
        .collect::<HashSet<_>>();
    graph.topo_order(&pending).into_iter().map(|idx| graph.id(idx).clone()).collect()
}

fn head_plan(graph: &RevisionGraph, applied: &HashSet<usize>) -> Result<Vec<RevisionId>, LedgerError> {
    let pending_heads = graph.heads_idx().into_iter().filter(|idx| !applied.contains(idx)).collect::<Vec<_>>();
    if pending_heads.len() > 1 {
        return Err(LedgerError::Conflict { heads: pending_heads.iter().map(|&idx| graph.id(idx).clone()).collect() });
    }
    Ok(upgrade_to(graph, applied, &pending_heads))
}

/// Plans the revisions to apply to reach `target`, prerequisites first.
pub fn plan_upgrade(
    graph: &RevisionGraph,
    marker: &LedgerMarker,
    target: &Target,
) -> Result<MigrationPlan, LedgerError> {
    let applied = applied_set(graph, marker);
    let steps = match target {
        Target::Head => head_plan(graph, &applied)?,
        Target::Heads => upgrade_to(graph, &applied, &graph.heads_idx()),
        Target::Relative(steps) if *steps >= 0 => {
            let mut plan = head_plan(graph, &applied)?;
            let wanted = *steps as usize;
            if wanted > plan.len() {
                return Err(LedgerError::InvalidTarget(format!(
                    "cannot upgrade {wanted} revision(s), only {} pending",
                    plan.len()
                )));
            }
            plan.truncate(wanted);
            plan
        }
        Target::Revision(spec) => upgrade_to(graph, &applied, &[graph.resolve_idx(spec)?]),
        Target::Base | Target::Relative(_) => {
            return Err(LedgerError::InvalidTarget(format!("`{target}` is not an upgrade target")));
        }
    };
    Ok(MigrationPlan::new(Direction::Upgrade, steps))
}

/// Plans the revisions to revert to reach `target`, most recently applied first.
///
/// Fails with [`LedgerError::Irreversible`] before anything runs if one of the steps has no revert.
pub fn plan_downgrade(
    graph: &RevisionGraph,
    marker: &LedgerMarker,
    target: &Target,
) -> Result<MigrationPlan, LedgerError> {
    let applied_newest_first = marker.applied().iter().rev().map(|entry| &entry.id);
    let steps: Vec<RevisionId> = match target {
        Target::Base => applied_newest_first.cloned().collect(),
        Target::Relative(steps) if *steps <= 0 => {
            let wanted = steps.unsigned_abs() as usize;
            if wanted > marker.applied().len() {
                return Err(LedgerError::InvalidTarget(format!(
                    "cannot downgrade {wanted} revision(s), only {} applied",
                    marker.applied().len()
                )));
            }
            applied_newest_first.take(wanted).cloned().collect()
        }
        Target::Revision(spec) => {
            let idx = graph.resolve_idx(spec)?;
            let id = graph.id(idx);
            if !marker.is_applied(id) {
                return Err(LedgerError::InvalidTarget(format!("revision {id} is not applied")));
            }
            let descendants = graph.descendants(idx);
            applied_newest_first
                .filter(|applied| graph.idx(applied).is_some_and(|i| descendants.contains(&i)))
                .cloned()
                .collect()
        }
        Target::Head | Target::Heads | Target::Relative(_) => {
            return Err(LedgerError::InvalidTarget(format!("`{target}` is not a downgrade target")));
        }
    };

    for id in &steps {
        let revision = graph.get(id).ok_or_else(|| LedgerError::UnknownRevision(id.to_string()))?;
        if !revision.is_reversible() {
            return Err(LedgerError::Irreversible { revision: id.clone() });
        }
    }
    Ok(MigrationPlan::new(Direction::Downgrade, steps))
}

impl fmt::Display for MigrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.steps.iter().join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::common::{id, rev, rev_at};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rstest::rstest;

    fn marker(applied: &[&str]) -> LedgerMarker {
        let mut marker = LedgerMarker::default();
        for s in applied {
            marker.record_applied(id(s), Utc::now());
        }
        marker
    }

    fn steps(plan: MigrationPlan) -> Vec<String> {
        plan.steps.into_iter().map(|id| id.to_string()).collect()
    }

    /// root -> aaaa -> bbbb, and root -> cccc on a labeled side branch.
    fn branched() -> RevisionGraph {
        let mut side = rev_at("cccc", &["root"], 3);
        side.header.branch_labels.insert("side".into());
        RevisionGraph::build([rev_at("root", &[], 0), rev_at("aaaa", &["root"], 1), rev_at("bbbb", &["aaaa"], 2), side])
            .unwrap()
    }

    #[rstest]
    #[case("head", Target::Head)]
    #[case("latest", Target::Head)]
    #[case("heads", Target::Heads)]
    #[case("earliest", Target::Base)]
    #[case("+2", Target::Relative(2))]
    #[case("-1", Target::Relative(-1))]
    #[case("side@base", Target::Revision("side@base".into()))]
    #[case("212ebd", Target::Revision("212ebd".into()))]
    fn test_parse_target(#[case] input: &str, #[case] expected: Target) {
        assert_eq!(input.parse::<Target>().unwrap(), expected);
    }

    #[test]
    fn test_parse_target_invalid() {
        assert_matches!("+x".parse::<Target>(), Err(LedgerError::InvalidTarget(_)));
        assert_matches!("".parse::<Target>(), Err(LedgerError::InvalidTarget(_)));
        assert_eq!(Target::Relative(-3).to_string(), "-3");
        assert_eq!(Target::Relative(2).to_string(), "+2");
    }

    #[test]
    fn test_upgrade_head_conflict_and_explicit_targets() {
        let graph = branched();
        assert_matches!(
            plan_upgrade(&graph, &marker(&[]), &Target::Head),
            Err(LedgerError::Conflict { heads }) if heads.len() == 2
        );
        assert_eq!(steps(plan_upgrade(&graph, &marker(&[]), &Target::Heads).unwrap()), ["root", "aaaa", "bbbb", "cccc"]);
        assert_eq!(steps(plan_upgrade(&graph, &marker(&[]), &"side".parse().unwrap()).unwrap()), ["root", "cccc"]);
        assert_eq!(steps(plan_upgrade(&graph, &marker(&["root", "cccc"]), &Target::Head).unwrap()), ["aaaa", "bbbb"]);
    }

    #[test]
    fn test_upgrade_relative() {
        let graph = RevisionGraph::build([rev("aaaa", &[]), rev("bbbb", &["aaaa"]), rev("cccc", &["bbbb"])]).unwrap();
        assert_eq!(steps(plan_upgrade(&graph, &marker(&["aaaa"]), &Target::Relative(1)).unwrap()), ["bbbb"]);
        assert_matches!(
            plan_upgrade(&graph, &marker(&["aaaa"]), &Target::Relative(3)),
            Err(LedgerError::InvalidTarget(_))
        );
        assert_matches!(plan_upgrade(&graph, &marker(&[]), &Target::Base), Err(LedgerError::InvalidTarget(_)));
    }

    #[test]
    fn test_downgrade_to_mid_chain_on_branched_graph() {
        let graph = branched();
        let applied = marker(&["root", "aaaa", "cccc", "bbbb"]);
        assert_eq!(steps(plan_downgrade(&graph, &applied, &"aaaa".parse().unwrap()).unwrap()), ["bbbb"]);
        assert_eq!(steps(plan_downgrade(&graph, &applied, &"root".parse().unwrap()).unwrap()), ["bbbb", "cccc", "aaaa"]);
        assert_eq!(steps(plan_downgrade(&graph, &applied, &Target::Relative(-2)).unwrap()), ["bbbb", "cccc"]);
        assert_eq!(steps(plan_downgrade(&graph, &applied, &Target::Base).unwrap()).len(), 4);
        assert_matches!(
            plan_downgrade(&graph, &marker(&["root"]), &"aaaa".parse().unwrap()),
            Err(LedgerError::InvalidTarget(_))
        );
        assert_matches!(plan_downgrade(&graph, &applied, &Target::Relative(-5)), Err(LedgerError::InvalidTarget(_)));
    }

    #[test]
    fn test_downgrade_checks_reversibility_up_front() {
        let mut irreversible = rev("bbbb", &["aaaa"]);
        irreversible.revert = None;
        let graph = RevisionGraph::build([rev("aaaa", &[]), irreversible, rev("cccc", &["bbbb"])]).unwrap();
        let applied = marker(&["aaaa", "bbbb", "cccc"]);
        assert_matches!(
            plan_downgrade(&graph, &applied, &Target::Base),
            Err(LedgerError::Irreversible { revision }) if revision.as_str() == "bbbb"
        );
        assert_eq!(steps(plan_downgrade(&graph, &applied, &Target::Relative(-1)).unwrap()), ["cccc"]);
    }
}
