//! Revision history as an arena-backed directed acyclic graph.
//!
//! Nodes are addressed by their position in the arena. Edges go both ways: `parents`/`dependencies` point at what
//! must be applied first, `children`/`dependents` at what must be reverted first.

use crate::{LedgerError, Revision};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use sp_revision::RevisionId;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

#[derive(Debug)]
struct Node {
    revision: Revision,
    parents: Vec<usize>,
    dependencies: Vec<usize>,
    children: Vec<usize>,
    dependents: Vec<usize>,
}

/// Deterministic ordering among revisions that are otherwise unordered: creation time, then id.
type OrderKey = (DateTime<Utc>, RevisionId);

#[derive(Debug, Default)]
pub struct RevisionGraph {
    nodes: Vec<Node>,
    index: HashMap<RevisionId, usize>,
    labels: HashMap<String, usize>,
}

impl RevisionGraph {
    /// Builds and validates the graph: unique ids and branch labels, no dangling references, no cycles, and a branch
    /// label on every root but one.
    pub fn build(revisions: impl IntoIterator<Item = Revision>) -> Result<Self, LedgerError> {
        let mut graph = Self::default();

        for revision in revisions {
            let idx = graph.nodes.len();
            if graph.index.insert(revision.id().clone(), idx).is_some() {
                return Err(LedgerError::DuplicateRevision(revision.id().clone()));
            }
            for label in &revision.header.branch_labels {
                if let Some(&first) = graph.labels.get(label) {
                    return Err(LedgerError::DuplicateBranchLabel {
                        label: label.clone(),
                        first: graph.nodes[first].revision.id().clone(),
                        second: revision.id().clone(),
                    });
                }
                graph.labels.insert(label.clone(), idx);
            }
            graph.nodes.push(Node { revision, parents: vec![], dependencies: vec![], children: vec![], dependents: vec![] });
        }

        for idx in 0..graph.nodes.len() {
            let header = &graph.nodes[idx].revision.header;
            let resolve = |id: &RevisionId| {
                graph.index.get(id).copied().ok_or_else(|| LedgerError::MissingReference {
                    revision: header.id.clone(),
                    missing: id.clone(),
                })
            };
            let parents = header.parents.iter().map(resolve).collect::<Result<Vec<_>, _>>()?;
            let dependencies = header.depends_on.iter().map(resolve).collect::<Result<Vec<_>, _>>()?;

            for &parent in &parents {
                graph.nodes[parent].children.push(idx);
            }
            for &dependency in &dependencies {
                graph.nodes[dependency].dependents.push(idx);
            }
            graph.nodes[idx].parents = parents;
            graph.nodes[idx].dependencies = dependencies;
        }

        graph.check_acyclic()?;
        graph.check_roots()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), LedgerError> {
        let all = (0..self.nodes.len()).collect::<HashSet<_>>();
        let ordered = self.topo_order(&all);
        if ordered.len() == self.nodes.len() {
            return Ok(());
        }
        let ordered = ordered.into_iter().collect::<HashSet<_>>();
        let members = (0..self.nodes.len()).filter(|idx| !ordered.contains(idx)).map(|idx| self.id(idx).clone());
        Err(LedgerError::Cycle { members: members.sorted().collect() })
    }

    fn check_roots(&self) -> Result<(), LedgerError> {
        let roots = self.bases_idx();
        if roots.len() <= 1 {
            return Ok(());
        }
        // Every independent line of history must be named, except possibly the first one.
        let unlabeled =
            roots.iter().filter(|&&idx| self.nodes[idx].revision.header.branch_labels.is_empty()).collect::<Vec<_>>();
        match unlabeled.as_slice() {
            [] | [_] => Ok(()),
            [_, second, ..] => Err(LedgerError::UnlabeledRoot(self.id(**second).clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &RevisionId) -> Option<&Revision> {
        self.index.get(id).map(|&idx| &self.nodes[idx].revision)
    }

    pub fn contains(&self, id: &RevisionId) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn idx(&self, id: &RevisionId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub(crate) fn revision(&self, idx: usize) -> &Revision {
        &self.nodes[idx].revision
    }

    pub(crate) fn id(&self, idx: usize) -> &RevisionId {
        self.nodes[idx].revision.id()
    }

    fn order_key(&self, idx: usize) -> OrderKey {
        let header = &self.nodes[idx].revision.header;
        (header.created_at, header.id.clone())
    }

    fn sort_by_order(&self, mut indices: Vec<usize>) -> Vec<usize> {
        indices.sort_by_cached_key(|&idx| self.order_key(idx));
        indices
    }

    pub(crate) fn heads_idx(&self) -> Vec<usize> {
        self.sort_by_order((0..self.nodes.len()).filter(|&idx| self.nodes[idx].children.is_empty()).collect())
    }

    pub(crate) fn bases_idx(&self) -> Vec<usize> {
        self.sort_by_order((0..self.nodes.len()).filter(|&idx| self.nodes[idx].parents.is_empty()).collect())
    }

    /// Revisions without children, oldest first.
    pub fn heads(&self) -> Vec<&Revision> {
        self.heads_idx().into_iter().map(|idx| self.revision(idx)).collect()
    }

    /// Revisions without parents, oldest first.
    pub fn bases(&self) -> Vec<&Revision> {
        self.bases_idx().into_iter().map(|idx| self.revision(idx)).collect()
    }

    pub(crate) fn prerequisites(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[idx].parents.iter().chain(&self.nodes[idx].dependencies).copied()
    }

    pub(crate) fn successors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[idx].children.iter().chain(&self.nodes[idx].dependents).copied()
    }

    fn closure<I: Iterator<Item = usize>>(&self, idx: usize, next: impl Fn(usize) -> I) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = next(idx).collect::<Vec<_>>();
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(next(current));
            }
        }
        seen
    }

    /// Everything that must be applied before `idx`, following parent and dependency edges.
    pub(crate) fn ancestors(&self, idx: usize) -> BTreeSet<usize> {
        self.closure(idx, |i| self.prerequisites(i))
    }

    /// Everything that must be reverted before `idx`, following child and dependent edges.
    pub(crate) fn descendants(&self, idx: usize) -> BTreeSet<usize> {
        self.closure(idx, |i| self.successors(i))
    }

    /// Topological order of a subset of the graph, prerequisites first. Edges leaving the subset are ignored, ties are
    /// broken by creation time then id.
    pub(crate) fn topo_order(&self, subset: &HashSet<usize>) -> Vec<usize> {
        let mut pending = subset
            .iter()
            .map(|&idx| (idx, self.prerequisites(idx).filter(|p| subset.contains(p)).count()))
            .collect::<HashMap<_, _>>();

        let mut ready = pending
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&idx, _)| Reverse((self.order_key(idx), idx)))
            .collect::<BinaryHeap<_>>();

        let mut out = Vec::with_capacity(subset.len());
        while let Some(Reverse((_, idx))) = ready.pop() {
            out.push(idx);
            for successor in self.successors(idx) {
                if let Some(count) = pending.get_mut(&successor) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse((self.order_key(successor), successor)));
                    }
                }
            }
        }
        out
    }

    /// Every revision, prerequisites first.
    pub fn iter_topological(&self) -> impl Iterator<Item = &Revision> + '_ {
        let all = (0..self.nodes.len()).collect::<HashSet<_>>();
        self.topo_order(&all).into_iter().map(|idx| self.revision(idx))
    }

    /// Heads reachable from the revision declaring `label`.
    fn branch_heads(&self, label_idx: usize) -> Vec<usize> {
        let mut members = self.closure(label_idx, |i| self.nodes[i].children.iter().copied());
        members.insert(label_idx);
        self.sort_by_order(members.into_iter().filter(|&idx| self.nodes[idx].children.is_empty()).collect())
    }

    /// Resolves a revision spec: a full id, a branch label (its head), `label@head`, `label@base`, or a unique id
    /// prefix.
    pub(crate) fn resolve_idx(&self, spec: &str) -> Result<usize, LedgerError> {
        if let Ok(id) = RevisionId::new(spec) {
            if let Some(idx) = self.idx(&id) {
                return Ok(idx);
            }
        }

        let (label, anchor) = match spec.split_once('@') {
            Some((label, anchor)) => (label, Some(anchor)),
            None => (spec, None),
        };
        if let Some(&label_idx) = self.labels.get(label) {
            return match anchor {
                Some("base") => Ok(label_idx),
                None | Some("head") => match self.branch_heads(label_idx).as_slice() {
                    [head] => Ok(*head),
                    heads => Err(LedgerError::Conflict { heads: heads.iter().map(|&idx| self.id(idx).clone()).collect() }),
                },
                Some(other) => Err(LedgerError::InvalidTarget(format!("unknown branch anchor `@{other}` in `{spec}`"))),
            };
        }
        if anchor.is_some() {
            return Err(LedgerError::UnknownRevision(spec.to_string()));
        }

        let candidates = self
            .index
            .iter()
            .filter(|(id, _)| id.as_str().starts_with(spec))
            .map(|(_, &idx)| idx)
            .collect::<Vec<_>>();
        match candidates.as_slice() {
            [] => Err(LedgerError::UnknownRevision(spec.to_string())),
            [idx] => Ok(*idx),
            many => Err(LedgerError::AmbiguousRevision {
                spec: spec.to_string(),
                candidates: many.iter().map(|&idx| self.id(idx).clone()).sorted().collect(),
            }),
        }
    }

    pub fn resolve(&self, spec: &str) -> Result<&Revision, LedgerError> {
        self.resolve_idx(spec).map(|idx| self.revision(idx))
    }

    /// Branch labels that apply to a revision: its own and those of every ancestor along parent edges.
    pub fn branches_of(&self, id: &RevisionId) -> BTreeSet<String> {
        let Some(idx) = self.idx(id) else { return BTreeSet::new() };
        let mut lineage = self.closure(idx, |i| self.nodes[i].parents.iter().copied());
        lineage.insert(idx);
        lineage.into_iter().flat_map(|i| self.nodes[i].revision.header.branch_labels.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::common::{ids, rev, rev_at};
    use assert_matches::assert_matches;

    #[test]
    fn test_linear_chain() {
        let graph = RevisionGraph::build([rev("aaaa", &[]), rev("bbbb", &["aaaa"]), rev("cccc", &["bbbb"])]).unwrap();
        assert_eq!(ids(graph.heads()), ["cccc"]);
        assert_eq!(ids(graph.bases()), ["aaaa"]);
        assert_eq!(ids(graph.iter_topological().collect()), ["aaaa", "bbbb", "cccc"]);
    }

    #[test]
    fn test_tie_break_on_creation_time_then_id() {
        // Three children of the same parent, declared in scrambled order.
        let graph = RevisionGraph::build([
            rev_at("base", &[], 0),
            rev_at("zzzz", &["base"], 1),
            rev_at("cccc", &["base"], 2),
            rev_at("aaaa", &["base"], 2),
        ])
        .unwrap();
        assert_eq!(ids(graph.iter_topological().collect()), ["base", "zzzz", "aaaa", "cccc"]);
        assert_eq!(ids(graph.heads()), ["zzzz", "aaaa", "cccc"]);
    }

    #[test]
    fn test_dependencies_order_across_branches() {
        let mut dependent = rev_at("bbbb", &["root"], 1);
        dependent.header.depends_on.insert(RevisionId::new("cccc").unwrap());
        let graph = RevisionGraph::build([rev_at("root", &[], 0), dependent, rev_at("cccc", &["root"], 2)]).unwrap();
        assert_eq!(ids(graph.iter_topological().collect()), ["root", "cccc", "bbbb"]);

        let cccc = graph.idx(&RevisionId::new("cccc").unwrap()).unwrap();
        let descendants = graph.descendants(cccc).into_iter().map(|idx| graph.id(idx).to_string()).collect::<Vec<_>>();
        assert_eq!(descendants, ["bbbb"]);
    }

    #[test]
    fn test_rejects_invalid_graphs() {
        assert_matches!(
            RevisionGraph::build([rev("aaaa", &[]), rev("aaaa", &[])]),
            Err(LedgerError::DuplicateRevision(_))
        );
        assert_matches!(
            RevisionGraph::build([rev("aaaa", &[]), rev("bbbb", &["cccc"])]),
            Err(LedgerError::MissingReference { .. })
        );
        assert_matches!(
            RevisionGraph::build([rev("root", &[]), rev("aaaa", &["root", "bbbb"]), rev("bbbb", &["aaaa"])]),
            Err(LedgerError::Cycle { members }) if members.len() == 2
        );
        assert_matches!(RevisionGraph::build([rev("aaaa", &[]), rev("bbbb", &[])]), Err(LedgerError::UnlabeledRoot(_)));

        let mut first = rev("aaaa", &[]);
        first.header.branch_labels.insert("feature".into());
        let mut second = rev("bbbb", &["aaaa"]);
        second.header.branch_labels.insert("feature".into());
        assert_matches!(RevisionGraph::build([first, second]), Err(LedgerError::DuplicateBranchLabel { .. }));
    }

    #[test]
    fn test_resolve() {
        let mut feature = rev_at("f00dcafe0001", &["abc123000001"], 1);
        feature.header.branch_labels.insert("feature".into());
        let graph = RevisionGraph::build([
            rev_at("abc123000001", &[], 0),
            feature,
            rev_at("f00dcafe0002", &["f00dcafe0001"], 2),
            rev_at("abd999000001", &["abc123000001"], 3),
        ])
        .unwrap();

        assert_eq!(graph.resolve("abc123000001").unwrap().id().as_str(), "abc123000001");
        assert_eq!(graph.resolve("abd").unwrap().id().as_str(), "abd999000001");
        assert_eq!(graph.resolve("feature").unwrap().id().as_str(), "f00dcafe0002");
        assert_eq!(graph.resolve("feature@base").unwrap().id().as_str(), "f00dcafe0001");
        assert_matches!(graph.resolve("ab"), Err(LedgerError::AmbiguousRevision { candidates, .. }) if candidates.len() == 2);
        assert_matches!(graph.resolve("ffff"), Err(LedgerError::UnknownRevision(_)));
        assert_matches!(graph.resolve("feature@tail"), Err(LedgerError::InvalidTarget(_)));

        let branches = graph.branches_of(&RevisionId::new("f00dcafe0002").unwrap());
        assert_eq!(branches.into_iter().collect::<Vec<_>>(), ["feature"]);
    }
}
