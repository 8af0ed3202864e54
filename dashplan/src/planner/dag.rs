//! Index-based dependency graph over the sub-queries of a plan.
//!
//! Sub-queries live in an arena (the plan's `Vec<SubQuery>`); edges are
//! adjacency lists of arena indices. Nothing holds a reference to another
//! sub-query record.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::PlanError;
use crate::types::SubQuery;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDag {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// `deps[i]`: indices that `i` depends on
    deps: Vec<Vec<usize>>,
    /// `dependents[i]`: indices that depend on `i`
    dependents: Vec<Vec<usize>>,
    topo: Vec<usize>,
    levels: Vec<usize>,
}

impl QueryDag {
    /// Build and validate the graph: unique ids, known dependencies, no cycles.
    pub fn build(sub_queries: &[SubQuery]) -> Result<Self, PlanError> {
        let mut index = HashMap::with_capacity(sub_queries.len());
        for (i, sq) in sub_queries.iter().enumerate() {
            if index.insert(sq.id.clone(), i).is_some() {
                return Err(PlanError::DuplicateId(sq.id.clone()));
            }
        }

        let n = sub_queries.len();
        let mut deps = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        for (i, sq) in sub_queries.iter().enumerate() {
            for dep_id in &sq.depends_on {
                let dep = *index.get(dep_id).ok_or_else(|| PlanError::UnknownDependency {
                    query: sq.id.clone(),
                    dependency: dep_id.clone(),
                })?;
                if !deps[i].contains(&dep) {
                    deps[i].push(dep);
                    dependents[dep].push(i);
                }
            }
        }

        // Kahn's algorithm, smallest plan index first so the order is stable.
        let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut topo = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            topo.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if topo.len() != n {
            let members = (0..n)
                .filter(|i| in_degree[*i] > 0)
                .map(|i| sub_queries[i].id.clone())
                .collect();
            return Err(PlanError::Cycle(members));
        }

        let mut levels = vec![0usize; n];
        for &i in &topo {
            levels[i] = deps[i].iter().map(|d| levels[*d] + 1).max().unwrap_or(0);
        }

        Ok(Self {
            ids: sub_queries.iter().map(|sq| sq.id.clone()).collect(),
            index,
            deps,
            dependents,
            topo,
            levels,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    pub fn topological_order(&self) -> &[usize] {
        &self.topo
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(Vec::len).sum()
    }

    /// No sub-query depends on another.
    pub fn is_independent(&self) -> bool {
        self.edge_count() == 0
    }

    /// The graph is a single path `a -> b -> c` covering every node.
    pub fn is_linear_chain(&self) -> bool {
        let n = self.len();
        n >= 2
            && self.edge_count() == n - 1
            && self.deps.iter().all(|d| d.len() <= 1)
            && self.dependents.iter().all(|d| d.len() <= 1)
    }

    /// Node indices grouped by depth; level 0 has no dependencies.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let depth = self.levels.iter().copied().max().map_or(0, |m| m + 1);
        let mut grouped = vec![Vec::new(); depth];
        for &i in &self.topo {
            grouped[self.levels[i]].push(i);
        }
        grouped
    }

    /// Every node reachable through `dependents`, in topological order.
    pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut stack = self.dependents[idx].clone();
        while let Some(next) = stack.pop() {
            if !seen[next] {
                seen[next] = true;
                stack.extend_from_slice(&self.dependents[next]);
            }
        }
        self.topo.iter().copied().filter(|i| seen[*i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(id: &str, deps: &[&str]) -> SubQuery {
        SubQuery::new(id, id, "default").with_dependencies(deps.iter().copied())
    }

    #[test]
    fn test_hybrid_shape() {
        let dag = QueryDag::build(&[sq("a", &[]), sq("b", &[]), sq("c", &["a", "b"])]).unwrap();
        assert_eq!(dag.topological_order(), &[0, 1, 2]);
        assert_eq!(dag.levels(), vec![vec![0, 1], vec![2]]);
        assert!(!dag.is_independent());
        assert!(!dag.is_linear_chain());
        assert_eq!(dag.dependencies(2), &[0, 1]);
    }

    #[test]
    fn test_linear_chain() {
        let dag = QueryDag::build(&[sq("a", &[]), sq("b", &["a"]), sq("c", &["b"])]).unwrap();
        assert!(dag.is_linear_chain());
        assert_eq!(dag.transitive_dependents(0), vec![1, 2]);
    }

    #[test]
    fn test_single_node_is_independent_not_chain() {
        let dag = QueryDag::build(&[sq("a", &[])]).unwrap();
        assert!(dag.is_independent());
        assert!(!dag.is_linear_chain());
    }

    #[test]
    fn test_dependency_listed_after_dependent() {
        let dag = QueryDag::build(&[sq("c", &["a"]), sq("a", &[])]).unwrap();
        assert_eq!(dag.topological_order(), &[1, 0]);
        assert_eq!(dag.index_of("a"), Some(1));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = QueryDag::build(&[sq("a", &["c"]), sq("b", &["a"]), sq("c", &["b"]), sq("d", &[])])
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::Cycle(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_rejects_self_dependency() {
        assert!(matches!(
            QueryDag::build(&[sq("a", &["a"])]),
            Err(PlanError::Cycle(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_and_duplicate() {
        assert_eq!(
            QueryDag::build(&[sq("a", &["ghost"])]).unwrap_err(),
            PlanError::UnknownDependency {
                query: "a".into(),
                dependency: "ghost".into()
            }
        );
        assert_eq!(
            QueryDag::build(&[sq("a", &[]), sq("a", &[])]).unwrap_err(),
            PlanError::DuplicateId("a".into())
        );
    }

    #[test]
    fn test_repeated_dependency_counts_once() {
        let dag = QueryDag::build(&[sq("a", &[]), sq("b", &["a", "a"])]).unwrap();
        assert_eq!(dag.edge_count(), 1);
        assert!(dag.is_linear_chain());
    }
}
