//! Dependency graph over job ids, used to validate a batch before submission.
//!
//! Design:
//! - Edges: job -> jobs it depends on (waits for)
//! - Cycle detection walks an explicit stack, so chain length is bounded by
//!   memory rather than thread stack

use std::collections::{HashMap, HashSet};

use crate::domain::JobId;

/// Dependency graph: JobId -> set of JobIds it depends on.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    edges: HashMap<JobId, HashSet<JobId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// On the current DFS path.
    Gray,
    /// Fully explored, known not to reach a cycle.
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// `job` waits for `depends_on`.
    pub fn add_dependency(&mut self, job: JobId, depends_on: JobId) {
        self.edges.entry(job).or_default().insert(depends_on);
    }

    pub fn dependencies(&self, job: JobId) -> Vec<JobId> {
        self.deps_of(job).copied().collect()
    }

    fn deps_of(&self, job: JobId) -> impl Iterator<Item = &JobId> + '_ {
        self.edges.get(&job).into_iter().flatten()
    }

    /// Find a cycle, returned as the jobs along it with the first job repeated
    /// at the end. `None` when the graph is a DAG.
    pub fn detect_cycle(&self) -> Option<Vec<JobId>> {
        let mut colors: HashMap<JobId, Color> = HashMap::new();
        for &start in self.edges.keys() {
            if colors.contains_key(&start) {
                continue;
            }
            colors.insert(start, Color::Gray);
            // DFS の経路そのもの: (ノード, 未訪問の依存先)
            let mut path = vec![(start, self.deps_of(start))];

            while let Some((node, deps)) = path.last_mut() {
                let (node, next) = (*node, deps.next().copied());
                let Some(dep) = next else {
                    colors.insert(node, Color::Black);
                    path.pop();
                    continue;
                };
                match colors.get(&dep) {
                    Some(Color::Gray) => {
                        let from = path.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                        let mut cycle: Vec<JobId> = path[from..].iter().map(|(n, _)| *n).collect();
                        cycle.push(dep);
                        return Some(cycle);
                    }
                    Some(Color::Black) => {}
                    None => {
                        colors.insert(dep, Color::Gray);
                        path.push((dep, self.deps_of(dep)));
                    }
                }
            }
        }
        None
    }
}
