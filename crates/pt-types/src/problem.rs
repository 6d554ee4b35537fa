//! Test problems and their reference costs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reserved cost meaning "unknown reference" or "failed run".
pub const SENTINEL_COST: f64 = -1.0;

/// Returns true when a raw cost denotes an actual plan.
pub fn is_known_cost(cost: f64) -> bool {
    cost > 0.0
}

/// One test problem handed to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    /// Path of the problem file; doubles as its identifier.
    pub path: PathBuf,
    /// Best known cost, or [`SENTINEL_COST`] when unknown.
    pub reference_cost: f64,
}

impl Problem {
    pub fn new(path: impl Into<PathBuf>, reference_cost: f64) -> Self {
        Self {
            path: path.into(),
            reference_cost,
        }
    }

    pub fn unknown(path: impl Into<PathBuf>) -> Self {
        Self::new(path, SENTINEL_COST)
    }

    pub fn id(&self) -> String {
        self.path.display().to_string()
    }
}

/// Ordered set of problems for one generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemSet {
    pub problems: Vec<Problem>,
}

impl ProblemSet {
    pub fn new(problems: Vec<Problem>) -> Self {
        Self { problems }
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn references(&self) -> Vec<f64> {
        self.problems.iter().map(|p| p.reference_cost).collect()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.problems.iter().map(|p| p.path.as_path())
    }
}

/// Running best cost per problem, owned by the driver across generations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCosts {
    costs: HashMap<String, f64>,
}

impl ReferenceCosts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, problem: &Problem) -> Option<f64> {
        self.costs.get(&problem.id()).copied()
    }

    /// Forget anything known about a problem (e.g. it was regenerated).
    pub fn reset(&mut self, problem: &Problem) {
        self.costs.remove(&problem.id());
    }

    /// Fill each problem's reference from the store, keeping the better of
    /// the stored and the problem's own value.
    pub fn apply_to(&self, set: &mut ProblemSet) {
        for problem in &mut set.problems {
            if let Some(stored) = self.get(problem) {
                problem.reference_cost = best_of(problem.reference_cost, stored);
            }
        }
    }

    /// Record references computed for a generation's problem set.
    pub fn record(&mut self, set: &ProblemSet, references: &[f64]) {
        for (problem, &cost) in set.problems.iter().zip(references) {
            if !is_known_cost(cost) {
                continue;
            }
            let entry = self.costs.entry(problem.id()).or_insert(cost);
            *entry = best_of(*entry, cost);
        }
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }
}

fn best_of(a: f64, b: f64) -> f64 {
    match (is_known_cost(a), is_known_cost(b)) {
        (true, true) => a.min(b),
        (true, false) => a,
        (false, true) => b,
        (false, false) => a,
    }
}
