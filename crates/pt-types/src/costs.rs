//! Per-cell solver outcomes and the generation cost matrix.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::problem::SENTINEL_COST;

/// Coordinates of one (candidate, problem) unit of evaluator work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    pub candidate: usize,
    pub problem: usize,
}

impl CellId {
    pub fn new(candidate: usize, problem: usize) -> Self {
        Self { candidate, problem }
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.candidate, self.problem)
    }
}

/// What happened when a cell ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellOutcome {
    /// The solver declared a plan; holds the cheapest declared cost.
    Success(u64),
    /// The solver finished but never declared a cost.
    SolverReportedNoPlan,
    SolverCrashedOrTimedOut,
    /// The batch scheduler gave up waiting before the cell ran.
    JobNeverCompleted,
}

impl CellOutcome {
    pub fn cost(&self) -> Option<u64> {
        match self {
            CellOutcome::Success(cost) => Some(*cost),
            _ => None,
        }
    }

    /// Cost as scored: failures collapse to the sentinel.
    pub fn raw_cost(&self) -> f64 {
        self.cost().map_or(SENTINEL_COST, |c| c as f64)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CellOutcome::Success(_))
    }
}

impl Default for CellOutcome {
    fn default() -> Self {
        CellOutcome::JobNeverCompleted
    }
}

/// Dense `candidates x problems` matrix of outcomes for one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostMatrix {
    candidates: usize,
    problems: usize,
    cells: Vec<CellOutcome>,
}

impl CostMatrix {
    /// Every cell starts as never completed until a result lands in it.
    pub fn new(candidates: usize, problems: usize) -> Self {
        Self {
            candidates,
            problems,
            cells: vec![CellOutcome::JobNeverCompleted; candidates * problems],
        }
    }

    /// Build a matrix from raw costs, negative values meaning failure.
    pub fn from_raw(rows: &[Vec<f64>]) -> Self {
        let problems = rows.first().map_or(0, |r| r.len());
        let mut matrix = Self::new(rows.len(), problems);
        for (candidate, row) in rows.iter().enumerate() {
            for (problem, &cost) in row.iter().enumerate() {
                let outcome = if cost >= 0.0 {
                    CellOutcome::Success(cost.round() as u64)
                } else {
                    CellOutcome::SolverCrashedOrTimedOut
                };
                matrix.set(CellId::new(candidate, problem), outcome);
            }
        }
        matrix
    }

    /// Densify outcomes that may have arrived in any order.
    pub fn from_outcomes(
        candidates: usize,
        problems: usize,
        outcomes: impl IntoIterator<Item = (CellId, CellOutcome)>,
    ) -> Self {
        let mut matrix = Self::new(candidates, problems);
        for (cell, outcome) in outcomes {
            matrix.set(cell, outcome);
        }
        matrix
    }

    pub fn candidates(&self) -> usize {
        self.candidates
    }

    pub fn problems(&self) -> usize {
        self.problems
    }

    fn index(&self, cell: CellId) -> usize {
        assert!(
            cell.candidate < self.candidates && cell.problem < self.problems,
            "cell {cell} outside {}x{} matrix",
            self.candidates,
            self.problems
        );
        cell.candidate * self.problems + cell.problem
    }

    pub fn get(&self, cell: CellId) -> CellOutcome {
        self.cells[self.index(cell)]
    }

    pub fn set(&mut self, cell: CellId, outcome: CellOutcome) {
        let idx = self.index(cell);
        self.cells[idx] = outcome;
    }

    pub fn raw(&self, candidate: usize, problem: usize) -> f64 {
        self.get(CellId::new(candidate, problem)).raw_cost()
    }

    pub fn row(&self, candidate: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.problems).map(move |p| self.raw(candidate, p))
    }

    pub fn column(&self, problem: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.candidates).map(move |c| self.raw(c, problem))
    }

    pub fn failures(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_success()).count()
    }

    /// Row-major coordinates of every cell.
    pub fn cell_ids(candidates: usize, problems: usize) -> impl Iterator<Item = CellId> {
        (0..candidates).flat_map(move |c| (0..problems).map(move |p| CellId::new(c, p)))
    }
}

impl fmt::Display for CostMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for candidate in 0..self.candidates {
            for cost in self.row(candidate) {
                write!(f, "{:6}", cost as i64)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_by_coordinates() {
        let outcomes = vec![
            (CellId::new(1, 1), CellOutcome::Success(3)),
            (CellId::new(0, 0), CellOutcome::Success(7)),
            (CellId::new(1, 0), CellOutcome::SolverReportedNoPlan),
        ];
        let matrix = CostMatrix::from_outcomes(2, 2, outcomes);

        assert_eq!(matrix.raw(0, 0), 7.0);
        assert_eq!(matrix.raw(1, 1), 3.0);
        assert_eq!(matrix.raw(1, 0), SENTINEL_COST);
        // Never filled
        assert_eq!(matrix.get(CellId::new(0, 1)), CellOutcome::JobNeverCompleted);
        assert_eq!(matrix.failures(), 2);
    }

    #[test]
    fn from_raw_treats_negatives_as_failures() {
        let matrix = CostMatrix::from_raw(&[vec![5.0, -1.0], vec![0.0, 12.0]]);
        assert_eq!(matrix.candidates(), 2);
        assert_eq!(matrix.problems(), 2);
        assert!(!matrix.get(CellId::new(0, 1)).is_success());
        assert_eq!(matrix.get(CellId::new(1, 0)), CellOutcome::Success(0));
        assert_eq!(matrix.column(1).collect::<Vec<_>>(), vec![-1.0, 12.0]);
    }

    #[test]
    fn cell_ids_are_row_major() {
        let ids: Vec<CellId> = CostMatrix::cell_ids(2, 3).collect();
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], CellId::new(0, 0));
        assert_eq!(ids[3], CellId::new(1, 0));
        assert_eq!(ids[5], CellId::new(1, 2));
    }

    #[test]
    fn display_uses_sentinel_for_failures() {
        let matrix = CostMatrix::from_raw(&[vec![5.0, -1.0]]);
        assert_eq!(matrix.to_string(), "     5    -1\n");
    }
}
