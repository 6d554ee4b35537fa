//! Reward computation and online reference-cost tracking.
//!
//! Rewards follow the IPC quality score: a candidate that matches the best
//! known cost on a problem earns 1, worse plans earn proportionally less and
//! failures earn nothing. Solving a problem nobody has a reference for is
//! worth a flat bonus.

use std::cmp::Ordering;
use thiserror::Error;

use pt_types::{is_known_cost, CostMatrix};

/// Reward for solving a problem that has no reference cost yet.
pub const UNKNOWN_REFERENCE_BONUS: f64 = 2.0;

/// Raised when a (cost, reference) pair carries no usable signal.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("no reward signal for cost {cost} against reference {reference}")]
pub struct NoRewardSignal {
    pub cost: f64,
    pub reference: f64,
}

/// Reward of a single run. Negative references (the `-1` sentinel) are
/// unknown; negative costs are failed runs.
pub fn reward(cost: f64, reference: f64) -> Result<f64, NoRewardSignal> {
    if reference < 0.0 {
        if cost > 0.0 {
            return Ok(UNKNOWN_REFERENCE_BONUS);
        }
        return Err(NoRewardSignal { cost, reference });
    }
    if cost < 0.0 {
        Ok(0.0)
    } else if cost == 0.0 {
        // A plan never costs exactly zero.
        Err(NoRewardSignal { cost, reference })
    } else {
        Ok(reference / cost)
    }
}

/// Sum of rewards for one candidate's row of costs.
pub fn total_score(costs: impl IntoIterator<Item = f64>, references: &[f64]) -> f64 {
    costs
        .into_iter()
        .zip(references)
        .map(|(cost, &reference)| reward(cost, reference).unwrap_or(0.0))
        .sum()
}

/// One score per candidate.
pub fn total_scores(costs: &CostMatrix, references: &[f64]) -> Vec<f64> {
    (0..costs.candidates())
        .map(|candidate| total_score(costs.row(candidate), references))
        .collect()
}

/// Fold this generation's successful runs into the reference costs.
pub fn update_references(old: &[f64], costs: &CostMatrix) -> Vec<f64> {
    old.iter()
        .enumerate()
        .map(|(problem, &old_ref)| {
            let best_now = costs
                .column(problem)
                .filter(|&c| is_known_cost(c))
                .fold(None, |best: Option<f64>, c| {
                    Some(best.map_or(c, |b| b.min(c)))
                });
            match best_now {
                Some(best) if is_known_cost(old_ref) => old_ref.min(best),
                Some(best) => best,
                None => old_ref,
            }
        })
        .collect()
}

/// Candidate ids ordered by descending score; ties keep the lower id first.
pub fn rank(scores: &[f64]) -> Vec<usize> {
    let mut ids: Vec<usize> = (0..scores.len()).collect();
    ids.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
    });
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_cases() {
        assert_eq!(reward(10.0, -1.0), Ok(2.0));
        assert!(reward(-1.0, -1.0).is_err());
        assert_eq!(reward(-1.0, 20.0), Ok(0.0));
        assert!(reward(0.0, 20.0).is_err());
        assert_eq!(reward(10.0, 20.0), Ok(2.0));
        assert_eq!(reward(20.0, 10.0), Ok(0.5));
    }

    #[test]
    fn scores_for_mixed_generation() {
        let costs = CostMatrix::from_raw(&[
            vec![5.0, 8.0],
            vec![10.0, -1.0],
            vec![-1.0, 3.0],
            vec![20.0, 2.0],
        ]);
        let scores = total_scores(&costs, &[10.0, -1.0]);

        assert_eq!(scores, vec![4.0, 1.0, 2.0, 2.5]);
        assert_eq!(rank(&scores), vec![0, 3, 2, 1]);
    }

    #[test]
    fn no_signal_contributes_nothing() {
        // Unknown reference and a failed run, plus a zero-cost run.
        let score = total_score(vec![-1.0, 0.0, 4.0], &[-1.0, 7.0, 4.0]);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn references_take_best_success() {
        let costs = CostMatrix::from_raw(&[
            vec![12.0, -1.0, -1.0],
            vec![9.0, 30.0, -1.0],
            vec![15.0, 25.0, -1.0],
        ]);
        let refs = update_references(&[10.0, -1.0, 4.0], &costs);
        assert_eq!(refs, vec![9.0, 25.0, 4.0]);
    }

    #[test]
    fn references_never_increase() {
        let old = [10.0, 3.0, 50.0];
        let costs = CostMatrix::from_raw(&[vec![11.0, 4.0, 49.0], vec![-1.0, 100.0, 60.0]]);
        let new = update_references(&old, &costs);
        for (n, o) in new.iter().zip(&old) {
            assert!(n <= o, "{n} > {o}");
        }
        assert_eq!(new, vec![10.0, 3.0, 49.0]);
    }

    #[test]
    fn rank_is_stable_for_ties() {
        assert_eq!(rank(&[1.0, 3.0, 1.0, 3.0]), vec![1, 3, 0, 2]);
        assert!(rank(&[]).is_empty());
    }
}
