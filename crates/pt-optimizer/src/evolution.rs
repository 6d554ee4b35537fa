//! Distribution update rules.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pt_types::{Population, TuneError, TuneResult};

use crate::distribution::Distribution;

/// Best score at or below which a generation carries no usable signal.
pub const DEFAULT_SKIP_THRESHOLD: f64 = 0.001;

/// Update rule, chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum EvolutionRule {
    /// Cross-entropy method: blend mean and covariance toward the elite.
    Cem { alpha: f64, elite_size: usize },
    /// Blend the mean only; keeps the variance from collapsing early.
    FixedVariance { alpha: f64, elite_size: usize },
    /// Log-rank weighted recombination of the whole population.
    RankWeighted,
}

impl Default for EvolutionRule {
    fn default() -> Self {
        Self::Cem {
            alpha: 0.7,
            elite_size: 10,
        }
    }
}

impl EvolutionRule {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cem { .. } => "cem",
            Self::FixedVariance { .. } => "fixed_variance",
            Self::RankWeighted => "rank_weighted",
        }
    }

    /// Check the rule against the population it will see each generation.
    pub fn validate(&self, population_size: usize) -> TuneResult<()> {
        match *self {
            Self::Cem { alpha, elite_size } | Self::FixedVariance { alpha, elite_size } => {
                if !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(TuneError::Config(format!(
                        "alpha must lie in (0, 1], got {alpha}"
                    )));
                }
                if elite_size < 2 || elite_size > population_size {
                    return Err(TuneError::Config(format!(
                        "elite size {elite_size} must be between 2 and the population size {population_size}"
                    )));
                }
                Ok(())
            }
            Self::RankWeighted => {
                if population_size == 0 {
                    return Err(TuneError::Config("population must not be empty".into()));
                }
                Ok(())
            }
        }
    }

    /// New distribution from a scored population.
    ///
    /// `ranking` lists candidate ids best first. The returned covariance is
    /// regularized onto the PSD cone.
    pub fn step(
        &self,
        current: &Distribution,
        population: &Population,
        ranking: &[usize],
    ) -> Distribution {
        let mut next = match *self {
            Self::Cem { alpha, elite_size } => {
                let elite = gather(population, &ranking[..elite_size.min(ranking.len())]);
                let elite_mean = column_mean(&elite);
                let elite_cov = sample_covariance(&elite, &elite_mean);
                Distribution::new(
                    current.mean() * (1.0 - alpha) + elite_mean * alpha,
                    current.covariance() * (1.0 - alpha) + elite_cov * alpha,
                )
            }
            Self::FixedVariance { alpha, elite_size } => {
                let elite = gather(population, &ranking[..elite_size.min(ranking.len())]);
                let elite_mean = column_mean(&elite);
                Distribution::new(
                    current.mean() * (1.0 - alpha) + elite_mean * alpha,
                    current.covariance().clone(),
                )
            }
            Self::RankWeighted => {
                let weights = rank_weights(ranking.len());
                let mut mean = DVector::zeros(current.dimension());
                for (rank, &candidate) in ranking.iter().enumerate() {
                    mean += DVector::from_column_slice(&population[candidate]) * weights[rank];
                }
                Distribution::new(mean, current.covariance().clone())
            }
        };
        if next.regularize() {
            debug!("Regularized covariance after {} step", self.name());
        }
        next
    }
}

/// Whether a generation's best score is informative enough to update on.
pub fn should_update(scores: &[f64], ranking: &[usize], threshold: f64) -> bool {
    match ranking.first() {
        Some(&best) if scores[best] > threshold => true,
        _ => {
            info!("No candidate scored above {threshold}; keeping the distribution");
            false
        }
    }
}

/// `w_r = ln(M + 0.5) - ln(r + 1)` for 0-based rank `r`, normalised to 1.
pub fn rank_weights(population_size: usize) -> Vec<f64> {
    let m = population_size as f64;
    let raw: Vec<f64> = (0..population_size)
        .map(|r| (m + 0.5).ln() - ((r + 1) as f64).ln())
        .collect();
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Rows of the selected candidates as a `k x dim` matrix.
fn gather(population: &Population, ids: &[usize]) -> DMatrix<f64> {
    let dim = population.first().map_or(0, |c| c.len());
    DMatrix::from_fn(ids.len(), dim, |r, c| population[ids[r]][c])
}

fn column_mean(rows: &DMatrix<f64>) -> DVector<f64> {
    rows.row_mean().transpose()
}

/// Unbiased covariance of the rows (`k - 1` denominator).
fn sample_covariance(rows: &DMatrix<f64>, mean: &DVector<f64>) -> DMatrix<f64> {
    let k = rows.nrows();
    let centered = DMatrix::from_fn(k, rows.ncols(), |r, c| rows[(r, c)] - mean[c]);
    let denom = if k > 1 { (k - 1) as f64 } else { 1.0 };
    centered.transpose() * centered / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn population() -> Population {
        vec![
            vec![1.0, 2.0],
            vec![3.0, 6.0],
            vec![5.0, 4.0],
            vec![7.0, 8.0],
        ]
    }

    fn start() -> Distribution {
        Distribution::from_stddev(&[0.0, 0.0], &[1.0, 1.0])
    }

    #[test]
    fn cem_with_full_alpha_moves_to_elite_mean() {
        let rule = EvolutionRule::Cem {
            alpha: 1.0,
            elite_size: 2,
        };
        let next = rule.step(&start(), &population(), &[3, 1, 0, 2]);
        assert_eq!(next.mean_vec(), vec![5.0, 7.0]);

        // Elite rows (7,8) and (3,6): variance 8 and 2, covariance 4
        let c = next.covariance();
        assert!((c[(0, 0)] - 8.0).abs() < 1e-9);
        assert!((c[(1, 1)] - 2.0).abs() < 1e-9);
        assert!((c[(0, 1)] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn cem_with_zero_alpha_keeps_distribution() {
        let rule = EvolutionRule::Cem {
            alpha: 0.0,
            elite_size: 2,
        };
        let current = start();
        let next = rule.step(&current, &population(), &[3, 1, 0, 2]);
        assert_eq!(next, current);
    }

    #[test]
    fn cem_blends_partially() {
        let rule = EvolutionRule::Cem {
            alpha: 0.5,
            elite_size: 2,
        };
        let next = rule.step(&start(), &population(), &[3, 1, 0, 2]);
        assert_eq!(next.mean_vec(), vec![2.5, 3.5]);
    }

    #[test]
    fn fixed_variance_keeps_covariance() {
        let rule = EvolutionRule::FixedVariance {
            alpha: 1.0,
            elite_size: 2,
        };
        let current = start();
        let next = rule.step(&current, &population(), &[0, 2, 1, 3]);
        assert_eq!(next.mean_vec(), vec![3.0, 3.0]);
        assert_eq!(next.covariance(), current.covariance());
    }

    #[test]
    fn rank_weights_sum_to_one_and_decrease() {
        let w = rank_weights(4);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w.windows(2).all(|p| p[0] > p[1]));
        assert!(w.iter().all(|&x| x > 0.0));
    }

    #[test]
    fn rank_weighted_uses_rank_not_candidate_id() {
        let rule = EvolutionRule::RankWeighted;
        let ranking = [3, 2, 1, 0];
        let next = rule.step(&start(), &population(), &ranking);

        let w = rank_weights(4);
        let pop = population();
        let expected: f64 = ranking
            .iter()
            .enumerate()
            .map(|(r, &id)| w[r] * pop[id][0])
            .sum();
        assert!((next.mean_vec()[0] - expected).abs() < 1e-12);
        assert_eq!(next.covariance(), start().covariance());
    }

    #[test]
    fn skip_rule_fires_only_without_signal() {
        assert!(!should_update(&[0.0, 0.0005], &[1, 0], DEFAULT_SKIP_THRESHOLD));
        assert!(should_update(&[0.0, 1.5], &[1, 0], DEFAULT_SKIP_THRESHOLD));
        assert!(!should_update(&[], &[], DEFAULT_SKIP_THRESHOLD));
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let bad_alpha = EvolutionRule::Cem {
            alpha: 0.0,
            elite_size: 2,
        };
        assert!(bad_alpha.validate(10).is_err());

        let big_elite = EvolutionRule::FixedVariance {
            alpha: 0.5,
            elite_size: 11,
        };
        assert!(big_elite.validate(10).is_err());

        assert!(EvolutionRule::default().validate(50).is_ok());
        assert!(EvolutionRule::RankWeighted.validate(1).is_ok());
    }

    #[test]
    fn rule_deserializes_from_tagged_json() {
        let rule: EvolutionRule =
            serde_json::from_str(r#"{"rule": "cem", "alpha": 0.7, "elite_size": 10}"#).unwrap();
        assert_eq!(rule, EvolutionRule::default());
    }
}
