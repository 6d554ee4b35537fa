//! Multivariate-normal search distribution.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::{debug, warn};

use pt_types::{CheckpointError, ParameterVector, Population, TuneResult};

use crate::handler::ParameterHandler;

/// Smallest eigenvalue a covariance may keep before it is projected.
pub const EIGENVALUE_FLOOR: f64 = 1e-12;

/// Search distribution: mean vector plus a symmetric PSD covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
}

impl Distribution {
    /// # Panics
    /// If the covariance is not `n x n` for a mean of length `n`.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Self {
        assert_eq!(covariance.nrows(), mean.len());
        assert_eq!(covariance.ncols(), mean.len());
        Self { mean, covariance }
    }

    /// Diagonal covariance `diag(stddev^2)`.
    pub fn from_stddev(mean: &[f64], stddev: &[f64]) -> Self {
        let variances = DVector::from_iterator(stddev.len(), stddev.iter().map(|s| s * s));
        Self::new(
            DVector::from_column_slice(mean),
            DMatrix::from_diagonal(&variances),
        )
    }

    pub fn from_handler(handler: &ParameterHandler) -> Self {
        let (mean, stddev) = handler.initial_distribution_params();
        Self::from_stddev(&mean, &stddev)
    }

    /// Rebuild from the flat column-major layout used by checkpoints.
    pub fn from_parts(mean: Vec<f64>, covariance: Vec<f64>) -> TuneResult<Self> {
        let n = mean.len();
        if covariance.len() != n * n {
            return Err(CheckpointError::DimensionMismatch {
                expected: n * n,
                found: covariance.len(),
            }
            .into());
        }
        Ok(Self::new(
            DVector::from_vec(mean),
            DMatrix::from_column_slice(n, n, &covariance),
        ))
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn mean_vec(&self) -> ParameterVector {
        self.mean.iter().copied().collect()
    }

    /// Column-major covariance entries.
    pub fn covariance_vec(&self) -> Vec<f64> {
        self.covariance.as_slice().to_vec()
    }

    /// Draw `n` candidates and pass each through the handler's bound.
    pub fn sample<R: Rng>(
        &self,
        n: usize,
        handler: &ParameterHandler,
        rng: &mut R,
    ) -> Population {
        let dim = self.dimension();
        // C = B diag(l) B^T, so x = mean + B diag(sqrt(l)) z has covariance C.
        let eigen = symmetrized(&self.covariance).symmetric_eigen();
        let scales = eigen.eigenvalues.map(|l| l.max(0.0).sqrt());
        let transform = &eigen.eigenvectors * DMatrix::from_diagonal(&scales);

        (0..n)
            .map(|_| {
                let z: DVector<f64> =
                    DVector::from_iterator(dim, (0..dim).map(|_| rng.sample(StandardNormal)));
                let x = &self.mean + &transform * z;
                let mut candidate: ParameterVector = x.iter().copied().collect();
                handler.bound(&mut candidate);
                candidate
            })
            .collect()
    }

    /// Project the covariance back onto the PSD cone if it drifted off it.
    ///
    /// Returns true when the matrix had to be changed.
    pub fn regularize(&mut self) -> bool {
        let symmetric = symmetrized(&self.covariance);
        let eigen = symmetric.clone().symmetric_eigen();
        let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);

        if min_eigenvalue >= EIGENVALUE_FLOOR && symmetric == self.covariance {
            return false;
        }
        if min_eigenvalue >= EIGENVALUE_FLOOR {
            debug!("Covariance symmetrized");
            self.covariance = symmetric;
            return true;
        }

        warn!(
            "Covariance has eigenvalue {:.3e}; clamping to {:.0e}",
            min_eigenvalue, EIGENVALUE_FLOOR
        );
        let clamped = eigen.eigenvalues.map(|l| l.max(EIGENVALUE_FLOOR));
        let b = &eigen.eigenvectors;
        self.covariance = symmetrized(&(b * DMatrix::from_diagonal(&clamped) * b.transpose()));
        true
    }

    pub fn min_eigenvalue(&self) -> f64 {
        symmetrized(&self.covariance)
            .symmetric_eigen()
            .eigenvalues
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

fn symmetrized(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}
