// Checkpoint persistence
// Binary little-endian record of the search distribution and generation counter

use std::path::Path;
use tracing::{debug, info};

use pt_optimizer::Distribution;
use pt_types::{CheckpointError, TuneResult};

pub const MAGIC: &[u8; 8] = b"PTCKPT01";

const HEADER_LEN: usize = 8 + 8 + 4;

/// Distribution plus the generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub generation: u64,
    pub distribution: Distribution,
}

impl Checkpoint {
    pub fn new(generation: u64, distribution: Distribution) -> Self {
        Self {
            generation,
            distribution,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let dim = self.distribution.dimension();
        let mut bytes = Vec::with_capacity(HEADER_LEN + 8 * (dim + dim * dim));
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&self.generation.to_le_bytes());
        bytes.extend_from_slice(&(dim as u32).to_le_bytes());
        for value in self
            .distribution
            .mean_vec()
            .into_iter()
            .chain(self.distribution.covariance_vec())
        {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8], source: &Path) -> TuneResult<Self> {
        let path = source.display().to_string();
        if bytes.len() < HEADER_LEN {
            return Err(CheckpointError::Truncated {
                path,
                expected: HEADER_LEN,
                found: bytes.len(),
            }
            .into());
        }
        if &bytes[..8] != MAGIC {
            return Err(CheckpointError::BadMagic { path }.into());
        }

        let mut generation = [0u8; 8];
        generation.copy_from_slice(&bytes[8..16]);
        let mut dim = [0u8; 4];
        dim.copy_from_slice(&bytes[16..20]);
        let generation = u64::from_le_bytes(generation);
        let dim = u32::from_le_bytes(dim) as usize;

        // A corrupt header can claim a dimension whose size overflows
        let expected = dim
            .checked_mul(dim)
            .and_then(|n| n.checked_add(dim))
            .and_then(|n| n.checked_mul(8))
            .and_then(|n| n.checked_add(HEADER_LEN));
        if expected != Some(bytes.len()) {
            return Err(CheckpointError::Truncated {
                path,
                expected: expected.unwrap_or(usize::MAX),
                found: bytes.len(),
            }
            .into());
        }

        let mut values = bytes[HEADER_LEN..].chunks_exact(8).map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        });
        let mean: Vec<f64> = values.by_ref().take(dim).collect();
        let covariance: Vec<f64> = values.collect();
        let distribution = Distribution::from_parts(mean, covariance)?;
        Ok(Self::new(generation, distribution))
    }

    /// Write to a temporary sibling and rename over `path`.
    pub fn save(&self, path: &Path) -> TuneResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_bytes())?;
        std::fs::rename(&tmp, path)?;
        debug!("Checkpoint for generation {} written to {}", self.generation, path.display());
        Ok(())
    }

    /// Load and check the dimension against the parameter handler. The
    /// covariance is regularized before use.
    pub fn load(path: &Path, expected_dimension: usize) -> TuneResult<Self> {
        let bytes = std::fs::read(path)?;
        let mut checkpoint = Self::from_bytes(&bytes, path)?;
        let found = checkpoint.distribution.dimension();
        if found != expected_dimension {
            return Err(CheckpointError::DimensionMismatch {
                expected: expected_dimension,
                found,
            }
            .into());
        }
        checkpoint.distribution.regularize();
        info!(
            "Resumed from {} at generation {}",
            path.display(),
            checkpoint.generation
        );
        Ok(checkpoint)
    }
}
