//! Parameter space definitions for direct solver hyperparameters.

use serde::{Deserialize, Serialize};

use crate::errors::{TuneError, TuneResult};

/// A flat, ordered vector of real-valued parameters.
pub type ParameterVector = Vec<f64>;

/// A generation's sampled candidates, indexed by candidate id.
pub type Population = Vec<ParameterVector>;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Solver-side parameter name (e.g. "epsilon").
    pub name: String,
    pub kind: ParameterKind,
    /// Lower bound; `None` leaves the dimension open below.
    #[serde(default)]
    pub min: Option<f64>,
    /// Upper bound; `None` leaves the dimension open above.
    #[serde(default)]
    pub max: Option<f64>,
    pub initial_mean: f64,
    pub initial_stddev: f64,
}

/// How a dimension is written to the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Continuous,
    /// Rounded to the nearest integer before it reaches the solver.
    Integer,
}

impl ParameterDef {
    /// Clamp into bounds, rounding integer dimensions.
    pub fn bound(&self, value: f64) -> f64 {
        let mut v = value;
        if self.kind == ParameterKind::Integer {
            v = v.round();
        }
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        v
    }

    /// Render a value the way the solver expects to read it.
    pub fn format_value(&self, value: f64) -> String {
        match self.kind {
            ParameterKind::Integer => format!("{}", value.round() as i64),
            ParameterKind::Continuous => format!("{value}"),
        }
    }

    fn validate(&self) -> TuneResult<()> {
        let finite_or_open = |b: Option<f64>| b.map_or(true, |v| !v.is_nan());
        if !finite_or_open(self.min) || !finite_or_open(self.max) {
            return Err(TuneError::Config(format!(
                "parameter '{}' has a NaN bound",
                self.name
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(TuneError::Config(format!(
                    "parameter '{}' has min {} > max {}",
                    self.name, min, max
                )));
            }
        }
        if !self.initial_mean.is_finite() {
            return Err(TuneError::Config(format!(
                "parameter '{}' has a non-finite initial mean",
                self.name
            )));
        }
        if !self.initial_stddev.is_finite() || self.initial_stddev < 0.0 {
            return Err(TuneError::Config(format!(
                "parameter '{}' has invalid initial stddev {}",
                self.name, self.initial_stddev
            )));
        }
        Ok(())
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(
        mut self,
        name: impl Into<String>,
        min: Option<f64>,
        max: Option<f64>,
        initial_mean: f64,
        initial_stddev: f64,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Continuous,
            min,
            max,
            initial_mean,
            initial_stddev,
        });
        self
    }

    pub fn add_int(
        mut self,
        name: impl Into<String>,
        min: Option<f64>,
        max: Option<f64>,
        initial_mean: f64,
        initial_stddev: f64,
    ) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Integer,
            min,
            max,
            initial_mean,
            initial_stddev,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Reject spaces the optimizer cannot work with.
    pub fn validate(&self) -> TuneResult<()> {
        if self.parameters.is_empty() {
            return Err(TuneError::Config("search space has no parameters".into()));
        }
        for param in &self.parameters {
            param.validate()?;
        }
        Ok(())
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}
