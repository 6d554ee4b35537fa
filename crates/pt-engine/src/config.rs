// Tuner configuration
// One JSON document describing the search space, solver, backend and budget

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pt_optimizer::{EvolutionRule, HandlerConfig, ParameterHandler, DEFAULT_SKIP_THRESHOLD};
use pt_types::{config_error, SearchSpace, TuneResult};

use crate::evaluator::{Backend, EvaluatorConfig};
use crate::problems::ProblemSource;
use crate::solver::SolverTemplate;

/// Complete configuration for a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub handler: HandlerConfig,
    pub rule: EvolutionRule,
    pub population_size: usize,
    /// Wall-clock training budget.
    pub training_seconds: u64,
    pub max_generations: Option<u64>,
    /// Best score at or below which a generation is not used for an update.
    pub skip_threshold: f64,
    /// Pause before a failed generation is attempted again.
    pub retry_delay_ms: u64,
    /// Seed for the sampling RNG; entropy when unset.
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub solver: SolverTemplate,
    pub evaluator: EvaluatorConfig,
    pub problems: ProblemSource,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            handler: HandlerConfig::Direct {
                space: SearchSpace::default(),
            },
            rule: EvolutionRule::default(),
            population_size: 50,
            training_seconds: 24 * 3600,
            max_generations: None,
            skip_threshold: DEFAULT_SKIP_THRESHOLD,
            retry_delay_ms: 30_000,
            seed: None,
            output_dir: PathBuf::from("output"),
            solver: SolverTemplate::default(),
            evaluator: EvaluatorConfig::default(),
            problems: ProblemSource::default(),
        }
    }
}

impl TunerConfig {
    pub fn new(handler: HandlerConfig) -> Self {
        Self {
            handler,
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> TuneResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read config {}: {}", path.display(), e))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| config_error!("invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_rule(mut self, rule: EvolutionRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_population_size(mut self, size: usize) -> Self {
        self.population_size = size;
        self
    }

    pub fn with_training_seconds(mut self, seconds: u64) -> Self {
        self.training_seconds = seconds;
        self
    }

    pub fn with_max_generations(mut self, generations: u64) -> Self {
        self.max_generations = Some(generations);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_solver(mut self, solver: SolverTemplate) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.evaluator.backend = backend;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.evaluator.work_dir = dir.into();
        self
    }

    pub fn with_problems(mut self, problems: ProblemSource) -> Self {
        self.problems = problems;
        self
    }

    pub fn training_budget(&self) -> Duration {
        Duration::from_secs(self.training_seconds)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join("checkpoint.bin")
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.output_dir.join("run.log")
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.population_size == 0 {
            return Err(config_error!("population_size must be positive"));
        }
        if self.training_seconds == 0 {
            return Err(config_error!("training_seconds must be positive"));
        }
        if !self.skip_threshold.is_finite() {
            return Err(config_error!("skip_threshold must be finite"));
        }
        if self.solver.time_limit_seconds == 0 {
            return Err(config_error!("solver time limit must be positive"));
        }
        ParameterHandler::from_config(&self.handler)?;
        self.rule.validate(self.population_size)?;
        self.evaluator.validate()?;
        self.problems.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_float("epsilon", Some(0.0), Some(1.0), 0.5, 0.5)
            .add_int("stall_size", Some(0.0), None, 10.0, 10.0)
    }

    #[test]
    fn defaults_follow_the_usual_run() {
        let config = TunerConfig::new(HandlerConfig::Direct { space: space() });
        assert_eq!(config.population_size, 50);
        assert_eq!(config.rule, EvolutionRule::Cem { alpha: 0.7, elite_size: 10 });
        assert_eq!(config.skip_threshold, 0.001);
        assert_eq!(config.retry_delay(), Duration::from_secs(30));
        assert!(config.evaluator.online_references);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn elite_larger_than_population_is_rejected() {
        let config = TunerConfig::new(HandlerConfig::Direct { space: space() })
            .with_population_size(5);
        assert!(config.validate().is_err());
        assert!(config
            .with_rule(EvolutionRule::Cem { alpha: 0.7, elite_size: 5 })
            .validate()
            .is_ok());
    }

    #[test]
    fn loads_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.json");
        std::fs::write(
            &path,
            r#"{
                "handler": {"kind": "encoded", "layers": [4, 3]},
                "rule": {"rule": "fixed_variance", "alpha": 0.5, "elite_size": 4},
                "population_size": 12,
                "max_generations": 3,
                "evaluator": {"backend": {"kind": "sequential"}},
                "problems": {"kind": "directory", "dir": "/data/problems"},
                "solver": {"executable": "/opt/fd/fast-downward.py", "time_limit_seconds": 60}
            }"#,
        )
        .unwrap();

        let config = TunerConfig::from_file(&path).unwrap();
        assert_eq!(config.population_size, 12);
        assert_eq!(config.max_generations, Some(3));
        assert_eq!(config.evaluator.backend, Backend::Sequential);
        assert_eq!(config.solver.time_limit_seconds, 60);
        assert_eq!(config.solver.memory_limit, "4G");
        assert_eq!(config.checkpoint_path(), PathBuf::from("output/checkpoint.bin"));
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = TunerConfig::from_file(&path).unwrap_err();
        assert!(err.is_fatal());
        assert!(TunerConfig::default().validate().is_err());
        assert!(TunerConfig::from_file(&dir.path().join("missing.json")).is_err());
    }
}
