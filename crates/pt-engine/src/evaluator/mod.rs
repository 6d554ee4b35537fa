// Evaluator backends
// Turn a population and a problem set into a cost matrix and per-candidate scores

pub mod cluster;
pub mod fleet;
pub mod pool;
pub mod sequential;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use pt_optimizer::{total_scores, update_references, ParameterHandler};
use pt_types::{CellId, CostMatrix, Population, ProblemSet, TuneResult};

use crate::runlog::RunLog;
use crate::solver::{CellJob, ProcessSolver, SolverTemplate, SOLVER_STATUS, SOLVER_STDERR, SOLVER_STDOUT};

pub use cluster::{ClusterConfig, ClusterEvaluator, CondorScheduler, Scheduler};
pub use fleet::{FleetEvaluator, FleetNode};
pub use pool::PoolEvaluator;
pub use sequential::SequentialEvaluator;

/// Parameter file written once per candidate per generation.
pub const PARAMS_FILE: &str = "params.txt";

/// Parallel execution strategy, chosen once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    Sequential,
    WorkerPool { workers: usize },
    MessagePassingFleet { nodes: Vec<FleetNode> },
    ClusterBatch(ClusterConfig),
}

impl Default for Backend {
    fn default() -> Self {
        Backend::WorkerPool { workers: 4 }
    }
}

/// Evaluator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub backend: Backend,
    /// Root of the per-candidate and per-cell directories.
    pub work_dir: PathBuf,
    /// Update reference costs from each generation's own results.
    pub online_references: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            work_dir: PathBuf::from("work"),
            online_references: true,
        }
    }
}

impl EvaluatorConfig {
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_online_references(mut self, enabled: bool) -> Self {
        self.online_references = enabled;
        self
    }

    pub fn validate(&self) -> TuneResult<()> {
        match &self.backend {
            Backend::Sequential => Ok(()),
            Backend::WorkerPool { workers } if *workers == 0 => {
                Err(pt_types::config_error!("worker pool needs at least one worker"))
            }
            Backend::WorkerPool { .. } => Ok(()),
            Backend::MessagePassingFleet { nodes } if nodes.is_empty() => {
                Err(pt_types::config_error!("worker fleet needs at least one node"))
            }
            Backend::MessagePassingFleet { .. } => Ok(()),
            Backend::ClusterBatch(cluster) => cluster.validate(),
        }
    }
}

/// Where an evaluation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationPhase {
    Idle,
    Dispatching,
    Waiting,
    Aggregating,
}

impl fmt::Display for EvaluationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationPhase::Idle => "idle",
            EvaluationPhase::Dispatching => "dispatching",
            EvaluationPhase::Waiting => "waiting",
            EvaluationPhase::Aggregating => "aggregating",
        };
        f.write_str(name)
    }
}

pub(crate) fn enter_phase(backend: &str, phase: EvaluationPhase) {
    debug!("{} evaluator: {}", backend, phase);
}

/// Result of scoring one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationScores {
    /// One score per candidate.
    pub scores: Vec<f64>,
    pub costs: CostMatrix,
    /// References the scores were computed against.
    pub references: Vec<f64>,
}

/// Per-candidate and per-cell directory layout under the work dir.
#[derive(Debug, Clone)]
pub struct CellWorkspace {
    work_dir: PathBuf,
    handler: Arc<ParameterHandler>,
}

impl CellWorkspace {
    pub fn new(work_dir: impl Into<PathBuf>, handler: Arc<ParameterHandler>) -> Self {
        Self {
            work_dir: work_dir.into(),
            handler,
        }
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    pub fn candidate_dir(&self, candidate: usize) -> PathBuf {
        self.work_dir.join(candidate.to_string())
    }

    pub fn cell_dir(&self, cell: CellId) -> PathBuf {
        self.candidate_dir(cell.candidate).join(cell.problem.to_string())
    }

    /// Write every candidate's parameter file and clear last generation's
    /// cell outputs. Jobs come back in row-major order.
    pub fn prepare(&self, population: &Population, problems: &ProblemSet) -> TuneResult<Vec<CellJob>> {
        let mut jobs = Vec::with_capacity(population.len() * problems.len());
        for (candidate, params) in population.iter().enumerate() {
            let candidate_dir = self.candidate_dir(candidate);
            std::fs::create_dir_all(&candidate_dir)?;
            let params_file = candidate_dir.join(PARAMS_FILE);
            self.handler.save(params, &params_file)?;

            for (problem_id, problem) in problems.problems.iter().enumerate() {
                let cell = CellId::new(candidate, problem_id);
                let dir = self.cell_dir(cell);
                std::fs::create_dir_all(&dir)?;
                for stale in [SOLVER_STDOUT, SOLVER_STDERR, SOLVER_STATUS] {
                    let path = dir.join(stale);
                    if path.exists() {
                        std::fs::remove_file(path)?;
                    }
                }
                jobs.push(CellJob {
                    cell,
                    problem: problem.path.clone(),
                    params_file: params_file.clone(),
                    dir,
                });
            }
        }
        Ok(jobs)
    }
}

/// A backend that runs every (candidate, problem) cell of a generation.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the full cross product and return the dense outcome matrix.
    async fn evaluate(&self, population: &Population, problems: &ProblemSet) -> TuneResult<CostMatrix>;

    /// Evaluate a generation and score every candidate.
    async fn score_params(
        &self,
        population: &Population,
        problems: &ProblemSet,
        online_references: bool,
        log: Option<&RunLog>,
    ) -> TuneResult<GenerationScores> {
        let started = Instant::now();
        let costs = self.evaluate(population, problems).await?;
        let wall_time = started.elapsed();

        enter_phase(self.name(), EvaluationPhase::Aggregating);
        let references = if online_references {
            update_references(&problems.references(), &costs)
        } else {
            problems.references()
        };
        let scores = total_scores(&costs, &references);

        info!(
            "Evaluated {} cells in {:.1}s ({} failed)",
            population.len() * problems.len(),
            wall_time.as_secs_f64(),
            costs.failures()
        );
        if let Some(log) = log {
            log.evaluation(wall_time, &costs, &references)?;
        }
        enter_phase(self.name(), EvaluationPhase::Idle);

        Ok(GenerationScores {
            scores,
            costs,
            references,
        })
    }
}

/// Build the configured backend.
pub fn build_evaluator(
    config: &EvaluatorConfig,
    template: SolverTemplate,
    handler: Arc<ParameterHandler>,
) -> TuneResult<Box<dyn Evaluator>> {
    config.validate()?;
    let workspace = CellWorkspace::new(config.work_dir.clone(), handler);
    let evaluator: Box<dyn Evaluator> = match &config.backend {
        Backend::Sequential => {
            let runner = Arc::new(ProcessSolver::new(Arc::new(template)));
            Box::new(SequentialEvaluator::new(workspace, runner))
        }
        Backend::WorkerPool { workers } => {
            let runner = Arc::new(ProcessSolver::new(Arc::new(template)));
            Box::new(PoolEvaluator::new(workspace, runner, *workers)?)
        }
        Backend::MessagePassingFleet { nodes } => {
            Box::new(FleetEvaluator::from_nodes(workspace, &template, nodes)?)
        }
        Backend::ClusterBatch(cluster) => {
            let scheduler = Arc::new(CondorScheduler::new(cluster));
            Box::new(ClusterEvaluator::new(workspace, Arc::new(template), cluster.clone(), scheduler))
        }
    };
    info!("Using {} evaluator", evaluator.name());
    Ok(evaluator)
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;
    use pt_optimizer::HandlerConfig;
    use pt_types::{CellOutcome, SearchSpace};
    use std::collections::HashMap;

    use super::*;
    use crate::solver::SolverRunner;

    pub fn handler() -> Arc<ParameterHandler> {
        let space = SearchSpace::new()
            .add_float("weight", Some(0.0), Some(10.0), 1.0, 1.0)
            .add_int("depth", Some(1.0), Some(8.0), 2.0, 1.0);
        Arc::new(ParameterHandler::from_config(&HandlerConfig::Direct { space }).unwrap())
    }

    pub fn problems(n: usize) -> ProblemSet {
        ProblemSet::new(
            (0..n)
                .map(|i| pt_types::Problem::unknown(format!("p{i:02}.pddl")))
                .collect(),
        )
    }

    /// Deterministic stub: cost grows with candidate and problem ids, with
    /// selected cells failing.
    pub struct TableRunner {
        pub failures: HashMap<CellId, CellOutcome>,
        pub calls: Mutex<Vec<CellId>>,
    }

    impl TableRunner {
        pub fn new() -> Self {
            Self {
                failures: HashMap::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(mut self, cell: CellId, outcome: CellOutcome) -> Self {
            self.failures.insert(cell, outcome);
            self
        }

        pub fn expected(cell: CellId) -> CellOutcome {
            CellOutcome::Success((10 + cell.candidate * 3 + cell.problem) as u64)
        }
    }

    impl SolverRunner for TableRunner {
        fn run(&self, job: &CellJob) -> CellOutcome {
            self.calls.lock().push(job.cell);
            self.failures
                .get(&job.cell)
                .copied()
                .unwrap_or_else(|| Self::expected(job.cell))
        }
    }
}
