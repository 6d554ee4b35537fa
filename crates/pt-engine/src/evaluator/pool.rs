// Local worker pool evaluator
// A fixed rayon pool works through the full cross product; outcomes land in a
// concurrent map as they finish and are densified afterwards

use async_trait::async_trait;
use dashmap::DashMap;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tracing::debug;

use pt_types::{
    config_error, internal_error, CellId, CellOutcome, CostMatrix, Population, ProblemSet,
    TuneResult,
};

use super::{enter_phase, CellWorkspace, EvaluationPhase, Evaluator};
use crate::solver::SolverRunner;

pub struct PoolEvaluator {
    workspace: CellWorkspace,
    runner: Arc<dyn SolverRunner>,
    pool: Arc<ThreadPool>,
    workers: usize,
}

impl PoolEvaluator {
    pub fn new(
        workspace: CellWorkspace,
        runner: Arc<dyn SolverRunner>,
        workers: usize,
    ) -> TuneResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pt-cell-{i}"))
            .build()
            .map_err(|e| config_error!("failed to start worker pool: {}", e))?;
        Ok(Self {
            workspace,
            runner,
            pool: Arc::new(pool),
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

#[async_trait]
impl Evaluator for PoolEvaluator {
    fn name(&self) -> &'static str {
        "worker_pool"
    }

    async fn evaluate(&self, population: &Population, problems: &ProblemSet) -> TuneResult<CostMatrix> {
        enter_phase(self.name(), EvaluationPhase::Dispatching);
        let jobs = self.workspace.prepare(population, problems)?;
        let runner = Arc::clone(&self.runner);
        let pool = Arc::clone(&self.pool);
        let (candidates, n_problems) = (population.len(), problems.len());

        enter_phase(self.name(), EvaluationPhase::Waiting);
        let results = tokio::task::spawn_blocking(move || {
            let results: DashMap<CellId, CellOutcome> = DashMap::with_capacity(jobs.len());
            pool.install(|| {
                jobs.par_iter().for_each(|job| {
                    let outcome = runner.run(job);
                    debug!("Cell {} finished: {:?}", job.cell, outcome);
                    results.insert(job.cell, outcome);
                });
            });
            results
        })
        .await
        .map_err(|e| internal_error!("worker pool evaluation panicked: {}", e))?;

        Ok(CostMatrix::from_outcomes(candidates, n_problems, results))
    }
}
