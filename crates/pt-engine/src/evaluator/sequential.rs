// Sequential evaluator: one cell at a time, in row-major order

use async_trait::async_trait;
use std::sync::Arc;

use pt_types::{internal_error, CostMatrix, Population, ProblemSet, TuneResult};

use super::{enter_phase, CellWorkspace, EvaluationPhase, Evaluator};
use crate::solver::SolverRunner;

pub struct SequentialEvaluator {
    workspace: CellWorkspace,
    runner: Arc<dyn SolverRunner>,
}

impl SequentialEvaluator {
    pub fn new(workspace: CellWorkspace, runner: Arc<dyn SolverRunner>) -> Self {
        Self { workspace, runner }
    }
}

#[async_trait]
impl Evaluator for SequentialEvaluator {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn evaluate(&self, population: &Population, problems: &ProblemSet) -> TuneResult<CostMatrix> {
        enter_phase(self.name(), EvaluationPhase::Dispatching);
        let jobs = self.workspace.prepare(population, problems)?;
        let runner = Arc::clone(&self.runner);
        let (candidates, n_problems) = (population.len(), problems.len());

        enter_phase(self.name(), EvaluationPhase::Waiting);
        tokio::task::spawn_blocking(move || {
            let outcomes = jobs.iter().map(|job| (job.cell, runner.run(job)));
            CostMatrix::from_outcomes(candidates, n_problems, outcomes)
        })
        .await
        .map_err(|e| internal_error!("sequential evaluation panicked: {}", e))
    }
}
