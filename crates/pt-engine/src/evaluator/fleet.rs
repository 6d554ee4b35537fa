// Message-passing worker fleet
// The coordinator feeds cell jobs into a shared pull queue; every node pulls
// until the queue drains and replies with the outcome of each cell

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use pt_types::{
    config_error, internal_error, CellId, CellOutcome, CostMatrix, Population, ProblemSet,
    TuneResult,
};

use super::{enter_phase, CellWorkspace, EvaluationPhase, Evaluator};
use crate::solver::{CellJob, ProcessSolver, SolverRunner, SolverTemplate};

/// One worker node of the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetNode {
    pub name: String,
    /// Command prefix that places the solver on the node, e.g. `["ssh", "node07"]`.
    /// Empty runs locally.
    #[serde(default)]
    pub launcher: Vec<String>,
}

impl FleetNode {
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            launcher: Vec::new(),
        }
    }

    pub fn remote(name: impl Into<String>, launcher: Vec<String>) -> Self {
        Self {
            name: name.into(),
            launcher,
        }
    }
}

struct Worker {
    name: String,
    runner: Arc<dyn SolverRunner>,
}

pub struct FleetEvaluator {
    workspace: CellWorkspace,
    workers: Vec<Worker>,
}

impl FleetEvaluator {
    /// Build one process runner per node. The invocation template is
    /// serialized once and every node shares the same decoded copy.
    pub fn from_nodes(
        workspace: CellWorkspace,
        template: &SolverTemplate,
        nodes: &[FleetNode],
    ) -> TuneResult<Self> {
        let encoded = serde_json::to_vec(template)?;
        let shared: Arc<SolverTemplate> = Arc::new(serde_json::from_slice(&encoded)?);
        info!(
            "Broadcasting solver template ({} bytes) to {} nodes",
            encoded.len(),
            nodes.len()
        );

        let runners = nodes
            .iter()
            .map(|node| {
                let runner: Arc<dyn SolverRunner> = Arc::new(
                    ProcessSolver::new(Arc::clone(&shared)).with_launcher(node.launcher.clone()),
                );
                (node.name.clone(), runner)
            })
            .collect();
        Self::with_runners(workspace, runners)
    }

    pub fn with_runners(
        workspace: CellWorkspace,
        runners: Vec<(String, Arc<dyn SolverRunner>)>,
    ) -> TuneResult<Self> {
        if runners.is_empty() {
            return Err(config_error!("worker fleet needs at least one node"));
        }
        let workers = runners
            .into_iter()
            .map(|(name, runner)| Worker { name, runner })
            .collect();
        Ok(Self { workspace, workers })
    }

    pub fn nodes(&self) -> usize {
        self.workers.len()
    }
}

fn serve(name: &str, runner: &dyn SolverRunner, jobs: Receiver<CellJob>, replies: Sender<(CellId, CellOutcome)>) {
    let mut served = 0usize;
    while let Ok(job) = jobs.recv() {
        let outcome = runner.run(&job);
        served += 1;
        if replies.send((job.cell, outcome)).is_err() {
            warn!("Node {} lost its coordinator", name);
            return;
        }
    }
    debug!("Node {} served {} cells", name, served);
}

#[async_trait]
impl Evaluator for FleetEvaluator {
    fn name(&self) -> &'static str {
        "message_passing_fleet"
    }

    async fn evaluate(&self, population: &Population, problems: &ProblemSet) -> TuneResult<CostMatrix> {
        enter_phase(self.name(), EvaluationPhase::Dispatching);
        let jobs = self.workspace.prepare(population, problems)?;
        let (candidates, n_problems) = (population.len(), problems.len());

        let (job_tx, job_rx) = unbounded::<CellJob>();
        let (reply_tx, reply_rx) = unbounded::<(CellId, CellOutcome)>();
        let expected = jobs.len();
        for job in jobs {
            job_tx
                .send(job)
                .map_err(|e| internal_error!("job queue closed: {}", e))?;
        }
        drop(job_tx);

        let nodes: Vec<(String, Arc<dyn SolverRunner>)> = self
            .workers
            .iter()
            .map(|w| (w.name.clone(), Arc::clone(&w.runner)))
            .collect();

        enter_phase(self.name(), EvaluationPhase::Waiting);
        tokio::task::spawn_blocking(move || {
            std::thread::scope(|scope| {
                for (name, runner) in &nodes {
                    let jobs = job_rx.clone();
                    let replies = reply_tx.clone();
                    scope.spawn(move || serve(name, runner.as_ref(), jobs, replies));
                }
                drop(reply_tx);

                let mut costs = CostMatrix::new(candidates, n_problems);
                let mut received = 0usize;
                for (cell, outcome) in reply_rx.iter() {
                    costs.set(cell, outcome);
                    received += 1;
                }
                if received < expected {
                    warn!("Fleet returned {} of {} cells", received, expected);
                }
                costs
            })
        })
        .await
        .map_err(|e| internal_error!("fleet evaluation panicked: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::testing::{handler, problems, TableRunner};
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[tokio::test]
    async fn every_cell_served_exactly_once_across_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let nodes: Vec<Arc<TableRunner>> = (0..3).map(|_| Arc::new(TableRunner::new())).collect();
        let runners = nodes
            .iter()
            .enumerate()
            .map(|(i, r)| (format!("node{i}"), Arc::clone(r) as Arc<dyn SolverRunner>))
            .collect();
        let evaluator =
            FleetEvaluator::with_runners(CellWorkspace::new(dir.path(), handler()), runners).unwrap();
        assert_eq!(evaluator.nodes(), 3);

        let population = vec![vec![1.0, 2.0]; 6];
        let costs = evaluator.evaluate(&population, &problems(3)).await.unwrap();

        let mut seen = HashSet::new();
        for node in &nodes {
            for cell in node.calls.lock().iter() {
                assert!(seen.insert(*cell), "cell {cell} ran twice");
            }
        }
        assert_eq!(seen.len(), 18);
        for cell in CostMatrix::cell_ids(6, 3) {
            assert_eq!(costs.get(cell), TableRunner::expected(cell));
        }
    }

    struct Recording(Mutex<Vec<String>>, String);

    impl SolverRunner for Recording {
        fn run(&self, job: &CellJob) -> CellOutcome {
            self.0.lock().push(self.1.clone());
            CellOutcome::Success(job.cell.problem as u64 + 1)
        }
    }

    #[tokio::test]
    async fn single_node_fleet_completes() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Recording(Mutex::new(Vec::new()), "solo".into()));
        let evaluator = FleetEvaluator::with_runners(
            CellWorkspace::new(dir.path(), handler()),
            vec![("solo".into(), log.clone() as Arc<dyn SolverRunner>)],
        )
        .unwrap();

        let result = evaluator
            .score_params(&vec![vec![1.0, 1.0]; 2], &problems(2), true, None)
            .await
            .unwrap();
        assert_eq!(log.0.lock().len(), 4);
        assert_eq!(result.scores, vec![2.0, 2.0]);
    }

    #[test]
    fn empty_fleet_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = CellWorkspace::new(dir.path(), handler());
        assert!(FleetEvaluator::with_runners(workspace.clone(), Vec::new()).is_err());
        assert!(FleetEvaluator::from_nodes(workspace, &SolverTemplate::default(), &[]).is_err());
    }

    #[test]
    fn node_config_from_json() {
        let node: FleetNode =
            serde_json::from_str(r#"{"name": "n1", "launcher": ["ssh", "n1"]}"#).unwrap();
        assert_eq!(node, FleetNode::remote("n1", vec!["ssh".into(), "n1".into()]));
        let local: FleetNode = serde_json::from_str(r#"{"name": "local"}"#).unwrap();
        assert_eq!(local, FleetNode::local("local"));
    }
}
