// plantune evaluation engine
// Solver invocation, evaluator backends, problem sources, checkpoints and the driver loop

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod evaluator;
pub mod problems;
pub mod runlog;
pub mod solver;

pub use checkpoint::Checkpoint;
pub use config::TunerConfig;
pub use driver::{Tuner, TunerState};
pub use evaluator::{build_evaluator, Backend, Evaluator, EvaluatorConfig, GenerationScores};
pub use problems::{ProblemProvider, ProblemSource};
pub use runlog::RunLog;
pub use solver::{CellJob, ProcessSolver, SolverRunner, SolverTemplate};
