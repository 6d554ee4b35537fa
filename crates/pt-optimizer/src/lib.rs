//! # pt-optimizer
//!
//! Search distribution and update rules for plantune.
//!
//! Provides the parameter handlers that turn sampled vectors into solver
//! parameter files, the multivariate-normal search distribution, IPC-style
//! reward scoring with online reference costs, the evolution rules and run
//! status tracking.

pub mod distribution;
pub mod evolution;
pub mod handler;
pub mod run;
pub mod scoring;

pub use distribution::{Distribution, EIGENVALUE_FLOOR};
pub use evolution::{rank_weights, should_update, EvolutionRule, DEFAULT_SKIP_THRESHOLD};
pub use handler::{DirectHandler, EncodedHandler, HandlerConfig, ParameterHandler};
pub use run::{GenerationRecord, RunId, RunState, RunStatus};
pub use scoring::{
    rank, reward, total_score, total_scores, update_references, NoRewardSignal,
    UNKNOWN_REFERENCE_BONUS,
};
