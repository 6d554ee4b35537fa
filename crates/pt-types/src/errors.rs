use thiserror::Error;

/// Main error type for the plantune system
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Problem generation error: {0}")]
    ProblemGeneration(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl TuneError {
    /// Only configuration problems are allowed to stop a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TuneError::Config(_) | TuneError::Checkpoint(_))
    }
}

/// Failures of a single solver invocation. These never leave the cell that
/// produced them; the evaluator downgrades them into a failed outcome.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Failed to launch solver for {cell}: {message}")]
    Spawn { cell: String, message: String },

    #[error("Solver exited with status {code:?} for {cell}")]
    NonZeroExit { cell: String, code: Option<i32> },

    #[error("Solver exceeded {limit_seconds}s wall-clock limit for {cell}")]
    TimedOut { cell: String, limit_seconds: u64 },

    #[error("No plan cost reported by solver for {cell}")]
    NoCostMarker { cell: String },
}

/// Failures talking to the external batch scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Could not parse cluster id from scheduler response: {response}")]
    UnparsableSubmission { response: String },

    #[error("Job log unavailable at {path}: {message}")]
    LogUnavailable { path: String, message: String },

    #[error("{finished} of {submitted} jobs finished before the wait ended")]
    JobsIncomplete { finished: usize, submitted: usize },
}

impl SchedulerError {
    /// Transient failures are retried forever by the cluster backend; the
    /// rest fail the generation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::CommandFailed { .. }
                | SchedulerError::UnparsableSubmission { .. }
                | SchedulerError::LogUnavailable { .. }
        )
    }
}

/// Checkpoint persistence errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint {path} has an unknown header")]
    BadMagic { path: String },

    #[error("Checkpoint {path} is truncated: expected {expected} bytes, found {found}")]
    Truncated {
        path: String,
        expected: usize,
        found: usize,
    },

    #[error("Checkpoint dimension {found} does not match parameter dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Result type alias for plantune operations
pub type TuneResult<T> = Result<T, TuneError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TuneError::Config(format!($($arg)*))
    };
}
