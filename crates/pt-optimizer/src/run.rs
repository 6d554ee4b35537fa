//! Run status tracking across generations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pt_types::ParameterVector;

/// Unique tuning run identifier.
pub type RunId = Uuid;

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Summary of one finished generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: u64,
    pub best_candidate: usize,
    pub best_score: f64,
    pub best_params: ParameterVector,
    pub failed_cells: usize,
    pub total_cells: usize,
    pub updated: bool,
    pub duration_seconds: f64,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub id: RunId,
    pub state: RunState,
    pub generations_completed: u64,
    pub generations_skipped: u64,
    /// Generation attempts that failed and were run again.
    pub generations_retried: u64,
    pub best: Option<GenerationRecord>,
    pub last: Option<GenerationRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RunState::Pending,
            generations_completed: 0,
            generations_skipped: 0,
            generations_retried: 0,
            best: None,
            last: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = RunState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = RunState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn record_retry(&mut self) {
        self.generations_retried += 1;
    }

    /// Record a finished generation, keeping the best one seen so far.
    pub fn record(&mut self, record: GenerationRecord) {
        self.generations_completed += 1;
        if !record.updated {
            self.generations_skipped += 1;
        }
        let improves = match &self.best {
            None => true,
            Some(best) => record.best_score > best.best_score,
        };
        if improves {
            self.best = Some(record.clone());
        }
        self.last = Some(record);
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}
