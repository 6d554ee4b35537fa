// Solver invocation
// Runs the external planner for one cell and maps what happened onto a CellOutcome

use crossbeam_channel::{bounded, RecvTimeoutError};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

use pt_types::{CellId, CellOutcome, SolverError};

/// Stdout of a cell.
pub const SOLVER_STDOUT: &str = "solver.out";
/// Stderr of a cell.
pub const SOLVER_STDERR: &str = "solver.err";
/// Exit status written by batch cell scripts once the solver returned.
pub const SOLVER_STATUS: &str = "solver.status";

/// Placeholder in the search string replaced by the parameter-file path.
pub const PARAMS_PLACEHOLDER: &str = "{params}";

/// How the solver is invoked for every cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverTemplate {
    pub executable: PathBuf,
    /// Arguments placed right after the executable.
    pub pre_args: Vec<String>,
    pub time_flag: String,
    pub memory_flag: String,
    pub time_limit_seconds: u64,
    pub memory_limit: String,
    pub domain: PathBuf,
    pub heuristic: String,
    /// Search string; `{params}` is replaced with the parameter file.
    pub search: String,
    /// Time between SIGINT and SIGKILL once the limit is hit.
    pub grace_period_seconds: u64,
}

impl Default for SolverTemplate {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("fast-downward.py"),
            pre_args: vec!["--build".to_string(), "release64".to_string()],
            time_flag: "--overall-time-limit".to_string(),
            memory_flag: "--overall-memory-limit".to_string(),
            time_limit_seconds: 30,
            memory_limit: "4G".to_string(),
            domain: PathBuf::from("domain.pddl"),
            heuristic: "h=ff()".to_string(),
            search: format!("lazy_greedy([h], params={PARAMS_PLACEHOLDER})"),
            grace_period_seconds: 5,
        }
    }
}

impl SolverTemplate {
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_pre_args(mut self, pre_args: Vec<String>) -> Self {
        self.pre_args = pre_args;
        self
    }

    pub fn with_time_limit(mut self, seconds: u64) -> Self {
        self.time_limit_seconds = seconds;
        self
    }

    pub fn with_grace_period(mut self, seconds: u64) -> Self {
        self.grace_period_seconds = seconds;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<PathBuf>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_search(mut self, heuristic: impl Into<String>, search: impl Into<String>) -> Self {
        self.heuristic = heuristic.into();
        self.search = search.into();
        self
    }

    /// Full argument vector, executable first.
    pub fn argv(&self, problem: &Path, params_file: &Path) -> Vec<String> {
        let mut argv = vec![self.executable.display().to_string()];
        argv.extend(self.pre_args.iter().cloned());
        argv.push(self.time_flag.clone());
        argv.push(self.time_limit_seconds.to_string());
        argv.push(self.memory_flag.clone());
        argv.push(self.memory_limit.clone());
        argv.push(self.domain.display().to_string());
        argv.push(problem.display().to_string());
        argv.push("--heuristic".to_string());
        argv.push(self.heuristic.clone());
        argv.push("--search".to_string());
        argv.push(
            self.search
                .replace(PARAMS_PLACEHOLDER, &params_file.display().to_string()),
        );
        argv
    }
}

/// One unit of evaluator work, fully resolved on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CellJob {
    pub cell: CellId,
    pub problem: PathBuf,
    pub params_file: PathBuf,
    /// Working directory; holds the solver's output files.
    pub dir: PathBuf,
}

impl CellJob {
    pub fn stdout_path(&self) -> PathBuf {
        self.dir.join(SOLVER_STDOUT)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.dir.join(SOLVER_STDERR)
    }
}

/// Runs the solver for a single cell.
pub trait SolverRunner: Send + Sync {
    fn run(&self, job: &CellJob) -> CellOutcome;
}

/// Smallest `Plan cost: N` declared in the solver output.
pub fn parse_cost(stdout: &str) -> Option<u64> {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    let marker = MARKER.get_or_init(|| Regex::new(r"Plan cost: ([0-9]+)").expect("valid regex"));
    marker
        .captures_iter(stdout)
        .filter_map(|caps| caps[1].parse::<u64>().ok())
        .min()
}

/// Map a finished run onto the outcome taxonomy.
pub fn classify(cell: CellId, exit_code: Option<i32>, stdout: &str) -> Result<u64, SolverError> {
    if exit_code != Some(0) {
        return Err(SolverError::NonZeroExit {
            cell: cell.to_string(),
            code: exit_code,
        });
    }
    parse_cost(stdout).ok_or_else(|| SolverError::NoCostMarker {
        cell: cell.to_string(),
    })
}

/// Downgrade a solver error into the failed outcome it stands for.
pub fn outcome_of(result: Result<u64, SolverError>) -> CellOutcome {
    match result {
        Ok(cost) => CellOutcome::Success(cost),
        Err(SolverError::NoCostMarker { cell }) => {
            debug!("No plan found for cell {}", cell);
            CellOutcome::SolverReportedNoPlan
        }
        Err(e) => {
            warn!("{}", e);
            CellOutcome::SolverCrashedOrTimedOut
        }
    }
}

/// Runs the solver as a local child process, or through a launcher prefix
/// such as `ssh host`.
#[derive(Debug, Clone)]
pub struct ProcessSolver {
    template: Arc<SolverTemplate>,
    launcher: Vec<String>,
}

impl ProcessSolver {
    pub fn new(template: Arc<SolverTemplate>) -> Self {
        Self {
            template,
            launcher: Vec::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: Vec<String>) -> Self {
        self.launcher = launcher;
        self
    }

    fn command(&self, job: &CellJob) -> Command {
        let mut argv = self.launcher.clone();
        argv.extend(self.template.argv(&job.problem, &job.params_file));
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).current_dir(&job.dir).stdin(Stdio::null());
        // Own process group so the whole tree can be signalled at the deadline
        cmd.process_group(0);
        cmd
    }

    fn run_checked(&self, job: &CellJob) -> Result<u64, SolverError> {
        let spawn_err = |e: std::io::Error| SolverError::Spawn {
            cell: job.cell.to_string(),
            message: e.to_string(),
        };

        let stdout = File::create(job.stdout_path()).map_err(spawn_err)?;
        let stderr = File::create(job.stderr_path()).map_err(spawn_err)?;
        let mut child = self
            .command(job)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(spawn_err)?;
        let pgid = Pid::from_raw(child.id() as i32);

        let (tx, rx) = bounded::<std::io::Result<ExitStatus>>(1);
        std::thread::spawn(move || {
            let _ = tx.send(child.wait());
        });

        let limit = Duration::from_secs(self.template.time_limit_seconds);
        let status = match rx.recv_timeout(limit) {
            Ok(status) => status,
            Err(RecvTimeoutError::Timeout) => {
                let grace = Duration::from_secs(self.template.grace_period_seconds);
                signal_group(pgid, Signal::SIGINT);
                let _ = rx.recv_timeout(grace);
                // The direct child may be gone while descendants that ignore
                // SIGINT are still running, so the group is always killed.
                signal_group(pgid, Signal::SIGKILL);
                if rx.recv_timeout(grace).is_err() {
                    warn!("Solver for cell {} did not exit after SIGKILL", job.cell);
                }
                return Err(SolverError::TimedOut {
                    cell: job.cell.to_string(),
                    limit_seconds: self.template.time_limit_seconds,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SolverError::Spawn {
                    cell: job.cell.to_string(),
                    message: "solver watcher exited without a status".to_string(),
                })
            }
        }
        .map_err(spawn_err)?;

        let output = std::fs::read_to_string(job.stdout_path()).unwrap_or_default();
        classify(job.cell, status.code(), &output)
    }
}

impl SolverRunner for ProcessSolver {
    fn run(&self, job: &CellJob) -> CellOutcome {
        debug!("Running solver for cell {} on {}", job.cell, job.problem.display());
        outcome_of(self.run_checked(job))
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => debug!("Sent {} to process group {}", signal, pgid),
        // Every member already exited
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!("Failed to send {} to process group {}: {}", signal, pgid, e),
    }
}
