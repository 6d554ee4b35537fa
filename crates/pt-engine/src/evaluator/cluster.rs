// Cluster batch evaluator
// Packs cells into shards, submits them as one array job to an HTCondor-style
// scheduler and polls the shared job log until enough shards have finished.
// Every cell writes into `cluster_<id>/` below its directory, so output of a
// job left over from an earlier cluster is never read as a fresh result.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use pt_types::{
    config_error, CellOutcome, CostMatrix, Population, ProblemSet, SchedulerError, TuneResult,
};

/// Prefix of the per-cluster output directory inside each cell.
pub const BATCH_OUTPUT_PREFIX: &str = "cluster_";

use super::{enter_phase, CellWorkspace, EvaluationPhase, Evaluator};
use crate::solver::{
    classify, outcome_of, CellJob, SolverTemplate, SOLVER_STATUS, SOLVER_STDERR, SOLVER_STDOUT,
};

/// Cluster backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cells packed into one scheduler job.
    pub threads_per_node: usize,
    /// Share of jobs that must finish before the generation proceeds.
    pub completion_fraction: f64,
    /// Machine requirements predicate passed through to the scheduler.
    pub requirements: Option<String>,
    pub poll_interval_ms: u64,
    /// Pause between attempts when the scheduler misbehaves.
    pub retry_delay_ms: u64,
    pub submit_command: String,
    pub remove_command: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            threads_per_node: 4,
            completion_fraction: 0.9,
            requirements: None,
            poll_interval_ms: 10_000,
            retry_delay_ms: 30_000,
            submit_command: "condor_submit".to_string(),
            remove_command: "condor_rm".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn with_threads_per_node(mut self, threads: usize) -> Self {
        self.threads_per_node = threads;
        self
    }

    pub fn with_completion_fraction(mut self, fraction: f64) -> Self {
        self.completion_fraction = fraction;
        self
    }

    pub fn with_intervals(mut self, poll_ms: u64, retry_ms: u64) -> Self {
        self.poll_interval_ms = poll_ms;
        self.retry_delay_ms = retry_ms;
        self
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.threads_per_node == 0 {
            return Err(config_error!("threads_per_node must be at least 1"));
        }
        if !(self.completion_fraction > 0.0 && self.completion_fraction <= 1.0) {
            return Err(config_error!(
                "completion_fraction must lie in (0, 1], got {}",
                self.completion_fraction
            ));
        }
        Ok(())
    }
}

/// Talks to the external batch scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Submit a job description; returns the scheduler's response text.
    async fn submit(&self, description: &Path) -> Result<String, SchedulerError>;

    /// Current contents of the shared job log.
    async fn job_log(&self, log: &Path) -> Result<String, SchedulerError>;

    /// Remove whatever is left of a cluster.
    async fn cancel(&self, cluster: u64) -> Result<(), SchedulerError>;
}

/// HTCondor command-line scheduler.
#[derive(Debug, Clone)]
pub struct CondorScheduler {
    submit_command: String,
    remove_command: String,
}

impl CondorScheduler {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            submit_command: config.submit_command.clone(),
            remove_command: config.remove_command.clone(),
        }
    }

    async fn run(&self, program: &str, arg: &str) -> Result<String, SchedulerError> {
        let command = format!("{program} {arg}");
        let output = Command::new(program)
            .arg(arg)
            .output()
            .await
            .map_err(|e| SchedulerError::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(SchedulerError::CommandFailed {
                command,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Scheduler for CondorScheduler {
    async fn submit(&self, description: &Path) -> Result<String, SchedulerError> {
        self.run(&self.submit_command, &description.display().to_string())
            .await
    }

    async fn job_log(&self, log: &Path) -> Result<String, SchedulerError> {
        tokio::fs::read_to_string(log)
            .await
            .map_err(|e| SchedulerError::LogUnavailable {
                path: log.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn cancel(&self, cluster: u64) -> Result<(), SchedulerError> {
        self.run(&self.remove_command, &cluster.to_string()).await?;
        Ok(())
    }
}

/// Cluster id from a response like `12 job(s) submitted to cluster 4711.`
pub fn parse_cluster_id(response: &str) -> Result<u64, SchedulerError> {
    static SUBMITTED: OnceLock<Regex> = OnceLock::new();
    let re = SUBMITTED
        .get_or_init(|| Regex::new(r"submitted to cluster (\d+)").expect("valid regex"));
    re.captures(response)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| SchedulerError::UnparsableSubmission {
            response: response.trim().to_string(),
        })
}

/// Distinct jobs of `cluster` with a terminated (005) or aborted (009) event.
pub fn count_finished(log: &str, cluster: u64) -> usize {
    static EVENT: OnceLock<Regex> = OnceLock::new();
    let re = EVENT.get_or_init(|| {
        Regex::new(r"(?m)^(005|009) \((\d+)\.(\d+)\.(\d+)\)").expect("valid regex")
    });
    re.captures_iter(log)
        .filter(|caps| caps[2].parse::<u64>().ok() == Some(cluster))
        .filter_map(|caps| caps[3].parse::<u64>().ok())
        .collect::<HashSet<_>>()
        .len()
}

/// Jobs that must finish before the wait ends.
pub fn required_jobs(n_jobs: usize, fraction: f64) -> usize {
    (((n_jobs as f64) * fraction - 1e-9).ceil() as usize).min(n_jobs)
}

/// Run `op` until it succeeds, pausing `delay` after each transient
/// failure. Returns the value and the number of attempts it took; a
/// non-transient error is returned straight away.
pub async fn retry_forever<T, F, Fut>(
    what: &str,
    delay: Duration,
    mut op: F,
) -> Result<(T, u32), SchedulerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SchedulerError>>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok((value, attempts)),
            Err(e) if e.is_transient() => {
                warn!("{} failed (attempt {}): {}; retrying in {:?}", what, attempts, e, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Where a cell's solver output lands for one cluster.
pub fn batch_output_dir(cell_dir: &Path, cluster: u64) -> PathBuf {
    cell_dir.join(format!("{BATCH_OUTPUT_PREFIX}{cluster}"))
}

/// Drop output directories of earlier clusters.
fn prune_batch_outputs(cell_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(cell_dir) else {
        return;
    };
    for entry in entries.flatten() {
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(BATCH_OUTPUT_PREFIX)
        {
            if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                debug!("Could not remove {}: {}", entry.path().display(), e);
            }
        }
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn quote_path(p: &Path) -> String {
    quote(&p.display().to_string())
}

/// On-disk layout of one submitted generation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBatch {
    pub dir: PathBuf,
    pub description: PathBuf,
    pub log: PathBuf,
    pub shards: usize,
}

impl ClusterBatch {
    pub fn manifest(dir: &Path, shard: usize) -> PathBuf {
        dir.join(format!("shard_{shard}.txt"))
    }

    fn shard_script(dir: &Path, shard: usize) -> PathBuf {
        dir.join(format!("shard_{shard}.sh"))
    }
}

/// Script run for one cell. Takes the cluster id as its argument and leaves
/// the exit status next to the output in that cluster's directory.
fn cell_script(template: &SolverTemplate, job: &CellJob) -> String {
    let argv: Vec<String> = template
        .argv(&job.problem, &job.params_file)
        .iter()
        .map(|a| quote(a))
        .collect();
    format!(
        "#!/bin/sh\ncd {dir} || exit 1\nmkdir -p {prefix}\"$1\" && cd {prefix}\"$1\" || exit 1\ntimeout -s INT -k {grace} {limit} {argv} > {out} 2> {err}\necho $? > {status}\n",
        dir = quote_path(&job.dir),
        prefix = BATCH_OUTPUT_PREFIX,
        grace = template.grace_period_seconds,
        limit = template.time_limit_seconds,
        argv = argv.join(" "),
        out = SOLVER_STDOUT,
        err = SOLVER_STDERR,
        status = SOLVER_STATUS,
    )
}

/// Replace `path` through a rename; a shell still reading the old file
/// keeps its own copy.
fn replace_file(path: &Path, contents: &str, mode: u32) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))?;
    std::fs::rename(&tmp, path)
}

fn write_executable(path: &Path, contents: &str) -> std::io::Result<()> {
    replace_file(path, contents, 0o755)
}

/// Shard the row-major cells and write every script plus the submission
/// description.
pub fn write_batch(
    dir: &Path,
    jobs: &[CellJob],
    template: &SolverTemplate,
    config: &ClusterConfig,
) -> std::io::Result<ClusterBatch> {
    std::fs::create_dir_all(dir)?;
    let shards: Vec<&[CellJob]> = jobs.chunks(config.threads_per_node).collect();

    for (shard, cells) in shards.iter().enumerate() {
        let mut manifest = String::new();
        for job in cells.iter() {
            let script = job.dir.join("cell.sh");
            write_executable(&script, &cell_script(template, job))?;
            manifest.push_str(&script.display().to_string());
            manifest.push('\n');
        }
        let manifest_path = ClusterBatch::manifest(dir, shard);
        replace_file(&manifest_path, &manifest, 0o644)?;
        write_executable(
            &ClusterBatch::shard_script(dir, shard),
            &format!(
                "#!/bin/sh\nwhile IFS= read -r cell; do\n  sh \"$cell\" \"$1\" &\ndone < {}\nwait\n",
                quote_path(&manifest_path)
            ),
        )?;
    }

    let dispatch = dir.join("dispatch.sh");
    write_executable(
        &dispatch,
        &format!("#!/bin/sh\nexec sh {}/shard_\"$1\".sh \"$2\"\n", quote_path(dir)),
    )?;

    let log = dir.join("jobs.log");
    let mut description = format!(
        "universe = vanilla\nexecutable = {}\noutput = {}/shard_$(Process).out\nerror = {}/shard_$(Process).err\nlog = {}\narguments = $(Process) $(Cluster)\n",
        dispatch.display(),
        dir.display(),
        dir.display(),
        log.display()
    );
    if let Some(requirements) = &config.requirements {
        description.push_str(&format!("requirements = {requirements}\n"));
    }
    description.push_str(&format!("queue {}\n", shards.len()));
    let description_path = dir.join("submit.txt");
    std::fs::write(&description_path, description)?;

    Ok(ClusterBatch {
        dir: dir.to_path_buf(),
        description: description_path,
        log,
        shards: shards.len(),
    })
}

/// Outcome of a cell after the wait; no status file for this cluster means
/// it never ran.
fn collect_outcome(job: &CellJob, cluster: u64) -> CellOutcome {
    let output = batch_output_dir(&job.dir, cluster);
    let Ok(status) = std::fs::read_to_string(output.join(SOLVER_STATUS)) else {
        return CellOutcome::JobNeverCompleted;
    };
    let code = status.trim().parse::<i32>().ok();
    let stdout = std::fs::read_to_string(output.join(SOLVER_STDOUT)).unwrap_or_default();
    outcome_of(classify(job.cell, code, &stdout))
}

pub struct ClusterEvaluator {
    workspace: CellWorkspace,
    template: Arc<SolverTemplate>,
    config: ClusterConfig,
    scheduler: Arc<dyn Scheduler>,
}

impl ClusterEvaluator {
    pub fn new(
        workspace: CellWorkspace,
        template: Arc<SolverTemplate>,
        config: ClusterConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            workspace,
            template,
            config,
            scheduler,
        }
    }

    fn batch_dir(&self) -> PathBuf {
        self.workspace.work_dir().join("cluster")
    }

    async fn submit(&self, batch: &ClusterBatch) -> Result<u64, SchedulerError> {
        let retry = Duration::from_millis(self.config.retry_delay_ms);
        let scheduler = &self.scheduler;
        let description = &batch.description;
        let (cluster, attempts) = retry_forever("Batch submission", retry, || async move {
            let response = scheduler.submit(description).await?;
            parse_cluster_id(&response)
        })
        .await?;
        info!(
            "Submitted {} jobs as cluster {} after {} attempt(s)",
            batch.shards, cluster, attempts
        );
        Ok(cluster)
    }

    async fn wait_for(&self, batch: &ClusterBatch, cluster: u64) -> Result<usize, SchedulerError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let retry = Duration::from_millis(self.config.retry_delay_ms);
        let required = required_jobs(batch.shards, self.config.completion_fraction);
        let scheduler = &self.scheduler;
        let log = &batch.log;

        loop {
            tokio::time::sleep(poll).await;
            let (text, _) =
                retry_forever("Reading job log", retry, || async move { scheduler.job_log(log).await })
                    .await?;
            let finished = count_finished(&text, cluster);
            debug!("Cluster {}: {}/{} jobs finished", cluster, finished, batch.shards);
            if finished >= required {
                return Ok(finished);
            }
        }
    }
}

#[async_trait]
impl Evaluator for ClusterEvaluator {
    fn name(&self) -> &'static str {
        "cluster_batch"
    }

    async fn evaluate(&self, population: &Population, problems: &ProblemSet) -> TuneResult<CostMatrix> {
        enter_phase(self.name(), EvaluationPhase::Dispatching);
        let jobs = self.workspace.prepare(population, problems)?;
        for job in &jobs {
            prune_batch_outputs(&job.dir);
        }
        let batch = write_batch(&self.batch_dir(), &jobs, &self.template, &self.config)?;
        if batch.log.exists() {
            std::fs::remove_file(&batch.log)?;
        }
        let cluster = self.submit(&batch).await?;

        enter_phase(self.name(), EvaluationPhase::Waiting);
        let finished = match self.wait_for(&batch, cluster).await {
            Ok(finished) => finished,
            Err(e) => {
                if let Err(cancel) = self.scheduler.cancel(cluster).await {
                    warn!("Failed to remove cluster {}: {}", cluster, cancel);
                }
                return Err(e.into());
            }
        };
        if finished < batch.shards {
            let incomplete = SchedulerError::JobsIncomplete {
                finished,
                submitted: batch.shards,
            };
            info!("{}; removing cluster {}", incomplete, cluster);
            if let Err(e) = self.scheduler.cancel(cluster).await {
                warn!("Failed to remove cluster {}: {}", cluster, e);
            }
        }
        match std::fs::remove_file(&batch.log) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove job log {}: {}", batch.log.display(), e),
        }

        let outcomes = jobs.iter().map(|job| (job.cell, collect_outcome(job, cluster)));
        Ok(CostMatrix::from_outcomes(population.len(), problems.len(), outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::testing::{handler, problems};
    use parking_lot::Mutex;
    use pt_types::CellId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake scheduler: fails the first submissions, then "runs" the first
    /// `completes` shards of cluster 42 by writing their outputs and log
    /// events. With `straggler` set, the remaining cells also receive output
    /// from a job of that earlier cluster which was never removed.
    struct FakeScheduler {
        failures_left: AtomicUsize,
        submits: AtomicUsize,
        completes: usize,
        straggler: Option<u64>,
        log: Mutex<String>,
        cancelled: Mutex<Vec<u64>>,
    }

    impl FakeScheduler {
        fn new(failures: usize, completes: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                submits: AtomicUsize::new(0),
                completes,
                straggler: None,
                log: Mutex::new(String::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }

        fn with_straggler(mut self, cluster: u64) -> Self {
            self.straggler = Some(cluster);
            self
        }
    }

    fn write_output(dir: &Path, cost: u64) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("solver.out"), format!("Plan cost: {cost}\n")).unwrap();
        std::fs::write(dir.join("solver.status"), "0\n").unwrap();
    }

    #[async_trait]
    impl Scheduler for FakeScheduler {
        async fn submit(&self, description: &Path) -> Result<String, SchedulerError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::CommandFailed {
                    command: "condor_submit".into(),
                    message: "Failed to connect to schedd".into(),
                });
            }

            let text = std::fs::read_to_string(description).unwrap();
            let shards: usize = text
                .lines()
                .find_map(|l| l.strip_prefix("queue "))
                .unwrap()
                .parse()
                .unwrap();
            let dir = description.parent().unwrap();
            let mut log = self.log.lock();
            for shard in 0..shards {
                let manifest = std::fs::read_to_string(ClusterBatch::manifest(dir, shard)).unwrap();
                for script in manifest.lines() {
                    let cell_dir = Path::new(script).parent().unwrap();
                    if shard < self.completes {
                        write_output(&batch_output_dir(cell_dir, 42), 7);
                    } else if let Some(old) = self.straggler {
                        write_output(&batch_output_dir(cell_dir, old), 1);
                        write_output(cell_dir, 1);
                    }
                }
                if shard >= self.completes {
                    continue;
                }
                log.push_str(&format!(
                    "001 (042.{shard:03}.000) 10/16 12:00:00 Job executing on host\n...\n005 (042.{shard:03}.000) 10/16 12:00:09 Job terminated.\n"
                ));
            }
            Ok(format!("Submitting job(s).\n{shards} job(s) submitted to cluster 42.\n"))
        }

        async fn job_log(&self, _log: &Path) -> Result<String, SchedulerError> {
            Ok(self.log.lock().clone())
        }

        async fn cancel(&self, cluster: u64) -> Result<(), SchedulerError> {
            self.cancelled.lock().push(cluster);
            Ok(())
        }
    }

    fn evaluator(dir: &Path, scheduler: Arc<FakeScheduler>, threads: usize) -> ClusterEvaluator {
        ClusterEvaluator::new(
            CellWorkspace::new(dir, handler()),
            Arc::new(SolverTemplate::default()),
            ClusterConfig::default()
                .with_threads_per_node(threads)
                .with_intervals(1, 1),
            scheduler,
        )
    }

    #[test]
    fn parses_cluster_id_from_submission() {
        assert_eq!(
            parse_cluster_id("Submitting job(s)....\n8 job(s) submitted to cluster 1337.\n").unwrap(),
            1337
        );
        assert!(matches!(
            parse_cluster_id("ERROR: Failed to connect to local queue manager"),
            Err(SchedulerError::UnparsableSubmission { .. })
        ));
    }

    #[test]
    fn counts_terminated_and_aborted_jobs_of_one_cluster() {
        let log = "\
000 (042.000.000) 10/16 12:00:00 Job submitted from host: <10.0.0.1>
...
005 (042.000.000) 10/16 12:01:00 Job terminated.
...
009 (042.003.000) 10/16 12:01:30 Job was aborted by the user.
...
005 (041.001.000) 10/16 12:01:40 Job terminated.
...
005 (042.000.000) 10/16 12:02:00 Job terminated.
";
        assert_eq!(count_finished(log, 42), 2);
        assert_eq!(count_finished(log, 41), 1);
        assert_eq!(count_finished("", 42), 0);
    }

    #[test]
    fn completion_threshold_rounds_up() {
        assert_eq!(required_jobs(10, 0.9), 9);
        assert_eq!(required_jobs(7, 0.9), 7);
        assert_eq!(required_jobs(20, 0.9), 18);
        assert_eq!(required_jobs(3, 1.0), 3);
        assert_eq!(required_jobs(0, 0.9), 0);
    }

    #[test]
    fn batch_is_sharded_row_major() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = CellWorkspace::new(dir.path(), handler());
        let jobs = workspace.prepare(&vec![vec![1.0, 2.0]; 3], &problems(3)).unwrap();
        let config = ClusterConfig {
            requirements: Some("regexp(\"node0[1-4]\", Machine)".into()),
            ..ClusterConfig::default()
        };

        let batch = write_batch(&dir.path().join("cluster"), &jobs, &SolverTemplate::default(), &config)
            .unwrap();
        assert_eq!(batch.shards, 3);

        let last = std::fs::read_to_string(ClusterBatch::manifest(&batch.dir, 2)).unwrap();
        assert_eq!(last.lines().count(), 1);
        assert!(last.contains(&dir.path().join("2").join("2").join("cell.sh").display().to_string()));

        let description = std::fs::read_to_string(&batch.description).unwrap();
        assert!(description.contains("arguments = $(Process) $(Cluster)"));
        assert!(description.contains("requirements = regexp(\"node0[1-4]\", Machine)"));
        assert!(description.ends_with("queue 3\n"));

        let script = std::fs::read_to_string(dir.path().join("0").join("1").join("cell.sh")).unwrap();
        assert!(script.contains("timeout -s INT -k 5 30 'fast-downward.py'"));
        assert!(script.contains("mkdir -p cluster_\"$1\" && cd cluster_\"$1\""));
        assert!(script.contains("echo $? > solver.status"));
    }

    #[tokio::test]
    async fn transient_submission_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(FakeScheduler::new(2, usize::MAX));
        let evaluator = evaluator(dir.path(), scheduler.clone(), 2);

        let result = evaluator
            .score_params(&vec![vec![1.0, 2.0]; 4], &problems(2), true, None)
            .await
            .unwrap();
        assert_eq!(scheduler.submits.load(Ordering::SeqCst), 3);
        assert_eq!(result.scores, vec![2.0; 4]);
        assert_eq!(result.costs.failures(), 0);
        assert!(scheduler.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn proceeds_at_completion_fraction_and_cancels_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        // 10 shards of one cell; only the first 9 ever finish
        let scheduler = Arc::new(FakeScheduler::new(0, 9));
        let evaluator = evaluator(dir.path(), scheduler.clone(), 1);

        let costs = evaluator
            .evaluate(&vec![vec![1.0, 2.0]; 5], &problems(2))
            .await
            .unwrap();
        assert_eq!(*scheduler.cancelled.lock(), vec![42]);
        assert_eq!(costs.failures(), 1);
        assert_eq!(costs.get(CellId::new(4, 1)), CellOutcome::JobNeverCompleted);
        assert_eq!(costs.get(CellId::new(4, 0)), CellOutcome::Success(7));
    }

    #[tokio::test]
    async fn output_of_an_earlier_cluster_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        // Left over from a previous generation
        write_output(&batch_output_dir(&dir.path().join("0").join("0"), 40), 3);

        let scheduler = Arc::new(FakeScheduler::new(0, 9).with_straggler(41));
        let evaluator = evaluator(dir.path(), scheduler.clone(), 1);
        let costs = evaluator
            .evaluate(&vec![vec![1.0, 2.0]; 5], &problems(2))
            .await
            .unwrap();

        assert!(!batch_output_dir(&dir.path().join("0").join("0"), 40).exists());
        assert_eq!(costs.get(CellId::new(0, 0)), CellOutcome::Success(7));
        assert_eq!(costs.get(CellId::new(4, 1)), CellOutcome::JobNeverCompleted);
    }

    #[tokio::test]
    async fn permanent_scheduler_errors_are_not_retried() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: Result<((), u32), SchedulerError> =
            retry_forever("Waiting", Duration::from_millis(1), || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(SchedulerError::JobsIncomplete {
                    finished: 0,
                    submitted: 1,
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
