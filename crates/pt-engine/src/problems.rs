// Problem sources
// A fixed directory of problem files, or an external generator re-run every generation

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use pt_types::{
    config_error, Problem, ProblemSet, ReferenceCosts, TuneError, TuneResult, SENTINEL_COST,
};

/// Attempts per generated problem before it is dropped.
pub const GENERATOR_ATTEMPTS: u32 = 5;

/// Where each generation's problems come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemSource {
    /// Fixed problem files, read once. Every file is used each generation
    /// unless `sample` asks for a random draw from the pool.
    Directory {
        dir: PathBuf,
        #[serde(default = "default_extension")]
        extension: String,
        #[serde(default)]
        sample: Option<usize>,
    },
    /// External generator, re-run for every problem each generation.
    Generator {
        program: PathBuf,
        /// Arguments; `{output}` and `{difficulty}` are substituted.
        args: Vec<String>,
        count: usize,
        #[serde(default)]
        difficulty: i64,
        #[serde(default)]
        max_difficulty: i64,
        #[serde(default)]
        adaptive: bool,
        dir: PathBuf,
        #[serde(default = "default_extension")]
        extension: String,
    },
}

fn default_extension() -> String {
    "pddl".to_string()
}

impl Default for ProblemSource {
    fn default() -> Self {
        ProblemSource::Directory {
            dir: PathBuf::from("problems"),
            extension: default_extension(),
            sample: None,
        }
    }
}

impl ProblemSource {
    pub fn validate(&self) -> TuneResult<()> {
        if let ProblemSource::Directory {
            sample: Some(0), ..
        } = self
        {
            return Err(config_error!("sample must draw at least one problem"));
        }
        if let ProblemSource::Generator {
            count,
            difficulty,
            max_difficulty,
            ..
        } = self
        {
            if *count == 0 {
                return Err(config_error!("generator must produce at least one problem"));
            }
            if difficulty > max_difficulty {
                return Err(config_error!(
                    "initial difficulty {} exceeds max_difficulty {}",
                    difficulty,
                    max_difficulty
                ));
            }
        }
        Ok(())
    }
}

/// Best usable reference in a `<stem>.costs.json` sidecar: the minimum
/// non-negative cost over all recorded configurations.
pub fn reference_from_costs(costs: &HashMap<String, f64>) -> f64 {
    costs
        .values()
        .copied()
        .filter(|c| *c >= 0.0)
        .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.min(c))))
        .unwrap_or(SENTINEL_COST)
}

fn load_reference(problem: &Path) -> TuneResult<f64> {
    let sidecar = problem.with_extension("costs.json");
    if !sidecar.exists() {
        return Ok(SENTINEL_COST);
    }
    let text = std::fs::read_to_string(&sidecar)?;
    let costs: HashMap<String, f64> = serde_json::from_str(&text)?;
    Ok(reference_from_costs(&costs))
}

/// Read every `*.<extension>` file in `dir`, sorted by name.
pub fn load_directory(dir: &Path, extension: &str) -> TuneResult<ProblemSet> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| config_error!("cannot read problem directory {}: {}", dir.display(), e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            paths.push(path);
        }
    }
    paths.sort();
    if paths.is_empty() {
        return Err(config_error!(
            "no .{} problems found in {}",
            extension,
            dir.display()
        ));
    }

    let mut problems = Vec::with_capacity(paths.len());
    for path in paths {
        let reference = load_reference(&path)?;
        problems.push(Problem::new(path, reference));
    }
    info!("Loaded {} problems from {}", problems.len(), dir.display());
    Ok(ProblemSet::new(problems))
}

/// Hands the driver a problem set every generation and owns the current
/// generator difficulty.
#[derive(Debug)]
pub struct ProblemProvider {
    source: ProblemSource,
    difficulty: i64,
    cached: Option<ProblemSet>,
    retry_pause: Duration,
}

impl ProblemProvider {
    pub fn new(source: ProblemSource) -> Self {
        let difficulty = match &source {
            ProblemSource::Generator { difficulty, .. } => *difficulty,
            ProblemSource::Directory { .. } => 0,
        };
        Self {
            source,
            difficulty,
            cached: None,
            retry_pause: Duration::from_secs(1),
        }
    }

    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    pub fn difficulty(&self) -> i64 {
        self.difficulty
    }

    /// Problems for the next generation, with stored references applied.
    /// `rng` drives the draw when a directory source samples its pool.
    pub async fn next_set<R: Rng + ?Sized>(
        &mut self,
        references: &mut ReferenceCosts,
        rng: &mut R,
    ) -> TuneResult<ProblemSet> {
        let mut set = match &self.source {
            ProblemSource::Directory {
                dir,
                extension,
                sample,
            } => {
                let pool = match &self.cached {
                    Some(set) => set.clone(),
                    None => {
                        let set = load_directory(dir, extension)?;
                        self.cached = Some(set.clone());
                        set
                    }
                };
                match sample {
                    Some(n) => draw(&pool, *n, rng),
                    None => pool,
                }
            }
            ProblemSource::Generator { .. } => {
                let set = self.generate().await?;
                // Freshly generated files are new problems.
                for problem in &set.problems {
                    references.reset(problem);
                }
                set
            }
        };
        references.apply_to(&mut set);
        Ok(set)
    }

    async fn generate(&self) -> TuneResult<ProblemSet> {
        let ProblemSource::Generator {
            program,
            args,
            count,
            dir,
            extension,
            ..
        } = &self.source
        else {
            return Ok(ProblemSet::default());
        };
        std::fs::create_dir_all(dir)?;

        let mut problems = Vec::with_capacity(*count);
        for i in 0..*count {
            let output = dir.join(format!("problem{i:03}.{extension}"));
            if self.generate_one(program, args, &output).await {
                problems.push(Problem::unknown(output));
            } else {
                warn!(
                    "Generator failed {} times for {}; dropping it this generation",
                    GENERATOR_ATTEMPTS,
                    output.display()
                );
            }
        }
        if problems.is_empty() {
            return Err(TuneError::ProblemGeneration(format!(
                "generator {} produced no problems",
                program.display()
            )));
        }
        info!(
            "Generated {} problems at difficulty {}",
            problems.len(),
            self.difficulty
        );
        Ok(ProblemSet::new(problems))
    }

    async fn generate_one(&self, program: &Path, args: &[String], output: &Path) -> bool {
        let output_arg = output.display().to_string();
        let difficulty_arg = self.difficulty.to_string();
        let args: Vec<String> = args
            .iter()
            .map(|a| {
                a.replace("{output}", &output_arg)
                    .replace("{difficulty}", &difficulty_arg)
            })
            .collect();

        for attempt in 1..=GENERATOR_ATTEMPTS {
            let _ = std::fs::remove_file(output);
            match Command::new(program).args(&args).output().await {
                Ok(out) if out.status.success() && output.exists() => return true,
                Ok(out) => debug!(
                    "Generator attempt {} exited with {} for {}",
                    attempt,
                    out.status,
                    output.display()
                ),
                Err(e) => debug!("Generator attempt {} failed to start: {}", attempt, e),
            }
            if attempt < GENERATOR_ATTEMPTS {
                tokio::time::sleep(self.retry_pause).await;
            }
        }
        false
    }

    /// Move the generator difficulty with the population's performance.
    /// Lowered when the median-ranked candidate scores below the
    /// threshold; raised, up to the cap, when even the candidate at the
    /// three-quarter rank scores above it.
    pub fn adapt(&mut self, scores: &[f64], ranking: &[usize], threshold: f64) {
        let ProblemSource::Generator {
            adaptive: true,
            max_difficulty,
            ..
        } = &self.source
        else {
            return;
        };
        if ranking.is_empty() {
            return;
        }
        let median = scores[ranking[ranking.len() / 2]];
        let three_quarter = scores[ranking[ranking.len() * 3 / 4]];
        if median < threshold {
            self.difficulty -= 1;
            info!("Lowering problem difficulty to {}", self.difficulty);
        } else if three_quarter > threshold && self.difficulty < *max_difficulty {
            self.difficulty += 1;
            info!("Raising problem difficulty to {}", self.difficulty);
        }
    }
}

/// `n` problems drawn uniformly, with replacement, from `pool`.
fn draw<R: Rng + ?Sized>(pool: &ProblemSet, n: usize, rng: &mut R) -> ProblemSet {
    let problems: Vec<Problem> = (0..n)
        .filter_map(|_| pool.problems.choose(rng).cloned())
        .collect();
    debug!("Drew {} of {} pooled problems", problems.len(), pool.len());
    ProblemSet::new(problems)
}
