// Driver loop
// Sample, evaluate, update and persist, one generation at a time, until the
// training budget or the generation limit runs out

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use pt_optimizer::{
    rank, should_update, Distribution, GenerationRecord, ParameterHandler, RunStatus,
};
use pt_types::{ReferenceCosts, TuneResult};

use crate::checkpoint::Checkpoint;
use crate::config::TunerConfig;
use crate::evaluator::{build_evaluator, Evaluator};
use crate::problems::ProblemProvider;
use crate::runlog::RunLog;

/// Everything that survives from one generation to the next.
#[derive(Debug)]
pub struct TunerState {
    /// Next generation to run.
    pub generation: u64,
    pub distribution: Distribution,
    pub references: ReferenceCosts,
    pub status: RunStatus,
    rng: ChaCha8Rng,
}

impl TunerState {
    pub fn new(generation: u64, distribution: Distribution, seed: Option<u64>) -> Self {
        let rng = match seed {
            // Offset by generation so a resumed run does not replay its samples
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(generation)),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            generation,
            distribution,
            references: ReferenceCosts::new(),
            status: RunStatus::new(),
            rng,
        }
    }
}

pub struct Tuner {
    config: TunerConfig,
    handler: Arc<ParameterHandler>,
    evaluator: Box<dyn Evaluator>,
    problems: ProblemProvider,
    log: Option<RunLog>,
}

impl Tuner {
    pub fn new(config: TunerConfig) -> TuneResult<Self> {
        config.validate()?;
        let handler = Arc::new(ParameterHandler::from_config(&config.handler)?);
        let evaluator = build_evaluator(&config.evaluator, config.solver.clone(), Arc::clone(&handler))?;
        Ok(Self::assemble(config, handler, evaluator))
    }

    /// Use an already built evaluator instead of the configured backend.
    pub fn with_evaluator(config: TunerConfig, evaluator: Box<dyn Evaluator>) -> TuneResult<Self> {
        config.validate()?;
        let handler = Arc::new(ParameterHandler::from_config(&config.handler)?);
        Ok(Self::assemble(config, handler, evaluator))
    }

    fn assemble(
        config: TunerConfig,
        handler: Arc<ParameterHandler>,
        evaluator: Box<dyn Evaluator>,
    ) -> Self {
        let problems = ProblemProvider::new(config.problems.clone());
        Self {
            config,
            handler,
            evaluator,
            problems,
            log: None,
        }
    }

    pub fn with_run_log(mut self, log: RunLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_problem_provider(mut self, problems: ProblemProvider) -> Self {
        self.problems = problems;
        self
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn handler(&self) -> &ParameterHandler {
        &self.handler
    }

    /// Fresh state from the handler, or the saved checkpoint when resuming.
    pub fn initial_state(&self, resume: bool, seed: Option<u64>) -> TuneResult<TunerState> {
        let seed = seed.or(self.config.seed);
        let path = self.config.checkpoint_path();
        if resume && path.exists() {
            let checkpoint = Checkpoint::load(&path, self.handler.dimension())?;
            return Ok(TunerState::new(checkpoint.generation, checkpoint.distribution, seed));
        }
        if resume {
            warn!("No checkpoint at {}; starting fresh", path.display());
        }
        Ok(TunerState::new(0, Distribution::from_handler(&self.handler), seed))
    }

    /// Run generations until the budget or generation limit is exhausted.
    /// A failed generation is retried after a pause; only fatal errors end
    /// the run early.
    pub async fn run(&mut self, state: &mut TunerState) -> TuneResult<()> {
        let started = Instant::now();
        let budget = self.config.training_budget();
        state.status.mark_running();
        info!(
            "Starting run {} at generation {} with a {:?} budget",
            state.status.id, state.generation, budget
        );

        while started.elapsed() < budget {
            if let Some(max) = self.config.max_generations {
                if state.generation >= max {
                    info!("Reached generation limit {}", max);
                    break;
                }
            }
            match self.run_generation(state, started).await {
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    state.status.record_retry();
                    let pause = self
                        .config
                        .retry_delay()
                        .min(budget.saturating_sub(started.elapsed()));
                    warn!(
                        "Generation {} failed: {}; retrying in {:?}",
                        state.generation, e, pause
                    );
                    if let Some(log) = &self.log {
                        log.note(&format!("Generation {} failed: {}", state.generation, e))?;
                    }
                    tokio::time::sleep(pause).await;
                }
                Err(e) => {
                    error!("Generation {} failed: {}", state.generation, e);
                    state.status.mark_failed(e.to_string());
                    return Err(e);
                }
            }
        }

        state.status.mark_completed();
        if let Some(best) = &state.status.best {
            info!(
                "Run finished after {} generations; best score {:.4} in generation {}",
                state.status.generations_completed, best.best_score, best.generation
            );
        }
        if let Some(log) = &self.log {
            log.flush()?;
        }
        Ok(())
    }

    /// One full generation: problems, sample, evaluate, update, persist.
    pub async fn run_generation(
        &mut self,
        state: &mut TunerState,
        run_started: Instant,
    ) -> TuneResult<GenerationRecord> {
        let generation_started = Instant::now();
        let generation = state.generation;
        info!("Generation {}", generation);

        // 1. Problems for this generation, with known references merged in
        let problems = self
            .problems
            .next_set(&mut state.references, &mut state.rng)
            .await?;

        // 2. Sample the population
        let population = state.distribution.sample(
            self.config.population_size,
            &self.handler,
            &mut state.rng,
        );

        // 3. Evaluate
        let result = self
            .evaluator
            .score_params(
                &population,
                &problems,
                self.config.evaluator.online_references,
                self.log.as_ref(),
            )
            .await?;

        // 4. Keep the improved references
        state.references.record(&problems, &result.references);

        // 5. Rank and update
        let ranking = rank(&result.scores);
        let updated = should_update(&result.scores, &ranking, self.config.skip_threshold);
        if updated {
            state.distribution = self
                .config
                .rule
                .step(&state.distribution, &population, &ranking);
        }

        // 6. Persist
        state.generation += 1;
        Checkpoint::new(state.generation, state.distribution.clone())
            .save(&self.config.checkpoint_path())?;
        self.save_mean(&state.distribution, generation)?;

        // 7. Report
        let ranked: Vec<(usize, f64)> = ranking.iter().map(|&c| (c, result.scores[c])).collect();
        let best = ranking.first().copied().unwrap_or(0);
        let best_score = result.scores.get(best).copied().unwrap_or(0.0);
        info!(
            "Generation {}: best candidate {} scored {:.4}{}",
            generation,
            best,
            best_score,
            if updated { "" } else { " (distribution kept)" }
        );
        debug!("Mean: {:?}", state.distribution.mean_vec());
        if let Some(log) = &self.log {
            log.generation(generation, &ranked, &state.distribution, run_started.elapsed())?;
        }

        // 8. Track progress and adapt the problem generator
        let record = GenerationRecord {
            generation,
            best_candidate: best,
            best_score,
            best_params: population.get(best).cloned().unwrap_or_default(),
            failed_cells: result.costs.failures(),
            total_cells: population.len() * problems.len(),
            updated,
            duration_seconds: generation_started.elapsed().as_secs_f64(),
        };
        state.status.record(record.clone());
        self.problems
            .adapt(&result.scores, &ranking, self.config.skip_threshold);
        Ok(record)
    }

    /// Mean as the current best parameter file, plus a per-generation copy.
    fn save_mean(&self, distribution: &Distribution, generation: u64) -> TuneResult<()> {
        let mut mean = distribution.mean_vec();
        self.handler.bound(&mut mean);

        let output = &self.config.output_dir;
        let history = output.join("params");
        std::fs::create_dir_all(&history)?;
        self.handler.save(&mean, &output.join("params.txt"))?;
        self.handler
            .save(&mean, &history.join(format!("params{generation}.txt")))?;
        Ok(())
    }

    pub fn params_path(&self) -> PathBuf {
        self.config.output_dir.join("params.txt")
    }
}
