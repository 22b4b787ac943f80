use crate::allocation::Individual;
use crate::evaluate::{composite_fitness, Evaluator};
use crate::hypervolume::{estimate_hypervolume, ReferenceBox};
use crate::operators::{crossover, initialize_population, mutate, tournament_select};
use crate::problem::Problem;
use crate::repair::repair;
use anyhow::{anyhow, Result};
use cdst_structs::core::Parameters;
use cdst_utils::{jsonify, u64_from_str};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

pub const EVAL_WORKER_CAP: usize = 8;

/// Per-generation telemetry handed to the scheduler after every step.
#[derive(Clone, Copy, Debug)]
pub struct GenerationStats {
    pub generation: u32,
    pub best_composite: f64,
    pub hypervolume: f64,
    pub diversity: f64,
    /// Hypervolume variance over the convergence window fell below the
    /// threshold.
    pub converged: bool,
    /// Diversity collapsed and the best composite stopped improving.
    pub stalled: bool,
}

/// Capability surface of a population-based multi-objective solver.
/// NSGA-II is the shipped implementation; variants slot in behind this
/// trait without touching the scheduler.
pub trait Evolver: Send {
    fn initialize(&mut self) -> Result<GenerationStats>;
    fn evolve_one_generation(&mut self) -> Result<GenerationStats>;
    fn extract_front(&self) -> Vec<Individual>;
    fn population(&self) -> &[Individual];
    fn generation(&self) -> u32;
    fn base_seed(&self) -> u64;
    fn evaluator(&self) -> &Evaluator;
}

pub struct Nsga2 {
    problem: Arc<Problem>,
    params: Parameters,
    evaluator: Evaluator,
    pool: rayon::ThreadPool,
    run_key: String,
    base_seed: u64,
    population: Vec<Individual>,
    generation: u32,
    reference: Option<ReferenceBox>,
    hv_history: VecDeque<f64>,
    last_best: Option<f64>,
}

impl Nsga2 {
    pub fn new(problem: Arc<Problem>, params: Parameters, run_key: &str) -> Result<Self> {
        params.validate()?;
        let base_seed = params.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(EVAL_WORKER_CAP);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| anyhow!("failed to build evaluation pool: {}", e))?;
        let evaluator = Evaluator::new(problem.clone(), params.constraints);
        Ok(Self {
            problem,
            params,
            evaluator,
            pool,
            run_key: run_key.to_string(),
            base_seed,
            population: Vec::new(),
            generation: 0,
            reference: None,
            hv_history: VecDeque::new(),
            last_best: None,
        })
    }

    /// Rebuilds a solver from checkpointed state. The reference box is
    /// re-derived from the restored population.
    pub fn resume(
        problem: Arc<Problem>,
        params: Parameters,
        run_key: &str,
        population: Vec<Individual>,
        generation: u32,
        base_seed: u64,
    ) -> Result<Self> {
        let mut params = params;
        params.seed = Some(base_seed);
        let mut solver = Self::new(problem, params, run_key)?;
        if population.is_empty() {
            return Err(anyhow!("checkpointed population is empty"));
        }
        solver.population = population;
        solver.generation = generation;
        solver
            .evaluator
            .evaluate_population(&mut solver.population, &solver.pool);
        solver.sort_and_rank();
        solver.reference = Some(ReferenceBox::from_objectives(
            solver.population.iter().map(|i| &i.objectives),
        ));
        Ok(solver)
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Fresh generator per generation, derived from the run identity the
    /// same way benchmark seeds are derived from their settings hash.
    fn generation_rng(&self, generation: u32) -> SmallRng {
        let key = u64_from_str(&jsonify(&(self.run_key.as_str(), self.base_seed)));
        SmallRng::seed_from_u64(key ^ generation as u64)
    }

    fn hv_seed(&self) -> u64 {
        u64_from_str(&jsonify(&(self.run_key.as_str(), self.base_seed, "hypervolume")))
    }

    fn objective_bounds(&self) -> ([f64; 5], [f64; 5]) {
        let mut lower = [f64::INFINITY; 5];
        let mut upper = [f64::NEG_INFINITY; 5];
        for individual in &self.population {
            for i in 0..5 {
                if individual.objectives[i].is_finite() {
                    lower[i] = lower[i].min(individual.objectives[i]);
                    upper[i] = upper[i].max(individual.objectives[i]);
                }
            }
        }
        (lower, upper)
    }

    fn update_composites(&mut self) {
        let (lower, upper) = self.objective_bounds();
        let weights = self.params.weights.as_array();
        for individual in &mut self.population {
            individual.composite = composite_fitness(
                &individual.objectives,
                individual.penalty,
                &weights,
                &lower,
                &upper,
            );
        }
    }

    fn sort_and_rank(&mut self) {
        let fronts = fast_nondominated_sort(&mut self.population);
        for front in &fronts {
            assign_crowding(&mut self.population, front);
        }
        self.population.sort_by(compare_rank_crowding);
    }

    fn current_front(&self) -> Vec<[f64; 5]> {
        self.population
            .iter()
            .filter(|i| i.rank == 0)
            .map(|i| i.objectives)
            .collect()
    }

    fn record_hypervolume(&mut self) -> (f64, bool) {
        let reference = self.reference.expect("reference box set at initialization");
        let hv = estimate_hypervolume(&self.current_front(), &reference, self.hv_seed());
        let window = self.params.algorithm.convergence_window;
        self.hv_history.push_back(hv);
        while self.hv_history.len() > window {
            self.hv_history.pop_front();
        }
        let converged = if self.hv_history.len() == window {
            variance(self.hv_history.iter().copied()) < self.params.algorithm.convergence_threshold
        } else {
            false
        };
        (hv, converged)
    }

    /// Mean pairwise distance between normalized objective vectors.
    fn diversity(&self) -> f64 {
        let n = self.population.len();
        if n < 2 {
            return 0.0;
        }
        let (lower, upper) = self.objective_bounds();
        let normalized: Vec<[f64; 5]> = self
            .population
            .iter()
            .map(|ind| {
                let mut point = [0.0; 5];
                for i in 0..5 {
                    let span = upper[i] - lower[i];
                    point[i] = if span > f64::EPSILON {
                        (ind.objectives[i] - lower[i]) / span
                    } else {
                        0.0
                    };
                }
                point
            })
            .collect();
        let mut total = 0.0;
        let mut pairs = 0u64;
        for i in 0..n {
            for k in (i + 1)..n {
                let mut squared = 0.0;
                for d in 0..5 {
                    let delta = normalized[i][d] - normalized[k][d];
                    squared += delta * delta;
                }
                total += squared.sqrt();
                pairs += 1;
            }
        }
        total / pairs as f64
    }

    fn stats(&mut self, hv: f64, converged: bool) -> GenerationStats {
        let best = self
            .population
            .iter()
            .map(|i| i.composite)
            .fold(f64::INFINITY, f64::min);
        let diversity = self.diversity();
        let improved = match self.last_best {
            Some(previous) => best < previous - 1e-12,
            None => true,
        };
        self.last_best = Some(best);
        GenerationStats {
            generation: self.generation,
            best_composite: best,
            hypervolume: hv,
            diversity,
            converged,
            stalled: diversity < self.params.algorithm.diversity_threshold && !improved,
        }
    }
}

impl Evolver for Nsga2 {
    fn initialize(&mut self) -> Result<GenerationStats> {
        let mut rng = self.generation_rng(0);
        self.population = initialize_population(&self.problem, &self.params.algorithm, &mut rng);
        self.evaluator
            .evaluate_population(&mut self.population, &self.pool);
        self.sort_and_rank();
        self.update_composites();
        self.reference = Some(ReferenceBox::from_objectives(
            self.population.iter().map(|i| &i.objectives),
        ));
        let (hv, converged) = self.record_hypervolume();
        Ok(self.stats(hv, converged))
    }

    fn evolve_one_generation(&mut self) -> Result<GenerationStats> {
        if self.population.is_empty() {
            return Err(anyhow!("solver is not initialized"));
        }
        self.generation += 1;
        let g = self.generation;
        let mut rng = self.generation_rng(g);
        let config = self.params.algorithm;
        let decay = 1.0 - g as f64 / config.max_generations as f64;
        let rate = (config.mutation_rate * decay).max(config.mutation_rate / 10.0);
        let sigma_base = self.problem.max_demand() as f64 * 0.1;
        let sigma = (sigma_base * decay).max(sigma_base / 10.0).max(0.5);

        // The elites survive replacement unconditionally.
        let elite_hashes: Vec<u64> = self
            .population
            .iter()
            .take(config.elite_size)
            .map(|i| i.allocation.content_hash())
            .collect();
        let elites: Vec<Individual> = self
            .population
            .iter()
            .take(config.elite_size)
            .cloned()
            .collect();

        let mut offspring = Vec::with_capacity(config.population_size);
        while offspring.len() < config.population_size {
            let first = tournament_select(&self.population, config.tournament_size, &mut rng);
            let second = tournament_select(&self.population, config.tournament_size, &mut rng);
            let (mut child_a, mut child_b) = if rng.gen::<f64>() < config.crossover_rate {
                crossover(
                    &self.population[first].allocation,
                    &self.population[second].allocation,
                    &mut rng,
                )
            } else {
                (
                    self.population[first].allocation.clone(),
                    self.population[second].allocation.clone(),
                )
            };
            mutate(&mut child_a, &self.problem, rate, sigma, &mut rng);
            mutate(&mut child_b, &self.problem, rate, sigma, &mut rng);
            repair(&mut child_a, &self.problem);
            repair(&mut child_b, &self.problem);
            offspring.push(Individual::new(child_a));
            if offspring.len() < config.population_size {
                offspring.push(Individual::new(child_b));
            }
        }
        self.evaluator.evaluate_population(&mut offspring, &self.pool);

        // Union of parents and children, reduced back to P by
        // (rank, -crowding).
        let mut combined = std::mem::take(&mut self.population);
        combined.extend(offspring);
        let fronts = fast_nondominated_sort(&mut combined);
        for front in &fronts {
            assign_crowding(&mut combined, front);
        }
        combined.sort_by(compare_rank_crowding);
        combined.truncate(config.population_size);

        let mut tail = combined.len();
        for (hash, elite) in elite_hashes.iter().zip(elites) {
            if !combined
                .iter()
                .any(|i| i.allocation.content_hash() == *hash)
            {
                tail -= 1;
                combined[tail] = elite;
            }
        }
        self.population = combined;
        // Re-rank within the survivors so downstream consumers (and
        // checkpoint resume) see ranks relative to the live population.
        self.sort_and_rank();
        self.update_composites();

        let (hv, converged) = self.record_hypervolume();
        Ok(self.stats(hv, converged))
    }

    fn extract_front(&self) -> Vec<Individual> {
        let mut seen = std::collections::HashSet::new();
        self.population
            .iter()
            .filter(|i| i.rank == 0 && seen.insert(i.allocation.content_hash()))
            .cloned()
            .collect()
    }

    fn population(&self) -> &[Individual] {
        &self.population
    }

    fn generation(&self) -> u32 {
        self.generation
    }

    fn base_seed(&self) -> u64 {
        self.base_seed
    }

    fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }
}

/// Returns fronts as index lists and writes ranks into the population.
pub fn fast_nondominated_sort(population: &mut [Individual]) -> Vec<Vec<usize>> {
    let n = population.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut fronts: Vec<Vec<usize>> = vec![Vec::new()];

    for p in 0..n {
        for q in 0..n {
            if p == q {
                continue;
            }
            if dominates(&population[p].objectives, &population[q].objectives) {
                dominated_by[p].push(q);
            } else if dominates(&population[q].objectives, &population[p].objectives) {
                domination_count[p] += 1;
            }
        }
        if domination_count[p] == 0 {
            population[p].rank = 0;
            fronts[0].push(p);
        }
    }

    let mut rank = 0;
    while !fronts[rank].is_empty() {
        let mut next = Vec::new();
        for &p in &fronts[rank] {
            for &q in &dominated_by[p] {
                domination_count[q] -= 1;
                if domination_count[q] == 0 {
                    population[q].rank = rank + 1;
                    next.push(q);
                }
            }
        }
        rank += 1;
        fronts.push(next);
    }
    fronts.pop();
    fronts
}

pub fn dominates(a: &[f64; 5], b: &[f64; 5]) -> bool {
    let mut strictly_better = false;
    for i in 0..5 {
        if a[i] > b[i] {
            return false;
        }
        if a[i] < b[i] {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Boundary members get infinite distance; interior members accumulate
/// the normalized spread of their neighbors per objective.
pub fn assign_crowding(population: &mut [Individual], front: &[usize]) {
    if front.is_empty() {
        return;
    }
    if front.len() <= 2 {
        for &idx in front {
            population[idx].crowding = f64::INFINITY;
        }
        return;
    }
    for &idx in front {
        population[idx].crowding = 0.0;
    }
    for objective in 0..5 {
        let mut sorted = front.to_vec();
        sorted.sort_by(|&a, &b| {
            population[a].objectives[objective]
                .partial_cmp(&population[b].objectives[objective])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let first = sorted[0];
        let last = sorted[sorted.len() - 1];
        population[first].crowding = f64::INFINITY;
        population[last].crowding = f64::INFINITY;
        let span = population[last].objectives[objective] - population[first].objectives[objective];
        if span.abs() < f64::EPSILON {
            continue;
        }
        for window in sorted.windows(3) {
            let (previous, current, next) = (window[0], window[1], window[2]);
            if population[current].crowding.is_finite() {
                population[current].crowding += (population[next].objectives[objective]
                    - population[previous].objectives[objective])
                    / span;
            }
        }
    }
}

fn compare_rank_crowding(a: &Individual, b: &Individual) -> std::cmp::Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| b.crowding.partial_cmp(&a.crowding).unwrap_or(std::cmp::Ordering::Equal))
}

fn variance(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count();
    if count == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64
}
