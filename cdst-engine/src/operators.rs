use crate::allocation::{Allocation, Individual};
use crate::baselines;
use crate::problem::Problem;
use crate::repair::{repair, scale_to_total};
use cdst_structs::core::AlgorithmConfig;
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Builds the initial population: 30% random, 40% greedy nearest-lab,
/// 30% capacity-balanced, every individual repaired before evaluation.
pub fn initialize_population(
    problem: &Problem,
    config: &AlgorithmConfig,
    rng: &mut SmallRng,
) -> Vec<Individual> {
    let size = config.population_size;
    let random_count = size * 3 / 10;
    let greedy_count = size * 4 / 10;

    let mut population = Vec::with_capacity(size);
    for i in 0..size {
        let mut allocation = if i < random_count {
            random_allocation(problem, rng)
        } else if i < random_count + greedy_count {
            baselines::nearest_capable(problem)
        } else {
            balanced_allocation(problem, rng)
        };
        repair(&mut allocation, problem);
        population.push(Individual::new(allocation));
    }
    population
}

/// Distributes each demand cell over its capable labs with random weights.
fn random_allocation(problem: &Problem, rng: &mut SmallRng) -> Allocation {
    let mut x = Allocation::zeros(problem);
    for a in 0..problem.n_areas {
        for t in 0..problem.n_tests {
            let demand = problem.demand(a, t);
            if demand == 0 {
                continue;
            }
            let labs = problem.capable_labs(t);
            let weights: Vec<u32> = labs.iter().map(|_| rng.gen_range(1..=1000)).collect();
            let split = scale_to_total(&weights, demand);
            for (&j, &count) in labs.iter().zip(split.iter()) {
                x.set(a, j, t, count);
            }
        }
    }
    x
}

/// Splits each demand cell over capable labs proportionally to their
/// remaining capacity, draining capacity as it goes.
fn balanced_allocation(problem: &Problem, rng: &mut SmallRng) -> Allocation {
    let mut x = Allocation::zeros(problem);
    let mut remaining: Vec<f64> = (0..problem.n_labs)
        .map(|j| problem.available_minutes(j))
        .collect();

    for a in 0..problem.n_areas {
        for t in 0..problem.n_tests {
            let demand = problem.demand(a, t);
            if demand == 0 {
                continue;
            }
            let labs = problem.capable_labs(t);
            let weights: Vec<u32> = labs
                .iter()
                .map(|&j| {
                    let slots = remaining[j] / problem.proc_time(j, t);
                    // Jitter breaks ties between equally-loaded labs.
                    (slots.max(0.0) as u32).saturating_add(rng.gen_range(0..2))
                })
                .collect();
            let split = scale_to_total(&weights, demand);
            for (&j, &count) in labs.iter().zip(split.iter()) {
                if count > 0 {
                    x.set(a, j, t, count);
                    remaining[j] -= count as f64 * problem.proc_time(j, t);
                }
            }
        }
    }
    x
}

/// Tournament of `size` random entrants; lower rank wins, ties go to the
/// larger crowding distance.
pub fn tournament_select(population: &[Individual], size: usize, rng: &mut SmallRng) -> usize {
    let mut winner = rng.gen_range(0..population.len());
    for _ in 1..size {
        let challenger = rng.gen_range(0..population.len());
        let w = &population[winner];
        let c = &population[challenger];
        if c.rank < w.rank || (c.rank == w.rank && c.crowding > w.crowding) {
            winner = challenger;
        }
    }
    winner
}

/// Multi-point integer crossover: 1-3 cut points over the flat gene
/// vector, alternating segments swapped between the parents.
pub fn crossover(
    parent_a: &Allocation,
    parent_b: &Allocation,
    rng: &mut SmallRng,
) -> (Allocation, Allocation) {
    let mut child_a = parent_a.clone();
    let mut child_b = parent_b.clone();
    let len = child_a.len();
    if len < 2 {
        return (child_a, child_b);
    }

    let num_cuts = rng.gen_range(1..=3usize.min(len - 1));
    let mut cuts: Vec<usize> = (0..num_cuts).map(|_| rng.gen_range(1..len)).collect();
    cuts.sort_unstable();
    cuts.dedup();
    cuts.push(len);

    let genes_a = child_a.genes_mut();
    let genes_b = child_b.genes_mut();
    let mut swap = false;
    let mut start = 0;
    for cut in cuts {
        if swap {
            for i in start..cut {
                std::mem::swap(&mut genes_a[i], &mut genes_b[i]);
            }
        }
        swap = !swap;
        start = cut;
    }
    (child_a, child_b)
}

/// Gaussian integer perturbation per gene, clamped to `[0, D[a,t]]`.
/// Rate and sigma decay with generation progress (handled by the caller).
pub fn mutate(
    x: &mut Allocation,
    problem: &Problem,
    rate: f64,
    sigma: f64,
    rng: &mut SmallRng,
) {
    if sigma <= 0.0 {
        return;
    }
    let normal = Normal::new(0.0, sigma).expect("sigma is positive");
    for index in 0..x.len() {
        if rng.gen::<f64>() >= rate {
            continue;
        }
        let (area, _, test) = x.gene_coords(index);
        let demand = problem.demand(area, test);
        if demand == 0 {
            continue;
        }
        let delta = normal.sample(rng).round() as i64;
        let current = x.genes()[index] as i64;
        let next = (current + delta).clamp(0, demand as i64);
        x.genes_mut()[index] = next as u32;
    }
}
