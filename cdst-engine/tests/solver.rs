mod common;

use cdst_engine::allocation::{Allocation, Individual};
use cdst_engine::nsga2::{dominates, fast_nondominated_sort, Evolver, Nsga2};
use cdst_engine::problem::Problem;
use cdst_engine::repair::{lab_load_minutes, repair, scale_to_total};
use cdst_structs::core::Parameters;
use cdst_utils::jsonify;
use common::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn small_params(population: usize, generations: u32, seed: u64) -> Parameters {
    let mut params = Parameters::default();
    params.algorithm.population_size = population;
    params.algorithm.max_generations = generations;
    params.algorithm.elite_size = 2;
    params.seed = Some(seed);
    params
}

fn assert_invariants(problem: &Problem, population: &[Individual]) {
    for individual in population {
        let x = &individual.allocation;
        for a in 0..problem.n_areas {
            for t in 0..problem.n_tests {
                assert_eq!(
                    x.allocated(a, t),
                    problem.demand(a, t),
                    "demand conservation violated at area {} test {}",
                    a,
                    t
                );
            }
        }
        for (_, j, t, count) in x.iter_nonzero() {
            assert!(count == 0 || problem.capable(j, t), "capability violated");
        }
        for j in 0..problem.n_labs {
            assert!(
                lab_load_minutes(x, problem, j) <= problem.available_minutes(j) + 1e-6,
                "capacity violated at lab {}",
                j
            );
        }
    }
}

#[test]
fn test_invariants_hold_across_generations() {
    let problem = Arc::new(capacity_forcing_problem());
    let mut solver = Nsga2::new(problem.clone(), small_params(16, 50, 11), "scenario-inv").unwrap();
    solver.initialize().unwrap();
    assert_invariants(&problem, solver.population());
    for _ in 0..10 {
        solver.evolve_one_generation().unwrap();
        assert_invariants(&problem, solver.population());
    }
}

#[test]
fn test_determinism_under_seed() {
    let problem = Arc::new(two_lab_tradeoff_problem());
    let mut runs = Vec::new();
    for _ in 0..2 {
        let mut solver =
            Nsga2::new(problem.clone(), small_params(16, 50, 42), "scenario-det").unwrap();
        solver.initialize().unwrap();
        for _ in 0..8 {
            solver.evolve_one_generation().unwrap();
        }
        runs.push(jsonify(&solver.population().to_vec()));
    }
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn test_different_seeds_diverge() {
    let problem = Arc::new(two_lab_tradeoff_problem());
    let mut finals = Vec::new();
    for seed in [1u64, 2u64] {
        let mut solver =
            Nsga2::new(problem.clone(), small_params(16, 50, seed), "scenario-div").unwrap();
        solver.initialize().unwrap();
        for _ in 0..3 {
            solver.evolve_one_generation().unwrap();
        }
        finals.push(jsonify(&solver.population().to_vec()));
    }
    // Random inits differ, so at least the population ordering should.
    assert_ne!(finals[0], finals[1]);
}

#[test]
fn test_repair_is_idempotent() {
    let problem = capacity_forcing_problem();
    let mut rng = SmallRng::seed_from_u64(5);
    for _ in 0..20 {
        let mut x = Allocation::zeros(&problem);
        for index in 0..x.len() {
            x.genes_mut()[index] = rng.gen_range(0..150);
        }
        repair(&mut x, &problem);
        let once = x.clone();
        repair(&mut x, &problem);
        assert_eq!(x, once);
    }
}

#[test]
fn test_repair_restores_demand_and_capacity() {
    let problem = capacity_forcing_problem();
    // Everything piled on lab A, which only has room for 60 tests.
    let mut x = Allocation::zeros(&problem);
    x.set(0, 0, 0, 100);
    repair(&mut x, &problem);
    let a = x.get(0, 0, 0);
    let b = x.get(0, 1, 0);
    assert_eq!(a + b, 100);
    assert!(a <= 60 && b <= 60, "split was ({}, {})", a, b);
    assert!(a >= 40 && b >= 40, "split was ({}, {})", a, b);
}

#[test]
fn test_scale_to_total_is_exact_and_proportional() {
    assert_eq!(scale_to_total(&[0, 0], 10), vec![5, 5]);
    assert_eq!(scale_to_total(&[0, 0, 0], 10), vec![4, 3, 3]);
    let scaled = scale_to_total(&[30, 10], 20);
    assert_eq!(scaled.iter().sum::<u32>(), 20);
    assert_eq!(scaled, vec![15, 5]);
    let scaled = scale_to_total(&[1, 1, 1], 100);
    assert_eq!(scaled.iter().sum::<u32>(), 100);
}

#[test]
fn test_trivial_single_lab_scenario() {
    let problem = Arc::new(single_lab_problem());
    let mut solver =
        Nsga2::new(problem.clone(), small_params(8, 100, 3), "scenario-trivial").unwrap();
    solver.initialize().unwrap();
    // Only one feasible allocation exists, so the run stalls immediately.
    let mut generations = 0;
    loop {
        let stats = solver.evolve_one_generation().unwrap();
        generations += 1;
        if stats.converged || stats.stalled || generations >= 5 {
            break;
        }
    }
    assert!(generations <= 2, "took {} generations", generations);
    for individual in solver.population() {
        assert_eq!(individual.allocation.get(0, 0, 0), 10);
        assert_eq!(individual.allocation.get(1, 0, 0), 5);
        assert!((individual.objectives[0] - 6.0).abs() < 1e-9);
    }
}

#[test]
fn test_two_lab_tradeoff_prefers_nearest_assignment() {
    let problem = Arc::new(two_lab_tradeoff_problem());
    let mut params = small_params(20, 100, 9);
    // Distance is the only thing that matters.
    params.weights.distance = 1.0;
    params.weights.time = 0.0;
    params.weights.cost = 0.0;
    params.weights.utilization = 0.0;
    params.weights.accessibility = 0.0;
    let mut solver = Nsga2::new(problem.clone(), params, "scenario-tradeoff").unwrap();
    solver.initialize().unwrap();
    for _ in 0..20 {
        solver.evolve_one_generation().unwrap();
    }
    let best = solver
        .population()
        .iter()
        .min_by(|a, b| a.composite.partial_cmp(&b.composite).unwrap())
        .unwrap();
    assert_eq!(best.allocation.get(0, 0, 0), 10, "area 1 goes to lab A");
    assert_eq!(best.allocation.get(1, 1, 0), 10, "area 2 goes to lab B");
    assert!((best.objectives[0] - 7.5).abs() < 1e-9);
}

#[test]
fn test_capacity_forcing_scenario() {
    let problem = Arc::new(capacity_forcing_problem());
    let mut solver =
        Nsga2::new(problem.clone(), small_params(16, 50, 21), "scenario-capacity").unwrap();
    solver.initialize().unwrap();
    for _ in 0..5 {
        solver.evolve_one_generation().unwrap();
    }
    for individual in solver.population() {
        let a = individual.allocation.get(0, 0, 0);
        let b = individual.allocation.get(0, 1, 0);
        assert_eq!(a + b, 100);
        assert!((40..=60).contains(&a));
        assert!((40..=60).contains(&b));
    }
}

#[test]
fn test_front_is_mutually_nondominated() {
    let problem = Arc::new(two_lab_tradeoff_problem());
    let mut solver =
        Nsga2::new(problem.clone(), small_params(16, 50, 13), "scenario-front").unwrap();
    solver.initialize().unwrap();
    for _ in 0..5 {
        solver.evolve_one_generation().unwrap();
    }
    let front = solver.extract_front();
    assert!(!front.is_empty());
    for a in &front {
        for b in &front {
            assert!(!dominates(&a.objectives, &b.objectives) || a.objectives == b.objectives);
        }
    }
    // Every non-member is dominated by or equal in rank terms; rank 0 is
    // exactly the non-dominated set of the population.
    for individual in solver.population() {
        if individual.rank != 0 {
            assert!(
                solver
                    .population()
                    .iter()
                    .any(|other| dominates(&other.objectives, &individual.objectives)),
                "rank >0 individual is not dominated"
            );
        }
    }
}

#[test]
fn test_fast_nondominated_sort_ranks() {
    let problem = single_lab_problem();
    let make = |objs: [f64; 5]| {
        let mut individual = Individual::new(Allocation::zeros(&problem));
        individual.objectives = objs;
        individual.evaluated = true;
        individual
    };
    let mut population = vec![
        make([1.0, 1.0, 1.0, 1.0, 1.0]),
        make([2.0, 2.0, 2.0, 2.0, 2.0]),
        make([0.5, 2.0, 1.0, 2.0, 1.0]),
        make([3.0, 3.0, 3.0, 3.0, 3.0]),
    ];
    let fronts = fast_nondominated_sort(&mut population);
    assert_eq!(population[0].rank, 0);
    assert_eq!(population[1].rank, 1);
    assert_eq!(population[2].rank, 0);
    assert_eq!(population[3].rank, 2);
    assert_eq!(fronts.len(), 3);
    assert_eq!(fronts[0], vec![0, 2]);
}

#[test]
fn test_hypervolume_monotone_on_stable_front() {
    let problem = Arc::new(single_lab_problem());
    let mut solver =
        Nsga2::new(problem.clone(), small_params(8, 50, 17), "scenario-hv").unwrap();
    let initial = solver.initialize().unwrap();
    let mut previous = initial.hypervolume;
    for _ in 0..5 {
        let stats = solver.evolve_one_generation().unwrap();
        assert!(stats.hypervolume >= previous - 1e-12);
        previous = stats.hypervolume;
    }
}

#[test]
fn test_resume_restores_population() {
    let problem = Arc::new(two_lab_tradeoff_problem());
    let mut solver =
        Nsga2::new(problem.clone(), small_params(16, 50, 23), "scenario-resume").unwrap();
    solver.initialize().unwrap();
    for _ in 0..3 {
        solver.evolve_one_generation().unwrap();
    }
    let saved: Vec<Individual> = solver.population().to_vec();
    let generation = solver.generation();
    let seed = solver.base_seed();

    let mut resumed = Nsga2::resume(
        problem.clone(),
        small_params(16, 50, 23),
        "scenario-resume",
        saved,
        generation,
        seed,
    )
    .unwrap();
    assert_eq!(resumed.generation(), generation);

    // Both solvers must agree on the rest of the run.
    solver.evolve_one_generation().unwrap();
    resumed.evolve_one_generation().unwrap();
    let allocations = |solver: &Nsga2| {
        solver
            .population()
            .iter()
            .map(|i| (i.allocation.clone(), i.objectives))
            .collect::<Vec<_>>()
    };
    assert_eq!(jsonify(&allocations(&solver)), jsonify(&allocations(&resumed)));
}
