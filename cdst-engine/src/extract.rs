use crate::allocation::Individual;
use crate::baselines;
use crate::evaluate::{utilization_score, Evaluator};
use crate::problem::Problem;
use crate::repair::repair;
use cdst_structs::core::{
    AllocationRow, ObjectiveValues, OptimizationSummary, ParetoSolution, ScenarioResult,
    ScenarioStatus,
};

/// Decorates the final Pareto front into persisted result rows and a
/// baseline-relative summary. The baseline is the nearest-capable-lab
/// greedy allocation computed on the same problem.
pub fn extract_result(
    evaluator: &Evaluator,
    scenario_id: &str,
    status: ScenarioStatus,
    generations_run: u32,
    elapsed_seconds: f64,
    front: &[Individual],
) -> ScenarioResult {
    let problem = evaluator.problem();
    let pareto_front: Vec<ParetoSolution> = front
        .iter()
        .map(|individual| decorate(evaluator, problem, scenario_id, individual))
        .collect();

    let mut baseline = baselines::nearest_capable(problem);
    repair(&mut baseline, problem);
    let baseline_eval = evaluator.evaluate(&baseline);

    let best = front
        .iter()
        .min_by(|a, b| {
            a.composite
                .partial_cmp(&b.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|i| i.objectives)
        .unwrap_or([0.0; 5]);

    let total_allocations = front
        .first()
        .map(|i| i.allocation.iter_nonzero().count() as u32)
        .unwrap_or(0);

    let summary = OptimizationSummary {
        total_allocations,
        distance_improvement: improvement(baseline_eval.objectives[0], best[0]),
        time_improvement: improvement(baseline_eval.objectives[1], best[1]),
        cost_improvement: improvement(baseline_eval.objectives[2], best[2]),
        utilization_improvement: improvement(baseline_eval.objectives[3], best[3]),
        accessibility_improvement: improvement(baseline_eval.objectives[4], best[4]),
        execution_seconds: elapsed_seconds,
    };

    ScenarioResult {
        scenario_id: scenario_id.to_string(),
        status,
        generations_run,
        pareto_front,
        summary,
    }
}

/// Fractional gain of `optimized` over `baseline` on a minimized
/// objective; positive means the front beat the baseline.
fn improvement(baseline: f64, optimized: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        0.0
    } else {
        (baseline - optimized) / baseline.abs()
    }
}

fn decorate(
    evaluator: &Evaluator,
    problem: &Problem,
    scenario_id: &str,
    individual: &Individual,
) -> ParetoSolution {
    let x = &individual.allocation;
    let mut utilization = vec![0.0; problem.n_labs];
    for j in 0..problem.n_labs {
        utilization[j] = utilization_score(evaluator.utilization(x, j));
    }
    let mut accessibility = vec![0.0; problem.n_areas];
    for a in 0..problem.n_areas {
        accessibility[a] = evaluator.accessibility(x, a);
    }

    let rows = x
        .iter_nonzero()
        .map(|(a, j, t, count)| {
            let c = count as f64;
            let distance_km = problem.dist(a, j);
            let transport_cost = c * distance_km * problem.cost_per_km;
            let processing_cost = c
                * (problem.cost_per_test(j, t)
                    + problem.overhead[j] / problem.capacity[j].max_per_month as f64);
            AllocationRow {
                scenario_id: scenario_id.to_string(),
                area_id: problem.area_ids[a].clone(),
                laboratory_id: problem.lab_ids[j].clone(),
                test_type_id: problem.test_ids[t].clone(),
                allocated_tests: count,
                distance_km,
                travel_time_minutes: problem.time(a, j),
                transport_cost,
                processing_cost,
                total_cost: transport_cost + processing_cost,
                utilization_score: utilization[j],
                accessibility_score: accessibility[a],
            }
        })
        .collect();

    ParetoSolution {
        objectives: ObjectiveValues {
            mean_distance_km: individual.objectives[0],
            mean_turnaround_minutes: individual.objectives[1],
            total_cost: individual.objectives[2],
            utilization_score: -individual.objectives[3],
            accessibility_score: -individual.objectives[4],
        },
        composite_fitness: individual.composite,
        penalty: individual.penalty,
        rows,
    }
}
