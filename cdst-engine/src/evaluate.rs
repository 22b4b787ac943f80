use crate::allocation::{Allocation, Individual};
use crate::problem::Problem;
use cdst_structs::core::Constraints;
use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

pub const EVAL_CACHE_CAPACITY: usize = 100_000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    /// All five values are minimized; utilization and accessibility are
    /// negated scores.
    pub objectives: [f64; 5],
    pub penalty: f64,
}

/// Pure, deterministic objective computation with a bounded memo keyed by
/// the allocation's content hash. One evaluator lives for one solver run.
pub struct Evaluator {
    problem: Arc<Problem>,
    constraints: Constraints,
    cache: Mutex<LruCache<u64, Evaluation>>,
}

impl Evaluator {
    pub fn new(problem: Arc<Problem>, constraints: Constraints) -> Self {
        Self {
            problem,
            constraints,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(EVAL_CACHE_CAPACITY).expect("cache capacity is nonzero"),
            )),
        }
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn evaluate(&self, allocation: &Allocation) -> Evaluation {
        let key = allocation.content_hash();
        if let Some(hit) = self.cache.lock().expect("evaluator cache poisoned").get(&key) {
            return *hit;
        }
        let evaluation = self.compute(allocation);
        self.cache
            .lock()
            .expect("evaluator cache poisoned")
            .put(key, evaluation);
        evaluation
    }

    /// Evaluates every not-yet-evaluated individual on the worker pool.
    /// Results land back in input order, so runs stay reproducible.
    pub fn evaluate_population(&self, population: &mut [Individual], pool: &rayon::ThreadPool) {
        pool.install(|| {
            population
                .par_iter_mut()
                .filter(|individual| !individual.evaluated)
                .for_each(|individual| {
                    let evaluation = self.evaluate(&individual.allocation);
                    individual.objectives = evaluation.objectives;
                    individual.penalty = evaluation.penalty;
                    individual.evaluated = true;
                });
        });
    }

    fn compute(&self, x: &Allocation) -> Evaluation {
        let p = &*self.problem;
        let mut total_tests = 0u64;
        let mut weighted_distance = 0.0;
        let mut weighted_turnaround = 0.0;
        let mut total_cost = 0.0;
        let mut lab_minutes = vec![0.0; p.n_labs];

        let mut distance_penalty = 0.0;
        let mut time_penalty = 0.0;
        let mut quality_penalty = 0.0;

        for (a, j, t, count) in x.iter_nonzero() {
            let c = count as f64;
            let d = p.dist(a, j);
            let travel = p.time(a, j);
            total_tests += count as u64;
            weighted_distance += c * d;
            weighted_turnaround += c * (travel + p.proc_time(j, t));
            let overhead_share = p.overhead[j] / p.capacity[j].max_per_month as f64;
            total_cost += c * (d * p.cost_per_km + p.cost_per_test(j, t) + overhead_share);
            lab_minutes[j] += c * p.proc_time(j, t);

            if let Some(max_d) = self.constraints.max_distance_km {
                if d > max_d {
                    distance_penalty += c * ((d - max_d) / max_d).powi(2);
                }
            }
            if let Some(max_t) = self.constraints.max_travel_time_minutes {
                if travel > max_t {
                    time_penalty += c * ((travel - max_t) / max_t).powi(2);
                }
            }
            let quality = p.quality(j, t);
            if quality < self.constraints.quality_threshold {
                quality_penalty += c * (self.constraints.quality_threshold - quality);
            }
        }

        let tests = total_tests as f64;
        let f1 = if total_tests == 0 { 0.0 } else { weighted_distance / tests };
        let f2 = if total_tests == 0 { 0.0 } else { weighted_turnaround / tests };
        let f3 = total_cost;

        let mut utilization_penalty = 0.0;
        let mut utilization_sum = 0.0;
        for j in 0..p.n_labs {
            let u = lab_minutes[j] / p.available_minutes(j);
            utilization_sum += utilization_score(u);
            if u < self.constraints.min_utilization_rate {
                utilization_penalty += (self.constraints.min_utilization_rate - u).powi(2);
            } else if u > self.constraints.max_utilization_rate {
                utilization_penalty += (u - self.constraints.max_utilization_rate).powi(2);
            }
        }
        let f4 = -(utilization_sum / p.n_labs as f64);

        let mut accessibility_sum = 0.0;
        for a in 0..p.n_areas {
            accessibility_sum += self.accessibility(x, a);
        }
        let f5 = -(accessibility_sum / p.n_areas as f64);

        let per_test_penalty = if total_tests == 0 {
            0.0
        } else {
            (distance_penalty + time_penalty + quality_penalty) / tests
        };
        let penalty = per_test_penalty + utilization_penalty;

        let objectives = [f1, f2, f3, f4, f5];
        if objectives.iter().any(|v| !v.is_finite()) || !penalty.is_finite() {
            log::warn!(
                "evaluation produced non-finite values (hash {:x}), poisoning individual",
                x.content_hash()
            );
            return Evaluation {
                objectives: [f64::MAX; 5],
                penalty: f64::MAX,
            };
        }
        Evaluation {
            objectives,
            penalty,
        }
    }

    /// Minutes of work the allocation places on a lab, over its available
    /// minutes.
    pub fn utilization(&self, x: &Allocation, lab: usize) -> f64 {
        let p = &*self.problem;
        let mut minutes = 0.0;
        for a in 0..p.n_areas {
            for t in 0..p.n_tests {
                let count = x.get(a, lab, t);
                if count > 0 {
                    minutes += count as f64 * p.proc_time(lab, t);
                }
            }
        }
        minutes / p.available_minutes(lab)
    }

    /// Accessibility score of an area under the allocation: proximity to
    /// its nearest serving lab, population weight, and breadth of tests the
    /// serving labs offer.
    pub fn accessibility(&self, x: &Allocation, area: usize) -> f64 {
        let p = &*self.problem;
        let mut d_min = f64::INFINITY;
        let mut serving = vec![false; p.n_labs];
        for j in 0..p.n_labs {
            for t in 0..p.n_tests {
                if x.get(area, j, t) > 0 {
                    serving[j] = true;
                    d_min = d_min.min(p.dist(area, j));
                    break;
                }
            }
        }

        let proximity = if d_min.is_finite() {
            (1.0 - d_min / p.max_acceptable_distance_km).max(0.0)
        } else {
            0.0
        };

        let population = p.population[area];
        let population_term = if population > 1 && p.max_population > 1 {
            (population as f64).ln() / (p.max_population as f64).ln()
        } else {
            0.0
        };

        let mut offered = vec![false; p.n_tests];
        for (j, is_serving) in serving.iter().enumerate() {
            if *is_serving {
                for t in 0..p.n_tests {
                    if p.capable(j, t) {
                        offered[t] = true;
                    }
                }
            }
        }
        let coverage = offered.iter().filter(|&&o| o).count() as f64 / p.n_tests as f64;

        0.4 * proximity + 0.3 * population_term + 0.3 * coverage
    }
}

/// Piecewise utilization score: under-use is discounted, the 30-90% band
/// counts at face value, overload degrades steeply.
pub fn utilization_score(u: f64) -> f64 {
    if u < 0.3 {
        u / 2.0
    } else if u <= 0.9 {
        u
    } else {
        0.9 - 2.0 * (u - 0.9)
    }
}

/// Composite fitness from population-normalized objectives plus the
/// constraint penalty. Normalization bounds come from the current
/// generation.
pub fn composite_fitness(
    objectives: &[f64; 5],
    penalty: f64,
    weights: &[f64; 5],
    lower: &[f64; 5],
    upper: &[f64; 5],
) -> f64 {
    let mut fitness = penalty;
    for i in 0..5 {
        let span = upper[i] - lower[i];
        let normalized = if span > f64::EPSILON {
            (objectives[i] - lower[i]) / span
        } else {
            0.0
        };
        fitness += weights[i] * normalized;
    }
    fitness
}
