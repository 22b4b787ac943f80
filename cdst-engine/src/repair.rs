use crate::allocation::Allocation;
use crate::problem::Problem;

/// Restores the allocation invariants after any variation: capability
/// (phase 0), demand conservation per `(area, test)` (phase 1), then lab
/// capacity in processing minutes (phase 2). Deterministic and idempotent.
pub fn repair(x: &mut Allocation, problem: &Problem) {
    clear_incapable(x, problem);
    restore_demand(x, problem);
    rebalance_capacity(x, problem);
}

fn clear_incapable(x: &mut Allocation, problem: &Problem) {
    for a in 0..problem.n_areas {
        for j in 0..problem.n_labs {
            for t in 0..problem.n_tests {
                if x.get(a, j, t) > 0 && !problem.capable(j, t) {
                    x.set(a, j, t, 0);
                }
            }
        }
    }
}

fn restore_demand(x: &mut Allocation, problem: &Problem) {
    for a in 0..problem.n_areas {
        for t in 0..problem.n_tests {
            let demand = problem.demand(a, t);
            let labs = problem.capable_labs(t);
            if labs.is_empty() {
                continue;
            }
            let current: Vec<u32> = labs.iter().map(|&j| x.get(a, j, t)).collect();
            let sum: u64 = current.iter().map(|&c| c as u64).sum();
            if sum == demand as u64 {
                continue;
            }
            let scaled = scale_to_total(&current, demand);
            for (&j, &value) in labs.iter().zip(scaled.iter()) {
                x.set(a, j, t, value);
            }
        }
    }
}

/// Rescales `current` so it sums exactly to `target`, proportionally to
/// the existing values (uniformly when all are zero). Largest-remainder
/// rounding, ties broken by index, so the result is deterministic.
pub fn scale_to_total(current: &[u32], target: u32) -> Vec<u32> {
    let n = current.len();
    debug_assert!(n > 0);
    let sum: u64 = current.iter().map(|&c| c as u64).sum();
    if sum == 0 {
        let base = target / n as u32;
        let remainder = (target % n as u32) as usize;
        return (0..n)
            .map(|i| base + if i < remainder { 1 } else { 0 })
            .collect();
    }

    let mut scaled = vec![0u32; n];
    let mut fractions: Vec<(usize, u64)> = Vec::with_capacity(n);
    let mut assigned: u64 = 0;
    for i in 0..n {
        let numerator = current[i] as u64 * target as u64;
        scaled[i] = (numerator / sum) as u32;
        assigned += scaled[i] as u64;
        fractions.push((i, numerator % sum));
    }
    let mut deficit = target as u64 - assigned;
    fractions.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    for (i, _) in fractions {
        if deficit == 0 {
            break;
        }
        scaled[i] += 1;
        deficit -= 1;
    }
    scaled
}

/// Moves work off overloaded labs to the next-nearest capable lab with
/// slack. Receivers are only loaded up to their own limit, so a single
/// pass cannot create new overloads.
fn rebalance_capacity(x: &mut Allocation, problem: &Problem) {
    let mut loads: Vec<f64> = (0..problem.n_labs)
        .map(|j| lab_load_minutes(x, problem, j))
        .collect();
    let limits: Vec<f64> = (0..problem.n_labs)
        .map(|j| problem.available_minutes(j))
        .collect();

    for j in 0..problem.n_labs {
        if loads[j] <= limits[j] {
            continue;
        }

        // Largest contributors first.
        let mut contributors: Vec<(usize, usize, f64)> = Vec::new();
        for a in 0..problem.n_areas {
            for t in 0..problem.n_tests {
                let count = x.get(a, j, t);
                if count > 0 {
                    contributors.push((a, t, count as f64 * problem.proc_time(j, t)));
                }
            }
        }
        contributors.sort_by(|l, r| {
            r.2.partial_cmp(&l.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then((l.0, l.1).cmp(&(r.0, r.1)))
        });

        for (a, t, _) in contributors {
            if loads[j] <= limits[j] {
                break;
            }
            let proc_here = problem.proc_time(j, t);
            let excess_tests =
                ((loads[j] - limits[j]) / proc_here).ceil().max(0.0) as u32;
            let mut to_move = excess_tests.min(x.get(a, j, t));

            for &receiver in problem.labs_by_distance(a) {
                if to_move == 0 {
                    break;
                }
                if receiver == j || !problem.capable(receiver, t) {
                    continue;
                }
                let proc_there = problem.proc_time(receiver, t);
                let slack = limits[receiver] - loads[receiver];
                let fits = (slack / proc_there).floor().max(0.0) as u32;
                let moved = to_move.min(fits);
                if moved == 0 {
                    continue;
                }
                x.set(a, j, t, x.get(a, j, t) - moved);
                x.set(a, receiver, t, x.get(a, receiver, t) + moved);
                loads[j] -= moved as f64 * proc_here;
                loads[receiver] += moved as f64 * proc_there;
                to_move -= moved;
            }
        }
    }
}

pub fn lab_load_minutes(x: &Allocation, problem: &Problem, lab: usize) -> f64 {
    let mut minutes = 0.0;
    for a in 0..problem.n_areas {
        for t in 0..problem.n_tests {
            let count = x.get(a, lab, t);
            if count > 0 {
                minutes += count as f64 * problem.proc_time(lab, t);
            }
        }
    }
    minutes
}
