use crate::allocation::Allocation;
use crate::problem::Problem;

/// Nearest-capable-lab construction: fill the closest capable lab until
/// its bench minutes run out, then spill to the next. Used for 40% of the
/// initial population and as the comparison baseline in result summaries.
pub fn nearest_capable(problem: &Problem) -> Allocation {
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
            let mut left = demand;
            for &j in problem.labs_by_distance(a) {
                if left == 0 {
                    break;
                }
                if !problem.capable(j, t) {
                    continue;
                }
                let proc = problem.proc_time(j, t);
                let fits = (remaining[j] / proc).floor().max(0.0) as u32;
                let take = left.min(fits);
                if take > 0 {
                    x.set(a, j, t, x.get(a, j, t) + take);
                    remaining[j] -= take as f64 * proc;
                    left -= take;
                }
            }
            if left > 0 {
                // Capacity exhausted everywhere; park the remainder on the
                // nearest capable lab and let repair rebalance.
                if let Some(&j) = problem
                    .labs_by_distance(a)
                    .iter()
                    .find(|&&j| problem.capable(j, t))
                {
                    x.set(a, j, t, x.get(a, j, t) + left);
                }
            }
        }
    }
    x
}
