use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub const HV_SAMPLES: usize = 4096;

/// Reference box for hypervolume estimation, fixed at the start of a run
/// from the initial population's objective ranges.
#[derive(Clone, Copy, Debug)]
pub struct ReferenceBox {
    pub lower: [f64; 5],
    pub upper: [f64; 5],
}

impl ReferenceBox {
    /// Lower bound at the objective-wise minima, upper bound at the maxima
    /// pushed out by 10% of each span so the box strictly contains the
    /// initial front.
    pub fn from_objectives<'a>(objectives: impl Iterator<Item = &'a [f64; 5]>) -> Self {
        let mut lower = [f64::INFINITY; 5];
        let mut upper = [f64::NEG_INFINITY; 5];
        for point in objectives {
            for i in 0..5 {
                lower[i] = lower[i].min(point[i]);
                upper[i] = upper[i].max(point[i]);
            }
        }
        for i in 0..5 {
            let span = (upper[i] - lower[i]).max(1e-9);
            upper[i] += 0.1 * span;
        }
        Self { lower, upper }
    }
}

/// Monte-Carlo hypervolume estimate: the fraction of the reference box
/// dominated by the front. The sample set is a pure function of the seed,
/// so the estimate is deterministic and monotone under elitism.
pub fn estimate_hypervolume(
    front: &[[f64; 5]],
    reference: &ReferenceBox,
    seed: u64,
) -> f64 {
    if front.is_empty() {
        return 0.0;
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut dominated = 0usize;
    for _ in 0..HV_SAMPLES {
        let mut sample = [0.0f64; 5];
        for i in 0..5 {
            sample[i] = rng.gen_range(reference.lower[i]..=reference.upper[i]);
        }
        if front
            .iter()
            .any(|point| (0..5).all(|i| point[i] <= sample[i]))
        {
            dominated += 1;
        }
    }
    dominated as f64 / HV_SAMPLES as f64
}
