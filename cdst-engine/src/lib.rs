pub mod allocation;
pub mod baselines;
pub mod evaluate;
pub mod extract;
pub mod hypervolume;
pub mod nsga2;
pub mod operators;
pub mod problem;
pub mod repair;

pub use allocation::{Allocation, Individual};
pub use evaluate::{Evaluation, Evaluator};
pub use nsga2::{Evolver, GenerationStats, Nsga2};
pub use problem::{Problem, ProblemBuilder};
