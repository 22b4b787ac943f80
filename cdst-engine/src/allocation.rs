use crate::problem::Problem;
use cdst_utils::u64_from_bytes;
use serde::{Deserialize, Serialize};

/// Allocation tensor `x[area, lab, test]`, stored as one contiguous
/// row-major buffer with the test axis innermost.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Allocation {
    n_areas: usize,
    n_labs: usize,
    n_tests: usize,
    counts: Vec<u32>,
}

impl Allocation {
    pub fn zeros(problem: &Problem) -> Self {
        Self {
            n_areas: problem.n_areas,
            n_labs: problem.n_labs,
            n_tests: problem.n_tests,
            counts: vec![0; problem.n_areas * problem.n_labs * problem.n_tests],
        }
    }

    #[inline]
    fn offset(&self, area: usize, lab: usize, test: usize) -> usize {
        (area * self.n_labs + lab) * self.n_tests + test
    }

    #[inline]
    pub fn get(&self, area: usize, lab: usize, test: usize) -> u32 {
        self.counts[self.offset(area, lab, test)]
    }

    #[inline]
    pub fn set(&mut self, area: usize, lab: usize, test: usize, value: u32) {
        let offset = self.offset(area, lab, test);
        self.counts[offset] = value;
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn genes(&self) -> &[u32] {
        &self.counts
    }

    pub fn genes_mut(&mut self) -> &mut [u32] {
        &mut self.counts
    }

    /// `(area, lab, test)` coordinates of a flat gene index.
    #[inline]
    pub fn gene_coords(&self, index: usize) -> (usize, usize, usize) {
        let test = index % self.n_tests;
        let rest = index / self.n_tests;
        (rest / self.n_labs, rest % self.n_labs, test)
    }

    /// Tests allocated from `area` for `test` across all labs.
    pub fn allocated(&self, area: usize, test: usize) -> u32 {
        (0..self.n_labs).map(|j| self.get(area, j, test)).sum()
    }

    pub fn total_tests(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    pub fn iter_nonzero(&self) -> impl Iterator<Item = (usize, usize, usize, u32)> + '_ {
        self.counts.iter().enumerate().filter_map(|(i, &count)| {
            (count > 0).then(|| {
                let (area, lab, test) = self.gene_coords(i);
                (area, lab, test, count)
            })
        })
    }

    /// 64-bit content hash over the raw tensor, the evaluator's memo key.
    pub fn content_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(self.counts.len() * 4);
        for value in &self.counts {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        u64_from_bytes(&bytes)
    }
}

/// Rank, crowding, and composite are per-generation bookkeeping; only the
/// tensor and its objective vector survive serialization (checkpoints
/// re-derive the rest on resume).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Individual {
    pub allocation: Allocation,
    pub objectives: [f64; 5],
    pub penalty: f64,
    #[serde(skip)]
    pub composite: f64,
    #[serde(skip)]
    pub rank: usize,
    #[serde(skip)]
    pub crowding: f64,
    #[serde(skip)]
    pub evaluated: bool,
}

impl Individual {
    pub fn new(allocation: Allocation) -> Self {
        Self {
            allocation,
            objectives: [0.0; 5],
            penalty: 0.0,
            composite: f64::INFINITY,
            rank: usize::MAX,
            crowding: 0.0,
            evaluated: false,
        }
    }
}
