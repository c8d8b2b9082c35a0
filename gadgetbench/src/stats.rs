//! Reducing counter deltas to a result.

use std::collections::*;
use std::fmt;

use itertools::Itertools;
use num::rational::Ratio;
use serde::Serialize;

use crate::error::{ HarnessError, Result };
use crate::harness::Aggregation;

/// A list of observed values.
///
/// Each entry is a *difference* between two reads of a cycle counter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResults(pub Vec<u64>);

/// Implemented on types which contain a list of observed values.
pub trait ResultList<D: Copy + Ord> {
    /// Return a reference to the list of values.
    fn data(&self) -> &Vec<D>;

    /// Return the number of observed values.
    fn len(&self) -> usize { self.data().len() }

    fn is_empty(&self) -> bool { self.data().is_empty() }

    /// Return the minimum value in the list.
    fn get_min(&self) -> Option<D> { self.data().iter().min().copied() }

    /// Return the maximum value in the list.
    fn get_max(&self) -> Option<D> { self.data().iter().max().copied() }

    /// Return the lower median of the list.
    fn get_median(&self) -> Option<D> {
        let sorted = self.data().iter().copied().sorted().collect_vec();
        match sorted.len() {
            0 => None,
            n => Some(sorted[(n - 1) / 2]),
        }
    }

    /// Return the most-frequent value in the list (the largest on a tie).
    fn get_mode(&self) -> Option<D> {
        self.histogram().into_iter()
            .max_by(|x, y| x.1.cmp(&y.1))
            .map(|(val, _)| val)
    }

    /// Return a histogram counting the distribution of all values in the list.
    fn histogram(&self) -> BTreeMap<D, usize> {
        let mut dist = BTreeMap::new();
        for r in self.data().iter() {
            *dist.entry(*r).or_insert(0) += 1;
        }
        dist
    }
}

impl ResultList<u64> for RawResults {
    fn data(&self) -> &Vec<u64> { &self.0 }
}

impl Aggregation {
    /// Reduce a set of deltas to one value.
    pub fn apply(&self, results: &RawResults) -> Result<u64> {
        let res = match self {
            Self::Min => results.get_min(),
            Self::Median => results.get_median(),
        };
        res.ok_or_else(|| HarnessError::invalid("no measurements to aggregate"))
    }
}

/// The outcome of a benchmark.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchmarkResult {
    /// Total cycles spent in the loop (after aggregation)
    pub cycles: u64,

    /// Loop iterations per measurement
    pub iterations: u64,

    /// Exact cycles per iteration
    pub cycles_per_iteration: Ratio<u64>,

    /// Every recorded delta, in measurement order
    pub samples: RawResults,
}

impl BenchmarkResult {
    /// Cycles per iteration, rounded down.
    pub fn floor(&self) -> u64 {
        self.cycles_per_iteration.numer() / self.cycles_per_iteration.denom()
    }

    /// Cycles per iteration, rounded up.
    pub fn ceil(&self) -> u64 {
        let rem = self.cycles_per_iteration.numer() % self.cycles_per_iteration.denom();
        self.floor() + u64::from(rem != 0)
    }

    /// Cycles per iteration as a float, for display only.
    pub fn to_f64(&self) -> f64 {
        *self.cycles_per_iteration.numer() as f64
            / *self.cycles_per_iteration.denom() as f64
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            cycles: self.cycles,
            iterations: self.iterations,
            cycles_per_iteration: self.to_f64(),
            cycles_per_iteration_exact: format!("{}", self.cycles_per_iteration),
            min: self.samples.get_min(),
            max: self.samples.get_max(),
            median: self.samples.get_median(),
            mode: self.samples.get_mode(),
            samples: self.samples.0.clone(),
        }
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cycles: {}", self.cycles)?;
        if self.cycles_per_iteration.is_integer() {
            write!(f, "Cycles/iteration: {}", self.floor())
        } else {
            write!(f, "Cycles/iteration: {:.3}", self.to_f64())
        }
    }
}

/// A [BenchmarkResult] flattened for machine-readable output.
#[derive(Clone, Debug, Serialize)]
pub struct ResultSummary {
    pub cycles: u64,
    pub iterations: u64,
    pub cycles_per_iteration: f64,
    pub cycles_per_iteration_exact: String,
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub median: Option<u64>,
    pub mode: Option<u64>,
    pub samples: Vec<u64>,
}
