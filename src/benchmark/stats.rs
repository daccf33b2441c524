//! Aggregates over successful iterations.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl Aggregate {
    /// Returns `None` for an empty sample.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self { min, avg, max })
    }
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    /// Measured iterations requested
    pub iterations: usize,
    pub warmup: usize,
    pub succeeded: usize,
    /// Measured iterations that failed
    pub skipped: usize,
    /// Source to destination totals
    pub to: Aggregate,
    /// Destination to source totals
    pub back: Aggregate,
    /// Both directions together
    pub summary: Aggregate,
}

/// Collects per-direction `total` timings of successful iterations.
#[derive(Debug, Default, Clone)]
pub struct Samples {
    pub to: Vec<f64>,
    pub back: Vec<f64>,
}

impl Samples {
    pub fn push(&mut self, to: f64, back: f64) {
        self.to.push(to);
        self.back.push(back);
    }

    pub fn len(&self) -> usize {
        self.to.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to.is_empty()
    }

    /// `None` when no iteration succeeded.
    pub fn aggregate(&self) -> Option<(Aggregate, Aggregate, Aggregate)> {
        let to = Aggregate::from_samples(&self.to)?;
        let back = Aggregate::from_samples(&self.back)?;
        let both: Vec<f64> = self.to.iter().chain(self.back.iter()).copied().collect();
        let summary = Aggregate::from_samples(&both)?;
        Some((to, back, summary))
    }
}
