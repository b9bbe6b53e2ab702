//! Raw scores, batch normalization and cross-run aggregation.

use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw counters of one agent at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    pub age: u32,
    /// Body length, only tracked when food is enabled.
    pub length: Option<u32>,
    pub overlap: u32,
}

/// Score rescaled into `[0, 1]` against the batch it was produced in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedScore {
    pub age: f64,
    pub length: Option<f64>,
    pub overlap: f64,
    pub raw: Score,
}

impl NormalizedScore {
    /// Ranking key. Overlap is a penalty, so it enters inverted.
    pub fn total(&self) -> f64 {
        self.age + self.length.unwrap_or(0.0) + (1.0 - self.overlap)
    }
}

#[derive(Clone, Copy)]
struct Bounds {
    min: f64,
    max: f64,
}

impl Bounds {
    fn of(vals: impl Iterator<Item = u32>) -> Option<Self> {
        let (min, max) = vals.fold(None, |acc, val| match acc {
            None => Some((val, val)),
            Some((min, max)) => Some((min.min(val), max.max(val))),
        })?;
        let min = f64::from(min);
        Some(Self {
            min,
            max: f64::from(max).max(min + 1.0),
        })
    }

    fn scale(&self, val: u32) -> f64 {
        (f64::from(val) - self.min) / (self.max - self.min)
    }
}

/// Normalize every metric against the batch extremes, then rank by
/// descending total. Equal totals keep their input order.
pub fn normalize(scores: &[Score]) -> Result<Vec<NormalizedScore>> {
    let (Some(age), Some(overlap)) = (
        Bounds::of(scores.iter().map(|s| s.age)),
        Bounds::of(scores.iter().map(|s| s.overlap)),
    ) else {
        bail!("cannot normalize an empty batch");
    };
    let length = Bounds::of(scores.iter().filter_map(|s| s.length));

    let mut normalized: Vec<_> = scores
        .iter()
        .map(|score| NormalizedScore {
            age: age.scale(score.age),
            length: score.length.zip(length).map(|(val, b)| b.scale(val)),
            overlap: overlap.scale(score.overlap),
            raw: score.clone(),
        })
        .collect();
    normalized.sort_by(|a, b| b.total().total_cmp(&a.total()));
    Ok(normalized)
}

/// Leaderboard entry averaged over a batch of runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    pub name: String,
    /// Runs in which the agent took part.
    pub appearances: usize,
    pub age: f64,
    pub length: Option<f64>,
    pub overlap: f64,
    /// Spread is taken over every run, absent runs counting as zero.
    pub total: AccumulatorReport,
}

#[derive(Default)]
struct Tally {
    age: Accumulator,
    length: Accumulator,
    overlap: Accumulator,
    total: Accumulator,
}

/// Sum each agent's raw metrics over the runs it appears in and divide by the
/// number of runs. Sorted by descending mean total, then name.
pub fn aggregate(runs: &[Vec<NormalizedScore>]) -> Vec<AggregateScore> {
    let mut tallies: BTreeMap<&str, Tally> = BTreeMap::new();
    for run in runs {
        for score in run {
            let tally = tallies.entry(score.raw.name.as_str()).or_default();
            tally.age.add(f64::from(score.raw.age));
            if let Some(length) = score.raw.length {
                tally.length.add(f64::from(length));
            }
            tally.overlap.add(f64::from(score.raw.overlap));
            tally.total.add(score.total());
        }
    }

    let n_runs = runs.len();
    let mut board: Vec<_> = tallies
        .into_iter()
        .map(|(name, tally)| AggregateScore {
            name: name.to_string(),
            appearances: tally.age.n_vals(),
            age: tally.age.report_over(n_runs).mean,
            length: (tally.length.n_vals() > 0).then(|| tally.length.report_over(n_runs).mean),
            overlap: tally.overlap.report_over(n_runs).mean,
            total: tally.total.report_over(n_runs),
        })
        .collect();
    board.sort_by(|a, b| b.total.mean.total_cmp(&a.total.mean));
    board
}
