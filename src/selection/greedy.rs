//! Greedy coverage-risk selection
//!
//! For a selected set `S`:
//!
//! ```text
//! coverage(S) = sum_j agg_{v in S} filtered(Pos[v][j])
//! risk(S)     = sum_j agg_{v in S} filtered(Neg[v][j])
//! f(S)        = coverage(S) - lambda * risk(S)
//! ```
//!
//! where `agg` is max (default) or sum, and `filtered(x)` keeps `x` only above
//! `min_similarity`. Each round adds the candidate with the largest marginal
//! gain; equal gains go to the smaller candidate id.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::scoring::AlignmentMatrix;

/// Gains closer than this are treated as tied
const GAIN_EPSILON: f32 = 1e-6;

/// Per-feature aggregation over the selected set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Max,
    Sum,
}

impl Aggregation {
    fn combine(self, current: f32, value: f32) -> f32 {
        match self {
            Aggregation::Max => current.max(value),
            Aggregation::Sum => current + value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageRiskConfig {
    /// Similarities at or below this count as noise
    pub min_similarity: f32,
    /// Weight of risk against coverage (lambda)
    pub risk_aversion: f32,
    pub aggregation: Aggregation,
}

impl Default for CoverageRiskConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
            risk_aversion: 0.5,
            aggregation: Aggregation::Max,
        }
    }
}

/// Thresholded similarity. Negative similarities never count, which keeps
/// coverage and risk monotone in the selected set.
pub fn filtered(x: f32, min_similarity: f32) -> f32 {
    if x.is_finite() && x > min_similarity && x > 0.0 {
        x
    } else {
        0.0
    }
}

fn set_value(scores: &Array2<f32>, selected: &[usize], config: &CoverageRiskConfig) -> f32 {
    let mut total = 0.0;
    for j in 0..scores.ncols() {
        let mut acc = 0.0;
        for &v in selected {
            acc = config
                .aggregation
                .combine(acc, filtered(scores[[v, j]], config.min_similarity));
        }
        total += acc;
    }
    total
}

/// `coverage(S)` over rows `selected` of the alignment matrix
pub fn coverage(matrix: &AlignmentMatrix, selected: &[usize], config: &CoverageRiskConfig) -> f32 {
    set_value(&matrix.pos, selected, config)
}

/// `risk(S)` over rows `selected` of the alignment matrix
pub fn risk(matrix: &AlignmentMatrix, selected: &[usize], config: &CoverageRiskConfig) -> f32 {
    set_value(&matrix.neg, selected, config)
}

/// `f(S) = coverage(S) - lambda * risk(S)`
pub fn objective(matrix: &AlignmentMatrix, selected: &[usize], config: &CoverageRiskConfig) -> f32 {
    coverage(matrix, selected, config) - config.risk_aversion * risk(matrix, selected, config)
}

/// One selected candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreedyPick {
    /// Row in the alignment matrix / input candidate list
    pub index: usize,
    /// Objective gain when this candidate was added; 0 on bypass paths
    pub marginal_gain: f32,
    pub coverage_gain: f32,
    pub risk_gain: f32,
}

impl GreedyPick {
    fn passthrough(index: usize) -> Self {
        Self {
            index,
            marginal_gain: 0.0,
            coverage_gain: 0.0,
            risk_gain: 0.0,
        }
    }
}

/// How a selection was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPath {
    /// No candidates
    Empty,
    /// Preference set had no phrases; first `k` in input order
    EmptyPreferences,
    /// At most `k` candidates; all returned in input order
    AllCandidates,
    Greedy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GreedySelection {
    pub picks: Vec<GreedyPick>,
    pub path: SelectionPath,
}

impl GreedySelection {
    pub fn indices(&self) -> Vec<usize> {
        self.picks.iter().map(|p| p.index).collect()
    }
}

/// Greedy top-k selector over an [`AlignmentMatrix`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageRiskSelector {
    config: CoverageRiskConfig,
}

impl CoverageRiskSelector {
    pub fn new(config: CoverageRiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoverageRiskConfig {
        &self.config
    }

    pub fn select(&self, matrix: &AlignmentMatrix, k: usize) -> GreedySelection {
        let n = matrix.len();
        if n == 0 || k == 0 {
            return GreedySelection {
                picks: Vec::new(),
                path: SelectionPath::Empty,
            };
        }
        if matrix.has_no_features() {
            return GreedySelection {
                picks: (0..n.min(k)).map(GreedyPick::passthrough).collect(),
                path: SelectionPath::EmptyPreferences,
            };
        }
        if n <= k {
            return GreedySelection {
                picks: (0..n).map(GreedyPick::passthrough).collect(),
                path: SelectionPath::AllCandidates,
            };
        }

        GreedySelection {
            picks: self.greedy(matrix, k),
            path: SelectionPath::Greedy,
        }
    }

    /// The greedy loop itself, without short-circuits
    fn greedy(&self, matrix: &AlignmentMatrix, k: usize) -> Vec<GreedyPick> {
        let n = matrix.len();
        let cfg = &self.config;
        let agg = cfg.aggregation;

        // Per-feature aggregate over the current selection
        let mut cov_state = vec![0.0f32; matrix.liked_count()];
        let mut risk_state = vec![0.0f32; matrix.disliked_count()];
        let mut selected = vec![false; n];
        let mut picks = Vec::with_capacity(k.min(n));

        for _ in 0..k.min(n) {
            let mut best: Option<GreedyPick> = None;

            for v in (0..n).filter(|&v| !selected[v]) {
                let coverage_gain: f32 = cov_state
                    .iter()
                    .enumerate()
                    .map(|(j, &cur)| agg.combine(cur, filtered(matrix.pos[[v, j]], cfg.min_similarity)) - cur)
                    .sum();
                let risk_gain: f32 = risk_state
                    .iter()
                    .enumerate()
                    .map(|(j, &cur)| agg.combine(cur, filtered(matrix.neg[[v, j]], cfg.min_similarity)) - cur)
                    .sum();
                let pick = GreedyPick {
                    index: v,
                    marginal_gain: coverage_gain - cfg.risk_aversion * risk_gain,
                    coverage_gain,
                    risk_gain,
                };

                best = match best {
                    Some(current) if !self.beats(matrix, &pick, &current) => Some(current),
                    _ => Some(pick),
                };
            }

            let Some(pick) = best else { break };
            selected[pick.index] = true;
            for (j, cur) in cov_state.iter_mut().enumerate() {
                *cur = agg.combine(*cur, filtered(matrix.pos[[pick.index, j]], cfg.min_similarity));
            }
            for (j, cur) in risk_state.iter_mut().enumerate() {
                *cur = agg.combine(*cur, filtered(matrix.neg[[pick.index, j]], cfg.min_similarity));
            }
            tracing::trace!(
                candidate = %matrix.candidate_ids[pick.index],
                gain = pick.marginal_gain,
                "greedy pick"
            );
            picks.push(pick);
        }

        picks
    }

    fn beats(&self, matrix: &AlignmentMatrix, challenger: &GreedyPick, current: &GreedyPick) -> bool {
        let diff = challenger.marginal_gain - current.marginal_gain;
        if diff.abs() <= GAIN_EPSILON {
            let a = &matrix.candidate_ids[challenger.index];
            let b = &matrix.candidate_ids[current.index];
            return a.cmp(b).then(challenger.index.cmp(&current.index)) == Ordering::Less;
        }
        diff > 0.0
    }
}
