//! Maximal Marginal Relevance selection
//!
//! Plain MMR picks, at each step, the candidate maximising
//! `lambda * relevance(v) - (1 - lambda) * max_{s in selected} sim(v, s)`.
//!
//! Clustered MMR is a separate policy: each cluster starts from an MMR pick
//! against everything chosen so far (the cluster seed), then fills up with the
//! remaining candidates most similar to that seed, so a UI can show a handful
//! of close alternatives before moving to something different.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::structural_similarity;
use crate::catalog::Candidate;

/// One MMR-selected candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmrPick {
    /// Index into the input candidate list
    pub index: usize,
    pub relevance: f32,
    /// Highest similarity to anything selected before this pick
    pub max_similarity: f32,
    pub mmr_score: f32,
    /// Cluster number for clustered selection
    pub cluster: Option<usize>,
}

impl MmrPick {
    fn passthrough(index: usize, relevance: f32) -> Self {
        Self {
            index,
            relevance,
            max_similarity: 0.0,
            mmr_score: relevance,
            cluster: None,
        }
    }
}

/// Highest score wins; ties go to higher relevance, then lower input index
fn better(a: (f32, f32, usize), b: (f32, f32, usize)) -> bool {
    match a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.2 < b.2,
        },
    }
}

fn relevance_at(relevance: &[f32], index: usize) -> f32 {
    relevance
        .get(index)
        .copied()
        .filter(|r| r.is_finite())
        .unwrap_or(0.0)
}

/// Degenerate inputs shared by both policies
fn short_circuit(candidates: &[Candidate], relevance: &[f32], k: usize) -> Option<Vec<MmrPick>> {
    if candidates.is_empty() || k == 0 {
        return Some(Vec::new());
    }
    if candidates.len() <= k {
        return Some(
            (0..candidates.len())
                .map(|i| MmrPick::passthrough(i, relevance_at(relevance, i)))
                .collect(),
        );
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MmrSelector {
    lambda: f32,
}

impl Default for MmrSelector {
    fn default() -> Self {
        Self { lambda: 0.7 }
    }
}

impl MmrSelector {
    /// `lambda` is clamped to [0, 1]; 1 is pure relevance
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }

    pub fn lambda(&self) -> f32 {
        self.lambda
    }

    /// Select up to `k` candidates. `relevance[i]` scores `candidates[i]`.
    pub fn select(&self, candidates: &[Candidate], relevance: &[f32], k: usize) -> Vec<MmrPick> {
        if let Some(picks) = short_circuit(candidates, relevance, k) {
            return picks;
        }
        self.run(candidates, relevance, k)
    }

    fn run(&self, candidates: &[Candidate], relevance: &[f32], k: usize) -> Vec<MmrPick> {
        let n = candidates.len();
        let mut selected = vec![false; n];
        // Max similarity of each candidate to the selected set
        let mut max_sim = vec![0.0f32; n];
        let mut picks = Vec::with_capacity(k.min(n));

        while picks.len() < k.min(n) {
            let Some(pick) = self.best_unselected(candidates, relevance, &selected, &max_sim) else {
                break;
            };
            selected[pick.index] = true;
            for (i, other) in candidates.iter().enumerate() {
                if !selected[i] {
                    max_sim[i] = max_sim[i].max(structural_similarity(other, &candidates[pick.index]));
                }
            }
            picks.push(pick);
        }
        picks
    }

    fn best_unselected(
        &self,
        candidates: &[Candidate],
        relevance: &[f32],
        selected: &[bool],
        max_sim: &[f32],
    ) -> Option<MmrPick> {
        let mut best: Option<MmrPick> = None;
        for i in (0..candidates.len()).filter(|&i| !selected[i]) {
            let rel = relevance_at(relevance, i);
            let score = self.lambda * rel - (1.0 - self.lambda) * max_sim[i];
            let replace = match &best {
                None => true,
                Some(b) => better((score, rel, i), (b.mmr_score, b.relevance, b.index)),
            };
            if replace {
                best = Some(MmrPick {
                    index: i,
                    relevance: rel,
                    max_similarity: max_sim[i],
                    mmr_score: score,
                    cluster: None,
                });
            }
        }
        best
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusteredMmrSelector {
    mmr: MmrSelector,
    cluster_size: usize,
}

impl Default for ClusteredMmrSelector {
    fn default() -> Self {
        Self {
            mmr: MmrSelector::default(),
            cluster_size: 3,
        }
    }
}

impl ClusteredMmrSelector {
    pub fn new(lambda: f32, cluster_size: usize) -> Self {
        Self {
            mmr: MmrSelector::new(lambda),
            cluster_size: cluster_size.max(1),
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn select(&self, candidates: &[Candidate], relevance: &[f32], k: usize) -> Vec<MmrPick> {
        if let Some(picks) = short_circuit(candidates, relevance, k) {
            return picks;
        }

        let n = candidates.len();
        let target = k.min(n);
        let mut selected = vec![false; n];
        let mut max_sim = vec![0.0f32; n];
        let mut picks: Vec<MmrPick> = Vec::with_capacity(target);
        let mut cluster = 0;

        while picks.len() < target {
            let Some(mut seed) = self.mmr.best_unselected(candidates, relevance, &selected, &max_sim)
            else {
                break;
            };
            seed.cluster = Some(cluster);
            let seed_index = seed.index;
            let mut members = vec![seed];
            selected[seed_index] = true;

            // Closest remaining alternatives to the seed
            while members.len() < self.cluster_size && picks.len() + members.len() < target {
                let next = (0..n)
                    .filter(|&i| !selected[i])
                    .map(|i| {
                        let sim = structural_similarity(&candidates[i], &candidates[seed_index]);
                        (sim, relevance_at(relevance, i), i)
                    })
                    .fold(None, |best: Option<(f32, f32, usize)>, cand| match best {
                        Some(b) if !better(cand, b) => Some(b),
                        _ => Some(cand),
                    });
                let Some((sim, rel, i)) = next else { break };
                selected[i] = true;
                members.push(MmrPick {
                    index: i,
                    relevance: rel,
                    max_similarity: sim,
                    mmr_score: rel,
                    cluster: Some(cluster),
                });
            }

            for member in &members {
                for (i, other) in candidates.iter().enumerate() {
                    if !selected[i] {
                        max_sim[i] =
                            max_sim[i].max(structural_similarity(other, &candidates[member.index]));
                    }
                }
            }
            picks.extend(members);
            cluster += 1;
        }
        picks
    }
}
