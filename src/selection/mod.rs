// Top-k selection policies
//
// Greedy coverage-risk selection works on an AlignmentMatrix; MMR and clustered
// MMR work on a relevance vector plus structural similarity between candidates.
// All of them return every candidate unchanged when there are at most k.

mod greedy;
mod mmr;
mod similarity;

pub use greedy::{
    coverage, filtered, objective, risk, Aggregation, CoverageRiskConfig, CoverageRiskSelector,
    GreedyPick, GreedySelection, SelectionPath,
};
pub use mmr::{ClusteredMmrSelector, MmrPick, MmrSelector};
pub use similarity::{structural_similarity, SAME_BODY_STYLE, SAME_MAKE, SAME_MAKE_MODEL};
