//! Ranking: strategies behind one interface, and the request engine
//!
//! A ranking request flows through filter relaxation, then one
//! [`RankingStrategy`] chosen by configuration:
//! - coverage-risk over phrase alignment
//! - lexical cosine ranking
//! - lexical relevance + MMR
//! - lexical relevance + clustered MMR

mod engine;
mod strategies;

pub use engine::{
    EngineSettings, RankingEngine, RankingOutcome, RankingRequest, RankingResponse,
    SearchLocation, StrategyMode,
};
pub use strategies::{
    ClusteredMmrRanker, CoverageRiskRanker, LexicalRanker, MmrRanker, RankingStrategy,
    StrategyKind,
};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::catalog::Candidate;
use crate::error::{PrefrankError, Result};
use crate::scoring::PreferenceBundle;

/// Per-result score detail, shaped by the strategy that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreBreakdown {
    CoverageRisk {
        marginal_gain: f32,
        coverage_gain: f32,
        risk_gain: f32,
        /// Alignment with each liked phrase
        pos: Vec<f32>,
        /// Alignment with each disliked phrase
        neg: Vec<f32>,
        has_phrase_data: bool,
    },
    Lexical {
        similarity: f32,
    },
    Mmr {
        relevance: f32,
        max_similarity: f32,
        mmr_score: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        cluster: Option<usize>,
    },
}

/// One ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub candidate: Candidate,

    /// Relevance score; higher is better
    pub score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,

    /// 1-based position in the final list
    pub rank: usize,
}

impl RankedResult {
    pub fn new(candidate: Candidate, score: f32, breakdown: Option<ScoreBreakdown>, rank: usize) -> Self {
        Self {
            candidate,
            score,
            breakdown,
            rank,
        }
    }

    pub fn id(&self) -> &str {
        &self.candidate.id
    }
}

/// A ranking strategy: reduce candidates to an ordered top-k
pub trait Ranker: Send + Sync {
    fn rank(
        &self,
        candidates: &[Candidate],
        prefs: &PreferenceBundle,
        k: usize,
    ) -> Result<Vec<RankedResult>>;
}

/// Diversification applied after lexical scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiversificationPolicy {
    None,
    #[default]
    Mmr,
    Clustered,
}

impl FromStr for DiversificationPolicy {
    type Err = PrefrankError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "mmr" => Ok(Self::Mmr),
            "clustered" | "clustered_mmr" => Ok(Self::Clustered),
            other => Err(PrefrankError::InvalidConfigValue {
                path: "diversity.policy".to_string(),
                message: format!("Unknown diversification policy '{}'", other),
            }),
        }
    }
}

/// Soft conditions the caller should be able to explain to the buyer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// A MustHave filter was dropped as a last resort
    ForcedRelaxation { filter: String },
    /// These candidates had no review phrases and scored zero alignment
    MissingPhraseData { candidate_ids: Vec<String> },
    /// No liked or disliked phrases; preference scoring was bypassed
    EmptyPreferenceSet,
    /// Lexical ranking was used instead of phrase alignment
    LexicalFallback { reason: String },
}

/// Assign 1-based ranks in list order
pub(crate) fn assign_ranks(results: &mut [RankedResult]) {
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("MMR".parse::<DiversificationPolicy>().unwrap(), DiversificationPolicy::Mmr);
        assert_eq!(
            "clustered".parse::<DiversificationPolicy>().unwrap(),
            DiversificationPolicy::Clustered
        );
        assert!("random".parse::<DiversificationPolicy>().is_err());
    }

    #[test]
    fn test_degradation_serialization() {
        let d = Degradation::ForcedRelaxation {
            filter: "make=Toyota".to_string(),
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["kind"], "forced_relaxation");
        assert_eq!(json["filter"], "make=Toyota");

        let json = serde_json::to_value(Degradation::EmptyPreferenceSet).unwrap();
        assert_eq!(json["kind"], "empty_preference_set");
    }

    #[test]
    fn test_breakdown_is_tagged() {
        let result = RankedResult::new(
            Candidate::new("C1", "Toyota", "Camry"),
            0.5,
            Some(ScoreBreakdown::Lexical { similarity: 0.5 }),
            1,
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["breakdown"]["kind"], "lexical");
        assert_eq!(json["rank"], 1);
    }
}
