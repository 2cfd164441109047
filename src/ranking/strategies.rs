//! The closed set of ranking strategies

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use super::{assign_ranks, RankedResult, Ranker, ScoreBreakdown};
use crate::catalog::Candidate;
use crate::embedding::{EmbeddingProvider, SharedPhraseStore};
use crate::error::Result;
use crate::filtering::FilterSet;
use crate::scoring::{
    AlignmentReducer, LexicalVectorCache, LexicalVectorizer, PhraseAlignmentScorer,
    PreferenceBundle, SparseVector,
};
use crate::selection::{
    objective, ClusteredMmrSelector, CoverageRiskSelector, MmrPick, MmrSelector, SelectionPath,
};

/// Which strategy produced a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CoverageRisk,
    Lexical,
    Mmr,
    ClusteredMmr,
}

/// Phrase alignment followed by greedy coverage-risk selection
pub struct CoverageRiskRanker {
    phrases: SharedPhraseStore,
    provider: Arc<dyn EmbeddingProvider>,
    reducer: AlignmentReducer,
    selector: CoverageRiskSelector,
}

impl CoverageRiskRanker {
    pub fn new(
        phrases: SharedPhraseStore,
        provider: Arc<dyn EmbeddingProvider>,
        selector: CoverageRiskSelector,
    ) -> Self {
        Self {
            phrases,
            provider,
            reducer: AlignmentReducer::default(),
            selector,
        }
    }

    pub fn with_reducer(mut self, reducer: AlignmentReducer) -> Self {
        self.reducer = reducer;
        self
    }
}

impl Ranker for CoverageRiskRanker {
    fn rank(
        &self,
        candidates: &[Candidate],
        prefs: &PreferenceBundle,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        let matrix = PhraseAlignmentScorer::new(&self.phrases, self.provider.as_ref())
            .with_reducer(self.reducer)
            .score(candidates, prefs)?;
        let selection = self.selector.select(&matrix, k);

        let mut results: Vec<RankedResult> = selection
            .picks
            .iter()
            .map(|pick| {
                let score = match selection.path {
                    SelectionPath::Greedy => pick.marginal_gain,
                    SelectionPath::AllCandidates => {
                        objective(&matrix, &[pick.index], self.selector.config())
                    }
                    SelectionPath::Empty | SelectionPath::EmptyPreferences => 0.0,
                };
                let breakdown = match selection.path {
                    SelectionPath::EmptyPreferences => None,
                    _ => Some(ScoreBreakdown::CoverageRisk {
                        marginal_gain: pick.marginal_gain,
                        coverage_gain: pick.coverage_gain,
                        risk_gain: pick.risk_gain,
                        pos: matrix.pos.row(pick.index).to_vec(),
                        neg: matrix.neg.row(pick.index).to_vec(),
                        has_phrase_data: matrix.has_phrase_data[pick.index],
                    }),
                };
                RankedResult::new(candidates[pick.index].clone(), score, breakdown, 0)
            })
            .collect();
        assign_ranks(&mut results);
        Ok(results)
    }
}

/// Sparse token cosine ranking against the request's filters and preferences
pub struct LexicalRanker {
    vectorizer: LexicalVectorizer,
    cache: Option<Arc<LexicalVectorCache>>,
    filters: FilterSet,
}

impl LexicalRanker {
    pub fn new(filters: FilterSet) -> Self {
        Self {
            vectorizer: LexicalVectorizer::new(),
            cache: None,
            filters,
        }
    }

    pub fn with_cache(mut self, cache: Option<Arc<LexicalVectorCache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Cosine relevance of every candidate, in input order
    pub fn scores(&self, candidates: &[Candidate], prefs: &PreferenceBundle) -> Result<Vec<f32>> {
        let request = self.vectorizer.request_vector(&self.filters, prefs);
        let vectors: Vec<SparseVector> = match &self.cache {
            Some(cache) => cache.get_or_compute(candidates, &self.vectorizer)?,
            None => candidates
                .iter()
                .map(|c| self.vectorizer.candidate_vector(c))
                .collect(),
        };
        Ok(vectors.iter().map(|v| v.dot(&request)).collect())
    }
}

impl Ranker for LexicalRanker {
    fn rank(
        &self,
        candidates: &[Candidate],
        prefs: &PreferenceBundle,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        if candidates.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let scores = self.scores(candidates, prefs)?;

        // Stable sort keeps store order among equal scores
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

        let mut results: Vec<RankedResult> = order
            .into_iter()
            .take(k)
            .map(|i| {
                RankedResult::new(
                    candidates[i].clone(),
                    scores[i],
                    Some(ScoreBreakdown::Lexical {
                        similarity: scores[i],
                    }),
                    0,
                )
            })
            .collect();
        assign_ranks(&mut results);
        Ok(results)
    }
}

fn mmr_results(candidates: &[Candidate], picks: Vec<MmrPick>) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = picks
        .into_iter()
        .map(|pick| {
            RankedResult::new(
                candidates[pick.index].clone(),
                pick.relevance,
                Some(ScoreBreakdown::Mmr {
                    relevance: pick.relevance,
                    max_similarity: pick.max_similarity,
                    mmr_score: pick.mmr_score,
                    cluster: pick.cluster,
                }),
                0,
            )
        })
        .collect();
    assign_ranks(&mut results);
    results
}

/// Lexical relevance diversified with MMR
pub struct MmrRanker {
    lexical: LexicalRanker,
    selector: MmrSelector,
}

impl MmrRanker {
    pub fn new(lexical: LexicalRanker, selector: MmrSelector) -> Self {
        Self { lexical, selector }
    }
}

impl Ranker for MmrRanker {
    fn rank(
        &self,
        candidates: &[Candidate],
        prefs: &PreferenceBundle,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        if candidates.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let relevance = self.lexical.scores(candidates, prefs)?;
        let picks = self.selector.select(candidates, &relevance, k);
        Ok(mmr_results(candidates, picks))
    }
}

/// Lexical relevance grouped into diversity clusters
pub struct ClusteredMmrRanker {
    lexical: LexicalRanker,
    selector: ClusteredMmrSelector,
}

impl ClusteredMmrRanker {
    pub fn new(lexical: LexicalRanker, selector: ClusteredMmrSelector) -> Self {
        Self { lexical, selector }
    }
}

impl Ranker for ClusteredMmrRanker {
    fn rank(
        &self,
        candidates: &[Candidate],
        prefs: &PreferenceBundle,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        if candidates.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let relevance = self.lexical.scores(candidates, prefs)?;
        let picks = self.selector.select(candidates, &relevance, k);
        Ok(mmr_results(candidates, picks))
    }
}

/// One of the interchangeable strategies, chosen by configuration
pub enum RankingStrategy {
    CoverageRisk(CoverageRiskRanker),
    Lexical(LexicalRanker),
    Mmr(MmrRanker),
    ClusteredMmr(ClusteredMmrRanker),
}

impl RankingStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            RankingStrategy::CoverageRisk(_) => StrategyKind::CoverageRisk,
            RankingStrategy::Lexical(_) => StrategyKind::Lexical,
            RankingStrategy::Mmr(_) => StrategyKind::Mmr,
            RankingStrategy::ClusteredMmr(_) => StrategyKind::ClusteredMmr,
        }
    }
}

impl Ranker for RankingStrategy {
    fn rank(
        &self,
        candidates: &[Candidate],
        prefs: &PreferenceBundle,
        k: usize,
    ) -> Result<Vec<RankedResult>> {
        match self {
            RankingStrategy::CoverageRisk(r) => r.rank(candidates, prefs, k),
            RankingStrategy::Lexical(r) => r.rank(candidates, prefs, k),
            RankingStrategy::Mmr(r) => r.rank(candidates, prefs, k),
            RankingStrategy::ClusteredMmr(r) => r.rank(candidates, prefs, k),
        }
    }
}
