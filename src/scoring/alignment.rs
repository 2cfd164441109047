//! Phrase alignment scoring
//!
//! `Pos[v][j]` is the best cosine match between liked phrase `j` and any of
//! candidate `v`'s review pros; `Neg[v][j]` is the same against cons for
//! disliked phrase `j`. Candidates without review data get all-zero rows.

use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::PreferenceBundle;
use crate::catalog::Candidate;
use crate::embedding::{l2_normalize_rows, EmbeddingError, EmbeddingProvider, PhraseEmbeddingStore};
use crate::error::Result;

/// How per-phrase similarities collapse into one alignment score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentReducer {
    /// Single best-matching review phrase
    #[default]
    Max,
    Mean,
    /// Mean of the `n` best matches
    TopKMean(usize),
}

impl AlignmentReducer {
    /// Reduce one column of similarities. Empty input reduces to 0.
    pub fn reduce(&self, similarities: ArrayView1<'_, f32>) -> f32 {
        if similarities.is_empty() {
            return 0.0;
        }
        let value = match self {
            AlignmentReducer::Max => similarities.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x)),
            AlignmentReducer::Mean => similarities.sum() / similarities.len() as f32,
            AlignmentReducer::TopKMean(n) => {
                let mut sorted: Vec<f32> = similarities.to_vec();
                sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
                let take = (*n).clamp(1, sorted.len());
                sorted[..take].iter().sum::<f32>() / take as f32
            }
        };
        sanitize(value)
    }
}

/// Finite and clamped to the cosine range
fn sanitize(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Request-scoped alignment of candidates against preference phrases
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentMatrix {
    /// Row order of `pos` and `neg`
    pub candidate_ids: Vec<String>,
    /// `(candidates, liked)` best-match similarities against pros
    pub pos: Array2<f32>,
    /// `(candidates, disliked)` best-match similarities against cons
    pub neg: Array2<f32>,
    /// Whether the phrase store had an entry for each candidate
    pub has_phrase_data: Vec<bool>,
}

impl AlignmentMatrix {
    /// All-zero matrix for candidates with no review data at all
    pub fn zeros(candidate_ids: Vec<String>, liked: usize, disliked: usize) -> Self {
        let n = candidate_ids.len();
        Self {
            candidate_ids,
            pos: Array2::zeros((n, liked)),
            neg: Array2::zeros((n, disliked)),
            has_phrase_data: vec![false; n],
        }
    }

    pub fn len(&self) -> usize {
        self.candidate_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidate_ids.is_empty()
    }

    pub fn liked_count(&self) -> usize {
        self.pos.ncols()
    }

    pub fn disliked_count(&self) -> usize {
        self.neg.ncols()
    }

    /// No preference phrases on either side
    pub fn has_no_features(&self) -> bool {
        self.liked_count() == 0 && self.disliked_count() == 0
    }

    /// Ids of candidates that had no review data
    pub fn missing_phrase_data(&self) -> Vec<String> {
        self.candidate_ids
            .iter()
            .zip(&self.has_phrase_data)
            .filter(|(_, has)| !**has)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Align candidates against already-embedded preference phrases.
///
/// `liked` and `disliked` hold one embedding per phrase; they are normalised
/// here so similarities are cosines.
pub fn align(
    candidates: &[Candidate],
    store: &PhraseEmbeddingStore,
    liked: ArrayView2<'_, f32>,
    disliked: ArrayView2<'_, f32>,
    reducer: AlignmentReducer,
) -> std::result::Result<AlignmentMatrix, EmbeddingError> {
    for side in [liked.view(), disliked.view()] {
        if side.nrows() > 0 && side.ncols() != store.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: store.dimension(),
                actual: side.ncols(),
            });
        }
    }

    let mut liked = liked.to_owned();
    let mut disliked = disliked.to_owned();
    l2_normalize_rows(&mut liked);
    l2_normalize_rows(&mut disliked);

    let ids = candidates.iter().map(|c| c.id.clone()).collect();
    let mut matrix = AlignmentMatrix::zeros(ids, liked.nrows(), disliked.nrows());

    for (row, candidate) in candidates.iter().enumerate() {
        let Some(phrases) = store.lookup(candidate) else {
            continue;
        };
        matrix.has_phrase_data[row] = true;

        if liked.nrows() > 0 && !phrases.pros_phrases.is_empty() {
            // (pros, liked)
            let sims = phrases.pros_embeddings.dot(&liked.t());
            for (j, column) in sims.axis_iter(Axis(1)).enumerate() {
                matrix.pos[[row, j]] = reducer.reduce(column);
            }
        }
        if disliked.nrows() > 0 && !phrases.cons_phrases.is_empty() {
            let sims = phrases.cons_embeddings.dot(&disliked.t());
            for (j, column) in sims.axis_iter(Axis(1)).enumerate() {
                matrix.neg[[row, j]] = reducer.reduce(column);
            }
        }
    }

    Ok(matrix)
}

/// Computes an [`AlignmentMatrix`] for a request, embedding the preference
/// phrases in one batch
pub struct PhraseAlignmentScorer<'a> {
    store: &'a PhraseEmbeddingStore,
    provider: &'a dyn EmbeddingProvider,
    reducer: AlignmentReducer,
}

impl<'a> PhraseAlignmentScorer<'a> {
    pub fn new(store: &'a PhraseEmbeddingStore, provider: &'a dyn EmbeddingProvider) -> Self {
        Self {
            store,
            provider,
            reducer: AlignmentReducer::default(),
        }
    }

    pub fn with_reducer(mut self, reducer: AlignmentReducer) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn score(&self, candidates: &[Candidate], prefs: &PreferenceBundle) -> Result<AlignmentMatrix> {
        let liked_count = prefs.liked_features.len();
        let disliked_count = prefs.disliked_features.len();

        if !prefs.has_phrases() || candidates.is_empty() {
            let ids = candidates.iter().map(|c| c.id.clone()).collect();
            return Ok(AlignmentMatrix::zeros(ids, liked_count, disliked_count));
        }

        let phrases = prefs.phrases();
        let embeddings = self.provider.embed_batch(&phrases)?;
        if embeddings.nrows() != phrases.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Expected {} preference embeddings, got {}",
                phrases.len(),
                embeddings.nrows()
            ))
            .into());
        }

        let liked = embeddings.slice(s![..liked_count, ..]);
        let disliked = embeddings.slice(s![liked_count.., ..]);
        let matrix = align(candidates, self.store, liked, disliked, self.reducer)?;

        tracing::debug!(
            candidates = matrix.len(),
            liked = liked_count,
            disliked = disliked_count,
            missing = matrix.missing_phrase_data().len(),
            "Computed phrase alignment"
        );
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{rows_to_matrix, Matrix, VehicleKey, VehiclePhrases};

    /// Axis-aligned fake embeddings: each known phrase is a basis vector
    struct AxisProvider;

    impl EmbeddingProvider for AxisProvider {
        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Matrix, EmbeddingError> {
            let rows = texts
                .iter()
                .map(|t| match t.as_str() {
                    "good mpg" => vec![1.0, 0.0, 0.0],
                    "roomy" => vec![0.0, 1.0, 0.0],
                    "loud" => vec![0.0, 0.0, 1.0],
                    _ => vec![0.0, 0.0, 0.0],
                })
                .collect();
            rows_to_matrix(rows, 3)
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn store() -> PhraseEmbeddingStore {
        let mut store = PhraseEmbeddingStore::new(3);
        store
            .insert(
                VehicleKey::new("Toyota", "Prius", 2021),
                VehiclePhrases::from_rows(
                    vec![
                        ("excellent fuel economy".to_string(), vec![0.9, 0.1, 0.0]),
                        ("cramped rear".to_string(), vec![0.0, -1.0, 0.0]),
                    ],
                    vec![("road noise".to_string(), vec![0.0, 0.2, 0.8])],
                    3,
                )
                .unwrap(),
            )
            .unwrap();
        store
            .insert(
                VehicleKey::new("Honda", "Fit", 2019),
                VehiclePhrases::from_rows(vec![], vec![], 3).unwrap(),
            )
            .unwrap();
        store
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("P1", "Toyota", "Prius").with_year(2021),
            Candidate::new("F1", "Honda", "Fit").with_year(2019),
            Candidate::new("X1", "Kia", "Soul").with_year(2020),
        ]
    }

    #[test]
    fn test_max_over_pros() {
        let store = store();
        let scorer = PhraseAlignmentScorer::new(&store, &AxisProvider);
        let prefs = PreferenceBundle::new(["good mpg", "roomy"], ["loud"]);

        let m = scorer.score(&candidates(), &prefs).unwrap();
        assert_eq!(m.pos.dim(), (3, 2));
        assert_eq!(m.neg.dim(), (3, 1));

        // cos([0.9, 0.1, 0], [1, 0, 0])
        let expected = 0.9 / (0.82f32).sqrt();
        assert!((m.pos[[0, 0]] - expected).abs() < 1e-5);
        // best of 0.1/|..| and -1.0
        assert!(m.pos[[0, 1]] > 0.0 && m.pos[[0, 1]] < 0.2);
        assert!(m.neg[[0, 0]] > 0.9);
    }

    #[test]
    fn test_empty_pros_yield_zero_not_nan() {
        let store = store();
        let scorer = PhraseAlignmentScorer::new(&store, &AxisProvider);
        let prefs = PreferenceBundle::new(["good mpg", "roomy"], ["loud"]);

        let m = scorer.score(&candidates(), &prefs).unwrap();
        assert!(m.has_phrase_data[1]);
        assert_eq!(m.pos.row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(m.neg.row(1).to_vec(), vec![0.0]);
        assert!(m.pos.iter().chain(m.neg.iter()).all(|x| x.is_finite()));
    }

    #[test]
    fn test_missing_vehicle_is_zero_row() {
        let store = store();
        let scorer = PhraseAlignmentScorer::new(&store, &AxisProvider);
        let prefs = PreferenceBundle::new(["good mpg"], Vec::<String>::new());

        let m = scorer.score(&candidates(), &prefs).unwrap();
        assert!(!m.has_phrase_data[2]);
        assert_eq!(m.pos[[2, 0]], 0.0);
        assert_eq!(m.missing_phrase_data(), vec!["X1".to_string()]);
    }

    #[test]
    fn test_zero_preference_embedding_is_zero() {
        let store = store();
        let scorer = PhraseAlignmentScorer::new(&store, &AxisProvider);
        let prefs = PreferenceBundle::new(["something unknown"], Vec::<String>::new());

        let m = scorer.score(&candidates(), &prefs).unwrap();
        assert_eq!(m.pos[[0, 0]], 0.0);
    }

    #[test]
    fn test_no_phrases_skips_provider() {
        struct FailingProvider;
        impl EmbeddingProvider for FailingProvider {
            fn embed_batch(&self, _: &[String]) -> std::result::Result<Matrix, EmbeddingError> {
                Err(EmbeddingError::GenerationError("should not be called".to_string()))
            }
            fn dimension(&self) -> usize {
                3
            }
            fn model_name(&self) -> &str {
                "failing"
            }
        }

        let store = store();
        let scorer = PhraseAlignmentScorer::new(&store, &FailingProvider);
        let m = scorer.score(&candidates(), &PreferenceBundle::default()).unwrap();
        assert!(m.has_no_features());
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_dimension_mismatch_is_error() {
        let store = PhraseEmbeddingStore::new(4);
        let liked = Array2::<f32>::zeros((1, 3));
        let disliked = Array2::<f32>::zeros((0, 3));
        let result = align(
            &candidates(),
            &store,
            liked.view(),
            disliked.view(),
            AlignmentReducer::Max,
        );
        assert!(matches!(result, Err(EmbeddingError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_reducers() {
        let sims = ndarray::arr1(&[0.2f32, 0.9, 0.4, -0.3]);
        assert!((AlignmentReducer::Max.reduce(sims.view()) - 0.9).abs() < 1e-6);
        assert!((AlignmentReducer::Mean.reduce(sims.view()) - 0.3).abs() < 1e-6);
        assert!((AlignmentReducer::TopKMean(2).reduce(sims.view()) - 0.65).abs() < 1e-6);
        assert!((AlignmentReducer::TopKMean(10).reduce(sims.view()) - 0.3).abs() < 1e-6);

        let empty = ndarray::Array1::<f32>::zeros(0);
        assert_eq!(AlignmentReducer::Max.reduce(empty.view()), 0.0);
    }
}
