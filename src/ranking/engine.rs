//! Request-level ranking: relaxation, strategy choice and degradation reporting

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::strategies::{
    ClusteredMmrRanker, CoverageRiskRanker, LexicalRanker, MmrRanker, RankingStrategy,
    StrategyKind,
};
use super::{Degradation, DiversificationPolicy, RankedResult, Ranker};
use crate::catalog::{Candidate, GeoFilter};
use crate::config::Config;
use crate::embedding::{
    EmbeddingError, EmbeddingProvider, PhraseEmbeddingStore, PhraseStoreCell, SharedPhraseStore,
};
use crate::error::{PrefrankError, Result};
use crate::filtering::{
    FilterSet, RelaxationController, RelaxationOutcome, RelaxationPolicy, RelaxationReport,
};
use crate::scoring::{AlignmentReducer, LexicalVectorCache, PreferenceBundle};
use crate::selection::{
    Aggregation, ClusteredMmrSelector, CoverageRiskConfig, CoverageRiskSelector, MmrSelector,
};
use crate::storage::{CandidateStore, OrderSpec};

/// Which family of strategies the engine may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// Coverage-risk when phrase data exists, lexical otherwise
    #[default]
    Auto,
    CoverageRisk,
    Lexical,
}

impl FromStr for StrategyMode {
    type Err = PrefrankError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "coverage_risk" => Ok(Self::CoverageRisk),
            "lexical" => Ok(Self::Lexical),
            other => Err(PrefrankError::InvalidConfigValue {
                path: "ranking.strategy".to_string(),
                message: format!("Unknown strategy '{}'", other),
            }),
        }
    }
}

fn parse_aggregation(s: &str) -> Result<Aggregation> {
    match s.trim().to_ascii_lowercase().as_str() {
        "max" => Ok(Aggregation::Max),
        "sum" => Ok(Aggregation::Sum),
        other => Err(PrefrankError::InvalidConfigValue {
            path: "selection.aggregation".to_string(),
            message: format!("Unknown aggregation '{}'", other),
        }),
    }
}

fn parse_reducer(s: &str, top_k: usize) -> Result<AlignmentReducer> {
    match s.trim().to_ascii_lowercase().as_str() {
        "max" => Ok(AlignmentReducer::Max),
        "mean" => Ok(AlignmentReducer::Mean),
        "top_k_mean" => Ok(AlignmentReducer::TopKMean(top_k)),
        other => Err(PrefrankError::InvalidConfigValue {
            path: "selection.alignment".to_string(),
            message: format!("Unknown alignment reducer '{}'", other),
        }),
    }
}

/// Engine tunables, resolved from [`Config`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub candidate_pool_size: u32,
    pub order: OrderSpec,
    pub default_radius_miles: f64,
    pub relaxation: RelaxationPolicy,
    pub coverage: CoverageRiskConfig,
    pub reducer: AlignmentReducer,
    pub mmr_lambda: f32,
    pub cluster_size: usize,
    pub diversification: DiversificationPolicy,
    pub mode: StrategyMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            candidate_pool_size: 200,
            order: OrderSpec::default(),
            default_radius_miles: 50.0,
            relaxation: RelaxationPolicy::default(),
            coverage: CoverageRiskConfig::default(),
            reducer: AlignmentReducer::default(),
            mmr_lambda: 0.7,
            cluster_size: 3,
            diversification: DiversificationPolicy::default(),
            mode: StrategyMode::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            candidate_pool_size: config.search.candidate_pool_size,
            order: config.search.default_sort.parse()?,
            default_radius_miles: config.search.default_radius_miles,
            relaxation: RelaxationPolicy {
                never_relax_must_have: config.relaxation.never_relax_must_have,
            },
            coverage: CoverageRiskConfig {
                min_similarity: config.selection.min_similarity,
                risk_aversion: config.selection.risk_aversion,
                aggregation: parse_aggregation(&config.selection.aggregation)?,
            },
            reducer: parse_reducer(
                &config.selection.alignment,
                config.selection.alignment_top_k,
            )?,
            mmr_lambda: config.diversity.mmr_lambda,
            cluster_size: config.diversity.cluster_size,
            diversification: config.diversity.policy.parse()?,
            mode: config.ranking.strategy.parse()?,
        })
    }
}

/// Buyer location for radius filtering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchLocation {
    pub lat: f64,
    pub lon: f64,
    /// Defaults to the engine's configured radius
    #[serde(default)]
    pub radius_miles: Option<f64>,
}

fn default_k() -> usize {
    10
}

/// One ranking request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingRequest {
    #[serde(default)]
    pub filters: FilterSet,
    #[serde(default)]
    pub preferences: PreferenceBundle,
    #[serde(default = "default_k")]
    pub k: usize,
    /// Overrides the configured diversification policy
    #[serde(default)]
    pub diversification: Option<DiversificationPolicy>,
    #[serde(default)]
    pub location: Option<SearchLocation>,
    /// Overrides the configured store ordering
    #[serde(default)]
    pub order: Option<OrderSpec>,
}

impl RankingRequest {
    pub fn new(filters: FilterSet, preferences: PreferenceBundle, k: usize) -> Self {
        Self {
            filters,
            preferences,
            k,
            diversification: None,
            location: None,
            order: None,
        }
    }

    pub fn with_diversification(mut self, policy: DiversificationPolicy) -> Self {
        self.diversification = Some(policy);
        self
    }

    pub fn with_location(mut self, location: SearchLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Ranked list or the terminal no-match state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RankingOutcome {
    Ranked { results: Vec<RankedResult> },
    /// No candidates after every permitted relaxation
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingResponse {
    pub request_id: Uuid,
    pub outcome: RankingOutcome,
    pub relaxation: RelaxationReport,
    /// Strategy that produced the results; absent when exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}

impl RankingResponse {
    pub fn results(&self) -> &[RankedResult] {
        match &self.outcome {
            RankingOutcome::Ranked { results } => results,
            RankingOutcome::Exhausted => &[],
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.outcome, RankingOutcome::Exhausted)
    }

    pub fn forced_relaxation(&self) -> bool {
        self.relaxation.forced_relaxation()
    }
}

type PhraseLoader = dyn Fn() -> Result<PhraseEmbeddingStore> + Send + Sync;

/// Where the engine gets review phrases from
enum PhraseSource {
    Ready(SharedPhraseStore),
    /// Loaded through the cell the first time a request needs phrase data
    Deferred {
        cell: Arc<PhraseStoreCell>,
        loader: Box<PhraseLoader>,
    },
}

impl PhraseSource {
    fn get(&self) -> Result<SharedPhraseStore> {
        match self {
            Self::Ready(store) => Ok(Arc::clone(store)),
            Self::Deferred { cell, loader } => cell.get_or_try_init(|| loader()),
        }
    }
}

/// Ranks candidates for a buyer end to end
pub struct RankingEngine {
    store: Arc<dyn CandidateStore>,
    phrases: PhraseSource,
    provider: Arc<dyn EmbeddingProvider>,
    lexical_cache: Option<Arc<LexicalVectorCache>>,
    settings: EngineSettings,
}

impl RankingEngine {
    pub fn new(
        store: Arc<dyn CandidateStore>,
        phrases: SharedPhraseStore,
        provider: Arc<dyn EmbeddingProvider>,
        settings: EngineSettings,
    ) -> Self {
        if provider.dimension() != phrases.dimension() {
            warn!(
                provider = provider.model_name(),
                provider_dimension = provider.dimension(),
                phrase_dimension = phrases.dimension(),
                "Embedding provider and phrase store dimensions differ"
            );
        }
        Self {
            store,
            phrases: PhraseSource::Ready(phrases),
            provider,
            lexical_cache: None,
            settings,
        }
    }

    /// Engine whose phrase store is loaded by `loader` on the first request
    /// that can use coverage-risk ranking.
    ///
    /// Engines sharing `cell` share one store; lexical-only requests never
    /// trigger the load.
    pub fn with_deferred_phrases<F>(
        store: Arc<dyn CandidateStore>,
        cell: Arc<PhraseStoreCell>,
        loader: F,
        provider: Arc<dyn EmbeddingProvider>,
        settings: EngineSettings,
    ) -> Self
    where
        F: Fn() -> Result<PhraseEmbeddingStore> + Send + Sync + 'static,
    {
        Self {
            store,
            phrases: PhraseSource::Deferred {
                cell,
                loader: Box::new(loader),
            },
            provider,
            lexical_cache: None,
            settings,
        }
    }

    pub fn with_lexical_cache(mut self, cache: Arc<LexicalVectorCache>) -> Self {
        self.lexical_cache = Some(cache);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Rank the catalog for one request.
    ///
    /// Store and embedding failures abort the request. Missing phrase data,
    /// empty preferences and forced relaxation are reported as degradations.
    pub fn rank(&self, request: &RankingRequest) -> Result<RankingResponse> {
        let request_id = Uuid::new_v4();
        if request.k == 0 {
            return Err(PrefrankError::InvalidRequest(
                "k must be at least 1".to_string(),
            ));
        }
        let geo = self.geo_filter(request.location)?;
        let prefs = request.preferences.normalized();

        info!(
            request_id = %request_id,
            filters = request.filters.len(),
            liked = prefs.liked_features.len(),
            disliked = prefs.disliked_features.len(),
            k = request.k,
            "Ranking request"
        );

        let outcome = RelaxationController::new(self.store.as_ref(), self.settings.relaxation)
            .limit(self.settings.candidate_pool_size)
            .order(request.order.unwrap_or(self.settings.order))
            .geo(geo)
            .run(&request.filters)?;

        let mut degradations: Vec<Degradation> = outcome
            .report()
            .filters_relaxed
            .iter()
            .filter(|r| r.forced)
            .map(|r| Degradation::ForcedRelaxation {
                filter: r.constraint.to_string(),
            })
            .collect();

        let (candidates, report) = match outcome {
            RelaxationOutcome::Found { candidates, report } => (candidates, report),
            RelaxationOutcome::Exhausted { report } => {
                info!(request_id = %request_id, iterations = report.iterations(), "No candidates after relaxation");
                return Ok(RankingResponse {
                    request_id,
                    outcome: RankingOutcome::Exhausted,
                    relaxation: report,
                    strategy: None,
                    degradations,
                });
            }
        };

        let strategy = self.choose_strategy(request, &prefs, &candidates, &mut degradations)?;
        let kind = strategy.kind();
        debug!(request_id = %request_id, strategy = ?kind, pool = candidates.len(), "Strategy selected");

        if kind == StrategyKind::CoverageRisk && prefs.has_phrases() {
            let phrases = self.phrases.get()?;
            let missing: Vec<String> = candidates
                .iter()
                .filter(|c| phrases.lookup(c).is_none())
                .map(|c| c.id.clone())
                .collect();
            if !missing.is_empty() {
                debug!(request_id = %request_id, missing = missing.len(), "Candidates without phrase data");
                degradations.push(Degradation::MissingPhraseData {
                    candidate_ids: missing,
                });
            }
        }

        let results = strategy.rank(&candidates, &prefs, request.k)?;
        info!(
            request_id = %request_id,
            strategy = ?kind,
            results = results.len(),
            degradations = degradations.len(),
            "Ranking complete"
        );

        Ok(RankingResponse {
            request_id,
            outcome: RankingOutcome::Ranked { results },
            relaxation: report,
            strategy: Some(kind),
            degradations,
        })
    }

    fn geo_filter(&self, location: Option<SearchLocation>) -> Result<Option<GeoFilter>> {
        let Some(location) = location else {
            return Ok(None);
        };
        let radius = location
            .radius_miles
            .unwrap_or(self.settings.default_radius_miles);
        if !(-90.0..=90.0).contains(&location.lat) || !(-180.0..=180.0).contains(&location.lon) {
            return Err(PrefrankError::InvalidRequest(format!(
                "location ({}, {}) is out of range",
                location.lat, location.lon
            )));
        }
        if !radius.is_finite() || radius <= 0.0 {
            return Err(PrefrankError::InvalidRequest(format!(
                "radius must be positive, got {}",
                radius
            )));
        }
        Ok(Some(GeoFilter::new(location.lat, location.lon, radius)))
    }

    fn choose_strategy(
        &self,
        request: &RankingRequest,
        prefs: &PreferenceBundle,
        candidates: &[Candidate],
        degradations: &mut Vec<Degradation>,
    ) -> Result<RankingStrategy> {
        match self.settings.mode {
            StrategyMode::CoverageRisk => {
                if !prefs.has_phrases() {
                    degradations.push(Degradation::EmptyPreferenceSet);
                }
                self.coverage_risk()
            }
            StrategyMode::Lexical => Ok(self.lexical(request)),
            StrategyMode::Auto => {
                let has_data = prefs.has_phrases() && {
                    let phrases = self.phrases.get()?;
                    candidates.iter().any(|c| phrases.lookup(c).is_some())
                };
                if has_data {
                    return self.coverage_risk();
                }
                if !prefs.has_phrases() {
                    degradations.push(Degradation::EmptyPreferenceSet);
                    degradations.push(Degradation::LexicalFallback {
                        reason: "no liked or disliked phrases".to_string(),
                    });
                } else {
                    degradations.push(Degradation::LexicalFallback {
                        reason: "no review phrase data for any candidate".to_string(),
                    });
                }
                Ok(self.lexical(request))
            }
        }
    }

    fn coverage_risk(&self) -> Result<RankingStrategy> {
        let phrases = self.phrases.get()?;
        if self.provider.dimension() != phrases.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: phrases.dimension(),
                actual: self.provider.dimension(),
            }
            .into());
        }
        let ranker = CoverageRiskRanker::new(
            phrases,
            Arc::clone(&self.provider),
            CoverageRiskSelector::new(self.settings.coverage),
        )
        .with_reducer(self.settings.reducer);
        Ok(RankingStrategy::CoverageRisk(ranker))
    }

    fn lexical(&self, request: &RankingRequest) -> RankingStrategy {
        let lexical =
            LexicalRanker::new(request.filters.clone()).with_cache(self.lexical_cache.clone());
        match request
            .diversification
            .unwrap_or(self.settings.diversification)
        {
            DiversificationPolicy::None => RankingStrategy::Lexical(lexical),
            DiversificationPolicy::Mmr => RankingStrategy::Mmr(MmrRanker::new(
                lexical,
                MmrSelector::new(self.settings.mmr_lambda),
            )),
            DiversificationPolicy::Clustered => RankingStrategy::ClusteredMmr(
                ClusteredMmrRanker::new(
                    lexical,
                    ClusteredMmrSelector::new(self.settings.mmr_lambda, self.settings.cluster_size),
                ),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{rows_to_matrix, Matrix, VehicleKey, VehiclePhrases};
    use crate::error::StoreError;
    use crate::filtering::{Constraint, Tier};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Matches scalar and set constraints on make and model; other constraints
    /// match nothing.
    struct MemoryStore {
        rows: Vec<Candidate>,
    }

    impl CandidateStore for MemoryStore {
        fn search(
            &self,
            filters: &FilterSet,
            limit: u32,
            _order: &OrderSpec,
            _geo: Option<GeoFilter>,
        ) -> std::result::Result<Vec<Candidate>, StoreError> {
            let matches = |c: &Candidate| {
                filters.iter().all(|constraint| {
                    let field = match constraint.name.as_str() {
                        "make" => &c.make,
                        "model" => &c.model,
                        _ => return false,
                    };
                    constraint
                        .value
                        .members()
                        .iter()
                        .any(|m| m.eq_ignore_ascii_case(field))
                })
            };
            Ok(self
                .rows
                .iter()
                .filter(|c| matches(c))
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    struct FailingStore;

    impl CandidateStore for FailingStore {
        fn search(
            &self,
            _filters: &FilterSet,
            _limit: u32,
            _order: &OrderSpec,
            _geo: Option<GeoFilter>,
        ) -> std::result::Result<Vec<Candidate>, StoreError> {
            Err(StoreError::Pool("connection refused".to_string()))
        }
    }

    struct AxisProvider;

    impl EmbeddingProvider for AxisProvider {
        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Matrix, EmbeddingError> {
            let rows = texts
                .iter()
                .map(|t| match t.as_str() {
                    "fuel economy" => vec![1.0, 0.0],
                    "cargo space" => vec![0.0, 1.0],
                    _ => vec![0.0, 0.0],
                })
                .collect();
            rows_to_matrix(rows, 2)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn catalog() -> Vec<Candidate> {
        vec![
            Candidate::new("C1", "Toyota", "Camry").with_year(2020),
            Candidate::new("P1", "Toyota", "Prius").with_year(2020),
            Candidate::new("O1", "Honda", "Odyssey").with_year(2020),
        ]
    }

    fn phrase_store(with_data: bool) -> PhraseEmbeddingStore {
        let mut store = PhraseEmbeddingStore::new(2);
        if with_data {
            store
                .insert(
                    VehicleKey::new("Toyota", "Prius", 2020),
                    VehiclePhrases::from_rows(vec![("great mpg".to_string(), vec![1.0, 0.0])], vec![], 2)
                        .unwrap(),
                )
                .unwrap();
        }
        store
    }

    fn phrases(with_data: bool) -> SharedPhraseStore {
        phrase_store(with_data).into_shared()
    }

    fn engine(store: Arc<dyn CandidateStore>, with_data: bool, settings: EngineSettings) -> RankingEngine {
        RankingEngine::new(store, phrases(with_data), Arc::new(AxisProvider), settings)
    }

    fn memory() -> Arc<dyn CandidateStore> {
        Arc::new(MemoryStore { rows: catalog() })
    }

    #[test]
    fn test_coverage_risk_used_when_phrase_data_exists() {
        let engine = engine(memory(), true, EngineSettings::default());
        let request = RankingRequest::new(
            FilterSet::new(),
            PreferenceBundle::new(["fuel economy"], Vec::<String>::new()),
            1,
        );

        let response = engine.rank(&request).unwrap();
        assert_eq!(response.strategy, Some(StrategyKind::CoverageRisk));
        assert_eq!(response.results()[0].id(), "P1");
        assert!(response.degradations.contains(&Degradation::MissingPhraseData {
            candidate_ids: vec!["C1".to_string(), "O1".to_string()],
        }));
    }

    #[test]
    fn test_auto_falls_back_to_lexical_without_phrase_data() {
        let engine = engine(memory(), false, EngineSettings::default());
        let request = RankingRequest::new(
            FilterSet::new(),
            PreferenceBundle::new(["fuel economy"], Vec::<String>::new()),
            2,
        );

        let response = engine.rank(&request).unwrap();
        assert_eq!(response.strategy, Some(StrategyKind::Mmr));
        assert!(matches!(
            response.degradations.as_slice(),
            [Degradation::LexicalFallback { .. }]
        ));
        assert_eq!(response.results().len(), 2);
    }

    fn deferred_engine(loads: Arc<AtomicUsize>, settings: EngineSettings) -> RankingEngine {
        RankingEngine::with_deferred_phrases(
            memory(),
            Arc::new(PhraseStoreCell::new()),
            move || {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(phrase_store(true))
            },
            Arc::new(AxisProvider),
            settings,
        )
    }

    fn fuel_request() -> RankingRequest {
        RankingRequest::new(
            FilterSet::new(),
            PreferenceBundle::new(["fuel economy"], Vec::<String>::new()),
            1,
        )
    }

    #[test]
    fn test_deferred_phrases_loaded_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let engine = deferred_engine(Arc::clone(&loads), EngineSettings::default());

        for _ in 0..3 {
            let response = engine.rank(&fuel_request()).unwrap();
            assert_eq!(response.strategy, Some(StrategyKind::CoverageRisk));
            assert_eq!(response.results()[0].id(), "P1");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deferred_phrases_untouched_by_lexical_requests() {
        let loads = Arc::new(AtomicUsize::new(0));
        let lexical = EngineSettings {
            mode: StrategyMode::Lexical,
            ..Default::default()
        };
        let engine = deferred_engine(Arc::clone(&loads), lexical);
        engine.rank(&fuel_request()).unwrap();

        // Auto mode without phrases never needs review data either
        let engine = deferred_engine(Arc::clone(&loads), EngineSettings::default());
        let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 2);
        engine.rank(&request).unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deferred_phrase_load_failure_propagates() {
        let engine = RankingEngine::with_deferred_phrases(
            memory(),
            Arc::new(PhraseStoreCell::new()),
            || Err(PrefrankError::Config("phrase table missing".to_string())),
            Arc::new(AxisProvider),
            EngineSettings::default(),
        );
        assert!(matches!(
            engine.rank(&fuel_request()),
            Err(PrefrankError::Config(_))
        ));
    }

    #[test]
    fn test_empty_preferences_recorded() {
        let engine = engine(memory(), true, EngineSettings::default());
        let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 2)
            .with_diversification(DiversificationPolicy::None);

        let response = engine.rank(&request).unwrap();
        assert_eq!(response.strategy, Some(StrategyKind::Lexical));
        assert!(response.degradations.contains(&Degradation::EmptyPreferenceSet));
    }

    #[test]
    fn test_forced_relaxation_degradation() {
        let engine = engine(memory(), true, EngineSettings::default());
        let filters = FilterSet::new().with(Constraint::parse("make", "Tesla", Tier::MustHave));
        let request = RankingRequest::new(filters, PreferenceBundle::default(), 3);

        let response = engine.rank(&request).unwrap();
        assert!(response.forced_relaxation());
        assert_eq!(
            response.degradations[0],
            Degradation::ForcedRelaxation {
                filter: "make=Tesla".to_string()
            }
        );
        assert_eq!(response.results().len(), 3);
    }

    #[test]
    fn test_exhausted_is_not_an_error() {
        let settings = EngineSettings {
            relaxation: RelaxationPolicy {
                never_relax_must_have: true,
            },
            ..Default::default()
        };
        let engine = engine(memory(), true, settings);
        let filters = FilterSet::new().with(Constraint::parse("make", "Tesla", Tier::MustHave));
        let request = RankingRequest::new(filters, PreferenceBundle::default(), 3);

        let response = engine.rank(&request).unwrap();
        assert!(response.is_exhausted());
        assert!(response.results().is_empty());
        assert_eq!(response.strategy, None);
    }

    #[test]
    fn test_store_error_propagates() {
        let engine = engine(Arc::new(FailingStore), true, EngineSettings::default());
        let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 3);
        assert!(matches!(engine.rank(&request), Err(PrefrankError::Store(_))));
    }

    #[test]
    fn test_zero_k_rejected() {
        let engine = engine(memory(), true, EngineSettings::default());
        let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 0);
        assert!(matches!(
            engine.rank(&request),
            Err(PrefrankError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_invalid_location_rejected() {
        let engine = engine(memory(), true, EngineSettings::default());
        let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 3)
            .with_location(SearchLocation {
                lat: 120.0,
                lon: 0.0,
                radius_miles: None,
            });
        assert!(matches!(
            engine.rank(&request),
            Err(PrefrankError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = EngineSettings::from_config(&Config::default()).unwrap();
        assert_eq!(settings, EngineSettings::default());

        let mut config = Config::default();
        config.selection.aggregation = "sum".to_string();
        config.ranking.strategy = "lexical".to_string();
        let settings = EngineSettings::from_config(&config).unwrap();
        assert_eq!(settings.coverage.aggregation, Aggregation::Sum);
        assert_eq!(settings.mode, StrategyMode::Lexical);
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: RankingRequest = serde_json::from_str(
            r#"{"filters": [{"name": "make", "value": "Toyota", "tier": "must_have"}]}"#,
        )
        .unwrap();
        assert_eq!(request.k, 10);
        assert_eq!(request.filters.len(), 1);
        assert!(request.location.is_none());
    }

    #[test]
    fn test_response_serialization() {
        let engine = engine(memory(), true, EngineSettings::default());
        let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 1);
        let response = engine.rank(&request).unwrap();

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["outcome"]["status"], "ranked");
        assert_eq!(json["outcome"]["results"].as_array().unwrap().len(), 1);
        assert!(json["request_id"].is_string());
    }
}
