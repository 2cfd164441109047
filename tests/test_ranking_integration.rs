// End-to-end ranking through RankingEngine over a SQLite catalog
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use prefrank::catalog::Candidate;
use prefrank::embedding::{
    rows_to_matrix, EmbeddingError, EmbeddingProvider, Matrix, PhraseEmbeddingStore,
    PhraseStoreCell, VehicleKey, VehiclePhrases,
};
use prefrank::filtering::{Constraint, FilterSet, RelaxationPolicy, Tier};
use prefrank::ranking::{
    Degradation, DiversificationPolicy, EngineSettings, RankingEngine, RankingRequest,
    StrategyKind, StrategyMode,
};
use prefrank::scoring::{LexicalVectorCache, PreferenceBundle};
use prefrank::selection::CoverageRiskConfig;
use prefrank::storage::{Database, SqliteCandidateStore};

const DIM: usize = 4;

/// Looks phrases up in a fixed table; unknown phrases embed to zero
struct TableProvider {
    table: HashMap<&'static str, Vec<f32>>,
}

impl TableProvider {
    fn new() -> Self {
        let table = HashMap::from([
            ("good fuel economy", vec![1.0, 0.0, 0.0, 0.0]),
            ("lots of cargo room", vec![0.0, 1.0, 0.0, 0.0]),
            ("cramped trunk", vec![0.0, 0.0, 0.0, 1.0]),
        ]);
        Self { table }
    }
}

impl EmbeddingProvider for TableProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Matrix, EmbeddingError> {
        let rows = texts
            .iter()
            .map(|t| {
                self.table
                    .get(t.as_str())
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; DIM])
            })
            .collect();
        rows_to_matrix(rows, DIM)
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "table"
    }
}

fn vehicle_catalog() -> Vec<Candidate> {
    vec![
        Candidate::new("K1", "Kia", "Soul").with_year(2020).with_price(20000.0),
        Candidate::new("P1", "Toyota", "Prius")
            .with_year(2020)
            .with_price(25000.0)
            .with_body_style("Hatchback"),
        Candidate::new("O1", "Honda", "Odyssey")
            .with_year(2020)
            .with_price(35000.0)
            .with_body_style("Minivan"),
        Candidate::new("F1", "Ford", "F-150")
            .with_year(2020)
            .with_price(45000.0)
            .with_body_style("Truck"),
    ]
}

fn phrase(text: &str, v: [f32; DIM]) -> (String, Vec<f32>) {
    (text.to_string(), v.to_vec())
}

fn seed_phrases(db: &Database) {
    let mut store = PhraseEmbeddingStore::new(DIM);
    store
        .insert(
            VehicleKey::new("Toyota", "Prius", 2020),
            VehiclePhrases::from_rows(
                vec![phrase("excellent fuel economy", [1.0, 0.0, 0.0, 0.0])],
                vec![phrase("small trunk", [0.0, 0.0, 0.0, 1.0])],
                DIM,
            )
            .unwrap(),
        )
        .unwrap();
    store
        .insert(
            VehicleKey::new("Honda", "Odyssey", 2020),
            VehiclePhrases::from_rows(
                vec![phrase("huge cargo area", [0.0, 1.0, 0.0, 0.0])],
                vec![],
                DIM,
            )
            .unwrap(),
        )
        .unwrap();
    store
        .insert(
            VehicleKey::new("Ford", "F-150", 2020),
            VehiclePhrases::from_rows(
                vec![phrase("towing power", [0.0, 0.0, 1.0, 0.0])],
                vec![],
                DIM,
            )
            .unwrap(),
        )
        .unwrap();
    store.save(db).unwrap();
}

struct Fixture {
    _temp: TempDir,
    db: Arc<Database>,
}

fn fixture(catalog: &[Candidate], with_phrases: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    let db = Database::new(&temp.path().join("prefrank.db")).unwrap();
    db.upsert_candidates(catalog).unwrap();
    if with_phrases {
        seed_phrases(&db);
    }
    Fixture {
        _temp: temp,
        db: Arc::new(db),
    }
}

fn engine(fixture: &Fixture, settings: EngineSettings) -> RankingEngine {
    let store = SqliteCandidateStore::new(Arc::clone(&fixture.db));
    let phrases = PhraseEmbeddingStore::load(&fixture.db, DIM).unwrap();
    RankingEngine::new(
        Arc::new(store),
        phrases.into_shared(),
        Arc::new(TableProvider::new()),
        settings,
    )
    .with_lexical_cache(Arc::new(LexicalVectorCache::new(Arc::clone(&fixture.db))))
}

fn ids(response: &prefrank::ranking::RankingResponse) -> Vec<String> {
    response.results().iter().map(|r| r.id().to_string()).collect()
}

fn shopper() -> PreferenceBundle {
    PreferenceBundle::new(["good fuel economy", "lots of cargo room"], ["cramped trunk"])
}

#[test]
fn test_coverage_risk_end_to_end() {
    let fixture = fixture(&vehicle_catalog(), true);
    let engine = engine(&fixture, EngineSettings::default());

    let response = engine
        .rank(&RankingRequest::new(FilterSet::new(), shopper(), 2))
        .unwrap();

    assert_eq!(response.strategy, Some(StrategyKind::CoverageRisk));
    // Odyssey covers cargo with no risk; Prius adds fuel economy despite its trunk
    assert_eq!(ids(&response), vec!["O1", "P1"]);
    assert!((response.results()[0].score - 1.0).abs() < 1e-5);
    assert!((response.results()[1].score - 0.5).abs() < 1e-5);
    assert!(response.degradations.contains(&Degradation::MissingPhraseData {
        candidate_ids: vec!["K1".to_string()],
    }));
}

#[test]
fn test_pool_not_larger_than_k_keeps_store_order() {
    let fixture = fixture(&vehicle_catalog(), true);
    let engine = engine(&fixture, EngineSettings::default());

    let response = engine
        .rank(&RankingRequest::new(FilterSet::new(), shopper(), 10))
        .unwrap();

    // Price ascending from the store
    assert_eq!(ids(&response), vec!["K1", "P1", "O1", "F1"]);
    let ranks: Vec<usize> = response.results().iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
}

#[test]
fn test_high_risk_aversion_drops_risky_candidate() {
    let fixture = fixture(&vehicle_catalog(), true);
    let settings = EngineSettings {
        coverage: CoverageRiskConfig {
            risk_aversion: 1.0,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = engine(&fixture, settings);

    let response = engine
        .rank(&RankingRequest::new(FilterSet::new(), shopper(), 2))
        .unwrap();

    let picked = ids(&response);
    assert_eq!(picked[0], "O1");
    // Prius nets zero at lambda 1.0 and ties with K1 and F1; the smallest id wins
    assert_eq!(picked[1], "F1");
}

#[test]
fn test_relaxation_reported_with_results() {
    let fixture = fixture(&vehicle_catalog(), true);
    let engine = engine(&fixture, EngineSettings::default());
    let filters = FilterSet::new()
        .with(Constraint::parse("body_style", "Minivan", Tier::MustHave))
        .with(Constraint::parse("price", "-30000", Tier::Regular));

    let response = engine
        .rank(&RankingRequest::new(filters, shopper(), 3))
        .unwrap();

    assert_eq!(ids(&response), vec!["O1"]);
    assert_eq!(response.relaxation.relaxed_names(), vec!["price"]);
    assert!(!response.forced_relaxation());
    assert!(!response
        .degradations
        .iter()
        .any(|d| matches!(d, Degradation::ForcedRelaxation { .. })));
}

#[test]
fn test_exhausted_when_must_have_protected() {
    let fixture = fixture(&vehicle_catalog(), true);
    let settings = EngineSettings {
        relaxation: RelaxationPolicy {
            never_relax_must_have: true,
        },
        ..Default::default()
    };
    let engine = engine(&fixture, settings);
    let filters = FilterSet::new().with(Constraint::parse("make", "Tesla", Tier::MustHave));

    let response = engine
        .rank(&RankingRequest::new(filters, shopper(), 3))
        .unwrap();

    assert!(response.is_exhausted());
    assert!(response.results().is_empty());
    assert_eq!(response.relaxation.iterations(), 1);
}

#[test]
fn test_lexical_fallback_without_phrase_data() {
    let fixture = fixture(&vehicle_catalog(), false);
    let engine = engine(&fixture, EngineSettings::default());

    let response = engine
        .rank(&RankingRequest::new(FilterSet::new(), shopper(), 2))
        .unwrap();

    assert_eq!(response.strategy, Some(StrategyKind::Mmr));
    assert!(matches!(
        response.degradations.as_slice(),
        [Degradation::LexicalFallback { .. }]
    ));
    assert_eq!(response.results().len(), 2);

    // Vectors were written through the cache
    let cache = LexicalVectorCache::new(Arc::clone(&fixture.db));
    assert_eq!(cache.len().unwrap(), 4);
}

#[test]
fn test_mmr_spreads_make_and_model() {
    let catalog = vec![
        Candidate::new("T1", "Toyota", "Camry").with_price(24000.0).with_body_style("Sedan"),
        Candidate::new("T2", "Toyota", "Camry").with_price(25000.0).with_body_style("Sedan"),
        Candidate::new("T3", "Toyota", "Camry").with_price(26000.0).with_body_style("Sedan"),
        Candidate::new("H1", "Honda", "Accord").with_price(27000.0).with_body_style("Sedan"),
        Candidate::new("H2", "Honda", "Civic").with_price(22000.0).with_body_style("Sedan"),
    ];
    let fixture = fixture(&catalog, false);
    let settings = EngineSettings {
        mode: StrategyMode::Lexical,
        mmr_lambda: 0.0,
        ..Default::default()
    };
    let engine = engine(&fixture, settings);

    let response = engine
        .rank(&RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 3))
        .unwrap();

    let results = response.results();
    assert_eq!(results.len(), 3);
    for (i, a) in results.iter().enumerate() {
        for b in &results[i + 1..] {
            assert!(!a.candidate.same_make_model(&b.candidate));
        }
    }
    // Forced lexical mode records no fallback
    assert!(response.degradations.is_empty());
}

#[test]
fn test_clustered_policy_from_request() {
    let fixture = fixture(&vehicle_catalog(), false);
    let settings = EngineSettings {
        mode: StrategyMode::Lexical,
        ..Default::default()
    };
    let engine = engine(&fixture, settings);

    let request = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 4)
        .with_diversification(DiversificationPolicy::Clustered);
    let response = engine.rank(&request).unwrap();

    assert_eq!(response.strategy, Some(StrategyKind::ClusteredMmr));
    assert_eq!(response.results().len(), 4);
}

#[test]
fn test_deferred_phrase_store_shared_between_engines() {
    let fixture = fixture(&vehicle_catalog(), true);
    let cell = Arc::new(PhraseStoreCell::new());
    let build = |cell: &Arc<PhraseStoreCell>| {
        let db = Arc::clone(&fixture.db);
        RankingEngine::with_deferred_phrases(
            Arc::new(SqliteCandidateStore::new(Arc::clone(&fixture.db))),
            Arc::clone(cell),
            move || PhraseEmbeddingStore::load(&db, DIM),
            Arc::new(TableProvider::new()),
            EngineSettings::default(),
        )
    };

    let first = build(&cell);
    let no_phrases = RankingRequest::new(FilterSet::new(), PreferenceBundle::default(), 2);
    first.rank(&no_phrases).unwrap();
    assert!(cell.get().is_none());

    let response = first
        .rank(&RankingRequest::new(FilterSet::new(), shopper(), 2))
        .unwrap();
    assert_eq!(ids(&response), vec!["O1", "P1"]);
    let loaded = cell.get().unwrap();

    let second = build(&cell);
    second
        .rank(&RankingRequest::new(FilterSet::new(), shopper(), 2))
        .unwrap();
    assert!(Arc::ptr_eq(&loaded, &cell.get().unwrap()));
    assert_eq!(loaded.len(), 3);
}
