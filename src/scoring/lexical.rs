//! Sparse weighted token vectors for the lexical fallback ranker
//!
//! Candidates and requests are projected into the same token space: one token
//! per categorical attribute value, one per price/mileage/year bucket, and
//! keyword tokens from free text. Brand and model tokens carry the most weight,
//! colors the least.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::PreferenceBundle;
use crate::catalog::Candidate;
use crate::filtering::{Constraint, FilterSet, FilterValue};

const MAKE_WEIGHT: f32 = 3.0;
const MODEL_WEIGHT: f32 = 3.0;
const BODY_WEIGHT: f32 = 2.0;
const FUEL_WEIGHT: f32 = 2.0;
const DRIVETRAIN_WEIGHT: f32 = 1.5;
const PRICE_WEIGHT: f32 = 1.5;
const TRIM_WEIGHT: f32 = 1.0;
const TRANSMISSION_WEIGHT: f32 = 1.0;
const CONDITION_WEIGHT: f32 = 1.0;
const MILEAGE_WEIGHT: f32 = 1.0;
const YEAR_WEIGHT: f32 = 1.0;
const FEATURE_WEIGHT: f32 = 1.0;
const ATTRIBUTE_WEIGHT: f32 = 0.75;
const KEYWORD_WEIGHT: f32 = 0.5;
const COLOR_WEIGHT: f32 = 0.5;

/// Upper bounds (exclusive) of the price buckets; the last bucket is open
const PRICE_BUCKETS: &[(f64, &str)] = &[
    (15_000.0, "under_15k"),
    (25_000.0, "15k_25k"),
    (35_000.0, "25k_35k"),
    (50_000.0, "35k_50k"),
    (f64::INFINITY, "50k_plus"),
];

const MILEAGE_BUCKETS: &[(f64, &str)] = &[
    (30_000.0, "low"),
    (60_000.0, "medium"),
    (100_000.0, "high"),
    (f64::INFINITY, "very_high"),
];

/// Lower bounds (inclusive) of the model-year buckets, newest first
const YEAR_BUCKETS: &[(i32, &str)] = &[
    (2022, "2022_plus"),
    (2018, "2018_2021"),
    (2013, "2013_2017"),
    (i32::MIN, "older"),
];

const STOPWORDS: &[&str] = &[
    "and", "the", "for", "with", "very", "good", "great", "nice", "really", "not", "too", "lot",
    "lots", "has", "have", "that", "this", "but", "are", "was",
];

/// Sparse token -> weight vector, ordered by token for stable serialisation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseVector(BTreeMap<String, f32>);

impl SparseVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate `weight` onto `token`
    pub fn add(&mut self, token: impl Into<String>, weight: f32) {
        if weight == 0.0 || !weight.is_finite() {
            return;
        }
        *self.0.entry(token.into()).or_insert(0.0) += weight;
    }

    pub fn get(&self, token: &str) -> f32 {
        self.0.get(token).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn norm(&self) -> f32 {
        self.0.values().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Scale to unit length. Zero vectors stay zero.
    pub fn normalized(mut self) -> Self {
        let norm = self.norm();
        if norm > f32::EPSILON {
            for v in self.0.values_mut() {
                *v /= norm;
            }
        }
        self
    }

    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small
            .0
            .iter()
            .map(|(token, w)| w * large.get(token))
            .sum()
    }
}

fn bucket_f64(value: f64, buckets: &[(f64, &'static str)]) -> &'static str {
    buckets
        .iter()
        .find(|(upper, _)| value < *upper)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

fn buckets_in_range(
    min: Option<f64>,
    max: Option<f64>,
    buckets: &[(f64, &'static str)],
) -> Vec<&'static str> {
    let mut lower = 0.0;
    let mut names = Vec::new();
    for (upper, name) in buckets {
        let overlaps_min = min.map_or(true, |m| m < *upper);
        let overlaps_max = max.map_or(true, |m| m >= lower);
        if overlaps_min && overlaps_max {
            names.push(*name);
        }
        lower = *upper;
    }
    names
}

fn year_bucket(year: i32) -> &'static str {
    YEAR_BUCKETS
        .iter()
        .find(|(lower, _)| year >= *lower)
        .map(|(_, name)| *name)
        .unwrap_or("older")
}

fn year_buckets_in_range(min: Option<f64>, max: Option<f64>) -> Vec<&'static str> {
    let mut names = Vec::new();
    let mut upper = i32::MAX;
    for (lower, name) in YEAR_BUCKETS {
        let overlaps_min = min.map_or(true, |m| m <= upper as f64);
        let overlaps_max = max.map_or(true, |m| m >= *lower as f64);
        if overlaps_min && overlaps_max {
            names.push(*name);
        }
        upper = lower.saturating_sub(1);
    }
    names
}

fn normalize_token(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Words of at least three letters, lowercased, stopwords removed
fn keywords(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|w| w.trim_matches('-').to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
}

type PriorityTokens = &'static [(&'static str, f32)];

const FUEL_ECONOMY_TOKENS: PriorityTokens = &[
    ("fuel:hybrid", FUEL_WEIGHT),
    ("fuel:electric", FUEL_WEIGHT),
    ("fuel:plug-in hybrid", FUEL_WEIGHT),
    ("kw:mpg", KEYWORD_WEIGHT),
    ("kw:efficient", KEYWORD_WEIGHT),
];

const SPACE_TOKENS: PriorityTokens = &[
    ("body:suv", BODY_WEIGHT),
    ("body:minivan", BODY_WEIGHT),
    ("body:wagon", BODY_WEIGHT),
    ("body:truck", BODY_WEIGHT / 2.0),
    ("kw:roomy", KEYWORD_WEIGHT),
    ("kw:third-row", KEYWORD_WEIGHT),
];

const PERFORMANCE_TOKENS: PriorityTokens = &[
    ("drive:awd", DRIVETRAIN_WEIGHT),
    ("body:coupe", BODY_WEIGHT / 2.0),
    ("kw:sport", KEYWORD_WEIGHT),
    ("kw:turbo", KEYWORD_WEIGHT),
    ("kw:v8", KEYWORD_WEIGHT),
];

const BUDGET_TOKENS: PriorityTokens = &[
    ("price:under_15k", PRICE_WEIGHT),
    ("price:15k_25k", PRICE_WEIGHT),
];

const LOW_MILEAGE_TOKENS: PriorityTokens = &[("mileage:low", MILEAGE_WEIGHT * 2.0)];

const NEWER_TOKENS: PriorityTokens = &[
    ("year:2022_plus", YEAR_WEIGHT * 2.0),
    ("year:2018_2021", YEAR_WEIGHT),
];

const LUXURY_TOKENS: PriorityTokens = &[
    ("make:bmw", MAKE_WEIGHT / 2.0),
    ("make:mercedes-benz", MAKE_WEIGHT / 2.0),
    ("make:audi", MAKE_WEIGHT / 2.0),
    ("make:lexus", MAKE_WEIGHT / 2.0),
    ("make:acura", MAKE_WEIGHT / 2.0),
    ("make:genesis", MAKE_WEIGHT / 2.0),
    ("make:cadillac", MAKE_WEIGHT / 2.0),
    ("make:volvo", MAKE_WEIGHT / 2.0),
    ("price:50k_plus", PRICE_WEIGHT),
];

const OFF_ROAD_TOKENS: PriorityTokens = &[
    ("drive:4wd", DRIVETRAIN_WEIGHT),
    ("drive:awd", DRIVETRAIN_WEIGHT / 2.0),
    ("body:truck", BODY_WEIGHT),
    ("body:suv", BODY_WEIGHT / 2.0),
    ("kw:off-road", KEYWORD_WEIGHT),
];

/// Tokens implied by a scalar priority name; unknown names imply nothing
fn priority_tokens(name: &str) -> PriorityTokens {
    match name {
        "fuel_economy" => FUEL_ECONOMY_TOKENS,
        "space" => SPACE_TOKENS,
        "performance" => PERFORMANCE_TOKENS,
        "budget" => BUDGET_TOKENS,
        "low_mileage" => LOW_MILEAGE_TOKENS,
        "newer" => NEWER_TOKENS,
        "luxury" => LUXURY_TOKENS,
        "off_road" => OFF_ROAD_TOKENS,
        _ => &[],
    }
}

/// Projects candidates and requests into the shared token space
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalVectorizer;

impl LexicalVectorizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalised token vector for a catalog item
    pub fn candidate_vector(&self, candidate: &Candidate) -> SparseVector {
        let mut v = SparseVector::new();

        v.add(format!("make:{}", normalize_token(&candidate.make)), MAKE_WEIGHT);
        v.add(format!("model:{}", normalize_token(&candidate.model)), MODEL_WEIGHT);

        let categorical = [
            ("trim", &candidate.trim, TRIM_WEIGHT),
            ("body", &candidate.body_style, BODY_WEIGHT),
            ("fuel", &candidate.fuel_type, FUEL_WEIGHT),
            ("drive", &candidate.drivetrain, DRIVETRAIN_WEIGHT),
            ("trans", &candidate.transmission, TRANSMISSION_WEIGHT),
            ("condition", &candidate.condition, CONDITION_WEIGHT),
            ("color", &candidate.color, COLOR_WEIGHT),
        ];
        for (prefix, value, weight) in categorical {
            if let Some(value) = value.as_deref().filter(|s| !s.trim().is_empty()) {
                v.add(format!("{}:{}", prefix, normalize_token(value)), weight);
            }
        }

        if let Some(price) = candidate.price {
            v.add(format!("price:{}", bucket_f64(price, PRICE_BUCKETS)), PRICE_WEIGHT);
        }
        if let Some(mileage) = candidate.mileage {
            v.add(format!("mileage:{}", bucket_f64(mileage, MILEAGE_BUCKETS)), MILEAGE_WEIGHT);
        }
        if let Some(year) = candidate.year {
            v.add(format!("year:{}", year_bucket(year)), YEAR_WEIGHT);
        }

        for (key, value) in &candidate.attributes {
            match value {
                Value::Bool(true) => v.add(format!("feature:{}", key.to_lowercase()), FEATURE_WEIGHT),
                Value::String(s) if !s.trim().is_empty() => {
                    v.add(format!("{}:{}", key.to_lowercase(), normalize_token(s)), ATTRIBUTE_WEIGHT)
                }
                _ => {}
            }
        }

        // Free-text keywords so liked/disliked phrases can match listing text
        let mut text = vec![candidate.make.as_str(), candidate.model.as_str()];
        text.extend(
            [&candidate.trim, &candidate.body_style, &candidate.fuel_type, &candidate.drivetrain]
                .into_iter()
                .filter_map(|f| f.as_deref()),
        );
        let feature_keys: Vec<String> = candidate
            .attributes
            .iter()
            .filter(|(_, v)| matches!(v, Value::Bool(true)))
            .map(|(k, _)| k.replace('_', " "))
            .collect();
        for word in text
            .into_iter()
            .flat_map(keywords)
            .chain(feature_keys.iter().flat_map(|k| keywords(k)))
        {
            let token = format!("kw:{}", word);
            if v.get(&token) == 0.0 {
                v.add(token, KEYWORD_WEIGHT);
            }
        }

        v.normalized()
    }

    /// Normalised token vector for the request: active filters, priorities and
    /// liked (positive) / disliked (negative) phrase keywords
    pub fn request_vector(&self, filters: &FilterSet, prefs: &PreferenceBundle) -> SparseVector {
        let mut v = SparseVector::new();

        for constraint in filters {
            self.add_constraint(&mut v, constraint);
        }

        for (name, weight) in &prefs.priorities {
            for (token, token_weight) in priority_tokens(name) {
                v.add(*token, token_weight * weight);
            }
        }

        for phrase in &prefs.liked_features {
            for word in keywords(phrase) {
                v.add(format!("kw:{}", word), KEYWORD_WEIGHT);
            }
        }
        for phrase in &prefs.disliked_features {
            for word in keywords(phrase) {
                v.add(format!("kw:{}", word), -KEYWORD_WEIGHT);
            }
        }

        v.normalized()
    }

    fn add_constraint(&self, v: &mut SparseVector, constraint: &Constraint) {
        let (prefix, weight) = match constraint.name.as_str() {
            "make" | "brand" => ("make", MAKE_WEIGHT),
            "model" => ("model", MODEL_WEIGHT),
            "trim" => ("trim", TRIM_WEIGHT),
            "body_style" | "body_type" => ("body", BODY_WEIGHT),
            "fuel_type" | "fuel" => ("fuel", FUEL_WEIGHT),
            "drivetrain" => ("drive", DRIVETRAIN_WEIGHT),
            "transmission" => ("trans", TRANSMISSION_WEIGHT),
            "condition" => ("condition", CONDITION_WEIGHT),
            "color" | "exterior_color" => ("color", COLOR_WEIGHT),
            "price" => {
                for bucket in self.range_buckets(&constraint.value, PRICE_BUCKETS) {
                    v.add(format!("price:{}", bucket), PRICE_WEIGHT);
                }
                return;
            }
            "mileage" | "odometer" | "usage" => {
                for bucket in self.range_buckets(&constraint.value, MILEAGE_BUCKETS) {
                    v.add(format!("mileage:{}", bucket), MILEAGE_WEIGHT);
                }
                return;
            }
            "year" => {
                let (min, max) = match &constraint.value {
                    FilterValue::Range { min, max } => (*min, *max),
                    other => {
                        let exact = other.members().first().and_then(|s| s.parse::<f64>().ok());
                        (exact, exact)
                    }
                };
                if min.is_some() || max.is_some() {
                    for bucket in year_buckets_in_range(min, max) {
                        v.add(format!("year:{}", bucket), YEAR_WEIGHT);
                    }
                }
                return;
            }
            other => {
                // Catalog-specific attribute
                for member in constraint.value.members() {
                    match member.to_lowercase().as_str() {
                        "true" | "yes" => v.add(format!("feature:{}", other), FEATURE_WEIGHT),
                        value => v.add(format!("{}:{}", other, value), ATTRIBUTE_WEIGHT),
                    }
                }
                return;
            }
        };

        for member in constraint.value.members() {
            v.add(format!("{}:{}", prefix, normalize_token(member)), weight);
        }
    }

    fn range_buckets(&self, value: &FilterValue, buckets: &[(f64, &'static str)]) -> Vec<&'static str> {
        match value {
            FilterValue::Range { min, max } => buckets_in_range(*min, *max, buckets),
            other => other
                .members()
                .first()
                .and_then(|s| s.parse::<f64>().ok())
                .map(|x| vec![bucket_f64(x, buckets)])
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::Tier;

    fn camry() -> Candidate {
        Candidate::new("C1", "Toyota", "Camry")
            .with_year(2021)
            .with_price(24_500.0)
            .with_mileage(18_000.0)
            .with_body_style("Sedan")
            .with_fuel_type("Hybrid")
            .with_color("Blue")
            .with_attribute("sunroof", true)
    }

    #[test]
    fn test_candidate_tokens() {
        let v = LexicalVectorizer::new().candidate_vector(&camry());
        assert!(v.get("make:toyota") > 0.0);
        assert!(v.get("model:camry") > 0.0);
        assert!(v.get("price:15k_25k") > 0.0);
        assert!(v.get("mileage:low") > 0.0);
        assert!(v.get("year:2018_2021") > 0.0);
        assert!(v.get("feature:sunroof") > 0.0);
        assert!(v.get("kw:hybrid") > 0.0);
        assert!((v.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_brand_outweighs_color() {
        let v = LexicalVectorizer::new().candidate_vector(&camry());
        assert!(v.get("make:toyota") > v.get("color:blue"));
        assert!(v.get("model:camry") > v.get("color:blue"));
    }

    #[test]
    fn test_price_range_buckets() {
        assert_eq!(
            buckets_in_range(Some(20_000.0), Some(30_000.0), PRICE_BUCKETS),
            vec!["15k_25k", "25k_35k"]
        );
        assert_eq!(
            buckets_in_range(None, Some(10_000.0), PRICE_BUCKETS),
            vec!["under_15k"]
        );
        assert_eq!(
            buckets_in_range(Some(60_000.0), None, PRICE_BUCKETS),
            vec!["50k_plus"]
        );
        assert_eq!(year_buckets_in_range(Some(2019.0), None), vec!["2022_plus", "2018_2021"]);
    }

    #[test]
    fn test_request_vector_from_filters_and_prefs() {
        let filters = FilterSet::new()
            .with(Constraint::parse("make", "Toyota,Honda", Tier::Regular))
            .with(Constraint::parse("price", "15000-25000", Tier::Regular));
        let prefs = PreferenceBundle::new(["hybrid"], ["manual transmission"])
            .with_priority("low_mileage", 1.0);

        let v = LexicalVectorizer::new().request_vector(&filters, &prefs);
        assert!(v.get("make:toyota") > 0.0);
        assert!(v.get("make:honda") > 0.0);
        assert!(v.get("price:15k_25k") > 0.0);
        assert!(v.get("mileage:low") > 0.0);
        assert!(v.get("kw:hybrid") > 0.0);
        assert!(v.get("kw:manual") < 0.0);
    }

    #[test]
    fn test_matching_candidate_scores_higher() {
        let vectorizer = LexicalVectorizer::new();
        let filters = FilterSet::new().with(Constraint::parse("make", "Toyota", Tier::Regular));
        let prefs = PreferenceBundle::new(["hybrid"], Vec::<String>::new());
        let request = vectorizer.request_vector(&filters, &prefs);

        let honda = Candidate::new("H1", "Honda", "Civic").with_fuel_type("Gasoline");
        let camry_score = vectorizer.candidate_vector(&camry()).dot(&request);
        let civic_score = vectorizer.candidate_vector(&honda).dot(&request);
        assert!(camry_score > civic_score);
        assert!(camry_score <= 1.0 + 1e-5);
    }

    #[test]
    fn test_empty_vectors_dot_to_zero() {
        let empty = SparseVector::new().normalized();
        let v = LexicalVectorizer::new().candidate_vector(&camry());
        assert_eq!(empty.dot(&v), 0.0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_sparse_vector_serializes_as_map() {
        let mut v = SparseVector::new();
        v.add("make:toyota", 1.0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"make:toyota":1.0}"#);
        let back: SparseVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
