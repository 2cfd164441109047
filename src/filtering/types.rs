// Filter model shared by the candidate store and the relaxation controller
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{PrefrankError, Result};

/// Relaxation priority of a constraint.
///
/// Variant order is relaxation order: `Inferred` is dropped first, `MustHave` last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Guessed from context; relaxed first
    Inferred,
    /// Stated by the buyer
    Regular,
    /// Never relaxed unless nothing else works
    MustHave,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Regular
    }
}

/// Constraint value: scalar, set, or inclusive numeric range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFilterValue", into = "RawFilterValue")]
pub enum FilterValue {
    Scalar(String),
    Set(Vec<String>),
    Range { min: Option<f64>, max: Option<f64> },
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+(?:\.\d+)?)?\s*-\s*(\d+(?:\.\d+)?)?\s*$").expect("valid range regex")
    })
}

impl FilterValue {
    /// Parse the textual filter grammar.
    ///
    /// `"Toyota"` is a scalar, `"Toyota,Honda"` a set, `"15000-30000"`, `"-30000"` and
    /// `"2018-"` are inclusive ranges. Hyphenated names such as `"Mercedes-Benz"` stay scalars.
    pub fn parse(raw: &str) -> Self {
        if let Some(caps) = range_pattern().captures(raw) {
            let min = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let max = caps.get(2).and_then(|m| m.as_str().parse().ok());
            if min.is_some() || max.is_some() {
                return FilterValue::Range { min, max };
            }
        }

        if raw.contains(',') {
            let items: Vec<String> = raw
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            if items.len() == 1 {
                return FilterValue::Scalar(items[0].clone());
            }
            return FilterValue::Set(items);
        }

        FilterValue::Scalar(raw.trim().to_string())
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        FilterValue::Range { min, max }
    }

    /// Scalar and set members, empty for ranges
    pub fn members(&self) -> Vec<&str> {
        match self {
            FilterValue::Scalar(s) => vec![s.as_str()],
            FilterValue::Set(items) => items.iter().map(|s| s.as_str()).collect(),
            FilterValue::Range { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Scalar(s) => write!(f, "{}", s),
            FilterValue::Set(items) => write!(f, "{}", items.join(",")),
            FilterValue::Range { min, max } => {
                if let Some(min) = min {
                    write!(f, "{}", min)?;
                }
                write!(f, "-")?;
                if let Some(max) = max {
                    write!(f, "{}", max)?;
                }
                Ok(())
            }
        }
    }
}

/// Wire form of [`FilterValue`]: strings go through [`FilterValue::parse`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawFilterValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Range { min: Option<f64>, max: Option<f64> },
}

impl From<RawFilterValue> for FilterValue {
    fn from(raw: RawFilterValue) -> Self {
        match raw {
            RawFilterValue::Number(n) => FilterValue::Scalar(n.to_string()),
            RawFilterValue::Text(s) => FilterValue::parse(&s),
            RawFilterValue::List(items) => FilterValue::Set(items),
            RawFilterValue::Range { min, max } => FilterValue::Range { min, max },
        }
    }
}

impl From<FilterValue> for RawFilterValue {
    fn from(value: FilterValue) -> Self {
        match value {
            FilterValue::Scalar(s) => RawFilterValue::Text(s),
            FilterValue::Set(items) => RawFilterValue::List(items),
            FilterValue::Range { min, max } => RawFilterValue::Range { min, max },
        }
    }
}

/// A named constraint with its relaxation tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub value: FilterValue,
    #[serde(default)]
    pub tier: Tier,
    /// Caller-specified importance within a tier; lower values are relaxed first
    #[serde(default)]
    pub importance: i32,
}

impl Constraint {
    pub fn new(name: impl Into<String>, value: FilterValue, tier: Tier) -> Self {
        Self {
            name: normalize_name(&name.into()),
            value,
            tier,
            importance: 0,
        }
    }

    /// Build a constraint from the textual value grammar
    pub fn parse(name: impl Into<String>, raw: &str, tier: Tier) -> Self {
        Self::new(name, FilterValue::parse(raw), tier)
    }

    pub fn with_importance(mut self, importance: i32) -> Self {
        self.importance = importance;
        self
    }

    pub fn is_must_have(&self) -> bool {
        self.tier == Tier::MustHave
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Ordered collection of uniquely named constraints.
///
/// Insertion order is preserved and is the tie-breaker for relaxation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Constraint>", into = "Vec<Constraint>")]
pub struct FilterSet {
    constraints: Vec<Constraint>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FilterSet::insert`]
    pub fn with(mut self, constraint: Constraint) -> Self {
        self.insert(constraint);
        self
    }

    /// Insert a constraint. A constraint with the same name is replaced in place,
    /// keeping its original position.
    pub fn insert(&mut self, constraint: Constraint) {
        let mut constraint = constraint;
        constraint.name = normalize_name(&constraint.name);
        match self
            .constraints
            .iter_mut()
            .find(|c| c.name == constraint.name)
        {
            Some(existing) => *existing = constraint,
            None => self.constraints.push(constraint),
        }
    }

    /// Insert, rejecting duplicate names
    pub fn try_insert(&mut self, constraint: Constraint) -> Result<()> {
        let name = normalize_name(&constraint.name);
        if self.get(&name).is_some() {
            return Err(PrefrankError::InvalidRequest(format!(
                "Duplicate filter name: {}",
                name
            )));
        }
        self.insert(constraint);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Constraint> {
        let name = normalize_name(name);
        self.constraints.iter().find(|c| c.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Constraint> {
        let name = normalize_name(name);
        let idx = self.constraints.iter().position(|c| c.name == name)?;
        Some(self.constraints.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.constraints.iter().map(|c| c.name.clone()).collect()
    }

    pub fn must_have_names(&self) -> Vec<String> {
        self.constraints
            .iter()
            .filter(|c| c.is_must_have())
            .map(|c| c.name.clone())
            .collect()
    }

    /// True if any non-MustHave constraint remains
    pub fn has_relaxable(&self) -> bool {
        self.constraints.iter().any(|c| !c.is_must_have())
    }

    /// Name of the constraint the next ordinary relaxation step drops: lowest tier,
    /// then lowest importance, then earliest inserted. MustHave constraints are never
    /// returned here.
    pub fn next_relaxable(&self) -> Option<&Constraint> {
        self.constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_must_have())
            .min_by_key(|(idx, c)| (c.tier, c.importance, *idx))
            .map(|(_, c)| c)
    }

    /// Least-recently-added MustHave constraint
    pub fn next_forced(&self) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.is_must_have())
    }
}

impl TryFrom<Vec<Constraint>> for FilterSet {
    type Error = PrefrankError;

    fn try_from(constraints: Vec<Constraint>) -> Result<Self> {
        let mut set = FilterSet::new();
        for constraint in constraints {
            set.try_insert(constraint)?;
        }
        Ok(set)
    }
}

impl From<FilterSet> for Vec<Constraint> {
    fn from(set: FilterSet) -> Self {
        set.constraints
    }
}

impl<'a> IntoIterator for &'a FilterSet {
    type Item = &'a Constraint;
    type IntoIter = std::slice::Iter<'a, Constraint>;

    fn into_iter(self) -> Self::IntoIter {
        self.constraints.iter()
    }
}
