//! Catalog item snapshots
//!
//! A [`Candidate`] is one row of the relational catalog as seen by the ranking
//! engine. Candidates are produced by the candidate store and only read downstream.

mod geo;

pub use geo::{haversine_miles, GeoFilter, GeoPoint, EARTH_RADIUS_MILES};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Seller / dealer fields carried on a catalog row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealerInfo {
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// One catalog item snapshot eligible for ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Immutable identifier (VIN, SKU, ...)
    pub id: String,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub trim: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub price: Option<f64>,
    /// Mileage for vehicles, usage hours/cycles for other catalogs
    #[serde(default)]
    pub mileage: Option<f64>,
    #[serde(default)]
    pub body_style: Option<String>,
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub drivetrain: Option<String>,
    #[serde(default)]
    pub transmission: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub dealer: DealerInfo,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Catalog-specific attributes without a dedicated column
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Original listing payload retained for display
    #[serde(default)]
    pub raw_payload: Value,
}

impl Candidate {
    /// Create a candidate with only the identifying fields set
    pub fn new(id: impl Into<String>, make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            make: make.into(),
            model: model.into(),
            trim: None,
            year: None,
            price: None,
            mileage: None,
            body_style: None,
            fuel_type: None,
            color: None,
            drivetrain: None,
            transmission: None,
            condition: None,
            dealer: DealerInfo::default(),
            location: None,
            attributes: Map::new(),
            raw_payload: Value::Null,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_mileage(mut self, mileage: f64) -> Self {
        self.mileage = Some(mileage);
        self
    }

    pub fn with_body_style(mut self, body_style: impl Into<String>) -> Self {
        self.body_style = Some(body_style.into());
        self
    }

    pub fn with_fuel_type(mut self, fuel_type: impl Into<String>) -> Self {
        self.fuel_type = Some(fuel_type.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_location(mut self, lat: f64, lon: f64) -> Self {
        self.location = Some(GeoPoint::new(lat, lon));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Same make and model, compared case-insensitively
    pub fn same_make_model(&self, other: &Candidate) -> bool {
        self.same_make(other) && self.model.eq_ignore_ascii_case(&other.model)
    }

    pub fn same_make(&self, other: &Candidate) -> bool {
        self.make.eq_ignore_ascii_case(&other.make)
    }

    pub fn same_body_style(&self, other: &Candidate) -> bool {
        match (&self.body_style, &other.body_style) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// Human-readable label, e.g. "2021 Toyota Camry"
    pub fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{} {} {}", year, self.make, self.model),
            None => format!("{} {}", self.make, self.model),
        }
    }
}
