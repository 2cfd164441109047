//! Typed candidate query construction
//!
//! Translates a [`FilterSet`] plus ordering, geo and diversity-cap options into a
//! single parameterised SQL statement over the `candidates` table.

use regex::Regex;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::catalog::GeoFilter;
use crate::error::{PrefrankError, StoreError};
use crate::filtering::{Constraint, FilterSet, FilterValue};

/// Columns returned for every candidate row, in row-mapping order
pub const CANDIDATE_COLUMNS: &str = "id, make, model, trim, year, price, mileage, body_style, \
     fuel_type, color, drivetrain, transmission, condition, dealer_name, dealer_city, \
     dealer_state, lat, lon, attributes, raw_payload";

/// Sortable fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Price,
    Mileage,
    Year,
    /// Requires a geo filter; falls back to id order without one
    Distance,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Primary ordering. The candidate id is always appended as a secondary key so
/// identical queries return identical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    pub fn asc(field: SortField) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: SortField) -> Self {
        Self::new(field, SortDirection::Desc)
    }

    fn to_sql(self, has_geo: bool) -> String {
        let dir = match self.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let column = match self.field {
            SortField::Price => Some("price"),
            SortField::Mileage => Some("mileage"),
            SortField::Year => Some("year"),
            SortField::Distance if has_geo => Some("distance_miles"),
            SortField::Distance | SortField::Id => None,
        };
        match column {
            // NULLs sort last regardless of direction
            Some(col) => format!("{col} IS NULL, {col} {dir}, id ASC"),
            None => format!("id {dir}"),
        }
    }
}

impl Default for OrderSpec {
    fn default() -> Self {
        Self::asc(SortField::Price)
    }
}

impl FromStr for OrderSpec {
    type Err = PrefrankError;

    /// `field` or `field:direction`, e.g. `mileage:desc`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (field, direction) = lowered.split_once(':').unwrap_or((lowered.as_str(), "asc"));
        let invalid = |message: String| PrefrankError::InvalidConfigValue {
            path: "search.default_sort".to_string(),
            message,
        };
        let field = match field.trim() {
            "price" => SortField::Price,
            "mileage" => SortField::Mileage,
            "year" => SortField::Year,
            "distance" => SortField::Distance,
            "id" => SortField::Id,
            other => return Err(invalid(format!("Unknown sort field '{}'", other))),
        };
        let direction = match direction.trim() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => return Err(invalid(format!("Unknown sort direction '{}'", other))),
        };
        Ok(Self::new(field, direction))
    }
}

/// How a filter name maps onto the schema
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldKind {
    Categorical(&'static str),
    Numeric(&'static str),
    /// Key inside the `attributes` JSON column
    Attribute(String),
}

fn attribute_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{0,63}$").expect("valid attribute regex"))
}

fn resolve_field(name: &str) -> Result<FieldKind, StoreError> {
    let kind = match name {
        "make" | "brand" => FieldKind::Categorical("make"),
        "model" => FieldKind::Categorical("model"),
        "trim" => FieldKind::Categorical("trim"),
        "body_style" | "body_type" => FieldKind::Categorical("body_style"),
        "fuel_type" | "fuel" => FieldKind::Categorical("fuel_type"),
        "color" | "exterior_color" => FieldKind::Categorical("color"),
        "drivetrain" => FieldKind::Categorical("drivetrain"),
        "transmission" => FieldKind::Categorical("transmission"),
        "condition" => FieldKind::Categorical("condition"),
        "dealer_name" | "seller" => FieldKind::Categorical("dealer_name"),
        "dealer_city" => FieldKind::Categorical("dealer_city"),
        "dealer_state" => FieldKind::Categorical("dealer_state"),
        "year" => FieldKind::Numeric("year"),
        "price" => FieldKind::Numeric("price"),
        "mileage" | "odometer" | "usage" => FieldKind::Numeric("mileage"),
        other if attribute_name_pattern().is_match(other) => FieldKind::Attribute(other.to_string()),
        other => {
            return Err(StoreError::unsupported(
                other,
                "filter names must be lowercase identifiers",
            ))
        }
    };
    Ok(kind)
}

/// A built statement and its positional parameters
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Builder for [`CandidateQuery`]
#[derive(Debug, Clone)]
pub struct QueryBuilder<'a> {
    filters: &'a FilterSet,
    limit: u32,
    order: OrderSpec,
    geo: Option<GeoFilter>,
    max_per_make_model: Option<u32>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(filters: &'a FilterSet) -> Self {
        Self {
            filters,
            limit: 100,
            order: OrderSpec::default(),
            geo: None,
            max_per_make_model: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn order(mut self, order: OrderSpec) -> Self {
        self.order = order;
        self
    }

    pub fn geo(mut self, geo: Option<GeoFilter>) -> Self {
        self.geo = geo;
        self
    }

    pub fn max_per_make_model(mut self, cap: Option<u32>) -> Self {
        self.max_per_make_model = cap.filter(|n| *n > 0);
        self
    }

    pub fn build(self) -> Result<CandidateQuery, StoreError> {
        let mut params: Vec<SqlValue> = Vec::new();

        // Parameters are positional: push in textual order of the placeholders.
        let distance_expr = match &self.geo {
            Some(geo) => {
                params.push(SqlValue::Real(geo.origin.lat));
                params.push(SqlValue::Real(geo.origin.lon));
                "haversine_miles(lat, lon, ?, ?)"
            }
            None => "NULL",
        };

        let mut conditions = Vec::new();
        for constraint in self.filters {
            if let Some(condition) = constraint_sql(constraint, &mut params)? {
                conditions.push(condition);
            }
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let mut inner = format!(
            "SELECT {CANDIDATE_COLUMNS}, {distance_expr} AS distance_miles FROM candidates{where_clause}"
        );

        if let Some(geo) = &self.geo {
            params.push(SqlValue::Real(geo.radius_miles));
            inner = format!("SELECT * FROM ({inner}) WHERE distance_miles <= ?");
        }

        let order_sql = self.order.to_sql(self.geo.is_some());

        if let Some(cap) = self.max_per_make_model {
            inner = format!(
                "SELECT * FROM (SELECT *, ROW_NUMBER() OVER (PARTITION BY fold_case(make), fold_case(model) \
                 ORDER BY {order_sql}) AS make_model_rank FROM ({inner})) WHERE make_model_rank <= ?"
            );
            params.push(SqlValue::Integer(i64::from(cap)));
        }

        params.push(SqlValue::Integer(i64::from(self.limit)));
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM ({inner}) ORDER BY {order_sql} LIMIT ?");

        Ok(CandidateQuery { sql, params })
    }
}

fn constraint_sql(
    constraint: &Constraint,
    params: &mut Vec<SqlValue>,
) -> Result<Option<String>, StoreError> {
    let field = resolve_field(&constraint.name)?;

    let (categorical_expr, numeric_expr) = match &field {
        FieldKind::Categorical(col) => (Some(format!("fold_case({col})")), None),
        FieldKind::Numeric(col) => (None, Some(col.to_string())),
        FieldKind::Attribute(key) => (
            Some(format!("fold_case(json_extract(attributes, '$.{key}'))")),
            Some(format!("CAST(json_extract(attributes, '$.{key}') AS REAL)")),
        ),
    };

    match &constraint.value {
        FilterValue::Range { min, max } => {
            let expr = numeric_expr.ok_or_else(|| {
                StoreError::unsupported(&constraint.name, "range values need a numeric field")
            })?;
            Ok(range_sql(&expr, *min, *max, params))
        }
        value => {
            let members = value.members();
            if members.is_empty() {
                return Ok(None);
            }

            match (&field, numeric_expr, categorical_expr) {
                (FieldKind::Numeric(_), Some(expr), _) => {
                    for member in &members {
                        let n: f64 = member.parse().map_err(|_| {
                            StoreError::unsupported(
                                &constraint.name,
                                format!("'{}' is not a number", member),
                            )
                        })?;
                        params.push(SqlValue::Real(n));
                    }
                    Ok(Some(in_sql(&expr, members.len())))
                }
                (_, _, Some(expr)) => {
                    for member in &members {
                        params.push(SqlValue::Text(member.to_lowercase()));
                    }
                    Ok(Some(in_sql(&expr, members.len())))
                }
                _ => Err(StoreError::unsupported(
                    &constraint.name,
                    "value does not fit field type",
                )),
            }
        }
    }
}

fn range_sql(
    expr: &str,
    min: Option<f64>,
    max: Option<f64>,
    params: &mut Vec<SqlValue>,
) -> Option<String> {
    match (min, max) {
        (Some(lo), Some(hi)) => {
            params.push(SqlValue::Real(lo));
            params.push(SqlValue::Real(hi));
            Some(format!("{expr} BETWEEN ? AND ?"))
        }
        (Some(lo), None) => {
            params.push(SqlValue::Real(lo));
            Some(format!("{expr} >= ?"))
        }
        (None, Some(hi)) => {
            params.push(SqlValue::Real(hi));
            Some(format!("{expr} <= ?"))
        }
        (None, None) => None,
    }
}

fn in_sql(expr: &str, count: usize) -> String {
    if count == 1 {
        format!("{expr} = ?")
    } else {
        let placeholders = vec!["?"; count].join(", ");
        format!("{expr} IN ({placeholders})")
    }
}
