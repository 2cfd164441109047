//! Candidate store adapter
//!
//! [`CandidateStore`] is the seam between the ranking engine and the relational
//! catalog. Zero rows is `Ok(vec![])`; any backing-store failure is a
//! [`StoreError`] and no partial result is ever returned.

use rusqlite::types::Type;
use rusqlite::{params_from_iter, Row};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::catalog::{Candidate, DealerInfo, GeoFilter, GeoPoint};
use crate::error::StoreError;
use crate::filtering::FilterSet;
use crate::storage::query::{OrderSpec, QueryBuilder};
use crate::storage::Database;

/// Query interface over the catalog
pub trait CandidateStore: Send + Sync {
    /// Return up to `limit` candidates matching every constraint in `filters`,
    /// ordered by `order` with the candidate id as secondary key.
    fn search(
        &self,
        filters: &FilterSet,
        limit: u32,
        order: &OrderSpec,
        geo: Option<GeoFilter>,
    ) -> Result<Vec<Candidate>, StoreError>;
}

/// SQLite-backed candidate store
pub struct SqliteCandidateStore {
    database: Arc<Database>,
    max_per_make_model: Option<u32>,
}

impl SqliteCandidateStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            database,
            max_per_make_model: None,
        }
    }

    /// Cap the raw pool at `cap` rows per make+model (0 disables the cap)
    pub fn with_make_model_cap(mut self, cap: u32) -> Self {
        self.max_per_make_model = if cap == 0 { None } else { Some(cap) };
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }
}

impl CandidateStore for SqliteCandidateStore {
    fn search(
        &self,
        filters: &FilterSet,
        limit: u32,
        order: &OrderSpec,
        geo: Option<GeoFilter>,
    ) -> Result<Vec<Candidate>, StoreError> {
        let query = QueryBuilder::new(filters)
            .limit(limit)
            .order(*order)
            .geo(geo)
            .max_per_make_model(self.max_per_make_model)
            .build()?;

        tracing::debug!(sql = %query.sql, params = query.params.len(), "candidate query");

        let conn = self.database.checkout()?;
        let mut stmt = conn
            .prepare_cached(&query.sql)
            .map_err(|e| StoreError::query("prepare candidate query", e))?;

        let rows = stmt
            .query_map(params_from_iter(query.params.iter()), candidate_from_row)
            .map_err(|e| StoreError::query("execute candidate query", e))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::query("read candidate row", e))
    }
}

/// Map a row selected with [`crate::storage::query::CANDIDATE_COLUMNS`]
pub fn candidate_from_row(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    let lat: Option<f64> = row.get(16)?;
    let lon: Option<f64> = row.get(17)?;
    let attributes_json: String = row.get(18)?;
    let payload_json: String = row.get(19)?;

    let attributes: Map<String, Value> = serde_json::from_str(&attributes_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(18, Type::Text, Box::new(e)))?;
    let raw_payload: Value = serde_json::from_str(&payload_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(19, Type::Text, Box::new(e)))?;

    Ok(Candidate {
        id: row.get(0)?,
        make: row.get(1)?,
        model: row.get(2)?,
        trim: row.get(3)?,
        year: row.get(4)?,
        price: row.get(5)?,
        mileage: row.get(6)?,
        body_style: row.get(7)?,
        fuel_type: row.get(8)?,
        color: row.get(9)?,
        drivetrain: row.get(10)?,
        transmission: row.get(11)?,
        condition: row.get(12)?,
        dealer: DealerInfo {
            name: row.get(13)?,
            city: row.get(14)?,
            state: row.get(15)?,
        },
        location: match (lat, lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        },
        attributes,
        raw_payload,
    })
}
