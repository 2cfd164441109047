//! Review phrase embeddings keyed by vehicle
//!
//! The store is built once (from the review corpus, offline) and then shared
//! read-only between ranking requests as a [`SharedPhraseStore`]. Hosts that want
//! to defer loading until the first request that needs it hand a
//! [`PhraseStoreCell`] to `RankingEngine::with_deferred_phrases`; the cell runs
//! its initializer at most once even under concurrent first use.

use ahash::{HashMap, HashMapExt};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};

use super::{decode_vector, encode_vector, l2_normalize_rows, rows_to_matrix, EmbeddingError, Matrix};
use crate::catalog::Candidate;
use crate::error::{PrefrankError, Result};
use crate::storage::Database;

/// Shared handle passed into every ranking call
pub type SharedPhraseStore = Arc<PhraseEmbeddingStore>;

/// Lookup key: lowercased make and model plus model year
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VehicleKey {
    pub make: String,
    pub model: String,
    pub year: i32,
}

impl VehicleKey {
    pub fn new(make: &str, model: &str, year: i32) -> Self {
        Self {
            make: make.trim().to_lowercase(),
            model: model.trim().to_lowercase(),
            year,
        }
    }

    /// Key for a candidate; `None` when the candidate has no model year
    pub fn for_candidate(candidate: &Candidate) -> Option<Self> {
        candidate
            .year
            .map(|year| Self::new(&candidate.make, &candidate.model, year))
    }
}

/// Review-derived pro and con phrases for one vehicle, with unit-length embeddings
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePhrases {
    pub pros_phrases: Vec<String>,
    pub pros_embeddings: Matrix,
    pub cons_phrases: Vec<String>,
    pub cons_embeddings: Matrix,
}

impl VehiclePhrases {
    /// Build from phrases and their embeddings. Rows are L2-normalised here so
    /// alignment reduces to dot products.
    pub fn new(
        pros_phrases: Vec<String>,
        mut pros_embeddings: Matrix,
        cons_phrases: Vec<String>,
        mut cons_embeddings: Matrix,
    ) -> std::result::Result<Self, EmbeddingError> {
        if pros_phrases.len() != pros_embeddings.nrows() {
            return Err(EmbeddingError::InvalidInput(format!(
                "{} pro phrases but {} pro embeddings",
                pros_phrases.len(),
                pros_embeddings.nrows()
            )));
        }
        if cons_phrases.len() != cons_embeddings.nrows() {
            return Err(EmbeddingError::InvalidInput(format!(
                "{} con phrases but {} con embeddings",
                cons_phrases.len(),
                cons_embeddings.nrows()
            )));
        }
        if pros_embeddings.ncols() != cons_embeddings.ncols() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: pros_embeddings.ncols(),
                actual: cons_embeddings.ncols(),
            });
        }

        l2_normalize_rows(&mut pros_embeddings);
        l2_normalize_rows(&mut cons_embeddings);

        Ok(Self {
            pros_phrases,
            pros_embeddings,
            cons_phrases,
            cons_embeddings,
        })
    }

    /// Build from per-phrase vectors
    pub fn from_rows(
        pros: Vec<(String, Vec<f32>)>,
        cons: Vec<(String, Vec<f32>)>,
        dimension: usize,
    ) -> std::result::Result<Self, EmbeddingError> {
        let (pros_phrases, pros_rows): (Vec<_>, Vec<_>) = pros.into_iter().unzip();
        let (cons_phrases, cons_rows): (Vec<_>, Vec<_>) = cons.into_iter().unzip();
        Self::new(
            pros_phrases,
            rows_to_matrix(pros_rows, dimension)?,
            cons_phrases,
            rows_to_matrix(cons_rows, dimension)?,
        )
    }

    pub fn dimension(&self) -> usize {
        self.pros_embeddings.ncols()
    }
}

/// Read-mostly map from vehicle to review phrases
#[derive(Debug, Clone)]
pub struct PhraseEmbeddingStore {
    dimension: usize,
    entries: HashMap<VehicleKey, VehiclePhrases>,
}

impl PhraseEmbeddingStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: HashMap::new(),
        }
    }

    /// Add or replace a vehicle's phrases. Only used while building the store,
    /// before it is wrapped in a [`SharedPhraseStore`].
    pub fn insert(
        &mut self,
        key: VehicleKey,
        phrases: VehiclePhrases,
    ) -> std::result::Result<(), EmbeddingError> {
        if phrases.dimension() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: phrases.dimension(),
            });
        }
        self.entries.insert(key, phrases);
        Ok(())
    }

    pub fn get(&self, key: &VehicleKey) -> Option<&VehiclePhrases> {
        self.entries.get(key)
    }

    /// Phrases for a candidate's (make, model, year), if the corpus has any
    pub fn lookup(&self, candidate: &Candidate) -> Option<&VehiclePhrases> {
        VehicleKey::for_candidate(candidate).and_then(|key| self.entries.get(&key))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_shared(self) -> SharedPhraseStore {
        Arc::new(self)
    }

    /// Load every vehicle from the `vehicle_phrases` table
    pub fn load(database: &Database, dimension: usize) -> Result<Self> {
        let conn = database.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT make, model, year, polarity, phrase, embedding
             FROM vehicle_phrases
             ORDER BY make, model, year, polarity, ordinal",
        )?;

        type Pending = (Vec<(String, Vec<f32>)>, Vec<(String, Vec<f32>)>);
        let mut pending: HashMap<VehicleKey, Pending> = HashMap::new();

        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let make: String = row.get(0)?;
            let model: String = row.get(1)?;
            let year: i32 = row.get(2)?;
            let polarity: String = row.get(3)?;
            let phrase: String = row.get(4)?;
            let blob: Vec<u8> = row.get(5)?;

            let vector = decode_vector(&blob, dimension)?;
            let entry = pending
                .entry(VehicleKey::new(&make, &model, year))
                .or_insert_with(|| (Vec::new(), Vec::new()));
            match polarity.as_str() {
                "pro" => entry.0.push((phrase, vector)),
                _ => entry.1.push((phrase, vector)),
            }
        }

        let mut store = Self::new(dimension);
        for (key, (pros, cons)) in pending {
            let phrases = VehiclePhrases::from_rows(pros, cons, dimension)?;
            store.insert(key, phrases)?;
        }

        tracing::info!(
            vehicles = store.len(),
            dimension,
            "Loaded phrase embedding store"
        );
        Ok(store)
    }

    /// Persist every vehicle, replacing previously stored phrases for the same keys
    pub fn save(&self, database: &Database) -> Result<usize> {
        let mut conn = database.get_conn()?;
        let tx = conn.transaction()?;
        for (key, phrases) in &self.entries {
            tx.execute(
                "DELETE FROM vehicle_phrases WHERE make = ?1 AND model = ?2 AND year = ?3",
                params![key.make, key.model, key.year],
            )?;
            let sides = [
                ("pro", &phrases.pros_phrases, &phrases.pros_embeddings),
                ("con", &phrases.cons_phrases, &phrases.cons_embeddings),
            ];
            for (polarity, texts, embeddings) in sides {
                for (ordinal, (text, row)) in texts.iter().zip(embeddings.rows()).enumerate() {
                    tx.execute(
                        "INSERT INTO vehicle_phrases (make, model, year, polarity, ordinal, phrase, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            key.make,
                            key.model,
                            key.year,
                            polarity,
                            ordinal as i64,
                            text,
                            encode_vector(&row.to_vec())
                        ],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(self.entries.len())
    }
}

/// Single-initialization holder for a [`SharedPhraseStore`]
///
/// The first successful `get_or_try_init` stores the handle; later calls and
/// concurrent callers receive the same `Arc`. A failed initializer leaves the
/// cell empty so the next call may retry.
#[derive(Debug, Default)]
pub struct PhraseStoreCell {
    store: OnceLock<SharedPhraseStore>,
    init_lock: Mutex<()>,
}

impl PhraseStoreCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle if already initialized
    pub fn get(&self) -> Option<SharedPhraseStore> {
        self.store.get().cloned()
    }

    pub fn get_or_try_init<F>(&self, init: F) -> Result<SharedPhraseStore>
    where
        F: FnOnce() -> Result<PhraseEmbeddingStore>,
    {
        if let Some(store) = self.store.get() {
            return Ok(store.clone());
        }

        let _guard = self
            .init_lock
            .lock()
            .map_err(|_| PrefrankError::Config("phrase store init lock poisoned".to_string()))?;

        if let Some(store) = self.store.get() {
            return Ok(store.clone());
        }

        let store = Arc::new(init()?);
        // Only this thread can be here while holding the lock
        let _ = self.store.set(store.clone());
        Ok(store)
    }
}
