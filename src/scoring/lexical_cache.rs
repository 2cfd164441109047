//! Persistent per-candidate lexical vector cache
//!
//! Backed by the `lexical_vectors` table. Entries never expire; they are only
//! replaced by an upsert for the same id or cleared by [`LexicalVectorCache::rebuild`].

use ahash::{HashMap, HashMapExt};
use rusqlite::params;
use std::sync::Arc;

use super::{LexicalVectorizer, SparseVector};
use crate::catalog::Candidate;
use crate::error::{PrefrankError, Result};
use crate::storage::Database;

pub struct LexicalVectorCache {
    database: Arc<Database>,
}

impl LexicalVectorCache {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Cached vectors for the given ids; ids without an entry are absent
    pub fn get_many(&self, ids: &[String]) -> Result<HashMap<String, SparseVector>> {
        let conn = self.database.get_conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT vector FROM lexical_vectors WHERE candidate_id = ?1")?;

        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            let mut rows = stmt.query(params![id])?;
            if let Some(row) = rows.next()? {
                let json: String = row.get(0)?;
                let vector: SparseVector =
                    serde_json::from_str(&json).map_err(|e| PrefrankError::Json {
                        source: e,
                        context: format!("Corrupt lexical vector for candidate {}", id),
                    })?;
                found.insert(id.clone(), vector);
            }
        }
        Ok(found)
    }

    /// Insert or replace vectors. Each row is written atomically on its own key.
    pub fn upsert_many(&self, entries: &[(String, SparseVector)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut conn = self.database.get_conn()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().timestamp();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO lexical_vectors (candidate_id, vector, computed_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(candidate_id) DO UPDATE SET
                     vector = excluded.vector,
                     computed_at = excluded.computed_at",
            )?;
            for (id, vector) in entries {
                let json = serde_json::to_string(vector).map_err(|e| PrefrankError::Json {
                    source: e,
                    context: format!("Failed to encode lexical vector for candidate {}", id),
                })?;
                stmt.execute(params![id, json, now])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    /// Cached vectors for every candidate, computing and storing the misses
    pub fn get_or_compute(
        &self,
        candidates: &[Candidate],
        vectorizer: &LexicalVectorizer,
    ) -> Result<Vec<SparseVector>> {
        let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
        let mut cached = self.get_many(&ids)?;

        let misses: Vec<(String, SparseVector)> = candidates
            .iter()
            .filter(|c| !cached.contains_key(&c.id))
            .map(|c| (c.id.clone(), vectorizer.candidate_vector(c)))
            .collect();

        if !misses.is_empty() {
            tracing::debug!(
                hits = cached.len(),
                misses = misses.len(),
                "Lexical vector cache lookup"
            );
            self.upsert_many(&misses)?;
            cached.extend(misses);
        }

        Ok(candidates
            .iter()
            .map(|c| cached.get(&c.id).cloned().unwrap_or_default())
            .collect())
    }

    /// Drop every entry and recompute vectors for `candidates`
    pub fn rebuild(&self, candidates: &[Candidate], vectorizer: &LexicalVectorizer) -> Result<usize> {
        let cleared = self.clear()?;
        let entries: Vec<(String, SparseVector)> = candidates
            .iter()
            .map(|c| (c.id.clone(), vectorizer.candidate_vector(c)))
            .collect();
        let written = self.upsert_many(&entries)?;
        tracing::info!(cleared, written, "Rebuilt lexical vector cache");
        Ok(written)
    }

    pub fn clear(&self) -> Result<usize> {
        let conn = self.database.get_conn()?;
        Ok(conn.execute("DELETE FROM lexical_vectors", [])?)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.database.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM lexical_vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LexicalVectorCache) {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("cache.db")).unwrap());
        (temp, LexicalVectorCache::new(db))
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new("C1", "Toyota", "Camry").with_fuel_type("Hybrid"),
            Candidate::new("H1", "Honda", "Civic"),
        ]
    }

    #[test]
    fn test_get_or_compute_fills_cache() {
        let (_temp, cache) = setup();
        let vectorizer = LexicalVectorizer::new();

        assert!(cache.is_empty().unwrap());
        let vectors = cache.get_or_compute(&candidates(), &vectorizer).unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors[0].get("make:toyota") > 0.0);
        assert_eq!(cache.len().unwrap(), 2);

        let again = cache.get_or_compute(&candidates(), &vectorizer).unwrap();
        assert_eq!(vectors, again);
    }

    #[test]
    fn test_cached_entry_is_not_recomputed() {
        let (_temp, cache) = setup();
        let mut stale = SparseVector::new();
        stale.add("make:stale", 1.0);
        cache.upsert_many(&[("C1".to_string(), stale.clone())]).unwrap();

        let vectors = cache
            .get_or_compute(&candidates(), &LexicalVectorizer::new())
            .unwrap();
        assert_eq!(vectors[0], stale);
        assert!(vectors[1].get("make:honda") > 0.0);
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let (_temp, cache) = setup();
        let mut a = SparseVector::new();
        a.add("x", 1.0);
        let mut b = SparseVector::new();
        b.add("y", 1.0);

        cache.upsert_many(&[("C1".to_string(), a)]).unwrap();
        cache.upsert_many(&[("C1".to_string(), b.clone())]).unwrap();

        let found = cache.get_many(&["C1".to_string(), "missing".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found.get("C1"), Some(&b));
    }

    #[test]
    fn test_rebuild_clears_stale_entries() {
        let (_temp, cache) = setup();
        let mut stale = SparseVector::new();
        stale.add("make:stale", 1.0);
        cache
            .upsert_many(&[("C1".to_string(), stale.clone()), ("GONE".to_string(), stale)])
            .unwrap();

        let written = cache.rebuild(&candidates(), &LexicalVectorizer::new()).unwrap();
        assert_eq!(written, 2);
        assert_eq!(cache.len().unwrap(), 2);

        let found = cache.get_many(&["C1".to_string(), "GONE".to_string()]).unwrap();
        assert!(found.get("C1").unwrap().get("make:toyota") > 0.0);
        assert!(!found.contains_key("GONE"));
    }
}
