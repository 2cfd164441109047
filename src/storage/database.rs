//! SQLite database management with migrations
//!
//! Holds the candidate catalog, the review phrase embeddings and the lexical
//! vector cache.

use crate::catalog::{haversine_miles, Candidate};
use crate::error::{PrefrankError, Result, StoreError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, Connection};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled connection handle
pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Connection pool options
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout_ms: 5000,
        }
    }
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) a database with default pool options
    pub fn new(db_path: &Path) -> Result<Self> {
        Self::with_options(db_path, DatabaseOptions::default())
    }

    /// Open (or create) a database
    pub fn with_options(db_path: &Path, options: DatabaseOptions) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrefrankError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let busy_timeout = options.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.execute_batch(&format!(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = {};
                ",
                busy_timeout
            ))?;
            register_functions(conn)
        });

        let pool = Pool::builder()
            .max_size(options.pool_size)
            .build(manager)
            .map_err(|e| PrefrankError::Config(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<DbConn> {
        Ok(self.checkout()?)
    }

    /// Get a connection from the pool, reporting failures as store errors
    pub fn checkout(&self) -> std::result::Result<DbConn, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert or replace a catalog row
    pub fn upsert_candidate(&self, candidate: &Candidate) -> Result<()> {
        let conn = self.get_conn()?;
        upsert_candidate_row(&conn, candidate)
    }

    /// Insert or replace many catalog rows in one transaction
    pub fn upsert_candidates(&self, candidates: &[Candidate]) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for candidate in candidates {
            upsert_candidate_row(&tx, candidate)?;
        }
        tx.commit()?;
        Ok(candidates.len())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let candidate_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM candidates", [], |row| row.get(0))?;

        let phrase_vehicle_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT DISTINCT make, model, year FROM vehicle_phrases)",
            [],
            |row| row.get(0),
        )?;

        let phrase_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM vehicle_phrases", [], |row| row.get(0))?;

        let lexical_vector_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM lexical_vectors", [], |row| row.get(0))?;

        Ok(DbStats {
            candidate_count: candidate_count as usize,
            phrase_vehicle_count: phrase_vehicle_count as usize,
            phrase_count: phrase_count as usize,
            lexical_vector_count: lexical_vector_count as usize,
        })
    }
}

fn upsert_candidate_row(conn: &Connection, c: &Candidate) -> Result<()> {
    let attributes = serde_json::to_string(&c.attributes).map_err(|e| PrefrankError::Json {
        source: e,
        context: format!("Failed to encode attributes for {}", c.id),
    })?;
    let raw_payload = serde_json::to_string(&c.raw_payload).map_err(|e| PrefrankError::Json {
        source: e,
        context: format!("Failed to encode payload for {}", c.id),
    })?;

    conn.execute(
        "INSERT INTO candidates (
            id, make, model, trim, year, price, mileage, body_style, fuel_type, color,
            drivetrain, transmission, condition, dealer_name, dealer_city, dealer_state,
            lat, lon, attributes, raw_payload
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
         ON CONFLICT(id) DO UPDATE SET
            make = excluded.make, model = excluded.model, trim = excluded.trim,
            year = excluded.year, price = excluded.price, mileage = excluded.mileage,
            body_style = excluded.body_style, fuel_type = excluded.fuel_type,
            color = excluded.color, drivetrain = excluded.drivetrain,
            transmission = excluded.transmission, condition = excluded.condition,
            dealer_name = excluded.dealer_name, dealer_city = excluded.dealer_city,
            dealer_state = excluded.dealer_state, lat = excluded.lat, lon = excluded.lon,
            attributes = excluded.attributes, raw_payload = excluded.raw_payload",
        params![
            c.id,
            c.make,
            c.model,
            c.trim,
            c.year,
            c.price,
            c.mileage,
            c.body_style,
            c.fuel_type,
            c.color,
            c.drivetrain,
            c.transmission,
            c.condition,
            c.dealer.name,
            c.dealer.city,
            c.dealer.state,
            c.location.map(|p| p.lat),
            c.location.map(|p| p.lon),
            attributes,
            raw_payload,
        ],
    )?;
    Ok(())
}

/// Register scalar SQL functions used by candidate queries
fn register_functions(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "haversine_miles",
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let lat1 = ctx.get::<Option<f64>>(0)?;
            let lon1 = ctx.get::<Option<f64>>(1)?;
            let lat2 = ctx.get::<Option<f64>>(2)?;
            let lon2 = ctx.get::<Option<f64>>(3)?;
            Ok(match (lat1, lon1, lat2, lon2) {
                (Some(a), Some(b), Some(c), Some(d)) => Some(haversine_miles(a, b, c, d)),
                _ => None,
            })
        },
    )?;

    // Built-in lower() only folds ASCII; filter values are folded with Unicode rules
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Null => SqlValue::Null,
                ValueRef::Integer(i) => SqlValue::Text(i.to_string()),
                ValueRef::Real(r) => SqlValue::Text(format!("{:?}", r)),
                ValueRef::Text(bytes) => {
                    SqlValue::Text(String::from_utf8_lossy(bytes).to_lowercase())
                }
                ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
            })
        },
    )
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub candidate_count: usize,
    pub phrase_vehicle_count: usize,
    pub phrase_count: usize,
    pub lexical_vector_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Catalog
    r#"
    CREATE TABLE candidates (
        id TEXT PRIMARY KEY,
        make TEXT NOT NULL,
        model TEXT NOT NULL,
        trim TEXT,
        year INTEGER,
        price REAL,
        mileage REAL,
        body_style TEXT,
        fuel_type TEXT,
        color TEXT,
        drivetrain TEXT,
        transmission TEXT,
        condition TEXT,
        dealer_name TEXT,
        dealer_city TEXT,
        dealer_state TEXT,
        lat REAL,
        lon REAL,
        attributes TEXT NOT NULL DEFAULT '{}',
        raw_payload TEXT NOT NULL DEFAULT 'null'
    );

    CREATE INDEX idx_candidates_make_model ON candidates(make, model);
    CREATE INDEX idx_candidates_price ON candidates(price);
    CREATE INDEX idx_candidates_year ON candidates(year);
    "#,
    // Migration 2: Review phrase embeddings
    r#"
    CREATE TABLE vehicle_phrases (
        make TEXT NOT NULL,
        model TEXT NOT NULL,
        year INTEGER NOT NULL,
        polarity TEXT NOT NULL CHECK (polarity IN ('pro', 'con')),
        ordinal INTEGER NOT NULL,
        phrase TEXT NOT NULL,
        embedding BLOB NOT NULL,
        PRIMARY KEY (make, model, year, polarity, ordinal)
    );
    "#,
    // Migration 3: Lexical vector cache
    r#"
    CREATE TABLE lexical_vectors (
        candidate_id TEXT PRIMARY KEY,
        vector TEXT NOT NULL,
        computed_at INTEGER NOT NULL
    );
    "#,
];
