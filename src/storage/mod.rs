//! Storage layer for prefrank
//!
//! SQLite catalog access, typed candidate queries and the connection pool shared
//! by the phrase store and the lexical vector cache.

mod candidate_store;
pub mod database;
pub mod query;

pub use candidate_store::{candidate_from_row, CandidateStore, SqliteCandidateStore};
pub use database::{Database, DatabaseOptions, DbConn, DbPool, DbStats};
pub use query::{CandidateQuery, OrderSpec, QueryBuilder, SortDirection, SortField};
