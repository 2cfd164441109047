//! Prefrank - Preference-aware candidate ranking
//!
//! Narrows a catalog with a tiered, auto-relaxing constraint search, scores the
//! surviving candidates against a buyer's liked and disliked features, and selects
//! a top-k list that balances relevance against redundancy.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod filtering;
pub mod ranking;
pub mod scoring;
pub mod selection;
pub mod storage;

pub use error::{PrefrankError, Result};
