//! Candidate scoring against buyer preferences
//!
//! Two scorers share the same preference input:
//! - `PhraseAlignmentScorer`: review phrase alignment (Pos/Neg matrices)
//! - `LexicalVectorizer`: sparse weighted token vectors for the fallback ranker

mod alignment;
mod lexical;
mod lexical_cache;

pub use alignment::{align, AlignmentMatrix, AlignmentReducer, PhraseAlignmentScorer};
pub use lexical::{LexicalVectorizer, SparseVector};
pub use lexical_cache::LexicalVectorCache;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Buyer preference signal for one ranking request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceBundle {
    /// Free-text phrases the buyer wants, in the order they were expressed
    #[serde(default)]
    pub liked_features: Vec<String>,

    /// Free-text phrases the buyer wants to avoid
    #[serde(default)]
    pub disliked_features: Vec<String>,

    /// Optional scalar priorities, e.g. `fuel_economy = 0.8`
    #[serde(default)]
    pub priorities: BTreeMap<String, f32>,
}

impl PreferenceBundle {
    pub fn new<L, D>(liked: L, disliked: D) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            liked_features: liked.into_iter().map(Into::into).collect(),
            disliked_features: disliked.into_iter().map(Into::into).collect(),
            priorities: BTreeMap::new(),
        }
        .normalized()
    }

    pub fn with_priority(mut self, name: impl Into<String>, weight: f32) -> Self {
        self.priorities.insert(name.into().trim().to_lowercase(), weight);
        self
    }

    /// Trim phrases and drop blank ones; priority names are lowercased and
    /// non-finite weights dropped
    pub fn normalized(&self) -> Self {
        let clean = |phrases: &[String]| -> Vec<String> {
            phrases
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        };
        Self {
            liked_features: clean(&self.liked_features),
            disliked_features: clean(&self.disliked_features),
            priorities: self
                .priorities
                .iter()
                .filter(|(_, w)| w.is_finite())
                .map(|(k, w)| (k.trim().to_lowercase(), *w))
                .collect(),
        }
    }

    /// True when there is at least one liked or disliked phrase
    pub fn has_phrases(&self) -> bool {
        !self.liked_features.is_empty() || !self.disliked_features.is_empty()
    }

    /// Liked phrases followed by disliked phrases, the order used for the
    /// single per-request embedding batch
    pub fn phrases(&self) -> Vec<String> {
        self.liked_features
            .iter()
            .chain(self.disliked_features.iter())
            .cloned()
            .collect()
    }
}
