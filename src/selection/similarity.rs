//! Coarse structural similarity between catalog items

use crate::catalog::Candidate;

pub const SAME_MAKE_MODEL: f32 = 1.0;
pub const SAME_MAKE: f32 = 0.5;
pub const SAME_BODY_STYLE: f32 = 0.2;

/// Same make+model is high, same make medium, same body style low, otherwise 0
pub fn structural_similarity(a: &Candidate, b: &Candidate) -> f32 {
    if a.same_make_model(b) {
        SAME_MAKE_MODEL
    } else if a.same_make(b) {
        SAME_MAKE
    } else if a.same_body_style(b) {
        SAME_BODY_STYLE
    } else {
        0.0
    }
}
