/// Embeddings: provider abstraction, dense matrix helpers and the shared
/// review phrase store.
///
/// - `EmbeddingProvider` trait (opaque text -> vector function)
/// - `FastEmbedProvider` for local embedding (all-MiniLM-L6-v2, 384-dim)
/// - `PhraseEmbeddingStore` keyed by (make, model, year)
mod phrase_store;
mod provider;

pub use phrase_store::{
    PhraseEmbeddingStore, PhraseStoreCell, SharedPhraseStore, VehicleKey, VehiclePhrases,
};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use ndarray::{Array2, Axis};

/// Row-major embedding matrix, one vector per row
pub type Matrix = Array2<f32>;

/// Stack equal-length rows into a matrix
pub fn rows_to_matrix(rows: Vec<Vec<f32>>, dimension: usize) -> Result<Matrix, EmbeddingError> {
    let n = rows.len();
    let mut flat = Vec::with_capacity(n * dimension);
    for row in rows {
        if row.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: dimension,
                actual: row.len(),
            });
        }
        flat.extend(row);
    }
    Matrix::from_shape_vec((n, dimension), flat)
        .map_err(|e| EmbeddingError::GenerationError(e.to_string()))
}

/// Scale every row to unit length. Zero rows stay zero.
pub fn l2_normalize_rows(matrix: &mut Matrix) {
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > f32::EPSILON {
            row.mapv_inplace(|x| x / norm);
        }
    }
}

/// Cosine similarity; 0.0 when either side has no magnitude
#[cfg(test)]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a <= f32::EPSILON || mag_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Encode a vector as little-endian f32 bytes
pub fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes
pub fn decode_vector(bytes: &[u8], dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
    if bytes.len() != dimension * 4 {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: bytes.len() / 4,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_to_matrix_checks_dimension() {
        let ok = rows_to_matrix(vec![vec![1.0, 0.0], vec![0.0, 1.0]], 2).unwrap();
        assert_eq!(ok.dim(), (2, 2));

        let err = rows_to_matrix(vec![vec![1.0, 0.0, 0.0]], 2).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_normalize_rows_leaves_zero_rows() {
        let mut m = rows_to_matrix(vec![vec![3.0, 4.0], vec![0.0, 0.0]], 2).unwrap();
        l2_normalize_rows(&mut m);
        assert!((m[[0, 0]] - 0.6).abs() < 1e-6);
        assert!((m[[0, 1]] - 0.8).abs() < 1e-6);
        assert_eq!(m[[1, 0]], 0.0);
        assert!(m.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_cosine_zero_vector_is_zero_not_nan() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vector_blob_encoding() {
        let v = vec![0.25, -1.5, 3.0];
        let bytes = encode_vector(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_vector(&bytes, 3).unwrap(), v);
        assert!(decode_vector(&bytes, 4).is_err());
    }
}
