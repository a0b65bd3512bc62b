//! Storage adapters over the shared SQLite connection.
//!
//! [`vector::VectorStore`] is the dense index (records + vec0 KNN) and
//! [`lexical::LexicalIndex`] is the BM25 index (FTS5). They are distinct
//! components even though they share one database file: the ingestion
//! pipeline writes the vector side first and compensates on lexical
//! failure, and the consolidation orphan sweep reconciles the two.

pub mod lexical;
pub mod vector;

pub use lexical::{LexicalHit, LexicalIndex};
pub use vector::{MetadataFilter, VecRecord, VectorHit, VectorStore};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Convert raw bytes back to an f32 embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// Cosine similarity between two vectors. Returns 0.0 on mismatch or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// For L2-normalized vectors: L2_dist = sqrt(2 * (1 - cosine)), so
/// cosine = 1 - dist^2 / 2.
pub fn l2_distance_to_cosine(distance: f64) -> f64 {
    (1.0 - distance * distance / 2.0).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_byte_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        let bytes = embedding_to_bytes(&v).to_vec();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), v);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.6f32, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn l2_to_cosine_conversion() {
        // identical normalized vectors: distance 0 → cosine 1
        assert!((l2_distance_to_cosine(0.0) - 1.0).abs() < 1e-9);
        // orthogonal normalized vectors: distance sqrt(2) → cosine 0
        assert!(l2_distance_to_cosine(std::f64::consts::SQRT_2).abs() < 1e-9);
    }
}
