//! Embedding comparison

use crate::error::ProctorError;

/// Cosine similarity of two embeddings, in [-1, 1].
///
/// Vectors of different length cannot be compared. A zero-norm vector has
/// similarity 0 with everything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, ProctorError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(ProctorError::IncompatibleEmbedding {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return Ok(0.0);
    }
    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Element-wise mean of enrollment embeddings
pub fn centroid(embeddings: &[Vec<f32>]) -> Result<Vec<f32>, ProctorError> {
    let first = embeddings
        .first()
        .ok_or_else(|| ProctorError::InvalidConfig("no enrollment embeddings".to_string()))?;
    let dim = first.len();

    let mut sum = vec![0.0f64; dim];
    for embedding in embeddings {
        if embedding.len() != dim || dim == 0 {
            return Err(ProctorError::IncompatibleEmbedding {
                expected: dim,
                actual: embedding.len(),
            });
        }
        for (acc, &v) in sum.iter_mut().zip(embedding) {
            *acc += v as f64;
        }
    }

    let n = embeddings.len() as f64;
    Ok(sum.into_iter().map(|s| (s / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).unwrap().abs() < 1e-9);
        assert!((cosine_similarity(&a, &[-2.0, 0.0, 0.0]).unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_is_scale_invariant() {
        let a = [0.3, 0.4, 0.5];
        let b = [3.0, 4.0, 5.0];
        assert!((cosine_similarity(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_incompatible() {
        let err = cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(
            err,
            ProctorError::IncompatibleEmbedding {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_centroid_is_mean() {
        let c = centroid(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]]).unwrap();
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!((c[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_rejects_mixed_lengths_and_empty() {
        assert!(centroid(&[]).is_err());
        assert!(matches!(
            centroid(&[vec![1.0, 0.0], vec![1.0]]),
            Err(ProctorError::IncompatibleEmbedding { .. })
        ));
    }
}
