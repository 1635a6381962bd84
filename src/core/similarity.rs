//! Exact cosine similarity between feature vectors, remapped to [0, 1].
//!
//! Negative cosines are clamped to 0, so orthogonal and opposed vectors both
//! score 0 and identical directions score 1. Two kernels compute the same
//! quantity: a scalar reference accumulating in f64, and an AVX2 kernel on
//! x86_64 (with an 8-lane portable fallback elsewhere). They must agree to
//! within [`SIMD_TOLERANCE`].

use crate::core::models::decode_f32_buffer;
use crate::error::{AnalysisError, AnalysisResult};

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

pub const SIMD_TOLERANCE: f32 = 1e-4;

const NORM_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityKernel {
    Scalar,
    Simd,
}

#[derive(Debug, Clone)]
pub struct SimilarityCalculator {
    kernel: SimilarityKernel,
}

impl SimilarityCalculator {
    pub fn new() -> Self {
        Self {
            kernel: SimilarityKernel::Simd,
        }
    }

    pub fn with_kernel(kernel: SimilarityKernel) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> SimilarityKernel {
        self.kernel
    }

    /// Similarity of two raw little-endian f32 buffers.
    pub fn cosine_similarity(&self, a: &[u8], b: &[u8]) -> AnalysisResult<f32> {
        if a.len() != b.len() {
            return Err(AnalysisError::DimensionMismatch {
                left: a.len() / 4,
                right: b.len() / 4,
            });
        }
        let a = decode_f32_buffer(a)?;
        let b = decode_f32_buffer(b)?;
        self.similarity(&a, &b)
    }

    pub fn similarity(&self, a: &[f32], b: &[f32]) -> AnalysisResult<f32> {
        validate(a, b)?;
        let (dot, norm_a, norm_b) = match self.kernel {
            SimilarityKernel::Scalar => dot_and_norms_scalar(a, b),
            SimilarityKernel::Simd => dot_and_norms_simd(a, b),
        };
        finish(dot, norm_a, norm_b)
    }

    /// Pairwise similarities for a small set; the diagonal is 1.0.
    pub fn similarity_matrix(&self, vectors: &[&[f32]]) -> AnalysisResult<Vec<Vec<f32>>> {
        let n = vectors.len();
        let mut matrix = vec![vec![0.0f32; n]; n];
        for i in 0..n {
            matrix[i][i] = 1.0;
            for j in (i + 1)..n {
                let s = self.similarity(vectors[i], vectors[j])?;
                matrix[i][j] = s;
                matrix[j][i] = s;
            }
        }
        Ok(matrix)
    }

    /// Scores candidate pairs and keeps those reaching `threshold`.
    ///
    /// A pair whose vectors cannot be compared is skipped with a warning so
    /// one malformed vector does not sink the whole batch.
    pub fn verify_pairs(
        &self,
        vectors: &[&[f32]],
        pairs: &[(usize, usize)],
        threshold: f32,
    ) -> Vec<(usize, usize, f32)> {
        pairs
            .iter()
            .filter_map(|&(a, b)| match self.similarity(vectors[a], vectors[b]) {
                Ok(s) if s >= threshold => Some((a, b, s)),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("Skipping candidate pair ({}, {}): {}", a, b, e);
                    None
                }
            })
            .collect()
    }
}

impl Default for SimilarityCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(a: &[f32], b: &[f32]) -> AnalysisResult<()> {
    if a.is_empty() || b.is_empty() {
        return Err(AnalysisError::invalid_input("cannot compare empty vectors"));
    }
    if a.len() != b.len() {
        return Err(AnalysisError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

fn finish(dot: f64, norm_a: f64, norm_b: f64) -> AnalysisResult<f32> {
    if norm_a <= NORM_EPSILON || norm_b <= NORM_EPSILON {
        return Err(AnalysisError::invalid_input(
            "cosine similarity is undefined for a zero-magnitude vector",
        ));
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !cosine.is_finite() {
        return Err(AnalysisError::invalid_input("vector contains non-finite values"));
    }
    Ok(cosine.clamp(0.0, 1.0) as f32)
}

/// Returns `(a.b, |a|^2, |b|^2)`.
pub(crate) fn dot_and_norms_scalar(a: &[f32], b: &[f32]) -> (f64, f64, f64) {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    (dot, norm_a, norm_b)
}

pub(crate) fn dot_and_norms_simd(a: &[f32], b: &[f32]) -> (f64, f64, f64) {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return unsafe { dot_and_norms_avx2(a, b) };
        }
    }
    dot_and_norms_lanes(a, b)
}

/// Eight independent accumulators, the shape the compiler vectorizes.
fn dot_and_norms_lanes(a: &[f32], b: &[f32]) -> (f64, f64, f64) {
    let mut dot = [0.0f32; 8];
    let mut norm_a = [0.0f32; 8];
    let mut norm_b = [0.0f32; 8];

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let tail_a = chunks_a.remainder();
    let tail_b = chunks_b.remainder();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..8 {
            dot[lane] += ca[lane] * cb[lane];
            norm_a[lane] += ca[lane] * ca[lane];
            norm_b[lane] += cb[lane] * cb[lane];
        }
    }

    let mut totals = (
        dot.iter().map(|&v| v as f64).sum::<f64>(),
        norm_a.iter().map(|&v| v as f64).sum::<f64>(),
        norm_b.iter().map(|&v| v as f64).sum::<f64>(),
    );
    for (&x, &y) in tail_a.iter().zip(tail_b) {
        totals.0 += (x * y) as f64;
        totals.1 += (x * x) as f64;
        totals.2 += (y * y) as f64;
    }
    totals
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn dot_and_norms_avx2(a: &[f32], b: &[f32]) -> (f64, f64, f64) {
    unsafe {
        let mut dot_v = _mm256_setzero_ps();
        let mut norm_a_v = _mm256_setzero_ps();
        let mut norm_b_v = _mm256_setzero_ps();

        let chunks_a = a.chunks_exact(8);
        let chunks_b = b.chunks_exact(8);
        let tail_a = chunks_a.remainder();
        let tail_b = chunks_b.remainder();

        for (ca, cb) in chunks_a.zip(chunks_b) {
            let va = _mm256_loadu_ps(ca.as_ptr());
            let vb = _mm256_loadu_ps(cb.as_ptr());
            dot_v = _mm256_add_ps(dot_v, _mm256_mul_ps(va, vb));
            norm_a_v = _mm256_add_ps(norm_a_v, _mm256_mul_ps(va, va));
            norm_b_v = _mm256_add_ps(norm_b_v, _mm256_mul_ps(vb, vb));
        }

        let mut dot = [0.0f32; 8];
        let mut norm_a = [0.0f32; 8];
        let mut norm_b = [0.0f32; 8];
        _mm256_storeu_ps(dot.as_mut_ptr(), dot_v);
        _mm256_storeu_ps(norm_a.as_mut_ptr(), norm_a_v);
        _mm256_storeu_ps(norm_b.as_mut_ptr(), norm_b_v);

        let mut totals = (
            dot.iter().map(|&v| v as f64).sum::<f64>(),
            norm_a.iter().map(|&v| v as f64).sum::<f64>(),
            norm_b.iter().map(|&v| v as f64).sum::<f64>(),
        );
        for (&x, &y) in tail_a.iter().zip(tail_b) {
            totals.0 += (x * y) as f64;
            totals.1 += (x * x) as f64;
            totals.2 += (y * y) as f64;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
    }

    fn to_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_identical_vectors_score_one() {
        let mut rng = StdRng::seed_from_u64(1);
        let calculator = SimilarityCalculator::new();
        for dim in [7, 512, 2048] {
            let v = random_vector(&mut rng, dim);
            let s = calculator.similarity(&v, &v).unwrap();
            assert!((s - 1.0).abs() < 1e-3, "got {}", s);
        }
    }

    #[test]
    fn test_symmetric_and_in_range() {
        let mut rng = StdRng::seed_from_u64(2);
        let calculator = SimilarityCalculator::new();
        for _ in 0..20 {
            let a = random_vector(&mut rng, 256);
            let b = random_vector(&mut rng, 256);
            let ab = calculator.similarity(&a, &b).unwrap();
            let ba = calculator.similarity(&b, &a).unwrap();
            assert_eq!(ab, ba);
            assert!((0.0..=1.0).contains(&ab));
        }
    }

    #[test]
    fn test_opposed_vectors_score_low() {
        let a = vec![1.0f32, 2.0, -3.0, 0.5];
        let b: Vec<f32> = a.iter().map(|v| -v).collect();
        let s = SimilarityCalculator::new().similarity(&a, &b).unwrap();
        assert!(s < 0.2);
    }

    #[test]
    fn test_simd_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(3);
        let scalar = SimilarityCalculator::with_kernel(SimilarityKernel::Scalar);
        let simd = SimilarityCalculator::with_kernel(SimilarityKernel::Simd);

        for dim in [1, 5, 8, 13, 512, 2048] {
            for _ in 0..12 {
                let a = random_vector(&mut rng, dim);
                let b: Vec<f32> = a
                    .iter()
                    .map(|v| v * 0.8 + rng.random_range(-0.4f32..0.4))
                    .collect();
                let expected = scalar.similarity(&a, &b).unwrap();
                let actual = simd.similarity(&a, &b).unwrap();
                assert!(
                    (expected - actual).abs() <= SIMD_TOLERANCE,
                    "dim {}: scalar {} simd {}",
                    dim,
                    expected,
                    actual
                );
            }
        }
    }

    #[test]
    fn test_lane_fallback_matches_scalar() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..10 {
            let a = random_vector(&mut rng, 1031);
            let b = random_vector(&mut rng, 1031);
            let (d1, na1, nb1) = dot_and_norms_scalar(&a, &b);
            let (d2, na2, nb2) = dot_and_norms_lanes(&a, &b);
            let c1 = d1 / (na1.sqrt() * nb1.sqrt());
            let c2 = d2 / (na2.sqrt() * nb2.sqrt());
            assert!((c1 - c2).abs() < 1e-4);
        }
    }

    #[test]
    fn test_errors() {
        let calculator = SimilarityCalculator::new();

        assert!(matches!(
            calculator.similarity(&[1.0, 2.0], &[1.0]),
            Err(AnalysisError::DimensionMismatch { left: 2, right: 1 })
        ));
        assert!(matches!(
            calculator.similarity(&[], &[]),
            Err(AnalysisError::InvalidInput { .. })
        ));
        assert!(matches!(
            calculator.similarity(&[0.0, 0.0], &[1.0, 1.0]),
            Err(AnalysisError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_raw_buffers() {
        let calculator = SimilarityCalculator::new();
        let a = to_bytes(&[1.0, 0.0, 0.0]);
        let b = to_bytes(&[1.0, 1.0, 0.0]);

        let s = calculator.cosine_similarity(&a, &b).unwrap();
        assert!((s - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);

        assert!(matches!(
            calculator.cosine_similarity(&a, &to_bytes(&[1.0, 0.0])),
            Err(AnalysisError::DimensionMismatch { .. })
        ));
        assert!(calculator.cosine_similarity(&[1, 2, 3], &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_verify_pairs_filters_by_threshold() {
        let a = [1.0f32, 0.0];
        let b = [0.99f32, 0.1];
        let c = [0.0f32, 1.0];
        let vectors: Vec<&[f32]> = vec![&a, &b, &c];

        let verified =
            SimilarityCalculator::new().verify_pairs(&vectors, &[(0, 1), (0, 2), (1, 2)], 0.9);
        assert_eq!(verified.len(), 1);
        assert_eq!((verified[0].0, verified[0].1), (0, 1));
    }

    #[test]
    fn test_similarity_matrix() {
        let a = [1.0f32, 0.0];
        let b = [0.0f32, 1.0];
        let matrix = SimilarityCalculator::new()
            .similarity_matrix(&[&a, &b])
            .unwrap();
        assert_eq!(matrix[0][0], 1.0);
        assert_eq!(matrix[0][1], matrix[1][0]);
        assert!(matrix[0][1] < 1e-6);
    }
}
