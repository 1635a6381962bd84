//! Random-hyperplane LSH (SimHash over dense vectors).
//!
//! Each output bit is the sign of the projection of the input onto a random
//! Gaussian hyperplane, so the fraction of differing bits between two hashes
//! estimates the angle between their vectors divided by π. Vectors that point
//! the same way land in the same bucket with high probability, which lets the
//! grouper compare only bucket-mates instead of every pair.
//!
//! Hyperplanes are drawn from `StdRng` seeded with `(seed, dimension)`, and
//! cached per dimension, so a hasher accepts any vector length and two hashers
//! built with the same `(bits, seed)` agree bit for bit.

use crate::core::models::{AssetId, FeatureVector, decode_f32_buffer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

const SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Returned for empty or malformed input.
///
/// A valid vector whose projections are all non-positive also hashes to 0,
/// so this value alone does not mean the input was rejected. Use
/// [`LshHasher::try_compute_hash`] when the two cases must be told apart.
pub const INVALID_HASH: u64 = 0;

pub struct LshHasher {
    bits: u32,
    seed: u64,
    projections: RwLock<HashMap<usize, Arc<Vec<f32>>>>,
}

impl LshHasher {
    /// Create a hasher producing `bits`-wide hashes.
    ///
    /// Panics unless `1 <= bits <= 64`.
    pub fn new(bits: u32, seed: u64) -> Self {
        assert!((1..=64).contains(&bits), "bits must be 1-64");
        Self {
            bits,
            seed,
            projections: RwLock::new(HashMap::new()),
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Independent hasher for hash table `table`. Table 0 is this hasher's
    /// own configuration.
    pub fn with_table(&self, table: usize) -> Self {
        let seed = self.seed.wrapping_add((table as u64).wrapping_mul(SEED_MIX));
        Self::new(self.bits, seed)
    }

    /// Hash a raw little-endian f32 buffer.
    ///
    /// Returns [`INVALID_HASH`] when the buffer is empty or its length is not
    /// a multiple of 4 bytes.
    pub fn compute_hash(&self, bytes: &[u8]) -> u64 {
        self.try_compute_hash(bytes).unwrap_or(INVALID_HASH)
    }

    /// Like [`compute_hash`](Self::compute_hash), but `None` for a buffer
    /// that cannot be decoded.
    pub fn try_compute_hash(&self, bytes: &[u8]) -> Option<u64> {
        match decode_f32_buffer(bytes) {
            Ok(values) => Some(self.hash_vector(&values)),
            Err(e) => {
                log::debug!("Refusing to hash buffer: {}", e);
                None
            }
        }
    }

    pub fn hash_vector(&self, values: &[f32]) -> u64 {
        if values.is_empty() {
            return INVALID_HASH;
        }

        let planes = self.projections_for(values.len());
        let dim = values.len();
        let mut hash = 0u64;
        for bit in 0..self.bits as usize {
            let plane = &planes[bit * dim..(bit + 1) * dim];
            let projection: f32 = plane.iter().zip(values).map(|(p, v)| p * v).sum();
            if projection > 0.0 {
                hash |= 1u64 << bit;
            }
        }
        hash
    }

    pub fn hash_batch(&self, vectors: &[&[f32]]) -> Vec<u64> {
        vectors.par_iter().map(|v| self.hash_vector(v)).collect()
    }

    /// Buckets items by identical hash. Buckets holding a single item are
    /// dropped; the rest keep input order.
    pub fn group_by_hash(&self, items: &[(AssetId, FeatureVector)]) -> Vec<Vec<AssetId>> {
        let vectors: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
        self.bucket_indices(&vectors)
            .into_iter()
            .map(|bucket| bucket.into_iter().map(|i| items[i].0.clone()).collect())
            .collect()
    }

    /// Every unordered pair of items sharing a bucket, emitted once as
    /// `(earlier, later)` by input position.
    pub fn find_candidate_pairs(
        &self,
        items: &[(AssetId, FeatureVector)],
    ) -> Vec<(AssetId, AssetId)> {
        let vectors: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
        resolve_pairs(items, self.candidate_index_pairs(&vectors))
    }

    /// Union of candidate pairs over `number_of_hash_tables` independent
    /// tables. Adding tables can only add pairs.
    pub fn find_candidate_pairs_multi_probe(
        &self,
        items: &[(AssetId, FeatureVector)],
        number_of_hash_tables: usize,
    ) -> Vec<(AssetId, AssetId)> {
        let vectors: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
        resolve_pairs(
            items,
            self.multi_probe_index_pairs(&vectors, number_of_hash_tables),
        )
    }

    pub(crate) fn bucket_indices(&self, vectors: &[&[f32]]) -> Vec<Vec<usize>> {
        let hashes = self.hash_batch(vectors);
        let mut slot_of: HashMap<u64, usize> = HashMap::new();
        let mut buckets: Vec<Vec<usize>> = Vec::new();

        for (index, hash) in hashes.into_iter().enumerate() {
            if vectors[index].is_empty() {
                continue;
            }
            let slot = *slot_of.entry(hash).or_insert_with(|| {
                buckets.push(Vec::new());
                buckets.len() - 1
            });
            buckets[slot].push(index);
        }

        buckets.retain(|bucket| bucket.len() > 1);
        buckets
    }

    pub(crate) fn candidate_index_pairs(&self, vectors: &[&[f32]]) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for bucket in self.bucket_indices(vectors) {
            for (i, &a) in bucket.iter().enumerate() {
                for &b in &bucket[i + 1..] {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    pub(crate) fn multi_probe_index_pairs(
        &self,
        vectors: &[&[f32]],
        number_of_hash_tables: usize,
    ) -> Vec<(usize, usize)> {
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for table in 0..number_of_hash_tables.max(1) {
            let hasher = self.with_table(table);
            seen.extend(hasher.candidate_index_pairs(vectors));
        }
        let mut pairs: Vec<(usize, usize)> = seen.into_iter().collect();
        pairs.sort_unstable();
        pairs
    }

    fn projections_for(&self, dim: usize) -> Arc<Vec<f32>> {
        if let Ok(cache) = self.projections.read() {
            if let Some(planes) = cache.get(&dim) {
                return planes.clone();
            }
        }

        let planes = Arc::new(generate_hyperplanes(self.bits, dim, self.seed));
        if let Ok(mut cache) = self.projections.write() {
            cache.entry(dim).or_insert_with(|| planes.clone());
        }
        planes
    }
}

impl Clone for LshHasher {
    fn clone(&self) -> Self {
        Self::new(self.bits, self.seed)
    }
}

impl std::fmt::Debug for LshHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LshHasher")
            .field("bits", &self.bits)
            .field("seed", &self.seed)
            .finish()
    }
}

impl Default for LshHasher {
    fn default() -> Self {
        Self::new(64, 42)
    }
}

/// Number of differing bits.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Row-major `bits x dim` matrix of standard normal samples.
fn generate_hyperplanes(bits: u32, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed ^ (dim as u64).wrapping_mul(SEED_MIX));
    let total = bits as usize * dim;
    let mut planes = Vec::with_capacity(total);

    // Box-Muller yields two independent normals per draw.
    while planes.len() < total {
        let u1: f64 = 1.0 - rng.random::<f64>();
        let u2: f64 = rng.random::<f64>();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;
        planes.push((radius * theta.cos()) as f32);
        if planes.len() < total {
            planes.push((radius * theta.sin()) as f32);
        }
    }
    planes
}

fn resolve_pairs(
    items: &[(AssetId, FeatureVector)],
    pairs: Vec<(usize, usize)>,
) -> Vec<(AssetId, AssetId)> {
    pairs
        .into_iter()
        .map(|(a, b)| (items[a].0.clone(), items[b].0.clone()))
        .collect()
}
