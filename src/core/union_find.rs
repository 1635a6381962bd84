use crate::core::models::{AssetId, FeatureVector, SimilarPhotoGroup};
use crate::core::similarity::SimilarityCalculator;
use std::collections::HashMap;

/// Disjoint sets over `0..n` with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // compress
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// Merges the sets holding `a` and `b`. Returns false if they were
    /// already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
        true
    }

    pub fn is_connected(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// All sets, each listed in ascending element order and ordered by their
    /// smallest element.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut slot_of: HashMap<usize, usize> = HashMap::new();
        let mut components: Vec<Vec<usize>> = Vec::new();
        for x in 0..self.parent.len() {
            let root = self.find(x);
            let slot = *slot_of.entry(root).or_insert_with(|| {
                components.push(Vec::new());
                components.len() - 1
            });
            components[slot].push(x);
        }
        components
    }
}

/// Turns LSH candidate pairs into verified similar-photo groups.
#[derive(Debug, Clone)]
pub struct CandidateGrouper {
    similarity_threshold: f32,
    minimum_group_size: usize,
    calculator: SimilarityCalculator,
}

impl CandidateGrouper {
    pub fn new(similarity_threshold: f32, minimum_group_size: usize) -> Self {
        Self {
            similarity_threshold,
            minimum_group_size: minimum_group_size.max(2),
            calculator: SimilarityCalculator::new(),
        }
    }

    pub fn with_calculator(mut self, calculator: SimilarityCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Verifies `pairs` (indices into `items`), joins every pair meeting the
    /// threshold, and returns components of at least the minimum size.
    pub fn group(
        &self,
        items: &[(AssetId, FeatureVector)],
        pairs: &[(usize, usize)],
    ) -> Vec<SimilarPhotoGroup> {
        let vectors: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
        let edges = self
            .calculator
            .verify_pairs(&vectors, pairs, self.similarity_threshold);
        self.group_verified(items, &edges)
    }

    /// Same as [`group`](Self::group) for edges that were already scored.
    pub fn group_verified(
        &self,
        items: &[(AssetId, FeatureVector)],
        edges: &[(usize, usize, f32)],
    ) -> Vec<SimilarPhotoGroup> {
        let mut sets = UnionFind::new(items.len());
        for &(a, b, _) in edges {
            sets.union(a, b);
        }

        let mut edge_stats: HashMap<usize, (f32, usize)> = HashMap::new();
        for &(a, _, similarity) in edges {
            let root = sets.find(a);
            let entry = edge_stats.entry(root).or_insert((0.0, 0));
            entry.0 += similarity;
            entry.1 += 1;
        }

        sets.components()
            .into_iter()
            .filter(|component| component.len() >= self.minimum_group_size)
            .map(|component| {
                let root = sets.find(component[0]);
                let (sum, count) = edge_stats.get(&root).copied().unwrap_or((0.0, 0));
                let average = if count > 0 { sum / count as f32 } else { 0.0 };
                let ids = component.iter().map(|&i| items[i].0.clone()).collect();
                SimilarPhotoGroup::new(ids, average, count)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, values: Vec<f32>) -> (AssetId, FeatureVector) {
        (id.to_string(), FeatureVector::new(values).unwrap())
    }

    #[test]
    fn test_nothing_connected_initially() {
        let mut sets = UnionFind::new(4);
        for a in 0..4 {
            for b in 0..4 {
                assert_eq!(sets.is_connected(a, b), a == b);
            }
        }
    }

    #[test]
    fn test_union_is_transitive() {
        let mut sets = UnionFind::new(5);
        assert!(sets.union(0, 1));
        assert!(sets.union(1, 2));
        assert!(!sets.union(0, 2));

        assert!(sets.is_connected(0, 2));
        assert!(!sets.is_connected(0, 3));
        assert_eq!(sets.components(), vec![vec![0, 1, 2], vec![3], vec![4]]);
    }

    #[test]
    fn test_long_chain_compresses() {
        let mut sets = UnionFind::new(1000);
        for i in 0..999 {
            sets.union(i, i + 1);
        }
        let root = sets.find(999);
        assert_eq!(sets.find(0), root);
        assert_eq!(sets.components().len(), 1);
    }

    #[test]
    fn test_grouper_joins_transitively() {
        // a~b and b~c pass, a~c is never compared
        let items = vec![
            item("a", vec![1.0, 0.0, 0.0]),
            item("b", vec![0.95, 0.3, 0.0]),
            item("c", vec![0.85, 0.55, 0.0]),
            item("d", vec![0.0, 0.0, 1.0]),
        ];
        let grouper = CandidateGrouper::new(0.9, 2);
        let groups = grouper.group(&items, &[(0, 1), (1, 2), (0, 3)]);

        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups[0].photo_ids,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert_eq!(groups[0].pair_count, 2);
        assert!(groups[0].average_similarity >= 0.9);
        assert!(groups[0].average_similarity <= 1.0);
    }

    #[test]
    fn test_grouper_drops_small_components() {
        let items = vec![
            item("a", vec![1.0, 0.0]),
            item("b", vec![1.0, 0.01]),
            item("c", vec![0.0, 1.0]),
            item("d", vec![0.01, 1.0]),
            item("e", vec![0.02, 1.0]),
        ];
        let grouper = CandidateGrouper::new(0.95, 3);
        let groups = grouper.group(&items, &[(0, 1), (2, 3), (3, 4)]);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].photo_ids.len(), 3);
        assert_eq!(groups[0].photo_ids[0], "c");
    }
}
