use crate::lsh::CandidatePair;
use lsh_dedup_corpus::dto::{DocId, DuplicateRecord, DuplicateStats};
use lsh_dedup_corpus::error::{DedupError, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::warn;

/// Keep/drop decision for one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocStatus {
    Kept,
    /// Dropped as a duplicate of `kept`.
    Dropped { kept: DocId },
}

///
/// Union-find over the documents that have signatures. Candidate pairs are
/// merged in any order; connected components of two or more documents
/// become duplicate clusters.
///
pub struct ClusterBuilder {
    /// Dense index of every known document id
    index: FxHashMap<DocId, usize>,
    ids: Vec<DocId>,
    parent: Vec<usize>,
    rank: Vec<u8>,
    malformed_pairs: usize,
}

impl ClusterBuilder {
    pub fn new<I: IntoIterator<Item = DocId>>(ids: I) -> Self {
        let mut builder = ClusterBuilder {
            index: FxHashMap::default(),
            ids: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
            malformed_pairs: 0,
        };
        for id in ids {
            if !builder.index.contains_key(&id) {
                builder.index.insert(id, builder.ids.len());
                builder.parent.push(builder.ids.len());
                builder.rank.push(0);
                builder.ids.push(id);
            }
        }
        builder
    }

    /// Unions the two documents of `pair`. Repeated pairs are no-ops.
    pub fn add_pair(&mut self, pair: CandidatePair) -> Result<()> {
        let CandidatePair(a, b) = pair;
        let lookup = |id: DocId| {
            self.index
                .get(&id)
                .copied()
                .ok_or_else(|| DedupError::MalformedCandidatePair { a, b, unknown: id })
        };
        let (x, y) = (lookup(a)?, lookup(b)?);
        self.union(x, y);
        Ok(())
    }

    /// Adds every pair, counting and skipping malformed ones.
    pub fn extend<I: IntoIterator<Item = CandidatePair>>(&mut self, pairs: I) {
        for pair in pairs {
            if let Err(err) = self.add_pair(pair) {
                warn!("Skipping candidate pair: {err}");
                self.malformed_pairs += 1;
            }
        }
    }

    pub fn malformed_pairs(&self) -> usize {
        self.malformed_pairs
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, x: usize, y: usize) {
        let (rx, ry) = (self.find(x), self.find(y));
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }

    /// Consolidates the components into a [`DuplicateSet`]. In every cluster
    /// the lowest document id is kept and the rest are dropped.
    pub fn build(mut self) -> DuplicateSet {
        let mut components: FxHashMap<usize, Vec<DocId>> = FxHashMap::default();
        for x in 0..self.ids.len() {
            let root = self.find(x);
            components.entry(root).or_default().push(self.ids[x]);
        }
        let mut clusters: Vec<Vec<DocId>> = components
            .into_values()
            .filter(|members| members.len() > 1)
            .map(|mut members| {
                members.sort_unstable();
                members
            })
            .collect();
        clusters.sort_unstable_by_key(|members| members[0]);
        DuplicateSet::from_clusters(clusters)
    }
}

///
/// Final duplicate assignment: a flat `dropped -> kept` lookup plus the
/// clusters it was derived from. Read-only once built.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DuplicateSet {
    dropped: FxHashMap<DocId, DocId>,
    /// Sorted members of each cluster, ordered by kept id
    clusters: Vec<Vec<DocId>>,
}

impl DuplicateSet {
    fn from_clusters(clusters: Vec<Vec<DocId>>) -> Self {
        let mut dropped = FxHashMap::default();
        for members in &clusters {
            let kept = members[0];
            for &id in &members[1..] {
                dropped.insert(id, kept);
            }
        }
        DuplicateSet { dropped, clusters }
    }

    /// Rebuilds a set from persisted records. Clusters are regrouped by
    /// their kept id.
    pub fn from_records<I: IntoIterator<Item = DuplicateRecord>>(records: I) -> Self {
        let mut grouped: BTreeMap<DocId, Vec<DocId>> = BTreeMap::new();
        for DuplicateRecord { dropped, kept } in records {
            grouped.entry(kept).or_default().push(dropped);
        }
        let clusters = grouped
            .into_iter()
            .map(|(kept, mut members)| {
                members.push(kept);
                members.sort_unstable();
                members.dedup();
                members
            })
            .collect();
        DuplicateSet::from_clusters(clusters)
    }

    pub fn status(&self, id: DocId) -> DocStatus {
        match self.dropped.get(&id) {
            Some(&kept) => DocStatus::Dropped { kept },
            None => DocStatus::Kept,
        }
    }

    #[inline]
    pub fn is_dropped(&self, id: DocId) -> bool {
        self.dropped.contains_key(&id)
    }

    pub fn kept_for(&self, id: DocId) -> Option<DocId> {
        self.dropped.get(&id).copied()
    }

    pub fn clusters(&self) -> &[Vec<DocId>] {
        &self.clusters
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    /// cluster size -> number of clusters
    pub fn cluster_sizes(&self) -> BTreeMap<usize, usize> {
        let mut sizes = BTreeMap::new();
        for members in &self.clusters {
            *sizes.entry(members.len()).or_insert(0) += 1;
        }
        sizes
    }

    /// `dropped -> kept` records ordered by dropped id.
    pub fn records(&self) -> Vec<DuplicateRecord> {
        let mut records: Vec<DuplicateRecord> = self
            .dropped
            .iter()
            .map(|(&dropped, &kept)| DuplicateRecord { dropped, kept })
            .collect();
        records.sort_unstable_by_key(|record| record.dropped);
        records
    }

    pub fn stats(&self, threshold: f64) -> DuplicateStats {
        DuplicateStats {
            total_duplicates: self.dropped_count(),
            total_clusters: self.clusters.len(),
            threshold,
            cluster_sizes: self.cluster_sizes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(ids: std::ops::Range<DocId>, pairs: &[(DocId, DocId)]) -> DuplicateSet {
        let mut builder = ClusterBuilder::new(ids);
        builder.extend(pairs.iter().map(|&(a, b)| CandidatePair::new(a, b)));
        builder.build()
    }

    #[test]
    fn transitive_pairs_form_one_cluster() {
        let set = cluster(0..5, &[(4, 2), (2, 3)]);
        assert_eq!(set.clusters(), &[vec![2, 3, 4]]);
        assert_eq!(set.status(2), DocStatus::Kept);
        assert_eq!(set.status(3), DocStatus::Dropped { kept: 2 });
        assert_eq!(set.status(4), DocStatus::Dropped { kept: 2 });
        assert_eq!(set.status(0), DocStatus::Kept);
        assert_eq!(set.dropped_count(), 2);
    }

    #[test]
    fn singletons_are_never_clusters() {
        let set = cluster(0..4, &[]);
        assert!(set.clusters().is_empty());
        assert!((0..4).all(|id| !set.is_dropped(id)));
    }

    #[test]
    fn order_and_repeats_do_not_matter() {
        let pairs = [(1, 7), (7, 3), (9, 8), (1, 7), (5, 6), (3, 1), (8, 9)];
        let expected = cluster(0..10, &pairs);
        let mut reversed = pairs;
        reversed.reverse();
        assert_eq!(cluster(0..10, &reversed), expected);
        let mut rotated = pairs;
        rotated.rotate_left(3);
        assert_eq!(cluster(0..10, &rotated), expected);
        assert_eq!(
            expected.clusters(),
            &[vec![1, 3, 7], vec![5, 6], vec![8, 9]]
        );
    }

    #[test]
    fn malformed_pairs_are_counted_and_skipped() {
        let mut builder = ClusterBuilder::new([1, 2, 3]);
        let err = builder.add_pair(CandidatePair::new(2, 40)).unwrap_err();
        assert!(matches!(
            err,
            DedupError::MalformedCandidatePair { unknown: 40, .. }
        ));
        builder.extend([CandidatePair::new(1, 99), CandidatePair::new(1, 2)]);
        assert_eq!(builder.malformed_pairs(), 1);
        let set = builder.build();
        assert_eq!(set.clusters(), &[vec![1, 2]]);
        assert!(!set.is_dropped(3));
    }

    #[test]
    fn records_round_trip() {
        let set = cluster(0..10, &[(1, 7), (7, 3), (8, 9)]);
        let records = set.records();
        assert_eq!(
            records,
            vec![
                DuplicateRecord { dropped: 3, kept: 1 },
                DuplicateRecord { dropped: 7, kept: 1 },
                DuplicateRecord { dropped: 9, kept: 8 },
            ]
        );
        assert_eq!(DuplicateSet::from_records(records), set);
        let stats = set.stats(0.5);
        assert_eq!(stats.total_duplicates, 3);
        assert_eq!(stats.total_clusters, 2);
        assert_eq!(stats.cluster_sizes, BTreeMap::from([(2, 1), (3, 1)]));
    }
}
