use crate::minhash::Signature;
use crate::store::SignatureStore;
use lsh_dedup_corpus::dto::{DedupConfig, DocId};
use lsh_dedup_corpus::error::{DedupError, Result};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

/// Banding of a signature into `num_bands` bands of `rows_per_band` slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LshParams {
    pub num_bands: usize,
    pub rows_per_band: usize,
}

impl LshParams {
    /// Picks the banding whose S-curve threshold `(1/b)^(1/r)` lies closest
    /// to `threshold`. Ties go to the larger band count.
    ///
    /// ## Arguments
    ///
    /// * `num_perm` - Signature length; `num_bands * rows_per_band` always equals it.
    /// * `threshold` - Jaccard similarity at which documents should start
    /// becoming candidates.
    ///
    pub fn optimal(num_perm: usize, threshold: f64) -> Result<Self> {
        if num_perm == 0 {
            return Err(DedupError::invalid_config("numPerm must be >= 1"));
        }
        let mut best = LshParams {
            num_bands: 1,
            rows_per_band: num_perm,
        };
        let mut best_error = f64::INFINITY;
        for num_bands in (1..=num_perm).filter(|b| num_perm % b == 0) {
            let params = LshParams {
                num_bands,
                rows_per_band: num_perm / num_bands,
            };
            let error = (threshold - params.threshold()).abs();
            if error <= best_error {
                best = params;
                best_error = error;
            }
        }
        Ok(best)
    }

    pub fn explicit(num_perm: usize, num_bands: usize) -> Result<Self> {
        if num_bands == 0 || num_perm % num_bands != 0 {
            return Err(DedupError::invalid_config(format!(
                "numBands ({num_bands}) must divide numPerm ({num_perm})"
            )));
        }
        Ok(LshParams {
            num_bands,
            rows_per_band: num_perm / num_bands,
        })
    }

    pub fn from_config(config: &DedupConfig) -> Result<Self> {
        match config.num_bands {
            Some(num_bands) => Self::explicit(config.num_perm, num_bands),
            None => Self::optimal(config.num_perm, config.threshold),
        }
    }

    pub fn num_perm(&self) -> usize {
        self.num_bands * self.rows_per_band
    }

    /// Similarity at which the S-curve is steepest, approximately where
    /// the candidate probability crosses 0.5.
    pub fn threshold(&self) -> f64 {
        (1.0 / self.num_bands as f64).powf(1.0 / self.rows_per_band as f64)
    }

    /// Probability that two documents of jaccard similarity `s` share at
    /// least one bucket.
    pub fn collision_probability(&self, s: f64) -> f64 {
        1.0 - (1.0 - s.powi(self.rows_per_band as i32)).powi(self.num_bands as i32)
    }

    #[inline]
    fn band<'s>(&self, signature: &'s Signature, band: usize) -> &'s [u64] {
        let start = band * self.rows_per_band;
        &signature.hash_values[start..start + self.rows_per_band]
    }
}

/// Two documents sharing a bucket in at least one band, stored low id first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CandidatePair(pub DocId, pub DocId);

impl CandidatePair {
    pub fn new(a: DocId, b: DocId) -> Self {
        if a <= b {
            CandidatePair(a, b)
        } else {
            CandidatePair(b, a)
        }
    }
}

type BandTable<'a> = FxHashMap<&'a [u64], Vec<DocId>>;

/// Banded hash tables over every signature of a store. Bucket keys are the
/// band slices themselves, so documents share a bucket only on an exact
/// band match.
#[derive(Clone)]
pub struct LshIndex<'a> {
    params: LshParams,
    hash_tables: Vec<BandTable<'a>>,
}

impl<'a> LshIndex<'a> {
    /// Builds every band table, one band per task.
    ///
    /// ## Arguments
    ///
    /// * `store` - The signatures to index. Bucket keys borrow from it.
    /// * `params` - Banding of each signature.
    pub fn build(store: &'a SignatureStore, params: LshParams) -> Self {
        let hash_tables = (0..params.num_bands)
            .into_par_iter()
            .map(|band| build_band(store, params, band))
            .collect();
        LshIndex {
            params,
            hash_tables,
        }
    }

    pub fn params(&self) -> LshParams {
        self.params
    }

    /// Ids sharing at least one bucket with `signature`, ascending.
    pub fn query(&self, signature: &Signature) -> Vec<DocId> {
        if signature.num_perm() != self.params.num_perm() {
            return Vec::new();
        }
        let candidates: FxHashSet<DocId> = self
            .hash_tables
            .iter()
            .enumerate()
            .fold(FxHashSet::default(), |mut doc_set, (band, table)| {
                if let Some(docs) = table.get(self.params.band(signature, band)) {
                    doc_set.extend(docs);
                }
                doc_set
            });
        let mut candidates: Vec<DocId> = candidates.into_iter().collect();
        candidates.sort_unstable();
        candidates
    }

    /// Members of the bucket `signature` falls into in `band`.
    pub fn bucket(&self, band: usize, signature: &Signature) -> &[DocId] {
        if band >= self.params.num_bands || signature.num_perm() != self.params.num_perm() {
            return &[];
        }
        self.hash_tables[band]
            .get(self.params.band(signature, band))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Candidate pairs of every band, in band order.
    pub fn candidate_pairs(&self) -> Vec<CandidatePair> {
        self.hash_tables.iter().flat_map(bucket_pairs).collect()
    }
}

/// Candidate pairs of all bands. Each band is built and drained by its own
/// task; per-band results are concatenated in band order afterwards.
pub fn candidate_pairs(store: &SignatureStore, params: LshParams) -> Vec<CandidatePair> {
    let start = std::time::Instant::now();
    let per_band: Vec<Vec<CandidatePair>> = (0..params.num_bands)
        .into_par_iter()
        .map(|band| bucket_pairs(&build_band(store, params, band)))
        .collect();
    let pairs: Vec<CandidatePair> = per_band.into_iter().flatten().collect();
    info!(
        bands = params.num_bands,
        rows = params.rows_per_band,
        pairs = pairs.len(),
        "Banded signatures in {:.4} secs",
        start.elapsed().as_secs_f64()
    );
    pairs
}

/// Builds one band table at a time and hands its pairs to `f` before the
/// next band is built, so only a single table is ever resident.
pub fn for_each_band_pairs<F>(store: &SignatureStore, params: LshParams, mut f: F)
where
    F: FnMut(usize, Vec<CandidatePair>),
{
    for band in 0..params.num_bands {
        let pairs = bucket_pairs(&build_band(store, params, band));
        debug!("Band {band}: {} candidate pairs", pairs.len());
        f(band, pairs);
    }
}

fn build_band(store: &SignatureStore, params: LshParams, band: usize) -> BandTable<'_> {
    let mut table = BandTable::default();
    for (id, signature) in store.iter() {
        if signature.num_perm() != params.num_perm() {
            continue;
        }
        table
            .entry(params.band(signature, band))
            .or_insert_with(Vec::new)
            .push(id);
    }
    table
}

/// Every pair within each bucket of two or more members. Buckets are
/// visited in order of their lowest member so the output is deterministic.
fn bucket_pairs(table: &BandTable<'_>) -> Vec<CandidatePair> {
    let mut buckets: Vec<&Vec<DocId>> = table.values().filter(|docs| docs.len() > 1).collect();
    buckets.sort_unstable_by_key(|docs| docs[0]);
    let mut pairs = Vec::new();
    for docs in buckets {
        for (i, &a) in docs.iter().enumerate() {
            for &b in &docs[i + 1..] {
                pairs.push(CandidatePair::new(a, b));
            }
        }
    }
    pairs
}
