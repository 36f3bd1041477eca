use crate::shingle::ShingleSet;
use lsh_dedup_corpus::dto::DedupConfig;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Mersenne prime 2^61 - 1, the modulus of the permutation hash family.
pub const MERSENNE_PRIME: u64 = (1 << 61) - 1;

/// Ordered minimum hash values, one per permutation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Signature {
    pub hash_values: Vec<u64>,
}

impl Signature {
    pub fn new(hash_values: Vec<u64>) -> Self {
        Signature { hash_values }
    }

    pub fn num_perm(&self) -> usize {
        self.hash_values.len()
    }

    /// Fraction of slots on which both signatures agree.
    pub fn jaccard_similarity(&self, other: &Signature) -> f64 {
        if self.hash_values.is_empty() || self.hash_values.len() != other.hash_values.len() {
            return 0.0;
        }
        let equal_count = self
            .hash_values
            .iter()
            .zip(&other.hash_values)
            .filter(|&(&a, &b)| a == b)
            .count();
        equal_count as f64 / self.hash_values.len() as f64
    }
}

/// The `h_i(x) = (a_i * x + b_i) mod p` permutations of one run.
///
/// Drawn once from the run seed, so every worker that builds a family from
/// the same seed produces comparable signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashFamily {
    permutations: Vec<(u64, u64)>,
}

impl HashFamily {
    pub fn from_seed(num_perm: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let permutations = (0..num_perm)
            .map(|_| {
                (
                    rng.gen_range(1..MERSENNE_PRIME),
                    rng.gen_range(0..MERSENNE_PRIME),
                )
            })
            .collect();
        HashFamily { permutations }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::from_seed(config.num_perm, config.seed)
    }

    pub fn num_perm(&self) -> usize {
        self.permutations.len()
    }

    /// MinHash signature of a shingle set. An empty set has no signature.
    pub fn signature(&self, shingles: &ShingleSet) -> Option<Signature> {
        if shingles.is_empty() {
            return None;
        }
        let mut hash_values = vec![u64::MAX; self.permutations.len()];
        for &shingle in shingles {
            let x = shingle % MERSENNE_PRIME;
            for (slot, &(a, b)) in hash_values.iter_mut().zip(&self.permutations) {
                *slot = (*slot).min(permute_hash(x, a, b));
            }
        }
        Some(Signature { hash_values })
    }
}

#[inline]
fn permute_hash(x: u64, a: u64, b: u64) -> u64 {
    ((a as u128 * x as u128 + b as u128) % MERSENNE_PRIME as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: impl IntoIterator<Item = u64>) -> ShingleSet {
        items.into_iter().collect()
    }

    // spreads small integers the way shingle hashes are spread
    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^ (x >> 31)
    }

    fn hashed(range: std::ops::Range<u64>) -> ShingleSet {
        range.map(splitmix64).collect()
    }

    #[test]
    fn identical_sets_have_identical_signatures() {
        let family = HashFamily::from_seed(128, 11);
        let a = family.signature(&set([5, 17, 99, 1 << 40])).unwrap();
        let b = family.signature(&set([1 << 40, 99, 17, 5])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.jaccard_similarity(&b), 1.0);
        assert_eq!(a.num_perm(), 128);
    }

    #[test]
    fn same_seed_same_family() {
        assert_eq!(HashFamily::from_seed(64, 3), HashFamily::from_seed(64, 3));
        assert_ne!(HashFamily::from_seed(64, 3), HashFamily::from_seed(64, 4));
    }

    #[test]
    fn empty_set_has_no_signature() {
        let family = HashFamily::from_seed(16, 1);
        assert_eq!(family.signature(&ShingleSet::default()), None);
    }

    #[test]
    fn hash_values_stay_below_prime() {
        let family = HashFamily::from_seed(32, 9);
        let sig = family.signature(&set([u64::MAX, 0, MERSENNE_PRIME])).unwrap();
        assert!(sig.hash_values.iter().all(|&v| v < MERSENNE_PRIME));
    }

    #[test]
    fn estimate_tracks_true_jaccard() {
        // |A ∩ B| = 100, |A ∪ B| = 300 -> J = 1/3
        let a = hashed(0..200);
        let b = hashed(100..300);
        let trials = 40;
        let mean: f64 = (0..trials)
            .map(|seed| {
                let family = HashFamily::from_seed(128, seed);
                let sa = family.signature(&a).unwrap();
                let sb = family.signature(&b).unwrap();
                sa.jaccard_similarity(&sb)
            })
            .sum::<f64>()
            / trials as f64;
        assert!((mean - 1.0 / 3.0).abs() < 0.05, "mean estimate {mean}");
    }

    #[test]
    fn disjoint_sets_rarely_agree() {
        let trials = 20;
        let mean: f64 = (0..trials)
            .map(|seed| {
                let family = HashFamily::from_seed(128, seed);
                let sa = family.signature(&hashed(0..500)).unwrap();
                let sb = family.signature(&hashed(1000..1500)).unwrap();
                sa.jaccard_similarity(&sb)
            })
            .sum::<f64>()
            / trials as f64;
        assert!(mean < 0.05, "mean estimate {mean}");
    }

    #[test]
    fn mismatched_lengths_are_not_similar() {
        let a = Signature::new(vec![1, 2, 3]);
        let b = Signature::new(vec![1, 2]);
        assert_eq!(a.jaccard_similarity(&b), 0.0);
    }
}
