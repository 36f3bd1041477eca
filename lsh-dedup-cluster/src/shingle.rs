use lsh_dedup_corpus::dto::DedupConfig;
use rustc_hash::{FxHashSet, FxHasher};
use std::hash::{Hash, Hasher};

/// Documents larger than this are shingled slice by slice.
const SLICE_BYTES: usize = 1024 * 1024;

/// Hashes of the word n-grams of one document.
pub type ShingleSet = FxHashSet<u64>;

/// Turns raw text into a set of word n-gram hashes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shingler {
    width: usize,
    normalize: bool,
}

impl Shingler {
    pub fn new(width: usize, normalize: bool) -> Self {
        Shingler {
            width: width.max(1),
            normalize,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.shingle_width, config.normalize)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Text with fewer than `width` tokens yields an empty set.
    pub fn shingles(&self, text: &str) -> ShingleSet {
        let mut shingles = ShingleSet::default();
        for slice in slices(text, SLICE_BYTES) {
            if self.normalize {
                self.extend(&normalize(slice), &mut shingles);
            } else {
                self.extend(slice, &mut shingles);
            }
        }
        shingles
    }

    fn extend(&self, text: &str, shingles: &mut ShingleSet) {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        shingles.extend(tokens.windows(self.width).map(calculate_hash));
    }
}

/// Lower-cases and replaces everything but letters and digits with spaces.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            let c = if c.is_alphanumeric() { c } else { ' ' };
            c.to_lowercase()
        })
        .collect()
}

fn slices(text: &str, max_bytes: usize) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let mut cut = rest.len().min(max_bytes);
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        rest = tail;
        Some(head)
    })
}

#[inline]
fn calculate_hash<T: Hash + ?Sized>(t: &T) -> u64 {
    let mut s = FxHasher::default();
    t.hash(&mut s);
    s.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_distinct_word_ngrams() {
        let shingler = Shingler::new(2, false);
        // "a b", "b c", "c a" and a repeat of "a b"
        assert_eq!(shingler.shingles("a b c a b").len(), 3);
        assert_eq!(Shingler::new(1, false).shingles("a b c a b").len(), 3);
    }

    #[test]
    fn too_short_documents_have_no_shingles() {
        let shingler = Shingler::new(5, true);
        assert!(shingler.shingles("").is_empty());
        assert!(shingler.shingles("   \n\t ").is_empty());
        assert!(shingler.shingles("only four words here").is_empty());
        assert_eq!(shingler.shingles("exactly five words are here").len(), 1);
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        let shingler = Shingler::new(3, true);
        let a = shingler.shingles("The quick, brown FOX jumps!");
        let b = shingler.shingles("the   quick brown fox\njumps");
        assert_eq!(a, b);

        let raw = Shingler::new(3, false);
        assert_ne!(
            raw.shingles("The quick, brown FOX jumps!"),
            raw.shingles("the quick brown fox jumps")
        );
    }

    #[test]
    fn word_order_matters() {
        let shingler = Shingler::new(2, true);
        assert!(shingler
            .shingles("alpha beta")
            .is_disjoint(&shingler.shingles("beta alpha")));
    }

    #[test]
    fn large_documents_union_their_slices() {
        // 8-byte words, so the slice cut lands exactly between two words
        let words = 200_000;
        let text: String = (0..words).map(|i| format!("{i:07} ")).collect();
        assert!(text.len() > SLICE_BYTES);
        let per_slice = SLICE_BYTES / 8;

        assert_eq!(Shingler::new(1, true).shingles(&text).len(), words);
        // bigrams spanning the cut are not formed
        let bigrams = Shingler::new(2, true).shingles(&text);
        assert_eq!(bigrams.len(), (per_slice - 1) + (words - per_slice - 1));
        let tail = Shingler::new(2, true).shingles(&text[SLICE_BYTES..]);
        assert!(tail.is_subset(&bigrams));
    }

        #[test]
    fn slices_respect_char_boundaries() {
        let text = "héllo wörld ça va";
        let joined: String = slices(text, 4).collect();
        assert_eq!(joined, text);
        assert!(slices(text, 4).all(|s| s.len() <= 4 && !s.is_empty()));
        assert_eq!(slices("", 4).count(), 0);
    }
}
