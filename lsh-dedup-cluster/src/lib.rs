//! Near-duplicate detection for large text corpora.
//!
//! Documents are shingled into word n-grams, reduced to MinHash signatures
//! on a pool of workers, banded into LSH buckets and consolidated into
//! duplicate clusters with union-find. [`filter::DedupFilter`] then streams
//! the corpus without the dropped documents.
//!
//! ```no_run
//! use lsh_dedup_cluster::pipeline;
//! use lsh_dedup_corpus::dto::{DedupConfig, Document};
//!
//! let docs = vec![
//!     Ok(Document::new(0, "the quick brown fox")),
//!     Ok(Document::new(1, "the quick brown fox")),
//! ];
//! let config = DedupConfig { shingle_width: 2, ..Default::default() };
//! let output = pipeline::run(&config, docs).unwrap();
//! assert_eq!(output.manifest.duplicates_dropped, 1);
//! ```

pub mod dedup;
pub mod filter;
pub mod lsh;
pub mod minhash;
pub mod pipeline;
pub mod shingle;
pub mod store;
pub mod util;

pub use dedup::{ClusterBuilder, DocStatus, DuplicateSet};
pub use filter::{deduplicated_corpus, DedupFilter};
pub use lsh::{CandidatePair, LshIndex, LshParams};
pub use minhash::{HashFamily, Signature};
pub use shingle::{ShingleSet, Shingler};
pub use store::{DocumentOutcome, Signer, SignatureStore};
