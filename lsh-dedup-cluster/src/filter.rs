use crate::dedup::DuplicateSet;
use crate::util::read_duplicate_set;
use lsh_dedup_corpus::dto::Document;
use lsh_dedup_corpus::error::Result;
use lsh_dedup_corpus::util::{read_duplicate_stats, CorpusDirectory, CorpusDocuments};
use std::borrow::Borrow;
use std::path::Path;
use tracing::info;

/// Forward-only pass over a corpus that suppresses every dropped document.
///
/// Read errors are passed through untouched; survivors keep their original
/// relative order. Restart by wrapping a fresh pass of the reader.
pub struct DedupFilter<I, S = DuplicateSet> {
    documents: I,
    duplicates: S,
    suppressed: usize,
}

impl<I, S> DedupFilter<I, S>
where
    I: Iterator<Item = Result<Document>>,
    S: Borrow<DuplicateSet>,
{
    pub fn new<D>(documents: D, duplicates: S) -> Self
    where
        D: IntoIterator<IntoIter = I>,
    {
        DedupFilter {
            documents: documents.into_iter(),
            duplicates,
            suppressed: 0,
        }
    }

    /// Documents suppressed so far.
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }
}

impl<I, S> Iterator for DedupFilter<I, S>
where
    I: Iterator<Item = Result<Document>>,
    S: Borrow<DuplicateSet>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        for document in self.documents.by_ref() {
            match document {
                Ok(doc) if self.duplicates.borrow().is_dropped(doc.id) => self.suppressed += 1,
                other => return Some(other),
            }
        }
        None
    }
}

/// The deduplicated corpus: every document of `corpus_dir` except those
/// recorded as dropped in `duplicates_dir`, lazily and in corpus order.
pub fn deduplicated_corpus<P, Q>(
    corpus_dir: P,
    duplicates_dir: Q,
) -> Result<DedupFilter<CorpusDocuments, DuplicateSet>>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let corpus = CorpusDirectory::open(corpus_dir)?;
    let duplicates = read_duplicate_set(duplicates_dir.as_ref())?;
    if let Ok(stats) = read_duplicate_stats(duplicates_dir.as_ref()) {
        info!("LSH Dedupe Threshold: {}", stats.threshold);
    }
    info!("Total Duplicates: {}", duplicates.dropped_count());
    Ok(DedupFilter::new(corpus.documents(), duplicates))
}
