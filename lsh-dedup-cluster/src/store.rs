use crate::lsh::LshParams;
use crate::minhash::{HashFamily, Signature};
use crate::shingle::Shingler;
use crate::util::run_header;
use lsh_dedup_corpus::dto::{DedupConfig, DocId, Document};
use lsh_dedup_corpus::error::{DedupError, Result};
use lsh_dedup_corpus::manifest::SkippedDocument;
use lsh_dedup_corpus::util::{SignatureDirectory, StoredEntry};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// Result of running the generator over one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocumentOutcome {
    Signed(Signature),
    /// Fewer tokens than one shingle. Never enters LSH and is always kept.
    TooShort,
    Skipped(String),
}

impl From<DocumentOutcome> for StoredEntry {
    fn from(outcome: DocumentOutcome) -> Self {
        match outcome {
            DocumentOutcome::Signed(sig) => StoredEntry::Signature(sig.hash_values),
            DocumentOutcome::TooShort => StoredEntry::TooShort,
            DocumentOutcome::Skipped(reason) => StoredEntry::Skipped(reason),
        }
    }
}

impl From<StoredEntry> for DocumentOutcome {
    fn from(entry: StoredEntry) -> Self {
        match entry {
            StoredEntry::Signature(values) => DocumentOutcome::Signed(Signature::new(values)),
            StoredEntry::TooShort => DocumentOutcome::TooShort,
            StoredEntry::Skipped(reason) => DocumentOutcome::Skipped(reason),
        }
    }
}

/// A contiguous range `[start, end)` of corpus positions handled by one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Partition {
    pub index: usize,
    pub start: DocId,
    pub end: DocId,
}

enum CorpusEntry {
    Text(Document),
    Unreadable { id: DocId, reason: String },
}

impl CorpusEntry {
    fn id(&self) -> DocId {
        match self {
            CorpusEntry::Text(doc) => doc.id,
            CorpusEntry::Unreadable { id, .. } => *id,
        }
    }
}

struct PartitionResult {
    partition: Partition,
    outcome: std::result::Result<Vec<(DocId, DocumentOutcome)>, String>,
}

/// Signatures of every successfully processed document, ordered by id.
#[derive(Clone, Debug, Default)]
pub struct SignatureStore {
    signatures: BTreeMap<DocId, Signature>,
    too_short: Vec<DocId>,
    skipped: Vec<SkippedDocument>,
    failed_partitions: BTreeSet<Partition>,
    documents_processed: usize,
}

impl SignatureStore {
    /// Signs the whole corpus on `config.workers` threads.
    ///
    /// Unreadable documents are recorded as skipped. A crashing partition is
    /// recorded as failed and can be retried with [`SignatureStore::retry_failed`].
    /// Only storage errors from the reader abort the build.
    ///
    /// ## Arguments
    ///
    /// * `config` - Run parameters. `workers` sets the pool size and
    /// `partition_size` the documents handled per task.
    /// * `documents` - The corpus reader's sequence, in corpus order.
    pub fn build<I>(config: &DedupConfig, documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let signer = Signer::new(config);
        Self::build_with(config, documents, |doc| signer.sign(doc))
    }

    pub(crate) fn build_with<I, F>(config: &DedupConfig, documents: I, sign: F) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Document>>,
        F: Fn(&Document) -> DocumentOutcome + Sync,
    {
        config.validate()?;
        let start = std::time::Instant::now();
        let mut store = SignatureStore::default();
        process_partitions(config, documents, |_| true, &sign, |result| {
            store.merge(result);
            Ok(())
        })?;
        info!(
            signatures = store.signatures.len(),
            too_short = store.too_short.len(),
            skipped = store.skipped.len(),
            failed_partitions = store.failed_partitions.len(),
            "Hashed records in {:.4} secs",
            start.elapsed().as_secs_f64()
        );
        Ok(store)
    }

    /// Re-runs only the partitions that failed, reading the corpus again.
    pub fn retry_failed<I>(&mut self, config: &DedupConfig, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let signer = Signer::new(config);
        self.retry_failed_with(config, documents, |doc| signer.sign(doc))
    }

    pub(crate) fn retry_failed_with<I, F>(
        &mut self,
        config: &DedupConfig,
        documents: I,
        sign: F,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<Document>>,
        F: Fn(&Document) -> DocumentOutcome + Sync,
    {
        if self.failed_partitions.is_empty() {
            return Ok(());
        }
        let failed: BTreeSet<usize> = self.failed_partitions.iter().map(|p| p.index).collect();
        info!("Retrying {} failed partitions", failed.len());
        let retried = std::mem::take(&mut self.failed_partitions);
        let mut results = Vec::new();
        process_partitions(
            config,
            documents,
            |partition| failed.contains(&partition.index),
            &sign,
            |result| {
                results.push(result);
                Ok(())
            },
        )?;
        // partitions the corpus no longer reaches stay failed
        let reached: BTreeSet<usize> = results.iter().map(|r| r.partition.index).collect();
        self.failed_partitions
            .extend(retried.into_iter().filter(|p| !reached.contains(&p.index)));
        for result in results {
            self.merge(result);
        }
        Ok(())
    }

    /// Like [`SignatureStore::build`], but every finished partition is
    /// persisted to `dir` and partitions already present there are loaded
    /// instead of recomputed. An interrupted run therefore resumes with only
    /// the missing partitions.
    ///
    /// ## Arguments
    ///
    /// * `config` - Run parameters. Must produce the same header `dir` was
    /// opened with, otherwise the build fails with a configuration mismatch.
    /// * `documents` - The corpus reader's sequence, from the first document.
    /// * `dir` - Signature directory holding finished partitions.
    pub fn build_resumable<I>(
        config: &DedupConfig,
        documents: I,
        dir: &SignatureDirectory,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let signer = Signer::new(config);
        Self::build_resumable_with(config, documents, dir, |doc| signer.sign(doc))
    }

    pub(crate) fn build_resumable_with<I, F>(
        config: &DedupConfig,
        documents: I,
        dir: &SignatureDirectory,
        sign: F,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Document>>,
        F: Fn(&Document) -> DocumentOutcome + Sync,
    {
        config.validate()?;
        let header = run_header(config, LshParams::from_config(config)?);
        if &header != dir.header() {
            return Err(DedupError::configuration_mismatch(
                dir.root().display(),
                format!(
                    "directory opened for {:?} but run configured for {header:?}",
                    dir.header()
                ),
            ));
        }
        dir.check_header()?;
        let start = std::time::Instant::now();
        let completed = dir.completed_partitions()?;
        if !completed.is_empty() {
            info!("Found {} completed partitions, resuming", completed.len());
        }
        let mut store = SignatureStore::default();
        let mut planned = Vec::new();
        process_partitions(
            config,
            documents,
            |partition| {
                planned.push(*partition);
                !completed.contains(&(partition.start, partition.end))
            },
            &sign,
            |result| {
                if let Ok(outcomes) = &result.outcome {
                    let entries: Vec<(DocId, StoredEntry)> = outcomes
                        .iter()
                        .map(|(id, outcome)| (*id, outcome.clone().into()))
                        .collect();
                    dir.write_partition(result.partition.start, result.partition.end, &entries)?;
                }
                store.merge(result);
                Ok(())
            },
        )?;
        for partition in planned {
            if completed.contains(&(partition.start, partition.end)) {
                let outcomes = dir
                    .read_partition(partition.start, partition.end)?
                    .into_iter()
                    .map(|(id, entry)| (id, entry.into()))
                    .collect();
                store.merge(PartitionResult {
                    partition,
                    outcome: Ok(outcomes),
                });
            }
        }
        store.too_short.sort_unstable();
        store.skipped.sort_by_key(|skipped| skipped.id);
        info!(
            signatures = store.signatures.len(),
            failed_partitions = store.failed_partitions.len(),
            "Hashed records in {:.4} secs",
            start.elapsed().as_secs_f64()
        );
        Ok(store)
    }

    fn merge(&mut self, result: PartitionResult) {
        let PartitionResult { partition, outcome } = result;
        match outcome {
            Ok(outcomes) => {
                debug!(
                    "Partition {} [{}, {}) complete",
                    partition.index, partition.start, partition.end
                );
                self.documents_processed += outcomes.len();
                for (id, outcome) in outcomes {
                    match outcome {
                        DocumentOutcome::Signed(sig) => {
                            self.signatures.insert(id, sig);
                        }
                        DocumentOutcome::TooShort => self.too_short.push(id),
                        DocumentOutcome::Skipped(reason) => {
                            self.skipped.push(SkippedDocument { id, reason })
                        }
                    }
                }
            }
            Err(reason) => {
                let err = DedupError::worker_failure(partition.index, reason);
                warn!("{err}");
                self.failed_partitions.insert(partition);
            }
        }
    }

    pub fn get(&self, id: DocId) -> Option<&Signature> {
        self.signatures.get(&id)
    }

    pub fn contains(&self, id: DocId) -> bool {
        self.signatures.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Signatures in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (DocId, &Signature)> {
        self.signatures.iter().map(|(&id, sig)| (id, sig))
    }

    pub fn ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.signatures.keys().copied()
    }

    pub fn too_short(&self) -> &[DocId] {
        &self.too_short
    }

    pub fn skipped(&self) -> &[SkippedDocument] {
        &self.skipped
    }

    pub fn failed_partitions(&self) -> impl Iterator<Item = &Partition> {
        self.failed_partitions.iter()
    }

    pub fn documents_processed(&self) -> usize {
        self.documents_processed
    }
}

/// Shingler and hash family of one run, shared read-only by all workers.
#[derive(Clone, Debug)]
pub struct Signer {
    shingler: Shingler,
    family: HashFamily,
}

impl Signer {
    pub fn new(config: &DedupConfig) -> Self {
        Signer {
            shingler: Shingler::from_config(config),
            family: HashFamily::from_config(config),
        }
    }

    pub fn sign(&self, doc: &Document) -> DocumentOutcome {
        match self.family.signature(&self.shingler.shingles(&doc.text)) {
            Some(sig) => DocumentOutcome::Signed(sig),
            None => DocumentOutcome::TooShort,
        }
    }
}

/// Splits the document stream into partitions of `partition_size`, runs up
/// to `workers` partitions at a time on a dedicated pool and hands results
/// to `on_done` in partition order. Partitions rejected by `wanted` are read
/// past without being signed.
fn process_partitions<I, W, F, D>(
    config: &DedupConfig,
    documents: I,
    mut wanted: W,
    sign: &F,
    mut on_done: D,
) -> Result<()>
where
    I: IntoIterator<Item = Result<Document>>,
    W: FnMut(&Partition) -> bool,
    F: Fn(&Document) -> DocumentOutcome + Sync,
    D: FnMut(PartitionResult) -> Result<()>,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
        .map_err(|err| {
            DedupError::invalid_config(format!("cannot start {} workers: {err}", config.workers))
        })?;
    let mut wave: Vec<(Partition, Vec<CorpusEntry>)> = Vec::with_capacity(config.workers);
    let mut current: Vec<CorpusEntry> = Vec::with_capacity(config.partition_size);
    let mut position: DocId = 0;
    let mut index = 0;

    let mut run_wave = |wave: &mut Vec<(Partition, Vec<CorpusEntry>)>| -> Result<()> {
        let results: Vec<PartitionResult> = pool.install(|| {
            wave.par_iter()
                .map(|(partition, entries)| PartitionResult {
                    partition: *partition,
                    outcome: sign_partition(entries, sign),
                })
                .collect()
        });
        wave.clear();
        results.into_iter().try_for_each(&mut on_done)
    };

    let mut close_partition = |entries: Vec<CorpusEntry>,
                               position: DocId,
                               index: &mut usize,
                               wave: &mut Vec<(Partition, Vec<CorpusEntry>)>|
     -> Result<()> {
        let partition = Partition {
            index: *index,
            start: position - entries.len() as DocId,
            end: position,
        };
        *index += 1;
        if wanted(&partition) {
            wave.push((partition, entries));
            if wave.len() == config.workers {
                run_wave(wave)?;
            }
        }
        Ok(())
    };

    for document in documents {
        let entry = match document {
            Ok(doc) => CorpusEntry::Text(doc),
            Err(DedupError::DocumentRead { id, reason }) => {
                warn!("Skipping document {id}: {reason}");
                CorpusEntry::Unreadable { id, reason }
            }
            Err(err) => return Err(err),
        };
        current.push(entry);
        position += 1;
        if current.len() == config.partition_size {
            let full = std::mem::replace(&mut current, Vec::with_capacity(config.partition_size));
            close_partition(full, position, &mut index, &mut wave)?;
        }
    }
    if !current.is_empty() {
        close_partition(current, position, &mut index, &mut wave)?;
    }
    if !wave.is_empty() {
        run_wave(&mut wave)?;
    }
    Ok(())
}

fn sign_partition<F>(
    entries: &[CorpusEntry],
    sign: &F,
) -> std::result::Result<Vec<(DocId, DocumentOutcome)>, String>
where
    F: Fn(&Document) -> DocumentOutcome + Sync,
{
    panic::catch_unwind(AssertUnwindSafe(|| {
        entries
            .iter()
            .map(|entry| {
                let outcome = match entry {
                    CorpusEntry::Text(doc) => sign(doc),
                    CorpusEntry::Unreadable { reason, .. } => {
                        DocumentOutcome::Skipped(reason.clone())
                    }
                };
                (entry.id(), outcome)
            })
            .collect()
    }))
    .map_err(|payload| {
        payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "worker panicked".to_string())
    })
}
