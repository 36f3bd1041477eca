use crate::dedup::{ClusterBuilder, DuplicateSet};
use crate::lsh::{self, LshParams};
use crate::store::SignatureStore;
use crate::util::{run_header, write_duplicate_set};
use lsh_dedup_corpus::dto::{DedupConfig, Document};
use lsh_dedup_corpus::error::Result;
use lsh_dedup_corpus::manifest::RunManifest;
use lsh_dedup_corpus::util::{write_manifest, CorpusDirectory, SignatureDirectory};
use std::path::Path;
use std::time::Instant;
use tracing::info;

pub const SIGNATURES_DIR: &str = "signatures";
pub const DUPLICATES_DIR: &str = "duplicates";

#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub duplicates: DuplicateSet,
    pub manifest: RunManifest,
}

/// Signs, bands and clusters an in-memory or streamed corpus.
pub fn run<I>(config: &DedupConfig, documents: I) -> Result<PipelineOutput>
where
    I: IntoIterator<Item = Result<Document>>,
{
    config.validate()?;
    let params = LshParams::from_config(config)?;
    let store = SignatureStore::build(config, documents)?;
    let start = Instant::now();
    let pairs = lsh::candidate_pairs(&store, params);
    let candidate_pairs = pairs.len();
    let mut builder = ClusterBuilder::new(store.ids());
    builder.extend(pairs);
    let output = finish(&store, builder, candidate_pairs);
    info!(
        "Dedupe completed in {:.4} secs",
        start.elapsed().as_secs_f64()
    );
    output.manifest.log_summary();
    Ok(output)
}

/// Runs the pipeline over a corpus directory with durable intermediate
/// results under `work_dir`:
///
/// * `signatures/` holds one file per finished partition. A re-run after an
///   interruption only signs the partitions that are missing, after checking
///   the stored run header against `config`.
/// * `duplicates/` receives the duplicate records and statistics.
/// * `manifest.json` summarises the run.
///
/// Bands are processed one at a time to bound memory.
///
/// ## Arguments
///
/// * `config` - Run parameters, checked against any stored signatures.
/// * `corpus_dir` - Directory of `*.jsonl` corpus files.
/// * `work_dir` - Where signatures, duplicates and the manifest are kept.
pub fn run_resumable(
    config: &DedupConfig,
    corpus_dir: &Path,
    work_dir: &Path,
) -> Result<PipelineOutput> {
    config.validate()?;
    let params = LshParams::from_config(config)?;
    let corpus = CorpusDirectory::open(corpus_dir)?;
    info!("Corpus files: {}", corpus.files().len());
    let signatures = SignatureDirectory::create(
        work_dir.join(SIGNATURES_DIR),
        run_header(config, params),
    )?;
    let store = SignatureStore::build_resumable(config, corpus.documents(), &signatures)?;

    let start = Instant::now();
    let mut builder = ClusterBuilder::new(store.ids());
    let mut candidate_pairs = 0;
    lsh::for_each_band_pairs(&store, params, |_, pairs| {
        candidate_pairs += pairs.len();
        builder.extend(pairs);
    });
    let output = finish(&store, builder, candidate_pairs);
    info!(
        "Dedupe completed in {:.4} secs",
        start.elapsed().as_secs_f64()
    );

    write_duplicate_set(
        &work_dir.join(DUPLICATES_DIR),
        &output.duplicates,
        config.threshold,
    )?;
    write_manifest(work_dir, &output.manifest)?;
    output.manifest.log_summary();
    Ok(output)
}

fn finish(store: &SignatureStore, builder: ClusterBuilder, candidate_pairs: usize) -> PipelineOutput {
    let malformed_pairs = builder.malformed_pairs();
    let duplicates = builder.build();
    let manifest = RunManifest {
        documents_processed: store.documents_processed(),
        signatures: store.len(),
        too_short: store.too_short().len(),
        skipped: store.skipped().to_vec(),
        failed_partitions: store.failed_partitions().map(|p| p.index).collect(),
        candidate_pairs,
        malformed_pairs,
        clusters_found: duplicates.clusters().len(),
        duplicates_dropped: duplicates.dropped_count(),
    };
    PipelineOutput {
        duplicates,
        manifest,
    }
}
