use crate::dedup::DuplicateSet;
use crate::lsh::LshParams;
use lsh_dedup_corpus::dto::{DedupConfig, RunHeader};
use lsh_dedup_corpus::error::Result;
use lsh_dedup_corpus::util::{read_duplicates, write_duplicate_stats, write_duplicates};
use std::path::{Path, PathBuf};

/// Header identifying the signatures produced under `config`.
pub fn run_header(config: &DedupConfig, params: LshParams) -> RunHeader {
    RunHeader {
        num_perm: config.num_perm,
        num_bands: params.num_bands,
        rows_per_band: params.rows_per_band,
        seed: config.seed,
        shingle_width: config.shingle_width,
        normalize: config.normalize,
    }
}

/// Persists `dropped -> kept` records and cluster statistics under `dir`.
pub fn write_duplicate_set(
    dir: &Path,
    duplicates: &DuplicateSet,
    threshold: f64,
) -> Result<PathBuf> {
    let path = write_duplicates(dir, &duplicates.records())?;
    write_duplicate_stats(dir, &duplicates.stats(threshold))?;
    Ok(path)
}

pub fn read_duplicate_set(dir: &Path) -> Result<DuplicateSet> {
    Ok(DuplicateSet::from_records(read_duplicates(dir)?))
}
