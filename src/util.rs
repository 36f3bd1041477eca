use crate::dto::{DocId, Document, DuplicateRecord, DuplicateStats, RunHeader};
use crate::error::{DedupError, Result};
use crate::manifest::RunManifest;
use csv::{ReaderBuilder, WriterBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Lines};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const HEADER_FILE: &str = "header.json";
pub const DUPLICATES_FILE: &str = "duplicates.csv";
pub const STATISTICS_FILE: &str = "duplicate_statistics.json";
pub const MANIFEST_FILE: &str = "manifest.json";
const CORPUS_EXTENSION: &str = "jsonl";

/// A corpus stored as a directory of JSON-lines files, read in file name
/// order. Each line carries a `text` field; document ids are global line
/// offsets across all files.
#[derive(Clone, Debug)]
pub struct CorpusDirectory {
    files: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct CorpusLine {
    text: String,
}

impl CorpusDirectory {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == CORPUS_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(CorpusDirectory { files })
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Streams every document from the start. Each call starts a fresh pass.
    pub fn documents(&self) -> CorpusDocuments {
        CorpusDocuments {
            files: self.files.clone(),
            file_idx: 0,
            lines: None,
            offset: 0,
            resume_at: 0,
        }
    }

    /// Streams documents with an id of at least `offset`. Earlier lines are
    /// counted but never parsed.
    pub fn documents_from(&self, offset: DocId) -> CorpusDocuments {
        CorpusDocuments {
            resume_at: offset,
            ..self.documents()
        }
    }
}

pub struct CorpusDocuments {
    files: Vec<PathBuf>,
    file_idx: usize,
    lines: Option<Lines<BufReader<File>>>,
    offset: DocId,
    resume_at: DocId,
}

impl CorpusDocuments {
    fn next_line(&mut self) -> Option<io::Result<String>> {
        loop {
            if let Some(lines) = self.lines.as_mut() {
                match lines.next() {
                    Some(line) => return Some(line),
                    None => self.lines = None,
                }
            }
            let path = self.files.get(self.file_idx)?;
            self.file_idx += 1;
            debug!("Reading from corpus file: {}", path.display());
            match File::open(path) {
                Ok(file) => self.lines = Some(BufReader::new(file).lines()),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl Iterator for CorpusDocuments {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.next_line()? {
                Ok(line) if self.offset < self.resume_at => {
                    if !line.trim().is_empty() {
                        self.offset += 1;
                    }
                    continue;
                }
                Err(err)
                    if err.kind() == io::ErrorKind::InvalidData && self.offset < self.resume_at =>
                {
                    self.offset += 1;
                    continue;
                }
                Ok(line) => line,
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    let id = self.offset;
                    self.offset += 1;
                    return Some(Err(DedupError::document_read(id, err)));
                }
                Err(err) => {
                    // storage failure ends the pass
                    self.file_idx = self.files.len();
                    self.lines = None;
                    return Some(Err(DedupError::Io(err)));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let id = self.offset;
            self.offset += 1;
            return Some(
                serde_json::from_str::<CorpusLine>(&line)
                    .map(|CorpusLine { text }| Document { id, text })
                    .map_err(|err| DedupError::document_read(id, err)),
            );
        }
    }
}

/// What a partition file records for one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredEntry {
    Signature(Vec<u64>),
    TooShort,
    Skipped(String),
}

const STATUS_OK: &str = "ok";
const STATUS_SHORT: &str = "short";
const STATUS_SKIPPED: &str = "skipped";

/// Directory of persisted signature partitions plus the run header they
/// were computed with.
#[derive(Clone, Debug)]
pub struct SignatureDirectory {
    root: PathBuf,
    header: RunHeader,
}

impl SignatureDirectory {
    /// Opens (or initialises) a signature directory for the given run.
    /// Fails with a configuration mismatch when the directory already holds
    /// signatures computed under a different header.
    pub fn create<P: AsRef<Path>>(root: P, header: RunHeader) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let dir = SignatureDirectory { root, header };
        match dir.stored_header()? {
            Some(_) => dir.check_header()?,
            None => {
                let file = File::create(dir.root.join(HEADER_FILE))?;
                serde_json::to_writer_pretty(BufWriter::new(file), &dir.header)?;
            }
        }
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Header of the run this directory was opened for.
    pub fn header(&self) -> &RunHeader {
        &self.header
    }

    pub fn stored_header(&self) -> Result<Option<RunHeader>> {
        let path = self.root.join(HEADER_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }

    pub fn check_header(&self) -> Result<()> {
        let path = self.root.join(HEADER_FILE);
        let stored = self
            .stored_header()?
            .ok_or_else(|| DedupError::configuration_mismatch(path.display(), "header missing"))?;
        if stored != self.header {
            return Err(DedupError::configuration_mismatch(
                path.display(),
                format!(
                    "stored {stored:?} differs from current {:?}; regenerate signatures",
                    self.header
                ),
            ));
        }
        Ok(())
    }

    fn partition_path(&self, start: DocId, end: DocId) -> PathBuf {
        self.root.join(format!("signatures_{start:012}_{end:012}.csv"))
    }

    /// Writes a finished partition. The file only appears under its final
    /// name once fully written.
    pub fn write_partition(
        &self,
        start: DocId,
        end: DocId,
        entries: &[(DocId, StoredEntry)],
    ) -> Result<()> {
        let path = self.partition_path(start, end);
        let temp_path = path.with_extension("csv.tmp");
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&temp_path)?;
        for (id, entry) in entries {
            let mut record = vec![id.to_string()];
            match entry {
                StoredEntry::Signature(values) => {
                    record.push(STATUS_OK.to_string());
                    record.push(String::new());
                    record.extend(values.iter().map(|v| v.to_string()));
                }
                StoredEntry::TooShort => {
                    record.push(STATUS_SHORT.to_string());
                    record.push(String::new());
                }
                StoredEntry::Skipped(reason) => {
                    record.push(STATUS_SKIPPED.to_string());
                    record.push(reason.clone());
                }
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&temp_path, &path)?;
        debug!("Wrote partition [{start}, {end}) to {}", path.display());
        Ok(())
    }

    pub fn read_partition(&self, start: DocId, end: DocId) -> Result<Vec<(DocId, StoredEntry)>> {
        let path = self.partition_path(start, end);
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)?;
        let malformed = |line: usize, what: &str| {
            DedupError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} line {line}: {what}", path.display()),
            ))
        };
        let mut entries = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let id: DocId = record
                .get(0)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| malformed(line, "bad id"))?;
            let entry = match record.get(1) {
                Some(STATUS_OK) => {
                    let values = record
                        .iter()
                        .skip(3)
                        .map(|v| v.parse::<u64>())
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|_| malformed(line, "bad hash value"))?;
                    if values.len() != self.header.num_perm {
                        return Err(DedupError::configuration_mismatch(
                            path.display(),
                            format!(
                                "signature of length {} where numPerm is {}",
                                values.len(),
                                self.header.num_perm
                            ),
                        ));
                    }
                    StoredEntry::Signature(values)
                }
                Some(STATUS_SHORT) => StoredEntry::TooShort,
                Some(STATUS_SKIPPED) => {
                    StoredEntry::Skipped(record.get(2).unwrap_or_default().to_string())
                }
                _ => return Err(malformed(line, "unknown status")),
            };
            entries.push((id, entry));
        }
        Ok(entries)
    }

    /// `[start, end)` ranges of every fully written partition.
    pub fn completed_partitions(&self) -> Result<BTreeSet<(DocId, DocId)>> {
        let mut completed = BTreeSet::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            let range = name
                .strip_prefix("signatures_")
                .and_then(|rest| rest.strip_suffix(".csv"))
                .and_then(|rest| rest.split_once('_'))
                .and_then(|(start, end)| Some((start.parse().ok()?, end.parse().ok()?)));
            if let Some(range) = range {
                completed.insert(range);
            }
        }
        Ok(completed)
    }
}

pub fn write_duplicates<P: AsRef<Path>>(dir: P, records: &[DuplicateRecord]) -> Result<PathBuf> {
    fs::create_dir_all(dir.as_ref())?;
    let path = dir.as_ref().join(DUPLICATES_FILE);
    let mut writer = csv::Writer::from_path(&path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Dumped {} duplicates to {}", records.len(), path.display());
    Ok(path)
}

pub fn read_duplicates<P: AsRef<Path>>(dir: P) -> Result<Vec<DuplicateRecord>> {
    let path = dir.as_ref().join(DUPLICATES_FILE);
    let mut reader = csv::Reader::from_path(&path)?;
    reader
        .deserialize()
        .map(|record| record.map_err(DedupError::from))
        .collect()
}

pub fn write_duplicate_stats<P: AsRef<Path>>(dir: P, stats: &DuplicateStats) -> Result<()> {
    fs::create_dir_all(dir.as_ref())?;
    let file = File::create(dir.as_ref().join(STATISTICS_FILE))?;
    serde_json::to_writer_pretty(BufWriter::new(file), stats)?;
    Ok(())
}

pub fn read_duplicate_stats<P: AsRef<Path>>(dir: P) -> Result<DuplicateStats> {
    let file = File::open(dir.as_ref().join(STATISTICS_FILE))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn write_manifest<P: AsRef<Path>>(dir: P, manifest: &RunManifest) -> Result<PathBuf> {
    fs::create_dir_all(dir.as_ref())?;
    let path = dir.as_ref().join(MANIFEST_FILE);
    let file = File::create(&path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), manifest)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    fn header(num_perm: usize, seed: u64) -> RunHeader {
        RunHeader {
            num_perm,
            num_bands: num_perm / 2,
            rows_per_band: 2,
            seed,
            shingle_width: 5,
            normalize: true,
        }
    }

    fn write_file(dir: &Path, name: &str, body: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn corpus_offsets_span_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "01.jsonl", "{\"text\": \"c\"}\n");
        write_file(
            dir.path(),
            "00.jsonl",
            "{\"text\": \"a\", \"meta\": {}}\n\n{\"text\": \"b\"}\n",
        );
        write_file(dir.path(), "notes.txt", "ignored");
        let corpus = CorpusDirectory::open(dir.path()).unwrap();
        let docs: Vec<Document> = corpus.documents().map(|d| d.unwrap()).collect();
        assert_eq!(
            docs,
            vec![
                Document::new(0, "a"),
                Document::new(1, "b"),
                Document::new(2, "c")
            ]
        );
        // restartable
        assert_eq!(corpus.documents().count(), 3);
        let tail: Vec<DocId> = corpus
            .documents_from(2)
            .map(|d| d.unwrap().id)
            .collect();
        assert_eq!(tail, vec![2]);
    }

    #[test]
    fn unparsable_line_is_a_document_error() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "00.jsonl", "{\"text\": \"a\"}\nnot json\n{\"text\": \"c\"}\n");
        let corpus = CorpusDirectory::open(dir.path()).unwrap();
        let docs: Vec<_> = corpus.documents().collect();
        assert_eq!(docs.len(), 3);
        assert!(matches!(docs[1], Err(DedupError::DocumentRead { id: 1, .. })));
        assert_eq!(docs[2].as_ref().unwrap().id, 2);
    }

    #[test]
    fn invalid_utf8_line_is_a_document_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = b"{\"text\": \"a\"}\n".to_vec();
        body.extend_from_slice(b"{\"text\": \"\xff\xfe\"}\n");
        body.extend_from_slice(b"{\"text\": \"c\"}\n");
        fs::write(dir.path().join("00.jsonl"), body).unwrap();
        let corpus = CorpusDirectory::open(dir.path()).unwrap();
        let docs: Vec<_> = corpus.documents().collect();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].as_ref().unwrap().id, 0);
        assert!(matches!(docs[1], Err(DedupError::DocumentRead { id: 1, .. })));
        assert_eq!(docs[2].as_ref().unwrap().text, "c");
    }

    #[test]
    fn resuming_skips_earlier_lines_without_parsing() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "00.jsonl",
            "not json\n\n{\"text\": \"b\"}\n{\"text\": \"c\"}\n",
        );
        write_file(dir.path(), "01.jsonl", "{\"text\": \"d\"}\n");
        let corpus = CorpusDirectory::open(dir.path()).unwrap();
        let docs: Vec<Document> = corpus.documents_from(2).map(|d| d.unwrap()).collect();
        assert_eq!(docs, vec![Document::new(2, "c"), Document::new(3, "d")]);
        assert_eq!(corpus.documents_from(10).count(), 0);
    }

    #[test]
    fn partition_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sigs = SignatureDirectory::create(dir.path(), header(4, 7)).unwrap();
        let entries = vec![
            (10, StoredEntry::Signature(vec![1, 2, 3, u64::MAX])),
            (11, StoredEntry::TooShort),
            (12, StoredEntry::Skipped("bad, \"quoted\" line".to_string())),
        ];
        sigs.write_partition(10, 13, &entries).unwrap();
        assert_eq!(sigs.read_partition(10, 13).unwrap(), entries);
        let completed = sigs.completed_partitions().unwrap();
        assert_eq!(completed.into_iter().collect::<Vec<_>>(), vec![(10, 13)]);
    }

    #[test]
    fn header_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        SignatureDirectory::create(dir.path(), header(4, 7)).unwrap();
        SignatureDirectory::create(dir.path(), header(4, 7)).unwrap();
        let err = SignatureDirectory::create(dir.path(), header(4, 8)).unwrap_err();
        assert!(matches!(err, DedupError::ConfigurationMismatch { .. }));
        assert!(err.is_fatal());
        let err = SignatureDirectory::create(dir.path(), header(8, 7)).unwrap_err();
        assert!(matches!(err, DedupError::ConfigurationMismatch { .. }));
    }

    #[test]
    fn duplicates_and_stats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            DuplicateRecord { dropped: 3, kept: 1 },
            DuplicateRecord { dropped: 9, kept: 1 },
        ];
        write_duplicates(dir.path(), &records).unwrap();
        assert_eq!(read_duplicates(dir.path()).unwrap(), records);

        let stats = DuplicateStats {
            total_duplicates: 2,
            total_clusters: 1,
            threshold: 0.5,
            cluster_sizes: BTreeMap::from([(3, 1)]),
        };
        write_duplicate_stats(dir.path(), &stats).unwrap();
        assert_eq!(read_duplicate_stats(dir.path()).unwrap(), stats);
    }
}
