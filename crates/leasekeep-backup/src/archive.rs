//! Archive layout, NDJSON streams and tar/gzip packaging.
//!
//! An archive is a gzip-compressed tar holding `manifest.json` at the root
//! and one `data/<Model>.ndjson` file per exported model. Each data line is
//! one JSON object; lines are written in cursor order.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use leasekeep_core::{DatabaseKind, ModelKind, Record};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::error::ArchiveError;

/// Manifest file name at the archive root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Directory holding the per-model data files.
pub const DATA_DIR: &str = "data";

/// Extension of per-model data files.
pub const DATA_EXTENSION: &str = "ndjson";

/// Suffix of an archive that is still being written.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Data file name for a model, relative to [`DATA_DIR`].
pub fn data_file_name(kind: ModelKind) -> String {
    format!("{}.{DATA_EXTENSION}", kind.name())
}

/// Archive file name for an export of `kind` started at `created_at`.
pub fn archive_file_name(kind: DatabaseKind, created_at: DateTime<Utc>) -> String {
    format!(
        "backup-{}-{}.tar.gz",
        kind.as_str(),
        created_at.format("%Y-%m-%dT%H-%M-%S-%3fZ")
    )
}

/// Streams records into a data file, hashing every byte written.
pub struct NdjsonWriter {
    writer: BufWriter<fs::File>,
    hasher: Sha256,
    lines: u64,
    line: Vec<u8>,
}

impl NdjsonWriter {
    /// Create (or truncate) the data file at `path`.
    pub async fn create(path: &Path) -> io::Result<Self> {
        let file = fs::File::create(path).await?;
        Ok(Self {
            writer: BufWriter::new(file),
            hasher: Sha256::new(),
            lines: 0,
            line: Vec::with_capacity(512),
        })
    }

    /// Append one record as a line.
    pub async fn write(&mut self, record: &Record) -> io::Result<()> {
        self.line.clear();
        serde_json::to_writer(&mut self.line, record)?;
        self.line.push(b'\n');
        self.hasher.update(&self.line);
        self.writer.write_all(&self.line).await?;
        self.lines += 1;
        Ok(())
    }

    /// Lines written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flush and sync the file; returns the line count and hex SHA-256.
    pub async fn finish(mut self) -> io::Result<(u64, String)> {
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        Ok((self.lines, hex::encode(self.hasher.finalize())))
    }
}

/// Reads records back from a data file one line at a time.
pub struct NdjsonReader {
    model: String,
    reader: BufReader<fs::File>,
    hasher: Sha256,
    buf: Vec<u8>,
    line: u64,
    records: u64,
}

impl NdjsonReader {
    /// Open the data file for `model` at `path`.
    pub async fn open(model: impl Into<String>, path: &Path) -> Result<Self, ArchiveError> {
        let model = model.into();
        let file = fs::File::open(path).await.map_err(|e| {
            ArchiveError::Corrupt(format!("cannot open {} data: {e}", model))
        })?;
        Ok(Self {
            model,
            reader: BufReader::new(file),
            hasher: Sha256::new(),
            buf: Vec::with_capacity(512),
            line: 0,
            records: 0,
        })
    }

    /// Next record, or `None` at end of file. Blank lines are skipped.
    pub async fn next_record(&mut self) -> Result<Option<Record>, ArchiveError> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| ArchiveError::Corrupt(format!("reading {} data: {e}", self.model)))?;
            if read == 0 {
                return Ok(None);
            }
            self.line += 1;
            self.hasher.update(&self.buf);

            let text = trim_line(&self.buf);
            if text.is_empty() {
                continue;
            }
            let record: Record =
                serde_json::from_slice(text).map_err(|e| ArchiveError::MalformedRecord {
                    model: self.model.clone(),
                    line: self.line,
                    message: e.to_string(),
                })?;
            self.records += 1;
            return Ok(Some(record));
        }
    }

    /// Records read so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Hex SHA-256 of every byte read so far.
    pub fn digest(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

fn trim_line(buf: &[u8]) -> &[u8] {
    let mut end = buf.len();
    while end > 0 && matches!(buf[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &buf[..end]
}

/// Package `source` (manifest plus data directory) into a tar.gz at `dest`.
///
/// Blocking; run it on the blocking pool.
pub fn pack_directory(source: &Path, dest: &Path) -> io::Result<()> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder.append_path_with_name(source.join(MANIFEST_FILE), MANIFEST_FILE)?;
    builder.append_dir_all(DATA_DIR, source.join(DATA_DIR))?;

    let file = builder.into_inner()?.finish()?;
    file.sync_all()
}

/// Extract a tar.gz archive into `dest`.
///
/// Blocking; run it on the blocking pool. Entries escaping `dest` are
/// skipped by the tar unpacker.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let file = File::open(archive)
        .map_err(|e| ArchiveError::Corrupt(format!("cannot open {}: {e}", archive.display())))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.unpack(dest)
        .map_err(|e| ArchiveError::Corrupt(format!("cannot extract {}: {e}", archive.display())))
}

/// An archive being written. Removed on drop unless committed.
pub struct PartialFile {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    /// Reserve `<target>.partial` as the write location for `target`.
    pub fn new(target: &Path) -> Self {
        let mut partial = target.as_os_str().to_owned();
        partial.push(PARTIAL_SUFFIX);
        Self {
            partial: PathBuf::from(partial),
            target: target.to_path_buf(),
            committed: false,
        }
    }

    /// Where to write.
    pub fn path(&self) -> &Path {
        &self.partial
    }

    /// Rename the finished file into place.
    pub async fn commit(mut self) -> io::Result<PathBuf> {
        fs::rename(&self.partial, &self.target).await?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let path = self.partial.display();
            match std::fs::remove_file(&self.partial) {
                Ok(()) => tracing::debug!(path = %path, "removed partial archive"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to remove partial archive")
                }
            }
        }
    }
}

/// Remove partial archives of `kind` left in `dir` by a run that was killed
/// before its guard could clean up. Returns the removed paths.
pub async fn remove_stale_partials(dir: &Path, kind: DatabaseKind) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("backup-{}-", kind.as_str());
    let suffix = format!(".tar.gz{PARTIAL_SUFFIX}");
    let mut removed = Vec::new();

    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !name.starts_with(&prefix) || !name.ends_with(&suffix) {
            continue;
        }
        if entry.file_type().await?.is_file() {
            let path = entry.path();
            fs::remove_file(&path).await?;
            tracing::warn!(path = %path.display(), "removed stale partial archive");
            removed.push(path);
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_archive_file_name() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T14:07:09.120Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            archive_file_name(DatabaseKind::Cloud, at),
            "backup-cloud-2024-03-05T14-07-09-120Z.tar.gz"
        );
        assert_eq!(data_file_name(ModelKind::ContractDocument), "ContractDocument.ndjson");
    }

    #[tokio::test]
    async fn test_writer_and_reader_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Customer.ndjson");

        let mut writer = NdjsonWriter::create(&path).await.unwrap();
        for i in 0..3 {
            let record = Record::new().with("id", format!("c{i}")).with("name", json!(null));
            writer.write(&record).await.unwrap();
        }
        let (lines, digest) = writer.finish().await.unwrap();
        assert_eq!(lines, 3);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.ends_with('\n'));

        let mut reader = NdjsonReader::open("Customer", &path).await.unwrap();
        let mut ids = Vec::new();
        while let Some(record) = reader.next_record().await.unwrap() {
            ids.push(record.get("id").cloned().unwrap());
        }
        assert_eq!(ids, vec![json!("c0"), json!("c1"), json!("c2")]);
        assert_eq!(reader.records(), 3);
        assert_eq!(reader.digest(), digest);
    }

    #[tokio::test]
    async fn test_reader_reports_bad_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Unit.ndjson");
        std::fs::write(&path, "{\"id\":\"u1\"}\n\n[1,2]\n").unwrap();

        let mut reader = NdjsonReader::open("Unit", &path).await.unwrap();
        assert!(reader.next_record().await.unwrap().is_some());
        match reader.next_record().await {
            Err(ArchiveError::MalformedRecord { model, line, .. }) => {
                assert_eq!(model, "Unit");
                assert_eq!(line, 3);
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_pack_and_unpack() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join(MANIFEST_FILE), b"{}").unwrap();
        std::fs::create_dir(source.path().join(DATA_DIR)).unwrap();
        std::fs::write(source.path().join(DATA_DIR).join("User.ndjson"), b"{\"id\":1}\n").unwrap();

        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("backup.tar.gz");
        pack_directory(source.path(), &archive).unwrap();

        let dest = tempfile::tempdir().unwrap();
        unpack_archive(&archive, dest.path()).unwrap();
        assert_eq!(std::fs::read(dest.path().join(MANIFEST_FILE)).unwrap(), b"{}");
        assert_eq!(
            std::fs::read(dest.path().join(DATA_DIR).join("User.ndjson")).unwrap(),
            b"{\"id\":1}\n"
        );
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        std::fs::write(&archive, b"not a gzip stream").unwrap();
        assert!(matches!(
            unpack_archive(&archive, dir.path()),
            Err(ArchiveError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_file_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("backup.tar.gz");

        let partial = PartialFile::new(&target);
        assert!(partial.path().to_string_lossy().ends_with("backup.tar.gz.partial"));
        std::fs::write(partial.path(), b"half").unwrap();
        drop(partial);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let partial = PartialFile::new(&target);
        std::fs::write(partial.path(), b"whole").unwrap();
        let committed = partial.commit().await.unwrap();
        assert_eq!(committed, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"whole");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_stale_partials_removed_for_kind() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir
            .path()
            .join("backup-local-2026-01-02T03-04-05-006Z.tar.gz.partial");
        let other_kind = dir
            .path()
            .join("backup-cloud-2026-01-02T03-04-05-006Z.tar.gz.partial");
        let finished = dir.path().join("backup-local-2026-01-02T03-04-05-006Z.tar.gz");
        for path in [&stale, &other_kind, &finished] {
            std::fs::write(path, b"x").unwrap();
        }

        let removed = remove_stale_partials(dir.path(), DatabaseKind::Local)
            .await
            .unwrap();
        assert_eq!(removed, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(other_kind.exists());
        assert!(finished.exists());
    }
}
