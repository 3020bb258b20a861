//! Incremental import: skip batch files whose exact bytes were already imported.
//!
//! The import log is a convenience, not a correctness mechanism. Every
//! normalization stage is idempotent, so `--force` re-imports are always safe.

use rusqlite::params;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::db::Executor;
use crate::error::{CitegraphError, Result};
use crate::ingest::BatchFile;
use crate::normalize::ImportReport;

/// Compute SHA256 hash of a batch file's bytes
pub fn compute_batch_hash(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

/// One row of `import_log`.
#[derive(Debug, Clone)]
pub struct ImportLogEntry {
    pub batch_hash: String,
    pub source: String,
    pub batch_id: String,
    pub imported_at: String,
}

/// Result of classifying discovered batch files against the import log.
#[derive(Debug, Default)]
pub struct BatchClassification {
    /// Files never imported, or changed since (with their current hash).
    pub pending: Vec<(BatchFile, String)>,
    /// Files whose current hash is already in the log.
    pub unchanged: Vec<(BatchFile, String)>,
    /// Files that could not be read for hashing.
    pub unreadable: Vec<BatchFile>,
}

pub fn is_imported(exec: &Executor<'_>, batch_hash: &str) -> Result<bool> {
    let found: Option<i64> = exec.query_optional(
        "SELECT 1 FROM import_log WHERE batch_hash = ?1",
        params![batch_hash],
        |row| row.get(0),
    )?;
    Ok(found.is_some())
}

/// Record a completed import. Re-importing the same bytes replaces the entry.
pub fn record_import(exec: &Executor<'_>, batch_hash: &str, report: &ImportReport) -> Result<()> {
    let report_json = serde_json::to_string(report)
        .map_err(|e| CitegraphError::operation("serialize import report", e))?;
    exec.execute(
        "INSERT INTO import_log (batch_hash, source, batch_id, imported_at, report_json)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(batch_hash) DO UPDATE SET
             source = excluded.source,
             batch_id = excluded.batch_id,
             imported_at = excluded.imported_at,
             report_json = excluded.report_json",
        params![
            batch_hash,
            report.source,
            report.batch_id.to_string(),
            report.started_at.to_rfc3339(),
            report_json
        ],
    )?;
    Ok(())
}

/// Every logged import, oldest first.
pub fn imported_batches(exec: &Executor<'_>) -> Result<Vec<ImportLogEntry>> {
    exec.query_all(
        "SELECT batch_hash, source, batch_id, imported_at FROM import_log ORDER BY imported_at",
        [],
        |row| {
            Ok(ImportLogEntry {
                batch_hash: row.get(0)?,
                source: row.get(1)?,
                batch_id: row.get(2)?,
                imported_at: row.get(3)?,
            })
        },
    )
}

/// Split discovered files into pending and unchanged relative to the log.
pub fn classify_batches(exec: &Executor<'_>, files: &[BatchFile]) -> Result<BatchClassification> {
    let mut classification = BatchClassification::default();

    for file in files {
        let hash = match compute_batch_hash(&file.absolute_path) {
            Ok(hash) => hash,
            Err(e) => {
                log::warn!("cannot hash {}: {}", file.relative_path, e);
                classification.unreadable.push(file.clone());
                continue;
            }
        };
        if is_imported(exec, &hash)? {
            classification.unchanged.push((file.clone(), hash));
        } else {
            classification.pending.push((file.clone(), hash));
        }
    }

    Ok(classification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::open_test_session;
    use crate::normalize::ConceptPolicy;
    use std::io::Write;

    fn batch_file(path: &Path) -> BatchFile {
        BatchFile {
            relative_path: path.file_name().unwrap().to_string_lossy().to_string(),
            absolute_path: path.to_path_buf(),
            extension: "json".to_string(),
            file_size: 0,
        }
    }

    #[test]
    fn test_hash_is_content_based() {
        let a = tempfile::NamedTempFile::new().unwrap();
        let b = tempfile::NamedTempFile::new().unwrap();
        a.as_file().write_all(b"[]").unwrap();
        b.as_file().write_all(b"[]").unwrap();
        assert_eq!(
            compute_batch_hash(a.path()).unwrap(),
            compute_batch_hash(b.path()).unwrap()
        );
        assert_eq!(compute_batch_hash(a.path()).unwrap().len(), 64);
    }

    #[test]
    fn test_record_and_classify() {
        let (session, _temp) = open_test_session();
        let exec = session.executor();

        let seen = tempfile::NamedTempFile::new().unwrap();
        let fresh = tempfile::NamedTempFile::new().unwrap();
        seen.as_file().write_all(b"[{\"title\": \"A\"}]").unwrap();
        fresh.as_file().write_all(b"[{\"title\": \"B\"}]").unwrap();

        let hash = compute_batch_hash(seen.path()).unwrap();
        assert!(!is_imported(&exec, &hash).unwrap());

        let report = ImportReport::new("seen.json", ConceptPolicy::default());
        record_import(&exec, &hash, &report).unwrap();
        record_import(&exec, &hash, &report).unwrap();
        assert!(is_imported(&exec, &hash).unwrap());
        assert_eq!(imported_batches(&exec).unwrap().len(), 1);

        let gone = fresh.path().with_extension("missing");
        let files = vec![batch_file(seen.path()), batch_file(fresh.path()), batch_file(&gone)];
        let classification = classify_batches(&exec, &files).unwrap();
        assert_eq!(classification.unchanged.len(), 1);
        assert_eq!(classification.unchanged[0].1, hash);
        assert_eq!(classification.pending.len(), 1);
        assert_eq!(classification.pending[0].0.absolute_path, fresh.path());
        assert_eq!(classification.unreadable.len(), 1);
    }
}
