//! Folder watcher: import batch files as they land in the batch folder.
//!
//! Uses the notify crate to watch the directory, debounces events, and for each
//! settled batch file runs the regular incremental import. Files whose bytes
//! are already in the import log are skipped, so editors touching a file
//! without changing it cost one hash.

mod watcher;

use std::path::Path;
use std::sync::mpsc;

use crate::db::Session;
use crate::error::{CitegraphError, Result};
use crate::ingest::{import_file, is_batch_extension, BatchFile, LoaderRegistry};
use crate::normalize::{ImportReport, NormalizeOptions};

/// Build a [`BatchFile`] from an absolute path and the watched root.
/// Returns None if the path is outside root, gone, or not a batch file.
pub fn batch_file_from_path(absolute_path: &Path, root: &Path) -> Result<Option<BatchFile>> {
    let root = root
        .canonicalize()
        .map_err(|e| CitegraphError::Config(format!("root canonicalize: {}", e)))?;
    // Deleted or renamed-away files produce events too.
    let absolute_path = match absolute_path.canonicalize() {
        Ok(p) => p,
        Err(_) => return Ok(None),
    };

    if !absolute_path.starts_with(&root) || !absolute_path.is_file() {
        return Ok(None);
    }

    let extension = absolute_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !is_batch_extension(&extension) {
        return Ok(None);
    }

    let relative_path = absolute_path
        .strip_prefix(&root)
        .map_err(|_| CitegraphError::Config("strip_prefix".to_string()))?
        .to_string_lossy()
        .replace('\\', "/");

    let metadata = std::fs::metadata(&absolute_path)?;
    Ok(Some(BatchFile {
        relative_path,
        absolute_path,
        extension,
        file_size: metadata.len(),
    }))
}

/// Handle one settled path: filter, then import if new or changed.
pub fn handle_batch_change(
    session: &mut Session,
    registry: &LoaderRegistry,
    options: &NormalizeOptions,
    root: &Path,
    path: &Path,
) -> Result<Option<ImportReport>> {
    let file = match batch_file_from_path(path, root)? {
        Some(f) => f,
        None => return Ok(None),
    };

    let start = std::time::Instant::now();
    let report = import_file(session, registry, &file.absolute_path, options, false)?;
    if report.is_some() {
        log::info!("watch: {} imported in {:?}", file.relative_path, start.elapsed());
    }
    Ok(report)
}

/// Run the folder watcher: spawn the watcher thread, then import each settled
/// path on this thread. Runs until the watcher thread exits.
pub fn run_watcher(
    session: &mut Session,
    root: &Path,
    options: &NormalizeOptions,
    debounce_ms: u64,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let watch_root = root.to_path_buf();

    std::thread::spawn(move || {
        if let Err(e) = watcher::run_watcher_thread(&watch_root, debounce_ms, tx) {
            log::error!("watcher thread error: {}", e);
        }
    });

    let registry = LoaderRegistry::new();
    log::info!("watching {} (debounce {} ms)", root.display(), debounce_ms);

    for path in rx {
        match handle_batch_change(session, &registry, options, root, &path) {
            Ok(_) => {}
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => log::error!("watch {}: {}", path.display(), e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::open_test_session;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_batch_file_from_path_under_root() {
        let root = TempDir::new().unwrap();
        let sub = root.path().join("2024");
        fs::create_dir_all(&sub).unwrap();
        let file_path = sub.join("scrape.JSON");
        fs::write(&file_path, "[]").unwrap();

        let file = batch_file_from_path(&file_path, root.path()).unwrap();
        let file = file.expect("expected Some(BatchFile)");
        assert_eq!(file.relative_path, "2024/scrape.JSON");
        assert_eq!(file.extension, "json");
        assert_eq!(file.file_size, 2);
    }

    #[test]
    fn test_batch_file_from_path_outside_root_returns_none() {
        let root = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file_path = other.path().join("batch.json");
        fs::write(&file_path, "[]").unwrap();

        assert!(batch_file_from_path(&file_path, root.path()).unwrap().is_none());
    }

    #[test]
    fn test_batch_file_from_path_filters_extension_and_missing() {
        let root = TempDir::new().unwrap();
        let notes = root.path().join("notes.txt");
        fs::write(&notes, "text").unwrap();

        assert!(batch_file_from_path(&notes, root.path()).unwrap().is_none());
        assert!(batch_file_from_path(&root.path().join("gone.json"), root.path())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_handle_batch_change_imports_once() {
        let (mut session, _db) = open_test_session();
        let root = TempDir::new().unwrap();
        let path = root.path().join("batch.jsonl");
        fs::write(
            &path,
            "{\"title\": \"P1\", \"authors\": [\"Alice\"]}\n{\"title\": \"P2\", \"authors\": [\"Bob\"]}\n",
        )
        .unwrap();

        let registry = LoaderRegistry::new();
        let options = NormalizeOptions::default();
        let first = handle_batch_change(&mut session, &registry, &options, root.path(), &path).unwrap();
        assert!(first.is_some());

        let second = handle_batch_change(&mut session, &registry, &options, root.path(), &path).unwrap();
        assert!(second.is_none());
    }
}
