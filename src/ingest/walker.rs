use walkdir::WalkDir;
use std::path::{Path, PathBuf};
use crate::error::{CitegraphError, Result};

/// Extensions a batch file may carry (case-insensitive).
pub const BATCH_EXTENSIONS: &[&str] = &["json", "jsonl", "ndjson", "yaml", "yml"];

/// A discovered batch file
#[derive(Debug, Clone)]
pub struct BatchFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub extension: String,
    pub file_size: u64,
}

pub fn is_batch_extension(extension: &str) -> bool {
    BATCH_EXTENSIONS.contains(&extension.to_lowercase().as_str())
}

/// Discover batch files under `root`, sorted by relative path.
///
/// Scraped batches may land in any order; sorting keeps a folder import
/// deterministic regardless of directory iteration order.
pub fn discover_batches(root: &Path) -> Result<Vec<BatchFile>> {
    if !root.is_dir() {
        return Err(CitegraphError::Config(format!(
            "batch folder {} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        if !path.is_file() {
            continue;
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        if !is_batch_extension(&extension) {
            continue;
        }

        let metadata = std::fs::metadata(path)?;

        let relative_path = path
            .strip_prefix(root)
            .map_err(|_| CitegraphError::Config(
                format!("Failed to compute relative path for: {}", path.display())
            ))?
            .to_string_lossy()
            .replace('\\', "/");

        files.push(BatchFile {
            relative_path,
            absolute_path: path.to_path_buf(),
            extension,
            file_size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    log::info!("Discovered {} batch file(s) in {}", files.len(), root.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use std::fs;

    #[test]
    fn test_discover_batches_sorted_and_filtered() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("2024/q1")).unwrap();
        fs::write(root.join("zeta.json"), "[]").unwrap();
        fs::write(root.join("alpha.YAML"), "[]").unwrap();
        fs::write(root.join("2024/q1/batch.jsonl"), "").unwrap();
        fs::write(root.join("notes.txt"), "not a batch").unwrap();
        fs::write(root.join("dump.xml"), "<x/>").unwrap();

        let files = discover_batches(root).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["2024/q1/batch.jsonl", "alpha.YAML", "zeta.json"]);
        assert_eq!(files[1].extension, "yaml");
    }

    #[test]
    fn test_discover_batches_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(discover_batches(temp_dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_discover_batches_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        assert!(discover_batches(&temp_dir.path().join("nope")).is_err());
    }
}
