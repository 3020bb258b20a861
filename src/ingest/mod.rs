pub mod incremental;
pub mod loader;
pub mod walker;

pub use incremental::{
    classify_batches, compute_batch_hash, imported_batches, is_imported, record_import,
    BatchClassification, ImportLogEntry,
};
pub use loader::{BatchLoader, JsonLinesLoader, JsonLoader, LoaderRegistry, YamlLoader};
pub use walker::{discover_batches, is_batch_extension, BatchFile, BATCH_EXTENSIONS};

use std::path::Path;

use crate::db::Session;
use crate::error::Result;
use crate::normalize::{import_batch, ImportReport, NormalizeOptions};

/// Convenience function to import a single batch file
///
/// Orchestrates the full pipeline: hash → load → stage → normalize → log.
/// Returns `None` when the exact bytes were imported before and `force` is off.
/// The file is logged only when every stage committed, so a partial import is
/// retried the next time the file is seen.
pub fn import_file(
    session: &mut Session,
    registry: &LoaderRegistry,
    path: &Path,
    options: &NormalizeOptions,
    force: bool,
) -> Result<Option<ImportReport>> {
    let batch_hash = compute_batch_hash(path)?;
    if !force && is_imported(&session.executor(), &batch_hash)? {
        log::info!("{} unchanged since last import, skipping", path.display());
        return Ok(None);
    }
    import_hashed(session, registry, path, &batch_hash, options).map(Some)
}

fn import_hashed(
    session: &mut Session,
    registry: &LoaderRegistry,
    path: &Path,
    batch_hash: &str,
    options: &NormalizeOptions,
) -> Result<ImportReport> {
    let batch = registry.load_path(path)?;
    let report = import_batch(session, &batch, options)?;

    if report.all_committed() {
        session.run_stage("import log", |exec, _| record_import(exec, batch_hash, &report))?;
    }
    log::info!("{}", report.summary());
    Ok(report)
}

/// Outcome of importing a folder.
#[derive(Debug, Default)]
pub struct FolderImport {
    pub reports: Vec<ImportReport>,
    /// Files skipped because their bytes are already in the import log.
    pub unchanged: Vec<BatchFile>,
    /// Files that could not be read or loaded.
    pub failed: Vec<BatchFile>,
}

/// Import every pending batch file under `root`, in path order.
///
/// A file that fails to load is logged and skipped; the remaining files still
/// import. Connectivity loss stops the run.
pub fn import_folder(
    session: &mut Session,
    registry: &LoaderRegistry,
    root: &Path,
    options: &NormalizeOptions,
    force: bool,
) -> Result<FolderImport> {
    let files = discover_batches(root)?;
    let mut classification = classify_batches(&session.executor(), &files)?;
    let mut outcome = FolderImport {
        failed: classification.unreadable,
        ..Default::default()
    };

    if force {
        classification.pending.append(&mut classification.unchanged);
        classification
            .pending
            .sort_by(|a, b| a.0.relative_path.cmp(&b.0.relative_path));
    } else {
        outcome.unchanged = classification.unchanged.into_iter().map(|(file, _)| file).collect();
    }
    log::info!(
        "{} batch file(s) under {}: {} pending, {} unchanged",
        files.len(),
        root.display(),
        classification.pending.len(),
        outcome.unchanged.len()
    );

    for (file, hash) in classification.pending {
        match import_hashed(session, registry, &file.absolute_path, &hash, options) {
            Ok(report) => outcome.reports.push(report),
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                log::error!("import {}: {} ({})", file.relative_path, e, e.class());
                outcome.failed.push(file);
            }
        }
    }
    Ok(outcome)
}
