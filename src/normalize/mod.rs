//! Entity resolution and relationship normalization.
//!
//! A staged batch is rewritten into the normalized store by five stages
//! ([`Stage::ALL`]), each in its own transaction. A stage that fails rolls
//! back alone; stages already committed stay applied and the staged rows are
//! kept so the run can be resumed with [`normalize_staged`].

mod cache;
mod report;
mod resolver;
mod stages;

pub use cache::EntityCache;
pub use report::{ImportReport, StageReport, StageResult, StageStatus};
pub use resolver::{ensure_id, lookup, lookup_or_insert, resolve_values, EntityKind, Resolution};
pub use stages::{run_stage, Stage};

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Instant;

use crate::config::ImportConfig;
use crate::db::Session;
use crate::error::{CitegraphError, Result};
use crate::records::RawBatch;
use crate::staging;

/// Which entries of a paper's concept list become paper_concepts rows.
///
/// `SkipFirst` reproduces the legacy behaviour of dropping the first concept,
/// the same head/tail split applied to authors. It is kept as the default so
/// existing stores stay consistent, and flagged as a probable defect in logs
/// and import reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptPolicy {
    #[default]
    SkipFirst,
    All,
}

impl ConceptPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConceptPolicy::SkipFirst => "skip_first",
            ConceptPolicy::All => "all",
        }
    }
}

impl FromStr for ConceptPolicy {
    type Err = CitegraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().replace('-', "_").to_lowercase().as_str() {
            "skip_first" => Ok(ConceptPolicy::SkipFirst),
            "all" => Ok(ConceptPolicy::All),
            other => Err(CitegraphError::InvalidInput(format!(
                "unknown concept policy {:?} (expected skip_first or all)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    pub concept_policy: ConceptPolicy,
}

impl From<&ImportConfig> for NormalizeOptions {
    fn from(config: &ImportConfig) -> Self {
        Self {
            concept_policy: config.concept_policy,
        }
    }
}

/// Stage `batch`, normalize it, and clear staging if every stage committed.
pub fn import_batch(
    session: &mut Session,
    batch: &RawBatch,
    options: &NormalizeOptions,
) -> Result<ImportReport> {
    let started = Instant::now();
    let mut report = ImportReport::new(batch.source.clone(), options.concept_policy);
    report.staging = Some(staging::stage_batch(session, batch)?);
    normalize_into(session, options, &mut report)?;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

/// Normalize whatever is currently staged, e.g. after a partially failed run.
pub fn normalize_staged(session: &mut Session, options: &NormalizeOptions) -> Result<ImportReport> {
    let started = Instant::now();
    let mut report = ImportReport::new(staging::STAGING_TABLE, options.concept_policy);
    normalize_into(session, options, &mut report)?;
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

fn normalize_into(
    session: &mut Session,
    options: &NormalizeOptions,
    report: &mut ImportReport,
) -> Result<()> {
    let rows = staging::load_staged(&session.executor())?;
    if rows.is_empty() {
        log::info!("nothing staged for {}", report.source);
    }

    for stage in Stage::ALL {
        if let Err(e) = run_stage(session, stage, &rows, options, report) {
            if e.is_connectivity() {
                log::error!("{}: session lost during {}, abandoning run", report.source, stage);
                break;
            }
        }
    }

    if report.all_committed() {
        session.run_stage("clear staging", |exec, _| staging::recreate(exec))?;
        report.staging_cleared = true;
    } else {
        log::warn!(
            "{}: not every stage committed, {} staged row(s) kept for resume",
            report.source,
            rows.len()
        );
    }
    Ok(())
}
