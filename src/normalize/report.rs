use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

use super::{ConceptPolicy, EntityKind, Resolution, Stage};
use crate::error::CitegraphError;
use crate::staging::StagingSummary;

/// Row counts for one stage (or one entity kind).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub inserted: usize,
    /// Already present; nothing written.
    pub skipped: usize,
    pub failed: usize,
}

impl StageReport {
    pub fn add(&mut self, other: StageReport) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.failed
    }
}

impl From<&Resolution> for StageReport {
    fn from(resolution: &Resolution) -> Self {
        Self {
            inserted: resolution.inserted,
            skipped: resolution.existing,
            failed: resolution.failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub status: StageStatus,
    pub counts: StageReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structured outcome of one import or resume run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub batch_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub staging: Option<StagingSummary>,
    pub stages: Vec<StageResult>,
    pub entities_by_kind: BTreeMap<EntityKind, StageReport>,
    pub concept_policy: ConceptPolicy,
    /// Concept list heads left out of paper_concepts under `SkipFirst`.
    pub concept_heads_excluded: usize,
    pub staging_cleared: bool,
    pub elapsed_ms: u64,
}

impl ImportReport {
    pub fn new(source: impl Into<String>, concept_policy: ConceptPolicy) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source: source.into(),
            started_at: Utc::now(),
            staging: None,
            stages: Vec::new(),
            entities_by_kind: BTreeMap::new(),
            concept_policy,
            concept_heads_excluded: 0,
            staging_cleared: false,
            elapsed_ms: 0,
        }
    }

    pub fn record_committed(&mut self, stage: Stage, counts: StageReport) {
        self.stages.push(StageResult {
            stage,
            status: StageStatus::Committed,
            counts,
            error_class: None,
            error: None,
        });
    }

    pub fn record_rolled_back(&mut self, stage: Stage, err: &CitegraphError) {
        self.stages.push(StageResult {
            stage,
            status: StageStatus::RolledBack,
            counts: StageReport::default(),
            error_class: Some(err.class()),
            error: Some(err.to_string()),
        });
    }

    /// Latest result for `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().rev().find(|r| r.stage == stage)
    }

    /// True when every normalization stage ran and committed.
    pub fn all_committed(&self) -> bool {
        Stage::ALL.iter().all(|s| {
            self.stage(*s)
                .map(|r| r.status == StageStatus::Committed)
                .unwrap_or(false)
        })
    }

    pub fn totals(&self) -> StageReport {
        let mut totals = StageReport::default();
        for result in &self.stages {
            totals.add(result.counts);
        }
        totals
    }

    /// One-screen human readable summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "import {} ({})", self.batch_id, self.source);
        if let Some(staging) = &self.staging {
            let _ = writeln!(
                out,
                "  staging: {} received, {} staged, {} duplicate title(s), {} untitled, {} failed, {} malformed",
                staging.received,
                staging.staged,
                staging.duplicate_titles,
                staging.untitled,
                staging.failed,
                staging.upstream_failures
            );
        }
        for result in &self.stages {
            match result.status {
                StageStatus::Committed => {
                    let _ = writeln!(
                        out,
                        "  {:<15} committed    inserted {:>6}  skipped {:>6}  failed {:>6}",
                        result.stage.name(),
                        result.counts.inserted,
                        result.counts.skipped,
                        result.counts.failed
                    );
                }
                StageStatus::RolledBack => {
                    let _ = writeln!(
                        out,
                        "  {:<15} rolled back  {}: {}",
                        result.stage.name(),
                        result.error_class.unwrap_or("OperationFailure"),
                        result.error.as_deref().unwrap_or("")
                    );
                }
            }
        }
        for (kind, counts) in &self.entities_by_kind {
            let _ = writeln!(
                out,
                "    {:<13} inserted {:>6}  existing {:>6}  failed {:>6}",
                kind.as_str(),
                counts.inserted,
                counts.skipped,
                counts.failed
            );
        }
        if self.concept_heads_excluded > 0 {
            let _ = writeln!(
                out,
                "  {} leading concept(s) excluded by concept_policy = {}",
                self.concept_heads_excluded,
                self.concept_policy.as_str()
            );
        }
        let _ = write!(
            out,
            "  staging {} in {} ms",
            if self.staging_cleared { "cleared" } else { "kept for --resume" },
            self.elapsed_ms
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_committed_needs_every_stage() {
        let mut report = ImportReport::new("inline", ConceptPolicy::SkipFirst);
        assert!(!report.all_committed());

        for stage in Stage::ALL {
            report.record_committed(stage, StageReport { inserted: 1, ..Default::default() });
        }
        assert!(report.all_committed());
        assert_eq!(report.totals().inserted, Stage::ALL.len());

        let err = CitegraphError::Connectivity("lost".to_string());
        report.record_rolled_back(Stage::Citations, &err);
        assert!(!report.all_committed());
        assert_eq!(report.stage(Stage::Citations).unwrap().error_class, Some("ConnectivityFailure"));
    }

    #[test]
    fn test_report_serializes() {
        let mut report = ImportReport::new("batch.json", ConceptPolicy::All);
        report
            .entities_by_kind
            .insert(EntityKind::PaperType, StageReport { inserted: 2, skipped: 1, failed: 0 });
        report.record_committed(Stage::Papers, StageReport::default());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["source"], "batch.json");
        assert_eq!(json["concept_policy"], "all");
        assert_eq!(json["entities_by_kind"]["type"]["inserted"], 2);
        assert_eq!(json["stages"][0]["stage"], "papers");
        assert_eq!(json["stages"][0]["status"], "committed");
    }

    #[test]
    fn test_summary_mentions_failures() {
        let mut report = ImportReport::new("inline", ConceptPolicy::SkipFirst);
        report.concept_heads_excluded = 3;
        report.record_rolled_back(Stage::Papers, &CitegraphError::operation("insert", "boom"));
        let text = report.summary();
        assert!(text.contains("rolled back"));
        assert!(text.contains("boom"));
        assert!(text.contains("skip_first"));
        assert!(text.contains("kept for --resume"));
    }
}
