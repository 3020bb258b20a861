use indexmap::IndexSet;
use rusqlite::params;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::resolver::{lookup_or_insert, resolve_values, EntityKind};
use super::{ConceptPolicy, EntityCache, ImportReport, NormalizeOptions, StageReport};
use crate::db::{Executor, Session};
use crate::error::{CitegraphError, Result};
use crate::staging::StagedRecord;

/// Normalization stages, in the order they must run. Each commits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Entities,
    Papers,
    Supports,
    PaperConcepts,
    Citations,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Entities,
        Stage::Papers,
        Stage::Supports,
        Stage::PaperConcepts,
        Stage::Citations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Entities => "entities",
            Stage::Papers => "papers",
            Stage::Supports => "supports",
            Stage::PaperConcepts => "paper_concepts",
            Stage::Citations => "citations",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = CitegraphError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('-', "_").to_lowercase();
        Stage::ALL
            .into_iter()
            .find(|stage| stage.name() == wanted)
            .ok_or_else(|| {
                CitegraphError::InvalidInput(format!(
                    "unknown stage {:?} (expected one of: entities, papers, supports, paper_concepts, citations)",
                    s
                ))
            })
    }
}

#[derive(Debug, Default)]
struct StageOutput {
    counts: StageReport,
    by_kind: BTreeMap<EntityKind, StageReport>,
    concept_heads_excluded: usize,
}

/// Run one stage over `rows` in its own transaction and fold the outcome
/// into `report`. Safe to call again for the same rows: every write is
/// insert-if-absent.
pub fn run_stage(
    session: &mut Session,
    stage: Stage,
    rows: &[StagedRecord],
    options: &NormalizeOptions,
    report: &mut ImportReport,
) -> Result<StageReport> {
    let policy = options.concept_policy;
    let outcome = session.run_stage(stage.name(), |exec, cache| match stage {
        Stage::Entities => entities(exec, cache, rows),
        Stage::Papers => papers(exec, cache, rows),
        Stage::Supports => supports(exec, cache, rows),
        Stage::PaperConcepts => paper_concepts(exec, cache, rows, policy),
        Stage::Citations => citations(exec, cache, rows),
    });

    match outcome {
        Ok(output) => {
            for (kind, counts) in output.by_kind {
                report.entities_by_kind.entry(kind).or_default().add(counts);
            }
            if output.concept_heads_excluded > 0 {
                log::warn!(
                    "concept_policy = skip_first left the first concept of {} paper(s) out of \
                     paper_concepts; this mirrors the author head/tail split and is probably a defect \
                     (set import.concept_policy = \"all\" to record every concept)",
                    output.concept_heads_excluded
                );
            }
            report.concept_heads_excluded += output.concept_heads_excluded;
            log::info!(
                "{}: {} inserted, {} skipped, {} failed",
                stage,
                output.counts.inserted,
                output.counts.skipped,
                output.counts.failed
            );
            report.record_committed(stage, output.counts);
            Ok(output.counts)
        }
        Err(e) => {
            report.record_rolled_back(stage, &e);
            Err(e)
        }
    }
}

/// Log and count a row-level failure. Lost connectivity is returned instead,
/// which aborts the stage and triggers rollback and reconnect.
fn row_failed(counts: &mut StageReport, stage: Stage, what: &str, err: CitegraphError) -> Result<()> {
    if err.is_connectivity() {
        return Err(err);
    }
    log::error!("{} {}: {} ({}), skipped", stage, what, err, err.class());
    counts.failed += 1;
    Ok(())
}

fn tally(counts: &mut StageReport, inserted: bool) {
    if inserted {
        counts.inserted += 1;
    } else {
        counts.skipped += 1;
    }
}

fn entities(
    exec: &Executor<'_>,
    cache: &mut EntityCache,
    rows: &[StagedRecord],
) -> Result<StageOutput> {
    let authors: Vec<&str> = rows
        .iter()
        .flat_map(|r| r.authors.iter().map(String::as_str))
        .collect();
    // Every concept, heads included: only paper_concepts applies the policy.
    let concepts: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.concepts.as_ref())
        .flat_map(|c| c.iter().map(String::as_str))
        .collect();
    let publishers: Vec<&str> = rows.iter().filter_map(|r| r.publisher.as_deref()).collect();
    let venues: Vec<&str> = rows.iter().filter_map(|r| r.venue.as_deref()).collect();
    let types: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.publication_type.as_deref())
        .collect();
    let external_ids: Vec<&str> = rows
        .iter()
        .flat_map(|r| {
            r.external_id.as_deref().into_iter().chain(
                r.referenced_works
                    .iter()
                    .flat_map(|refs| refs.iter().map(String::as_str)),
            )
        })
        .collect();

    let mut output = StageOutput::default();
    for (kind, values) in [
        (EntityKind::Author, authors),
        (EntityKind::Concept, concepts),
        (EntityKind::Publisher, publishers),
        (EntityKind::Venue, venues),
        (EntityKind::PaperType, types),
        (EntityKind::ExternalId, external_ids),
    ] {
        let resolution = resolve_values(exec, cache, kind, values)?;
        let counts = StageReport::from(&resolution);
        output.counts.add(counts);
        output.by_kind.insert(kind, counts);
    }
    Ok(output)
}

pub(crate) fn paper_id_by_title(exec: &Executor<'_>, title: &str) -> Result<Option<i64>> {
    exec.query_optional(
        "SELECT id FROM papers WHERE title = ?1",
        params![title],
        |row| row.get(0),
    )
}

/// Papers are never created lazily: a missing one fails the referencing row.
fn require_paper(exec: &Executor<'_>, title: &str) -> Result<i64> {
    paper_id_by_title(exec, title)?.ok_or_else(|| CitegraphError::ResolutionMiss {
        kind: "paper".to_string(),
        value: title.to_string(),
    })
}

fn optional_id(
    exec: &Executor<'_>,
    cache: &mut EntityCache,
    kind: EntityKind,
    value: Option<&str>,
) -> Result<Option<i64>> {
    value
        .map(|v| lookup_or_insert(exec, cache, kind, v))
        .transpose()
}

/// Insert one paper. `Ok(false)` when its title is already present.
fn insert_paper(exec: &Executor<'_>, cache: &mut EntityCache, row: &StagedRecord) -> Result<bool> {
    if paper_id_by_title(exec, &row.title)?.is_some() {
        return Ok(false);
    }

    let head = row.authors.first().ok_or_else(|| {
        CitegraphError::operation("insert paper", "author list is empty, no primary author")
    })?;
    let author = lookup_or_insert(exec, cache, EntityKind::Author, head)?;
    let publisher = optional_id(exec, cache, EntityKind::Publisher, row.publisher.as_deref())?;
    let ptype = optional_id(exec, cache, EntityKind::PaperType, row.publication_type.as_deref())?;
    let venue = optional_id(exec, cache, EntityKind::Venue, row.venue.as_deref())?;
    let external_id = optional_id(exec, cache, EntityKind::ExternalId, row.external_id.as_deref())?;

    let changed = exec.execute(
        "INSERT INTO papers (doi, title, pdate, author, publisher, ptype, venue, external_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(title) DO NOTHING",
        params![row.doi, row.title, row.pdate, author, publisher, ptype, venue, external_id],
    )?;
    Ok(changed == 1)
}

fn papers(exec: &Executor<'_>, cache: &mut EntityCache, rows: &[StagedRecord]) -> Result<StageOutput> {
    let mut output = StageOutput::default();
    for row in rows {
        match insert_paper(exec, cache, row) {
            Ok(inserted) => tally(&mut output.counts, inserted),
            Err(e) => row_failed(&mut output.counts, Stage::Papers, &format!("{:?}", row.title), e)?,
        }
    }
    Ok(output)
}

/// Insert a (left, right) pair into a two-column fact table keyed on both.
fn insert_pair(exec: &Executor<'_>, sql: &str, left: i64, right: i64) -> Result<bool> {
    Ok(exec.execute(sql, params![left, right])? == 1)
}

fn supports(exec: &Executor<'_>, cache: &mut EntityCache, rows: &[StagedRecord]) -> Result<StageOutput> {
    const SQL: &str =
        "INSERT INTO supports (paper, author) VALUES (?1, ?2) ON CONFLICT(paper, author) DO NOTHING";

    let mut output = StageOutput::default();
    for row in rows.iter().filter(|r| r.authors.len() > 1) {
        let what = format!("{:?}", row.title);
        let paper = match require_paper(exec, &row.title) {
            Ok(id) => id,
            Err(e) => {
                row_failed(&mut output.counts, Stage::Supports, &what, e)?;
                continue;
            }
        };

        // Head is the primary author on papers.author; only the tail lands here.
        let mut seen = HashSet::new();
        for name in &row.authors[1..] {
            let author = match lookup_or_insert(exec, cache, EntityKind::Author, name) {
                Ok(id) => id,
                Err(e) => {
                    row_failed(&mut output.counts, Stage::Supports, &what, e)?;
                    continue;
                }
            };
            if !seen.insert(author) {
                continue;
            }
            match insert_pair(exec, SQL, paper, author) {
                Ok(inserted) => tally(&mut output.counts, inserted),
                Err(e) => row_failed(&mut output.counts, Stage::Supports, &what, e)?,
            }
        }
    }
    Ok(output)
}

fn paper_concepts(
    exec: &Executor<'_>,
    cache: &mut EntityCache,
    rows: &[StagedRecord],
    policy: ConceptPolicy,
) -> Result<StageOutput> {
    const SQL: &str = "INSERT INTO paper_concepts (paper, concept) VALUES (?1, ?2) \
                       ON CONFLICT(paper, concept) DO NOTHING";

    let mut output = StageOutput::default();
    for row in rows {
        let Some(concepts) = row.concepts.as_ref() else {
            continue;
        };
        let recorded: &[String] = match policy {
            ConceptPolicy::All => concepts,
            ConceptPolicy::SkipFirst => {
                if concepts.is_empty() {
                    continue;
                }
                output.concept_heads_excluded += 1;
                &concepts[1..]
            }
        };
        if recorded.is_empty() {
            continue;
        }

        let what = format!("{:?}", row.title);
        let paper = match require_paper(exec, &row.title) {
            Ok(id) => id,
            Err(e) => {
                row_failed(&mut output.counts, Stage::PaperConcepts, &what, e)?;
                continue;
            }
        };

        let mut seen = HashSet::new();
        for name in recorded {
            let concept = match lookup_or_insert(exec, cache, EntityKind::Concept, name) {
                Ok(id) => id,
                Err(e) => {
                    row_failed(&mut output.counts, Stage::PaperConcepts, &what, e)?;
                    continue;
                }
            };
            if !seen.insert(concept) {
                continue;
            }
            match insert_pair(exec, SQL, paper, concept) {
                Ok(inserted) => tally(&mut output.counts, inserted),
                Err(e) => row_failed(&mut output.counts, Stage::PaperConcepts, &what, e)?,
            }
        }
    }
    Ok(output)
}

fn citations(exec: &Executor<'_>, cache: &mut EntityCache, rows: &[StagedRecord]) -> Result<StageOutput> {
    const SQL: &str = "INSERT INTO citations (source, target) VALUES (?1, ?2) \
                       ON CONFLICT(source, target) DO NOTHING";

    let mut output = StageOutput::default();
    for row in rows {
        let (Some(own), Some(references)) = (row.external_id.as_deref(), row.referenced_works.as_ref())
        else {
            continue;
        };
        let what = format!("{:?} ({})", row.title, own);
        let source = match lookup_or_insert(exec, cache, EntityKind::ExternalId, own) {
            Ok(id) => id,
            Err(e) => {
                row_failed(&mut output.counts, Stage::Citations, &what, e)?;
                continue;
            }
        };

        let targets: IndexSet<&str> = references.iter().map(String::as_str).collect();
        for target in targets {
            let target = match lookup_or_insert(exec, cache, EntityKind::ExternalId, target) {
                Ok(id) => id,
                Err(e) => {
                    row_failed(&mut output.counts, Stage::Citations, &what, e)?;
                    continue;
                }
            };
            match insert_pair(exec, SQL, source, target) {
                Ok(inserted) => tally(&mut output.counts, inserted),
                Err(e) => row_failed(&mut output.counts, Stage::Citations, &what, e)?,
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("paper-concepts".parse::<Stage>().unwrap(), Stage::PaperConcepts);
        assert!("graphs".parse::<Stage>().is_err());
    }

    #[test]
    fn test_row_failed_escalates_connectivity() {
        let mut counts = StageReport::default();
        row_failed(&mut counts, Stage::Papers, "x", CitegraphError::operation("a", "b")).unwrap();
        assert_eq!(counts.failed, 1);
        assert!(row_failed(
            &mut counts,
            Stage::Papers,
            "x",
            CitegraphError::Connectivity("gone".to_string())
        )
        .is_err());
        assert_eq!(counts.failed, 1);
    }
}
