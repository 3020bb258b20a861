//! Raw staging store: one scraped batch, held until it has been normalized.
//!
//! `papers_raw` is not part of the migrated schema. It is dropped and rebuilt
//! empty whenever a new batch is staged and after a batch normalizes cleanly.
//! List-valued fields are stored as JSON text; a NULL list column means the
//! source delivered no list at all.

use rusqlite::params;
use serde::Serialize;
use std::collections::HashSet;

use crate::db::{Executor, Session};
use crate::error::{CitegraphError, Result};
use crate::records::{RawBatch, RawRecord};

pub const STAGING_TABLE: &str = "papers_raw";

const CREATE_STAGING: &str = "
    DROP TABLE IF EXISTS papers_raw;
    CREATE TABLE papers_raw (
        id INTEGER PRIMARY KEY,
        doi TEXT,
        title TEXT NOT NULL UNIQUE,
        pdate TEXT,
        authors_json TEXT NOT NULL,
        concepts_json TEXT,
        publisher TEXT,
        ptype TEXT,
        venue TEXT,
        external_id TEXT,
        referenced_works_json TEXT
    );";

/// Counts from staging one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StagingSummary {
    pub received: usize,
    pub staged: usize,
    /// Later records repeating an earlier title in the same batch.
    pub duplicate_titles: usize,
    pub untitled: usize,
    pub failed: usize,
    /// Malformed entries the loader already dropped.
    pub upstream_failures: usize,
}

/// A staged row, read back for normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub staging_id: i64,
    pub title: String,
    pub doi: Option<String>,
    pub pdate: Option<String>,
    pub authors: Vec<String>,
    pub concepts: Option<Vec<String>>,
    pub publisher: Option<String>,
    pub publication_type: Option<String>,
    pub venue: Option<String>,
    pub external_id: Option<String>,
    pub referenced_works: Option<Vec<String>>,
}

/// Drop and recreate the staging relation empty.
pub fn recreate(exec: &Executor<'_>) -> Result<()> {
    exec.execute_batch(CREATE_STAGING)
}

pub fn exists(exec: &Executor<'_>) -> Result<bool> {
    let n: Option<i64> = exec.query_optional(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![STAGING_TABLE],
        |row| row.get(0),
    )?;
    Ok(n.unwrap_or(0) > 0)
}

/// Rows currently staged; 0 when the relation does not exist yet.
pub fn staged_count(exec: &Executor<'_>) -> Result<i64> {
    if !exists(exec)? {
        return Ok(0);
    }
    exec.count("SELECT COUNT(*) FROM papers_raw")
}

fn list_json(list: &[String]) -> Result<String> {
    serde_json::to_string(list).map_err(|e| CitegraphError::operation("encode staged list", e))
}

fn insert_record(exec: &Executor<'_>, title: &str, record: &RawRecord) -> Result<()> {
    let authors = list_json(&record.authors)?;
    let concepts = record.concepts.as_deref().map(list_json).transpose()?;
    let references = record.referenced_works.as_deref().map(list_json).transpose()?;

    exec.execute(
        "INSERT INTO papers_raw
            (doi, title, pdate, authors_json, concepts_json, publisher, ptype, venue,
             external_id, referenced_works_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.doi,
            title,
            record.normalized_date(),
            authors,
            concepts,
            record.publisher,
            record.publication_type,
            record.venue,
            record.external_id,
            references,
        ],
    )?;
    Ok(())
}

/// Replace whatever is staged with `batch`, in one transaction.
///
/// Within a batch the first record carrying a title wins; later records with
/// the same title and records without a title are counted and dropped.
pub fn stage_batch(session: &mut Session, batch: &RawBatch) -> Result<StagingSummary> {
    session.run_stage("staging", |exec, _| {
        let leftover = staged_count(exec)?;
        if leftover > 0 {
            log::warn!(
                "discarding {} staged row(s) from an unfinished import before staging {}",
                leftover,
                batch.source
            );
        }
        recreate(exec)?;

        let mut summary = StagingSummary {
            received: batch.len(),
            upstream_failures: batch.upstream_failures,
            ..Default::default()
        };
        let mut seen: HashSet<&str> = HashSet::new();

        for record in &batch.records {
            let Some(title) = record.title.as_deref() else {
                let err = CitegraphError::Upstream("record without a title".to_string());
                log::warn!("{}: {} ({}), skipped", batch.source, err, err.class());
                summary.untitled += 1;
                continue;
            };
            if !seen.insert(title) {
                log::debug!("{}: duplicate title {:?} dropped", batch.source, title);
                summary.duplicate_titles += 1;
                continue;
            }

            match insert_record(exec, title, record) {
                Ok(()) => summary.staged += 1,
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => {
                    log::error!("stage {:?}: {} ({})", title, e, e.class());
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "staged {}/{} record(s) from {} ({} duplicate, {} untitled, {} failed)",
            summary.staged,
            summary.received,
            batch.source,
            summary.duplicate_titles,
            summary.untitled,
            summary.failed
        );
        Ok(summary)
    })
}

fn decode_list(column: &str, title: &str, raw: Option<String>) -> Result<Option<Vec<String>>> {
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|e| {
            CitegraphError::Parse(format!("papers_raw.{} for {:?}: {}", column, title, e))
        })
    })
    .transpose()
}

type StagedRow = (
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Read every staged row in staging order. Empty when nothing is staged.
pub fn load_staged(exec: &Executor<'_>) -> Result<Vec<StagedRecord>> {
    if !exists(exec)? {
        return Ok(Vec::new());
    }

    let rows: Vec<StagedRow> = exec.query_all(
        "SELECT id, title, doi, pdate, authors_json, concepts_json, publisher, ptype, venue,
                external_id, referenced_works_json
         FROM papers_raw ORDER BY id",
        [],
        |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
            ))
        },
    )?;

    rows.into_iter()
        .map(
            |(id, title, doi, pdate, authors, concepts, publisher, ptype, venue, ext, refs)| {
                let authors = decode_list("authors_json", &title, Some(authors))?.unwrap_or_default();
                let concepts = decode_list("concepts_json", &title, concepts)?;
                let referenced_works = decode_list("referenced_works_json", &title, refs)?;
                Ok(StagedRecord {
                    staging_id: id,
                    title,
                    doi,
                    pdate,
                    authors,
                    concepts,
                    publisher,
                    publication_type: ptype,
                    venue,
                    external_id: ext,
                    referenced_works,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::open_test_session;

    fn record(title: Option<&str>, authors: &[&str]) -> RawRecord {
        RawRecord {
            title: title.map(str::to_string),
            authors: authors.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_stage_and_load_round_trip() {
        let (mut session, _temp) = open_test_session();
        let mut first = record(Some("P1"), &["Alice", "Bob"]);
        first.concepts = Some(vec!["ML".to_string()]);
        first.referenced_works = Some(vec![]);
        first.publication_date = Some("2019".to_string());
        let batch = RawBatch::new("inline", vec![first, record(Some("P2"), &["Bob"])]);

        let summary = stage_batch(&mut session, &batch).unwrap();
        assert_eq!(summary.staged, 2);

        let staged = load_staged(&session.executor()).unwrap();
        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].title, "P1");
        assert_eq!(staged[0].authors, vec!["Alice", "Bob"]);
        assert_eq!(staged[0].concepts, Some(vec!["ML".to_string()]));
        assert_eq!(staged[0].referenced_works, Some(vec![]));
        assert_eq!(staged[0].pdate.as_deref(), Some("2019-01-01"));
        assert_eq!(staged[1].concepts, None);
        assert_eq!(staged[1].referenced_works, None);
    }

    #[test]
    fn test_first_title_wins_and_untitled_skipped() {
        let (mut session, _temp) = open_test_session();
        let batch = RawBatch::new(
            "inline",
            vec![
                record(Some("Same"), &["First"]),
                record(None, &["Nobody"]),
                record(Some("Same"), &["Second"]),
            ],
        );

        let summary = stage_batch(&mut session, &batch).unwrap();
        assert_eq!(summary.received, 3);
        assert_eq!(summary.staged, 1);
        assert_eq!(summary.duplicate_titles, 1);
        assert_eq!(summary.untitled, 1);

        let staged = load_staged(&session.executor()).unwrap();
        assert_eq!(staged[0].authors, vec!["First"]);
    }

    #[test]
    fn test_restaging_replaces_previous_batch() {
        let (mut session, _temp) = open_test_session();
        stage_batch(&mut session, &RawBatch::new("one", vec![record(Some("A"), &["x"])])).unwrap();
        stage_batch(&mut session, &RawBatch::new("two", vec![record(Some("B"), &["y"])])).unwrap();

        let staged = load_staged(&session.executor()).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].title, "B");
    }

    #[test]
    fn test_counts_without_staging_table() {
        let (session, _temp) = open_test_session();
        let exec = session.executor();
        assert!(!exists(&exec).unwrap());
        assert_eq!(staged_count(&exec).unwrap(), 0);
        assert!(load_staged(&exec).unwrap().is_empty());
        recreate(&exec).unwrap();
        assert!(exists(&exec).unwrap());
        assert_eq!(staged_count(&exec).unwrap(), 0);
    }
}
