use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::db::Executor;
use crate::error::{CitegraphError, Result};

/// How citation endpoints are labelled when the edge list is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeResolution {
    /// Raw external identifier on both ends.
    ExternalId,
    /// Paper titles, joined through `papers.external_id`.
    PaperTitle,
    /// Primary authors only. Co-authors in `supports` are never credited.
    Author,
}

const BY_EXTERNAL_ID: &str = "
    SELECT s.url, t.url
    FROM citations c
    JOIN external_ids s ON c.source = s.id
    JOIN external_ids t ON c.target = t.id
    ORDER BY c.source, c.target";

const BY_PAPER_TITLE: &str = "
    SELECT sp.title, tp.title
    FROM citations c
    JOIN papers sp ON sp.external_id = c.source
    JOIN papers tp ON tp.external_id = c.target
    ORDER BY c.source, c.target, sp.id, tp.id";

const BY_AUTHOR: &str = "
    SELECT sa.name, ta.name
    FROM citations c
    JOIN papers sp ON sp.external_id = c.source
    JOIN authors sa ON sp.author = sa.id
    JOIN papers tp ON tp.external_id = c.target
    JOIN authors ta ON tp.author = ta.id
    ORDER BY c.source, c.target, sp.id, tp.id";

impl EdgeResolution {
    pub const ALL: [EdgeResolution; 3] = [
        EdgeResolution::ExternalId,
        EdgeResolution::PaperTitle,
        EdgeResolution::Author,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EdgeResolution::ExternalId => "external-id",
            EdgeResolution::PaperTitle => "paper-title",
            EdgeResolution::Author => "author",
        }
    }

    /// Edge list query returning `(source, target)` labels.
    pub fn sql(self) -> &'static str {
        match self {
            EdgeResolution::ExternalId => BY_EXTERNAL_ID,
            EdgeResolution::PaperTitle => BY_PAPER_TITLE,
            EdgeResolution::Author => BY_AUTHOR,
        }
    }
}

impl fmt::Display for EdgeResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EdgeResolution {
    type Err = CitegraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().replace('_', "-").to_lowercase().as_str() {
            "external-id" | "openalex" | "url" => Ok(EdgeResolution::ExternalId),
            "paper-title" | "paper" | "title" => Ok(EdgeResolution::PaperTitle),
            "author" => Ok(EdgeResolution::Author),
            other => Err(CitegraphError::InvalidInput(format!(
                "unknown edge resolution {:?} (expected external-id, paper-title or author)",
                other
            ))),
        }
    }
}

/// Read the citation edge list under `resolution`, in a deterministic order.
///
/// One row per stored citation for the external-id variant. The title and
/// author variants emit one row per matching paper pair, so a pair of labels
/// may repeat; repetition becomes edge weight in the graph.
pub fn fetch_edges(exec: &Executor<'_>, resolution: EdgeResolution) -> Result<Vec<(String, String)>> {
    let edges = exec.query_all(resolution.sql(), [], |row| Ok((row.get(0)?, row.get(1)?)))?;
    log::debug!("{} edge(s) by {}", edges.len(), resolution);
    Ok(edges)
}
