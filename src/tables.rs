//! Tabular listings for the presentation side: raw entity and fact tables,
//! human-readable resolved relationships, and the three citation edge lists.

use rusqlite::types::ValueRef;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::db::Executor;
use crate::error::{CitegraphError, Result};
use crate::graph::EdgeResolution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Listing {
    Authors,
    Concepts,
    Publishers,
    Venues,
    Types,
    ExternalIds,
    Papers,
    Supports,
    SupportsResolved,
    PaperConcepts,
    PaperConceptsResolved,
    Citations,
    CitationsByExternalId,
    CitationsByTitle,
    CitationsByAuthor,
}

impl Listing {
    pub const ALL: [Listing; 15] = [
        Listing::Authors,
        Listing::Concepts,
        Listing::Publishers,
        Listing::Venues,
        Listing::Types,
        Listing::ExternalIds,
        Listing::Papers,
        Listing::Supports,
        Listing::SupportsResolved,
        Listing::PaperConcepts,
        Listing::PaperConceptsResolved,
        Listing::Citations,
        Listing::CitationsByExternalId,
        Listing::CitationsByTitle,
        Listing::CitationsByAuthor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Listing::Authors => "authors",
            Listing::Concepts => "concepts",
            Listing::Publishers => "publishers",
            Listing::Venues => "venues",
            Listing::Types => "types",
            Listing::ExternalIds => "external-ids",
            Listing::Papers => "papers",
            Listing::Supports => "supports",
            Listing::SupportsResolved => "supports-resolved",
            Listing::PaperConcepts => "paper-concepts",
            Listing::PaperConceptsResolved => "paper-concepts-resolved",
            Listing::Citations => "citations",
            Listing::CitationsByExternalId => "citations-by-external-id",
            Listing::CitationsByTitle => "citations-by-title",
            Listing::CitationsByAuthor => "citations-by-author",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Listing::Authors
            | Listing::Concepts
            | Listing::Publishers
            | Listing::Venues
            | Listing::Types => &["id", "name"],
            Listing::ExternalIds => &["id", "url"],
            Listing::Papers => &[
                "id",
                "doi",
                "title",
                "pdate",
                "author",
                "publisher",
                "ptype",
                "venue",
                "external_id",
            ],
            Listing::Supports | Listing::SupportsResolved => &["paper", "author"],
            Listing::PaperConcepts | Listing::PaperConceptsResolved => &["paper", "concept"],
            Listing::Citations
            | Listing::CitationsByExternalId
            | Listing::CitationsByTitle
            | Listing::CitationsByAuthor => &["source", "target"],
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Listing::Authors => "SELECT id, name FROM authors ORDER BY id",
            Listing::Concepts => "SELECT id, name FROM concepts ORDER BY id",
            Listing::Publishers => "SELECT id, name FROM publishers ORDER BY id",
            Listing::Venues => "SELECT id, name FROM venues ORDER BY id",
            Listing::Types => "SELECT id, name FROM types ORDER BY id",
            Listing::ExternalIds => "SELECT id, url FROM external_ids ORDER BY id",
            Listing::Papers => {
                "SELECT id, doi, title, pdate, author, publisher, ptype, venue, external_id
                 FROM papers ORDER BY id"
            }
            Listing::Supports => "SELECT paper, author FROM supports ORDER BY paper, author",
            Listing::SupportsResolved => {
                "SELECT p.title, a.name
                 FROM supports s
                 JOIN papers p ON s.paper = p.id
                 JOIN authors a ON s.author = a.id
                 ORDER BY s.paper, s.author"
            }
            Listing::PaperConcepts => {
                "SELECT paper, concept FROM paper_concepts ORDER BY paper, concept"
            }
            Listing::PaperConceptsResolved => {
                "SELECT p.title, c.name
                 FROM paper_concepts pc
                 JOIN papers p ON pc.paper = p.id
                 JOIN concepts c ON pc.concept = c.id
                 ORDER BY pc.paper, pc.concept"
            }
            Listing::Citations => "SELECT source, target FROM citations ORDER BY source, target",
            Listing::CitationsByExternalId => EdgeResolution::ExternalId.sql(),
            Listing::CitationsByTitle => EdgeResolution::PaperTitle.sql(),
            Listing::CitationsByAuthor => EdgeResolution::Author.sql(),
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Listing {
    type Err = CitegraphError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().replace('_', "-").to_lowercase();
        Listing::ALL
            .into_iter()
            .find(|listing| listing.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Listing::ALL.iter().map(|l| l.name()).collect();
                CitegraphError::InvalidInput(format!(
                    "unknown listing {:?} (known: {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// A listing materialised as JSON cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub listing: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fixed-width text rendering for terminals.
    pub fn to_text(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let render = |values: &[String]| -> String {
            values
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{:<width$}", v, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };

        let mut lines = Vec::with_capacity(cells.len() + 3);
        lines.push(render(self.columns.as_slice()));
        lines.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("  "),
        );
        for row in &cells {
            lines.push(render(row.as_slice()));
        }
        lines.push(format!("({} row{})", cells.len(), if cells.len() == 1 { "" } else { "s" }));
        lines.join("\n")
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(x) => serde_json::Number::from_f64(x).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

/// Run a listing and return its rows.
pub fn fetch_listing(exec: &Executor<'_>, listing: Listing) -> Result<Table> {
    let columns = listing.columns();
    let rows = exec.query_all(listing.sql(), [], |row| {
        (0..columns.len())
            .map(|i| row.get_ref(i).map(cell))
            .collect::<rusqlite::Result<Vec<Value>>>()
    })?;

    Ok(Table {
        listing: listing.name().to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    })
}
