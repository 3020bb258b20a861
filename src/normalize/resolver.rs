//! Entity resolution: map scalar values to stable surrogate ids.
//!
//! Every leaf table has a UNIQUE natural-key column, so "insert if absent,
//! return id" is a single `INSERT .. ON CONFLICT DO NOTHING RETURNING id`
//! followed by a keyed `SELECT` when the row already existed. Both run on the
//! caller's executor, so inside a stage they share its transaction.

use indexmap::IndexMap;
use rusqlite::params;
use serde::Serialize;
use std::fmt;

use super::EntityCache;
use crate::db::Executor;
use crate::error::{CitegraphError, Result};

/// Leaf entity tables. Table and column names come only from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Author,
    Concept,
    Publisher,
    Venue,
    #[serde(rename = "type")]
    PaperType,
    ExternalId,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Author,
        EntityKind::Concept,
        EntityKind::Publisher,
        EntityKind::Venue,
        EntityKind::PaperType,
        EntityKind::ExternalId,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Author => "authors",
            EntityKind::Concept => "concepts",
            EntityKind::Publisher => "publishers",
            EntityKind::Venue => "venues",
            EntityKind::PaperType => "types",
            EntityKind::ExternalId => "external_ids",
        }
    }

    /// Natural-key column.
    pub fn column(self) -> &'static str {
        match self {
            EntityKind::ExternalId => "url",
            _ => "name",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Author => "author",
            EntityKind::Concept => "concept",
            EntityKind::Publisher => "publisher",
            EntityKind::Venue => "venue",
            EntityKind::PaperType => "type",
            EntityKind::ExternalId => "external_id",
        }
    }

    fn insert_sql(self) -> String {
        format!(
            "INSERT INTO {table} ({col}) VALUES (?1) ON CONFLICT({col}) DO NOTHING RETURNING id",
            table = self.table(),
            col = self.column()
        )
    }

    fn select_sql(self) -> String {
        format!(
            "SELECT id FROM {table} WHERE {col} = ?1",
            table = self.table(),
            col = self.column()
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a collection of values for one kind.
#[derive(Debug, Default)]
pub struct Resolution {
    /// value -> id, in first-seen input order. Failed values are absent.
    pub ids: IndexMap<String, i64>,
    pub inserted: usize,
    pub existing: usize,
    pub failed: usize,
}

impl Resolution {
    pub fn get(&self, value: &str) -> Option<i64> {
        self.ids.get(value).copied()
    }
}

/// Keyed lookup without side effects.
pub fn lookup(exec: &Executor<'_>, kind: EntityKind, value: &str) -> Result<Option<i64>> {
    exec.query_optional(&kind.select_sql(), params![value], |row| row.get(0))
}

/// Atomic insert-if-absent. Returns the id and whether this call created it.
pub fn ensure_id(exec: &Executor<'_>, kind: EntityKind, value: &str) -> Result<(i64, bool)> {
    if value.trim().is_empty() {
        return Err(CitegraphError::InvalidInput(format!("empty {} value", kind)));
    }

    if let Some(id) = exec.query_optional(&kind.insert_sql(), params![value], |row| row.get(0))? {
        return Ok((id, true));
    }

    // Conflict: the row exists, and the same transaction can see it.
    match lookup(exec, kind, value)? {
        Some(id) => Ok((id, false)),
        None => Err(CitegraphError::operation(
            format!("ensure {}", kind),
            format!("{:?} neither inserted nor found", value),
        )),
    }
}

/// Resolve every value of `values` to an id, creating rows for unknown ones.
///
/// Each distinct value is resolved once. A value that fails is logged with its
/// error class, counted and left out of the result; the rest continue. Lost
/// connectivity is the exception and aborts the call, since no further value
/// could succeed on a dead session.
pub fn resolve_values<I, S>(
    exec: &Executor<'_>,
    cache: &mut EntityCache,
    kind: EntityKind,
    values: I,
) -> Result<Resolution>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolution = Resolution::default();

    for value in values {
        let value = value.as_ref();
        if resolution.ids.contains_key(value) {
            continue;
        }

        if let Some(id) = cache.get(kind, value) {
            resolution.existing += 1;
            resolution.ids.insert(value.to_string(), id);
            continue;
        }

        match ensure_id(exec, kind, value) {
            Ok((id, inserted)) => {
                if inserted {
                    resolution.inserted += 1;
                } else {
                    resolution.existing += 1;
                }
                cache.put(kind, value, id);
                resolution.ids.insert(value.to_string(), id);
            }
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => {
                log::error!("resolve {} {:?}: {} ({})", kind, value, e, e.class());
                resolution.failed += 1;
            }
        }
    }

    log::debug!(
        "resolved {} {} value(s): {} inserted, {} existing, {} failed",
        resolution.ids.len() + resolution.failed,
        kind,
        resolution.inserted,
        resolution.existing,
        resolution.failed
    );
    Ok(resolution)
}

/// Look a value up, inserting it on a miss and retrying exactly once.
///
/// A miss is logged as a `ResolutionMiss`; if the value still cannot be
/// resolved after the insert, the failure escalates to an operation error.
pub fn lookup_or_insert(
    exec: &Executor<'_>,
    cache: &mut EntityCache,
    kind: EntityKind,
    value: &str,
) -> Result<i64> {
    if let Some(id) = cache.get(kind, value) {
        return Ok(id);
    }

    if let Some(id) = lookup(exec, kind, value)? {
        cache.put(kind, value, id);
        return Ok(id);
    }

    let miss = CitegraphError::ResolutionMiss {
        kind: kind.to_string(),
        value: value.to_string(),
    };
    log::warn!("{} ({}), inserting", miss, miss.class());

    match ensure_id(exec, kind, value) {
        Ok((id, _)) => {
            cache.put(kind, value, id);
            Ok(id)
        }
        Err(e) if e.is_connectivity() => Err(e),
        Err(e) => Err(CitegraphError::operation(
            format!("resolve {}", kind),
            format!("{:?} still unresolved after insert: {}", value, e),
        )),
    }
}
