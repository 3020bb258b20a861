//! Numbered SQL migrations (`NNN_description.sql`), tracked by version.
//!
//! Each applied file's SHA-256 is recorded next to its version. An applied
//! migration whose file has since been edited is reported, never re-run.

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::Executor;
use crate::error::{CitegraphError, Result};

/// Tables every migrated citegraph store must contain.
pub const EXPECTED_TABLES: &[&str] = &[
    "authors",
    "citations",
    "concepts",
    "external_ids",
    "import_log",
    "paper_concepts",
    "papers",
    "publishers",
    "schema_migrations",
    "supports",
    "types",
    "venues",
];

const TRACKING_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT,
    applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

struct MigrationFile {
    version: u32,
    name: String,
    checksum: String,
    sql: String,
}

impl MigrationFile {
    fn read(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(|| CitegraphError::Config(format!("bad migration path {}", path.display())))?
            .to_string();
        let version = name
            .split_once('_')
            .and_then(|(prefix, _)| prefix.parse::<u32>().ok())
            .ok_or_else(|| {
                CitegraphError::Config(format!("migration {} must be named NNN_description.sql", name))
            })?;
        let sql = fs::read_to_string(path)?;
        let checksum = format!("{:x}", Sha256::digest(sql.as_bytes()));
        Ok(Self { version, name, checksum, sql })
    }
}

/// One row of `schema_migrations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub checksum: Option<String>,
}

/// Applied migrations in version order.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    Executor::new(conn).query_all(
        "SELECT version, name, checksum FROM schema_migrations ORDER BY version",
        [],
        |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                name: row.get(1)?,
                checksum: row.get(2)?,
            })
        },
    )
}

/// Migration files under `dir`, ordered by version. Duplicate versions are a
/// configuration error.
fn read_migration_dir(dir: &Path) -> Result<Vec<MigrationFile>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        CitegraphError::Config(format!("cannot read migrations directory {}: {}", dir.display(), e))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sql") {
            files.push(MigrationFile::read(&path)?);
        }
    }
    files.sort_by_key(|m| m.version);

    if let Some(pair) = files.windows(2).find(|w| w[0].version == w[1].version) {
        return Err(CitegraphError::Config(format!(
            "migrations {} and {} share version {}",
            pair[0].name, pair[1].name, pair[0].version
        )));
    }
    Ok(files)
}

/// Apply every migration in `dir` not yet recorded, each in its own
/// transaction. Returns how many were applied.
pub fn run_migrations(conn: &mut Connection, dir: &Path) -> Result<usize> {
    conn.execute_batch(TRACKING_DDL)?;
    let applied = applied_migrations(conn)?;
    let mut count = 0;

    for file in read_migration_dir(dir)? {
        if let Some(done) = applied.iter().find(|a| a.version == file.version) {
            if done.checksum.as_deref().is_some_and(|c| c != file.checksum) {
                log::warn!("migration {} changed on disk after it was applied", file.name);
            }
            continue;
        }

        let tx = conn.transaction()?;
        let exec = Executor::new(&tx);
        exec.execute_batch(&file.sql)
            .map_err(|e| CitegraphError::operation(format!("migration {}", file.name), e))?;
        exec.execute(
            "INSERT INTO schema_migrations (version, name, checksum) VALUES (?1, ?2, ?3)",
            params![file.version, file.name, file.checksum],
        )?;
        tx.commit()?;
        log::info!("applied migration {}", file.name);
        count += 1;
    }

    if count == 0 {
        log::debug!("schema up to date");
    }
    Ok(count)
}

/// Names of expected tables that are absent from the store.
pub fn missing_tables(conn: &Connection) -> Result<Vec<String>> {
    let present: Vec<String> = Executor::new(conn).query_all(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
        [],
        |row| row.get(0),
    )?;
    Ok(EXPECTED_TABLES
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn real_migrations() -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    fn scratch() -> (Connection, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let conn = Connection::open(temp_dir.path().join("test.db")).unwrap();
        (conn, temp_dir)
    }

    #[test]
    fn test_applies_in_version_order_once() {
        let (mut conn, temp_dir) = scratch();
        let dir = temp_dir.path().join("migrations");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("010_later.sql"), "ALTER TABLE first ADD COLUMN extra TEXT;").unwrap();
        fs::write(dir.join("002_first.sql"), "CREATE TABLE first (id INTEGER);").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 2);
        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 0);

        let applied = applied_migrations(&conn).unwrap();
        let versions: Vec<u32> = applied.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 10]);
        assert_eq!(applied[0].name, "002_first");
        assert_eq!(applied[0].checksum.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_edited_migration_is_not_rerun() {
        let (mut conn, temp_dir) = scratch();
        let dir = temp_dir.path().join("migrations");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("001_t.sql"), "CREATE TABLE t (id INTEGER);").unwrap();
        run_migrations(&mut conn, &dir).unwrap();

        fs::write(dir.join("001_t.sql"), "CREATE TABLE t (id INTEGER, x TEXT);").unwrap();
        assert_eq!(run_migrations(&mut conn, &dir).unwrap(), 0);
    }

    #[test]
    fn test_bad_names_and_duplicates_rejected() {
        let (mut conn, temp_dir) = scratch();
        let dir = temp_dir.path().join("dup");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.join("001_b.sql"), "SELECT 1;").unwrap();
        let err = run_migrations(&mut conn, &dir).unwrap_err();
        assert!(err.to_string().contains("share version 1"));

        let unnumbered = temp_dir.path().join("unnumbered");
        fs::create_dir(&unnumbered).unwrap();
        fs::write(unnumbered.join("schema.sql"), "SELECT 1;").unwrap();
        assert!(matches!(
            run_migrations(&mut conn, &unnumbered).unwrap_err(),
            CitegraphError::Config(_)
        ));
    }

    #[test]
    fn test_failed_migration_is_not_recorded() {
        let (mut conn, temp_dir) = scratch();
        let dir = temp_dir.path().join("migrations");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("001_broken.sql"), "CREATE TABLE ok (id INTEGER); NOT SQL;").unwrap();

        let err = run_migrations(&mut conn, &dir).unwrap_err();
        assert!(matches!(err, CitegraphError::Operation { .. }));
        assert!(applied_migrations(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_missing_migrations_dir_is_config_error() {
        let (mut conn, temp_dir) = scratch();
        let err = run_migrations(&mut conn, &temp_dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CitegraphError::Config(_)));
    }

    #[test]
    fn test_full_migration_schema() {
        let (mut conn, _temp) = scratch();

        assert!(!missing_tables(&conn).unwrap().is_empty());
        run_migrations(&mut conn, &real_migrations()).unwrap();
        assert!(missing_tables(&conn).unwrap().is_empty());
        assert_eq!(applied_migrations(&conn).unwrap().len(), 2);

        let indexes: Vec<String> = Executor::new(&conn)
            .query_all(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(indexes.contains(&"idx_papers_external_id".to_string()));
        assert!(indexes.contains(&"idx_papers_author".to_string()));
    }
}
