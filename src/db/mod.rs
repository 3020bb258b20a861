use rusqlite::Connection;
use std::path::Path;

use crate::config::{Config, StoreConfig};
use crate::error::{CitegraphError, Result};
use crate::normalize::EntityCache;

pub mod executor;
pub mod migrate;

pub use executor::Executor;

/// Every table citegraph owns, in drop order (dependents first).
pub const ALL_TABLES: &[&str] = &[
    "papers_raw",
    "paper_concepts",
    "citations",
    "supports",
    "papers",
    "external_ids",
    "venues",
    "types",
    "concepts",
    "publishers",
    "authors",
    "import_log",
    "schema_migrations",
];

/// Open a connection for a store profile with the pragmas the pipeline relies on.
fn open_connection(store: &StoreConfig) -> Result<Connection> {
    let conn = Connection::open(&store.db_path).map_err(|e| {
        CitegraphError::Connectivity(format!("open {}: {}", store.db_path.display(), e))
    })?;

    // WAL for reader/writer overlap, foreign keys for referential integrity.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY;",
    )
    .map_err(|e| CitegraphError::Connectivity(format!("configure {}: {}", store.db_path.display(), e)))?;
    conn.busy_timeout(std::time::Duration::from_millis(store.busy_timeout_ms))
        .map_err(|e| CitegraphError::Connectivity(e.to_string()))?;

    Ok(conn)
}

/// One storage session: a connection plus the entity id cache, held for the
/// life of a broader operation. Blocking and single-threaded.
pub struct Session {
    store: StoreConfig,
    conn: Connection,
    cache: EntityCache,
}

impl Session {
    /// Connect using an explicit store profile.
    pub fn connect(store: &StoreConfig) -> Result<Self> {
        Self::connect_with_cache(store, EntityCache::default())
    }

    /// Connect to a named store (or the default one) and apply pending
    /// migrations. The entity cache is sized from `[import]`.
    pub fn open(config: &Config, store: Option<&str>) -> Result<Self> {
        let profile = config.store(store)?;
        let cache = EntityCache::new(config.import.entity_cache_capacity);
        let mut session = Self::connect_with_cache(profile, cache)?;
        session.run_migrations(config.migrations_dir())?;
        Ok(session)
    }

    pub fn connect_with_cache(store: &StoreConfig, cache: EntityCache) -> Result<Self> {
        let conn = open_connection(store)?;
        log::info!("connected to {}", store.db_path.display());
        Ok(Self {
            store: store.clone(),
            conn,
            cache,
        })
    }

    /// Tear the connection down and build a fresh one. Session-scoped server
    /// state (temp tables, pragmas set later, cached ids) does not survive.
    pub fn reconnect(&mut self) -> Result<()> {
        self.cache.clear();
        let fresh = open_connection(&self.store)?;
        let stale = std::mem::replace(&mut self.conn, fresh);
        if let Err((_, e)) = stale.close() {
            log::warn!("closing stale connection: {}", e);
        }
        log::info!("reconnected to {}", self.store.db_path.display());
        Ok(())
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// Autocommit execution handle.
    pub fn executor(&self) -> Executor<'_> {
        Executor::new(&self.conn)
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// Run one logical stage inside its own transaction.
    ///
    /// On success the transaction commits. If `f` fails or the commit fails,
    /// the transaction is rolled back, the entity cache is cleared and the
    /// connection is rebuilt before the error is returned.
    pub fn run_stage<T, F>(&mut self, stage: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Executor<'_>, &mut EntityCache) -> Result<T>,
    {
        let tx = self.conn.transaction().map_err(|e| {
            CitegraphError::Connectivity(format!("begin {}: {}", stage, e))
        })?;

        let outcome = f(&Executor::new(&tx), &mut self.cache);

        let failure = match outcome {
            Ok(value) => match tx.commit() {
                Ok(()) => {
                    log::info!("stage {}: committed", stage);
                    return Ok(value);
                }
                Err(e) => CitegraphError::operation(format!("commit {}", stage), e),
            },
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    log::warn!("stage {}: rollback failed: {}", stage, rb);
                }
                e
            }
        };

        log::error!(
            "stage {}: {} ({}), transaction rolled back",
            stage,
            failure,
            failure.class()
        );
        self.reconnect()?;
        Err(failure)
    }

    /// Apply pending migrations from `migrations_dir`.
    pub fn run_migrations(&mut self, migrations_dir: &Path) -> Result<()> {
        migrate::run_migrations(&mut self.conn, migrations_dir).map(|_| ())
    }
}

/// Drop every citegraph table and rebuild the schema from migrations.
pub fn reset_schema(session: &mut Session, migrations_dir: &Path) -> Result<()> {
    session.run_stage("reset schema", |exec, _| {
        exec.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        for table in ALL_TABLES {
            exec.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
        }
        Ok(())
    })?;
    // Ids are handed out again from 1 once the tables are recreated.
    session.cache.clear();
    log::info!("schema dropped, re-applying migrations");
    session.run_migrations(migrations_dir)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub fn migrations_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    }

    /// Fresh migrated session on a throw-away database file.
    pub fn open_test_session() -> (Session, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = StoreConfig::new(temp_dir.path().join("test.db"));
        let mut session = Session::connect(&store).unwrap();
        session.run_migrations(&migrations_dir()).unwrap();
        (session, temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_connect_sets_pragmas() {
        let (session, _temp) = open_test_session();
        let exec = session.executor();
        let journal_mode: Option<String> = exec
            .query_optional("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.unwrap().to_uppercase(), "WAL");
        let foreign_keys: Option<i64> = exec
            .query_optional("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, Some(1));
    }

    #[test]
    fn test_connect_failure_is_connectivity() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = StoreConfig::new(temp.path().join("missing-dir").join("x.db"));
        let err = Session::connect(&store).err().unwrap();
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_stage_commits() {
        let (mut session, _temp) = open_test_session();
        session
            .run_stage("authors", |exec, _| {
                exec.execute("INSERT INTO authors (name) VALUES (?1)", params!["Alice"])?;
                Ok(())
            })
            .unwrap();
        assert_eq!(session.executor().count("SELECT COUNT(*) FROM authors").unwrap(), 1);
    }

    #[test]
    fn test_stage_failure_rolls_back_and_reconnects() {
        let (mut session, _temp) = open_test_session();
        session.executor().execute_batch("CREATE TEMP TABLE scratch (x INTEGER);").unwrap();

        let result: Result<()> = session.run_stage("authors", |exec, cache| {
            exec.execute("INSERT INTO authors (name) VALUES (?1)", params!["Alice"])?;
            cache.put(crate::normalize::EntityKind::Author, "Alice", 1);
            Err(CitegraphError::operation("test", "forced failure"))
        });
        assert!(result.is_err());

        let exec = session.executor();
        assert_eq!(exec.count("SELECT COUNT(*) FROM authors").unwrap(), 0);
        assert!(session.cache().is_empty());
        // Temp tables are session-scoped and gone after the reconnect.
        assert!(exec.count("SELECT COUNT(*) FROM scratch").is_err());
    }

    #[test]
    fn test_reset_schema_empties_everything() {
        let (mut session, _temp) = open_test_session();
        session
            .executor()
            .execute("INSERT INTO authors (name) VALUES (?1)", params!["Alice"])
            .unwrap();
        reset_schema(&mut session, &migrations_dir()).unwrap();
        assert_eq!(session.executor().count("SELECT COUNT(*) FROM authors").unwrap(), 0);
        let applied = migrate::applied_migrations(session.executor().conn()).unwrap();
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn test_reset_schema_forgets_cached_ids() {
        use crate::normalize::{import_batch, NormalizeOptions};
        use crate::records::{RawBatch, RawRecord};

        fn paper(title: &str, author: &str) -> RawRecord {
            RawRecord {
                title: Some(title.to_string()),
                authors: vec![author.to_string()],
                ..Default::default()
            }
        }

        let (mut session, _temp) = open_test_session();
        let options = NormalizeOptions::default();
        import_batch(&mut session, &RawBatch::new("before", vec![paper("Old", "Alice")]), &options).unwrap();
        assert!(!session.cache().is_empty());

        reset_schema(&mut session, &migrations_dir()).unwrap();
        assert!(session.cache().is_empty());

        let batch = RawBatch::new("after", vec![paper("P0", "Bob"), paper("P1", "Alice")]);
        import_batch(&mut session, &batch, &options).unwrap();

        let exec = session.executor();
        let rows: Vec<(String, String)> = exec
            .query_all(
                "SELECT p.title, a.name FROM papers p JOIN authors a ON a.id = p.author ORDER BY p.title",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("P0".to_string(), "Bob".to_string()),
                ("P1".to_string(), "Alice".to_string()),
            ]
        );
        assert_eq!(exec.count("SELECT COUNT(*) FROM authors").unwrap(), 2);
    }
}
