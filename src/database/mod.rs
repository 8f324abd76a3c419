pub mod repositories;

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use repositories::{ExclusionRepository, FingerprintRepository, SettingsRepository};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Database path error: {0}")]
    Path(String),
}

/// SQLite store for fingerprints, not-duplicate decisions and settings.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Path(format!("Could not create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS fingerprints (
                profile_id TEXT NOT NULL,
                arcid TEXT NOT NULL,
                kind TEXT NOT NULL,
                crop TEXT NOT NULL,
                hash INTEGER NOT NULL,
                aspect_ratio REAL NOT NULL,
                thumbnail_checksum TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (profile_id, arcid, kind, crop)
            );

            CREATE INDEX IF NOT EXISTS idx_fingerprints_scan
                ON fingerprints(profile_id, crop, kind);

            CREATE TABLE IF NOT EXISTS not_duplicates (
                profile_id TEXT NOT NULL,
                arcid_a TEXT NOT NULL,
                arcid_b TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (profile_id, arcid_a, arcid_b)
            );

            CREATE TABLE IF NOT EXISTS app_config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn fingerprints(&self) -> FingerprintRepository<'_> {
        FingerprintRepository::new(&self.conn)
    }

    pub fn exclusions(&self) -> ExclusionRepository<'_> {
        ExclusionRepository::new(&self.conn)
    }

    pub fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.conn)
    }
}

/// Default location of the store: `<data dir>/coverdupe/coverdupe.db`.
pub fn get_database_path() -> Result<PathBuf, DatabaseError> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| DatabaseError::Path("Could not find data directory".to_string()))?;
    Ok(data_dir.join("coverdupe").join("coverdupe.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_database_connection() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());

        let result: i32 = db
            .connection()
            .query_row("SELECT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, 1);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        drop(Database::open(&db_path).unwrap());
        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.fingerprints().count_items("default").unwrap(), 0);
    }
}
