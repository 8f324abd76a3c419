use super::{DatabaseError, Repository};
use crate::core::models::DuplicateScanConfig;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::str::FromStr;

pub const EXACT_CHECKSUM: &str = "duplicates.exact_checksum";
pub const APPROXIMATE: &str = "duplicates.approximate";
pub const DHASH_THRESHOLD: &str = "duplicates.dhash_threshold";
pub const AHASH_THRESHOLD: &str = "duplicates.ahash_threshold";
pub const BUCKET_MAX_SIZE: &str = "duplicates.bucket_max_size";

pub const KEYS: [&str; 5] = [
    EXACT_CHECKSUM,
    APPROXIMATE,
    DHASH_THRESHOLD,
    AHASH_THRESHOLD,
    BUCKET_MAX_SIZE,
];

/// Scan tunables kept in the `app_config` key/value table.
pub struct SettingsRepository<'a> {
    conn: &'a Connection,
}

impl Repository for SettingsRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> SettingsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Stored values layered over the defaults. Unparseable values are
    /// ignored.
    pub fn load(&self) -> Result<DuplicateScanConfig, DatabaseError> {
        let mut config = DuplicateScanConfig::default();

        let mut stmt = self
            .connection()
            .prepare("SELECT key, value FROM app_config WHERE key LIKE 'duplicates.%'")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            if let Err(e) = apply_setting(&mut config, &key, &value) {
                log::warn!("Ignoring stored setting {}: {}", key, e);
            }
        }

        Ok(config)
    }

    pub fn save(&self, config: &DuplicateScanConfig) -> Result<(), DatabaseError> {
        let timestamp = Utc::now().to_rfc3339();
        let values = [
            (EXACT_CHECKSUM, config.exact_checksum.to_string()),
            (APPROXIMATE, config.approximate.to_string()),
            (DHASH_THRESHOLD, config.dhash_threshold.to_string()),
            (AHASH_THRESHOLD, config.ahash_threshold.to_string()),
            (BUCKET_MAX_SIZE, config.bucket_max_size.to_string()),
        ];

        let tx = self.connection().unchecked_transaction()?;
        for (key, value) in values {
            tx.execute(
                "INSERT OR REPLACE INTO app_config (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, timestamp],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove the stored tunables so `load` falls back to defaults.
    pub fn reset(&self) -> Result<(), DatabaseError> {
        let tx = self.connection().unchecked_transaction()?;
        for key in KEYS {
            tx.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Set one tunable by key. Shared by `load` and the CLI `config set` command.
pub fn apply_setting(
    config: &mut DuplicateScanConfig,
    key: &str,
    value: &str,
) -> Result<(), String> {
    match key {
        EXACT_CHECKSUM => config.exact_checksum = parse_value(value)?,
        APPROXIMATE => config.approximate = parse_value(value)?,
        DHASH_THRESHOLD => config.dhash_threshold = parse_value(value)?,
        AHASH_THRESHOLD => config.ahash_threshold = parse_value(value)?,
        BUCKET_MAX_SIZE => config.bucket_max_size = parse_value(value)?,
        _ => return Err(format!("unknown setting {:?}", key)),
    }
    Ok(())
}

fn parse_value<T>(value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value {:?}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults_when_empty() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.settings().load().unwrap(), DuplicateScanConfig::default());
    }

    #[test]
    fn test_settings_persist_across_connections() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("settings.db");

        let config = DuplicateScanConfig {
            exact_checksum: false,
            approximate: true,
            dhash_threshold: 5,
            ahash_threshold: 12,
            bucket_max_size: 64,
        };
        {
            let db = Database::open(&db_path).unwrap();
            db.settings().save(&config).unwrap();
        }

        let db = Database::open(&db_path).unwrap();
        assert_eq!(db.settings().load().unwrap(), config);

        db.settings().reset().unwrap();
        assert_eq!(db.settings().load().unwrap(), DuplicateScanConfig::default());
    }

    #[test]
    fn test_bad_stored_value_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute(
                "INSERT INTO app_config (key, value, updated_at) VALUES (?1, 'lots', '')",
                params![DHASH_THRESHOLD],
            )
            .unwrap();

        let config = db.settings().load().unwrap();
        assert_eq!(config.dhash_threshold, 8);
    }

    #[test]
    fn test_apply_setting() {
        let mut config = DuplicateScanConfig::default();
        apply_setting(&mut config, AHASH_THRESHOLD, "3").unwrap();
        apply_setting(&mut config, APPROXIMATE, "false").unwrap();
        assert_eq!(config.ahash_threshold, 3);
        assert!(!config.approximate);

        assert!(apply_setting(&mut config, "duplicates.nope", "1").is_err());
        assert!(apply_setting(&mut config, BUCKET_MAX_SIZE, "-1").is_err());
    }
}
