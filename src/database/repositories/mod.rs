pub mod exclusion;
pub mod fingerprint;
pub mod settings;

pub use exclusion::ExclusionRepository;
pub use fingerprint::FingerprintRepository;
pub use settings::SettingsRepository;

use super::DatabaseError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub trait Repository {
    fn connection(&self) -> &Connection;
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidValue(format!("timestamp {:?}: {}", value, e)))
}
