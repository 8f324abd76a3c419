use super::{parse_timestamp, DatabaseError, Repository};
use crate::core::models::NotDuplicatePair;
use rusqlite::{params, Connection};

/// Stores "not a duplicate" decisions per profile, always in canonical
/// orientation.
pub struct ExclusionRepository<'a> {
    conn: &'a Connection,
}

impl Repository for ExclusionRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> ExclusionRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record that `a` and `b` are distinct items. Self pairs are ignored and
    /// re-adding an existing pair keeps its original timestamp.
    pub fn add(&self, profile_id: &str, a: &str, b: &str) -> Result<bool, DatabaseError> {
        let pair = NotDuplicatePair::new(a, b);
        if pair.is_self_pair() {
            log::debug!("Ignoring self exclusion for {}", a);
            return Ok(false);
        }

        let inserted = self.connection().execute(
            "INSERT OR IGNORE INTO not_duplicates (profile_id, arcid_a, arcid_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                profile_id,
                pair.arcid_a(),
                pair.arcid_b(),
                pair.created_at().to_rfc3339()
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove(&self, profile_id: &str, a: &str, b: &str) -> Result<bool, DatabaseError> {
        let pair = NotDuplicatePair::new(a, b);
        let removed = self.connection().execute(
            "DELETE FROM not_duplicates WHERE profile_id = ?1 AND arcid_a = ?2 AND arcid_b = ?3",
            params![profile_id, pair.arcid_a(), pair.arcid_b()],
        )?;
        Ok(removed > 0)
    }

    /// Drop every exclusion of the profile, returning how many were removed.
    pub fn clear(&self, profile_id: &str) -> Result<usize, DatabaseError> {
        let removed = self.connection().execute(
            "DELETE FROM not_duplicates WHERE profile_id = ?1",
            params![profile_id],
        )?;
        Ok(removed)
    }

    pub fn list(&self, profile_id: &str) -> Result<Vec<NotDuplicatePair>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT arcid_a, arcid_b, created_at FROM not_duplicates
             WHERE profile_id = ?1
             ORDER BY arcid_a, arcid_b",
        )?;
        let rows = stmt.query_map(params![profile_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut pairs = Vec::new();
        for row in rows {
            let (a, b, created_at) = row?;
            pairs.push(NotDuplicatePair::with_timestamp(
                a,
                b,
                parse_timestamp(&created_at)?,
            ));
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;

    #[test]
    fn test_add_is_canonical_and_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.exclusions();

        assert!(repo.add("default", "zeta", "alpha").unwrap());
        assert!(!repo.add("default", "alpha", "zeta").unwrap());

        let pairs = repo.list("default").unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].arcid_a(), "alpha");
        assert_eq!(pairs[0].arcid_b(), "zeta");
    }

    #[test]
    fn test_self_pair_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.exclusions();

        assert!(!repo.add("default", "a", "a").unwrap());
        assert!(repo.list("default").unwrap().is_empty());
    }

    #[test]
    fn test_remove_and_clear() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.exclusions();

        repo.add("default", "a", "b").unwrap();
        repo.add("default", "c", "d").unwrap();
        repo.add("other", "a", "b").unwrap();

        assert!(repo.remove("default", "b", "a").unwrap());
        assert!(!repo.remove("default", "b", "a").unwrap());
        assert_eq!(repo.list("default").unwrap().len(), 1);

        assert_eq!(repo.clear("default").unwrap(), 1);
        assert!(repo.list("default").unwrap().is_empty());
        assert_eq!(repo.list("other").unwrap().len(), 1);
    }
}
