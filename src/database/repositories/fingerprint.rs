use super::{parse_timestamp, DatabaseError, Repository};
use crate::core::models::{
    ComputedFingerprint, Crop, FingerprintRecord, HashKind, ScanFingerprint,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

pub struct FingerprintRepository<'a> {
    conn: &'a Connection,
}

impl Repository for FingerprintRepository<'_> {
    fn connection(&self) -> &Connection {
        self.conn
    }
}

impl<'a> FingerprintRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Replace every stored record of `arcid` with the hashes of `fingerprint`.
    pub fn upsert_item(
        &self,
        profile_id: &str,
        arcid: &str,
        fingerprint: &ComputedFingerprint,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.connection().unchecked_transaction()?;

        tx.execute(
            "DELETE FROM fingerprints WHERE profile_id = ?1 AND arcid = ?2",
            params![profile_id, arcid],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fingerprints
                    (profile_id, arcid, kind, crop, hash, aspect_ratio, thumbnail_checksum, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for hash in &fingerprint.hashes {
                stmt.execute(params![
                    profile_id,
                    arcid,
                    hash.kind.as_str(),
                    hash.crop.as_str(),
                    hash.value as i64,
                    fingerprint.aspect_ratio,
                    fingerprint.checksum,
                    now,
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("Stored {} hashes for {} ({})", fingerprint.hashes.len(), arcid, profile_id);
        Ok(())
    }

    pub fn records_for(
        &self,
        profile_id: &str,
        arcid: &str,
    ) -> Result<Vec<FingerprintRecord>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT kind, crop, hash, aspect_ratio, thumbnail_checksum, updated_at
             FROM fingerprints
             WHERE profile_id = ?1 AND arcid = ?2
             ORDER BY kind DESC, crop",
        )?;
        let rows = stmt.query_map(params![profile_id, arcid], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (kind, crop, hash, aspect_ratio, checksum, updated_at) = row?;
            records.push(FingerprintRecord {
                profile_id: profile_id.to_string(),
                arcid: arcid.to_string(),
                kind: kind.parse::<HashKind>().map_err(DatabaseError::InvalidValue)?,
                crop: crop.parse::<Crop>().map_err(DatabaseError::InvalidValue)?,
                hash: hash as u64,
                aspect_ratio,
                thumbnail_checksum: checksum,
                updated_at: parse_timestamp(&updated_at)?,
            });
        }
        Ok(records)
    }

    /// One row per item that has both center-90 hashes, ordered by arcid.
    pub fn scan_view(&self, profile_id: &str) -> Result<Vec<ScanFingerprint>, DatabaseError> {
        let mut stmt = self.connection().prepare(
            "SELECT arcid,
                    MAX(thumbnail_checksum),
                    MAX(CASE WHEN kind = 'dhash' THEN hash END),
                    MAX(CASE WHEN kind = 'ahash' THEN hash END)
             FROM fingerprints
             WHERE profile_id = ?1 AND crop = 'center90'
             GROUP BY arcid
             HAVING COUNT(CASE WHEN kind = 'dhash' THEN 1 END) > 0
                AND COUNT(CASE WHEN kind = 'ahash' THEN 1 END) > 0
             ORDER BY arcid",
        )?;
        let rows = stmt.query_map(params![profile_id], |row| {
            Ok(ScanFingerprint {
                arcid: row.get(0)?,
                checksum: row.get(1)?,
                dhash: row.get::<_, i64>(2)? as u64,
                ahash: row.get::<_, i64>(3)? as u64,
            })
        })?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    pub fn contains(&self, profile_id: &str, arcid: &str) -> Result<bool, DatabaseError> {
        let found = self
            .connection()
            .query_row(
                "SELECT 1 FROM fingerprints WHERE profile_id = ?1 AND arcid = ?2 LIMIT 1",
                params![profile_id, arcid],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns true when the item had stored records.
    pub fn delete_item(&self, profile_id: &str, arcid: &str) -> Result<bool, DatabaseError> {
        let deleted = self.connection().execute(
            "DELETE FROM fingerprints WHERE profile_id = ?1 AND arcid = ?2",
            params![profile_id, arcid],
        )?;
        Ok(deleted > 0)
    }

    pub fn count_items(&self, profile_id: &str) -> Result<usize, DatabaseError> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(DISTINCT arcid) FROM fingerprints WHERE profile_id = ?1",
            params![profile_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::PerceptualHash;
    use crate::database::Database;

    fn fingerprint(checksum: &str, dhash: u64, ahash: u64) -> ComputedFingerprint {
        let mut hashes = Vec::new();
        for kind in HashKind::ALL {
            for crop in Crop::ALL {
                let value = match kind {
                    HashKind::DHash => dhash,
                    HashKind::AHash => ahash,
                };
                hashes.push(PerceptualHash { kind, crop, value });
            }
        }
        ComputedFingerprint {
            aspect_ratio: 0.7,
            checksum: checksum.to_string(),
            hashes,
        }
    }

    #[test]
    fn test_upsert_replaces_all_records() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.fingerprints();

        repo.upsert_item("default", "a", &fingerprint("c1", 1, 2)).unwrap();
        repo.upsert_item("default", "a", &fingerprint("c2", 3, 4)).unwrap();

        let records = repo.records_for("default", "a").unwrap();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.thumbnail_checksum == "c2"));
        assert!(records.iter().filter(|r| r.kind == HashKind::DHash).all(|r| r.hash == 3));
        assert_eq!(repo.count_items("default").unwrap(), 1);
    }

    #[test]
    fn test_high_bit_hashes_survive_storage() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.fingerprints();
        let value = 0xF000_0000_0000_0001u64;

        repo.upsert_item("default", "a", &fingerprint("c", value, u64::MAX)).unwrap();

        let view = repo.scan_view("default").unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].dhash, value);
        assert_eq!(view[0].ahash, u64::MAX);
    }

    #[test]
    fn test_scan_view_requires_both_center_hashes() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.fingerprints();

        repo.upsert_item("default", "b", &fingerprint("cb", 5, 6)).unwrap();
        repo.upsert_item("default", "a", &fingerprint("ca", 7, 8)).unwrap();

        let mut partial = fingerprint("cc", 9, 10);
        partial
            .hashes
            .retain(|h| !(h.kind == HashKind::AHash && h.crop == Crop::Center90));
        repo.upsert_item("default", "c", &partial).unwrap();

        repo.upsert_item("other", "z", &fingerprint("cz", 1, 1)).unwrap();

        let view = repo.scan_view("default").unwrap();
        let ids: Vec<&str> = view.iter().map(|f| f.arcid.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(view[0].checksum, "ca");
        assert_eq!((view[0].dhash, view[0].ahash), (7, 8));
    }

    #[test]
    fn test_contains_and_delete() {
        let db = Database::open_in_memory().unwrap();
        let repo = db.fingerprints();

        assert!(!repo.contains("default", "a").unwrap());
        repo.upsert_item("default", "a", &fingerprint("c", 1, 1)).unwrap();
        assert!(repo.contains("default", "a").unwrap());
        assert!(!repo.contains("other", "a").unwrap());

        assert!(repo.delete_item("default", "a").unwrap());
        assert!(!repo.delete_item("default", "a").unwrap());
        assert_eq!(repo.count_items("default").unwrap(), 0);
    }
}
