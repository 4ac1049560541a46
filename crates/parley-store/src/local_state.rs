use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Read a persisted client value.
    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM local_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store a value under `key`, replacing any previous one.
    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO local_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove `key`. Returns whether a value was present.
    pub fn clear_state(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM local_state WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    #[test]
    fn set_get_clear() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_state("pendingEmail").unwrap(), None);

        db.set_state("pendingEmail", "a@example.com").unwrap();
        db.set_state("pendingEmail", "b@example.com").unwrap();
        assert_eq!(
            db.get_state("pendingEmail").unwrap().as_deref(),
            Some("b@example.com")
        );

        assert!(db.clear_state("pendingEmail").unwrap());
        assert!(!db.clear_state("pendingEmail").unwrap());
        assert_eq!(db.get_state("pendingEmail").unwrap(), None);
    }

    #[test]
    fn value_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.set_state("pendingEmail", "a@example.com").unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        assert_eq!(
            db.get_state("pendingEmail").unwrap().as_deref(),
            Some("a@example.com")
        );
    }
}
