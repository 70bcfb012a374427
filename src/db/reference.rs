use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::Pool;

/// One reference image per session. Storing again replaces the previous
/// image; callers must also drop any cached encodings for the session.
#[derive(Clone)]
pub struct ReferenceStore {
    pool: Pool,
}

impl ReferenceStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn store(&self, session_id: &str, filename: &str, data: &[u8]) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO reference_images (session_id, filename, data, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![session_id, filename, data, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get()?;
        let data = conn
            .query_row(
                "SELECT data FROM reference_images WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(data)
    }

    pub fn delete(&self, session_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM reference_images WHERE session_id = ?1", params![session_id])?;
        Ok(())
    }
}
