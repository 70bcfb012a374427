use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Pool;
use crate::pipeline::matcher::ProgressSink;

/// Progress records expire a day after their last write; `/clean-expired`
/// sweeps them together with the session's stored reference image.
pub const PROGRESS_TTL_SECS: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

#[derive(Clone)]
pub struct ProgressStore {
    pool: Pool,
}

impl ProgressStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Upserts the session's record. `current` is only ever written with
    /// larger values during a pass, so last-write-wins is safe.
    pub fn set(&self, session_id: &str, current: usize, total: usize, ttl_secs: i64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO progress (session_id, current, total, expires_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET current = ?2, total = ?3, expires_at = ?4",
            params![session_id, current as i64, total as i64, Utc::now().timestamp() + ttl_secs],
        )?;
        Ok(())
    }

    /// Returns the last published record, or a zero-valued default for
    /// unknown sessions.
    pub fn get(&self, session_id: &str) -> Result<Progress> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT current, total FROM progress WHERE session_id = ?1",
                params![session_id],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((current, total)) => Progress { current: current as usize, total: total as usize },
            None => Progress::default(),
        })
    }

    /// Deletes every record whose deadline has passed and returns the
    /// affected session ids so callers can drop per-session state too.
    pub fn purge_expired(&self, now: i64) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT session_id FROM progress WHERE expires_at < ?1")?;
        let ids: Vec<String> = stmt
            .query_map(params![now], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        for id in &ids {
            conn.execute("DELETE FROM progress WHERE session_id = ?1", params![id])?;
        }
        Ok(ids)
    }
}

impl ProgressSink for ProgressStore {
    fn set_progress(&self, session_id: &str, current: usize, total: usize) -> Result<()> {
        self.set(session_id, current, total, PROGRESS_TTL_SECS)
    }
}
