use rusqlite::Connection;

pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS progress (
  session_id TEXT PRIMARY KEY,
  current INTEGER NOT NULL,
  total INTEGER NOT NULL,
  expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_progress_expires ON progress(expires_at);

CREATE TABLE IF NOT EXISTS reference_images (
  session_id TEXT PRIMARY KEY,
  filename TEXT NOT NULL,
  data BLOB NOT NULL,
  created_at INTEGER NOT NULL
);
"#,
    )?;
    Ok(())
}
