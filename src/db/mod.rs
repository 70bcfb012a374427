pub mod progress;
pub mod reference;
pub mod schema;

use std::path::Path;

use anyhow::Result;
use r2d2_sqlite::SqliteConnectionManager;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;

pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        schema::apply_pragmas(conn)?;
        schema::apply_schema(conn)?;
        Ok(())
    });
    Ok(r2d2::Pool::builder().max_size(size).build(manager)?)
}
