use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use diesel::sqlite::SqliteConnection;

diesel_migrations::embed_migrations!("./migrations/");

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

pub fn establish_pool(database_url: &str) -> anyhow::Result<Pool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    r2d2::Pool::builder()
        .build(manager)
        .map_err(|e| anyhow::anyhow!("cannot build connection pool for {database_url}: {e}"))
}

/// runs embedded migrations against a single fresh connection, outside
/// the pool, same as the teacher's `establish_connection` + `run_migrations`
/// pair in `src/db.rs` (called once at startup, before the pool is handed
/// to the rest of the system).
pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let conn = SqliteConnection::establish(database_url)
        .map_err(|e| anyhow::anyhow!("cannot connect to db at {database_url}: {e}"))?;
    embedded_migrations::run(&conn).map_err(|e| anyhow::anyhow!("cannot run migrations: {e}"))
}
