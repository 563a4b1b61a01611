//! Connection set-up for the SQLite ledger.

use crate::error::{AttendanceError, Result};
use crate::manager::AttendanceManager;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, Pool};
use std::time::Duration;
use tracing::{debug, info};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Table definitions; every statement is `IF NOT EXISTS` so this is safe to run on each start.
const SCHEMA: &str = include_str!("../migrations/2025-01-01-000000_create_ledger/up.sql");

/// How long a writer waits for another writer's transaction before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn configure(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute(&format!(
        "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
        BUSY_TIMEOUT.as_millis()
    ))
}

/// Opens a single connection and makes sure the schema exists.
pub fn establish(database_url: &str) -> ConnectionResult<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)?;
    configure(&mut conn).map_err(ConnectionError::CouldntSetupConfiguration)?;
    init_schema(&mut conn).map_err(ConnectionError::CouldntSetupConfiguration)?;
    Ok(conn)
}

pub fn init_schema(conn: &mut SqliteConnection) -> QueryResult<()> {
    debug!("applying ledger schema");
    conn.batch_execute(SCHEMA)
}

#[derive(Debug, Clone, Copy)]
struct Pragmas;

impl CustomizeConnection<SqliteConnection, r2d2::Error> for Pragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), r2d2::Error> {
        configure(conn).map_err(r2d2::Error::QueryError)
    }
}

/// Builds a connection pool for `database_url` and applies the schema once.
pub fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(Pragmas))
        .build(manager)?;

    let mut conn = pool.get()?;
    init_schema(&mut conn)?;

    info!(database_url, max_size, "ledger database ready");
    Ok(pool)
}

/// Runs `f` against a pooled connection on tokio's blocking thread pool.
///
/// Diesel's SQLite driver is synchronous; every store access from async code goes through here.
pub async fn with_manager<T, F>(pool: &DbPool, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut AttendanceManager<'_>) -> Result<T> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        let mut manager = AttendanceManager::new(&mut conn);
        f(&mut manager)
    })
    .await
    .map_err(AttendanceError::from)?
}
