//! Shared SQLite plumbing for the reference store and index.

use crate::error::{StorageError, StorageResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use vindex_types::Version;

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

pub(crate) fn open(path: &Path) -> StorageResult<SharedConnection> {
    Ok(Arc::new(Mutex::new(Connection::open(path)?)))
}

pub(crate) fn open_in_memory() -> StorageResult<SharedConnection> {
    Ok(Arc::new(Mutex::new(Connection::open_in_memory()?)))
}

pub(crate) fn lock(conn: &SharedConnection) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Runs a blocking database closure off the async executor.
pub(crate) async fn run_blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("blocking task failed: {e}")))?
}

pub(crate) fn version_to_sql(version: Version) -> (i64, i64) {
    (version.wall_time() as i64, i64::from(version.logical()))
}

pub(crate) fn version_from_sql(wall_time: i64, logical: i64) -> StorageResult<Version> {
    let wall = u64::try_from(wall_time)
        .map_err(|_| StorageError::InvalidData(format!("negative wall time {wall_time}")))?;
    let logical = u32::try_from(logical)
        .map_err(|_| StorageError::InvalidData(format!("logical counter out of range {logical}")))?;
    Ok(Version::new(wall, logical))
}

pub(crate) fn parse_id<T: std::str::FromStr>(s: &str, what: &str) -> StorageResult<T>
where
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e| StorageError::InvalidData(format!("invalid {what} {s:?}: {e}")))
}
