//! Datastore initialization and startup
//!
//! Opens the SQLite datastore inside the repo directory and ensures all
//! required tables exist. A LOCK file next to the database guards against
//! concurrent opens; stale locks left by an unclean stop are force-removed
//! by the node supervisor before reopening.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use super::schema::{create_all_tables, run_migrations};

/// Database file name inside the datastore directory
pub const DB_FILE: &str = "weft.db";

/// Lock file name inside the datastore directory
pub const LOCK_FILE: &str = "LOCK";

/// Error type for datastore startup
#[derive(Debug)]
pub enum StartError {
    /// Another live process holds the datastore lock
    Locked(PathBuf),
    /// Filesystem error creating the datastore directory
    Io(std::io::Error),
    /// SQLite error
    Database(rusqlite::Error),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::Locked(path) => {
                write!(f, "datastore is locked by another process: {}", path.display())
            }
            StartError::Io(e) => write!(f, "io error: {}", e),
            StartError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<rusqlite::Error> for StartError {
    fn from(e: rusqlite::Error) -> Self {
        StartError::Database(e)
    }
}

impl From<std::io::Error> for StartError {
    fn from(e: std::io::Error) -> Self {
        StartError::Io(e)
    }
}

/// The datastore directory for a repo path
pub fn datastore_dir(repo_path: &Path) -> PathBuf {
    repo_path.join("datastore")
}

/// The lock file path for a repo path
pub fn lock_path(repo_path: &Path) -> PathBuf {
    datastore_dir(repo_path).join(LOCK_FILE)
}

/// Opens the datastore and ensures all required tables exist.
///
/// Writes a LOCK file recording this process id; `Locked` is returned if a
/// lock naming a different live process already exists. Call
/// [`remove_stale_lock`] first to clear locks left by unclean stops.
pub fn start_db(repo_path: &Path) -> Result<Connection, StartError> {
    let dir = datastore_dir(repo_path);
    std::fs::create_dir_all(&dir)?;

    let lock = lock_path(repo_path);
    if lock.exists() {
        return Err(StartError::Locked(lock));
    }
    std::fs::write(&lock, std::process::id().to_string())?;

    let conn = Connection::open(dir.join(DB_FILE))?;

    // WAL mode for better concurrency (PRAGMA returns the new mode)
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Schema creation is idempotent, so always run it to recover cleanly
    // from partially initialized databases
    create_all_tables(&conn)?;
    run_migrations(&conn)?;

    // Stamp fresh (or pre-versioned) repos with the current major version;
    // later versions require an explicit major migration
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version == 0 {
        conn.execute_batch(&format!(
            "PRAGMA user_version = {}",
            super::schema::SCHEMA_VERSION
        ))?;
    }

    Ok(conn)
}

/// Remove a stale lock file if its recorded process is no longer alive.
///
/// An unparseable lock is treated as stale. Returns whether a lock was
/// removed.
pub fn remove_stale_lock(repo_path: &Path) -> std::io::Result<bool> {
    let lock = lock_path(repo_path);
    if !lock.exists() {
        return Ok(false);
    }

    let stale = match std::fs::read_to_string(&lock) {
        Ok(contents) => match contents.trim().parse::<u32>() {
            Ok(pid) => pid != std::process::id() && !process_alive(pid),
            Err(_) => true,
        },
        Err(_) => true,
    };

    if stale {
        std::fs::remove_file(&lock)?;
        return Ok(true);
    }
    Ok(false)
}

/// Remove the lock file unconditionally (clean shutdown path).
pub fn remove_lock(repo_path: &Path) {
    let _ = std::fs::remove_file(lock_path(repo_path));
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    // Probing /proc avoids sending signals; absent on non-Linux unix, where
    // we conservatively treat the process as alive
    let proc_path = PathBuf::from(format!("/proc/{}", pid));
    if Path::new("/proc").exists() {
        proc_path.exists()
    } else {
        true
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Create an in-memory datastore for testing
pub fn start_memory_db() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    // WAL mode doesn't work with in-memory databases, skip it
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_all_tables(&conn)?;
    run_migrations(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_db_has_tables() {
        let conn = start_memory_db().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 15);
    }

    #[test]
    fn test_start_db_creates_and_locks() {
        let dir = tempfile::tempdir().unwrap();
        let conn = start_db(dir.path()).unwrap();
        drop(conn);

        assert!(lock_path(dir.path()).exists());

        // Second open while our own (live) lock exists is refused
        let result = start_db(dir.path());
        assert!(matches!(result, Err(StartError::Locked(_))));
    }

    #[test]
    fn test_remove_lock_allows_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _conn = start_db(dir.path()).unwrap();
        }
        remove_lock(dir.path());
        let _conn = start_db(dir.path()).unwrap();
    }

    #[test]
    fn test_stale_lock_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(datastore_dir(dir.path())).unwrap();
        // A lock with garbage contents is stale by definition
        std::fs::write(lock_path(dir.path()), "not-a-pid").unwrap();

        assert!(remove_stale_lock(dir.path()).unwrap());
        assert!(!lock_path(dir.path()).exists());
    }

    #[test]
    fn test_own_lock_not_stale() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(datastore_dir(dir.path())).unwrap();
        std::fs::write(lock_path(dir.path()), std::process::id().to_string()).unwrap();

        assert!(!remove_stale_lock(dir.path()).unwrap());
        assert!(lock_path(dir.path()).exists());
    }

    #[test]
    fn test_reopening_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let conn = start_db(dir.path()).unwrap();
            conn.execute(
                "INSERT INTO threads (id, name, sk) VALUES ('t1', 'alpha', x'00')",
                [],
            )
            .unwrap();
        }
        remove_lock(dir.path());
        {
            let conn = start_db(dir.path()).unwrap();
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM threads", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 1);
        }
    }
}
