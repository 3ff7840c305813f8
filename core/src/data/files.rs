//! File index storage
//!
//! `(mill, checksum)` is unique: the same milled output is indexed once.
//! `targets` reference-counts the blocks that point at a file; a file with no
//! remaining targets is eligible for garbage collection.

use rusqlite::{Connection, OptionalExtension, params};

/// An indexed file
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct File {
    /// Content-addressed multihash of the stored (possibly encrypted) payload
    pub hash: String,
    /// Id of the mill that produced the payload
    pub mill: String,
    /// Checksum of the milled output (primary dedup key with `mill`)
    pub checksum: String,
    /// Checksum of the original input (source dedup key with `mill`, `opts`)
    pub source: String,
    /// Canonical encoded mill options
    pub opts: String,
    pub media: String,
    pub name: String,
    pub size: i64,
    pub added: i64,
    /// Mill-produced metadata (JSON), empty if none
    pub meta: String,
    /// Base58 AES key; non-empty iff the stored payload is ciphertext
    pub key: String,
    /// Blocks referencing this file (local-only, never serialised into DAGs)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub targets: Vec<String>,
}

fn parse_file_row(row: &rusqlite::Row) -> rusqlite::Result<File> {
    Ok(File {
        hash: row.get(0)?,
        mill: row.get(1)?,
        checksum: row.get(2)?,
        source: row.get(3)?,
        opts: row.get(4)?,
        media: row.get(5)?,
        name: row.get(6)?,
        size: row.get(7)?,
        added: row.get(8)?,
        meta: row.get(9)?,
        key: row.get(10)?,
        targets: Vec::new(),
    })
}

const FILE_COLUMNS: &str =
    "hash, mill, checksum, source, opts, media, name, size, added, meta, key";

fn load_targets(conn: &Connection, hash: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT target FROM file_targets WHERE hash = ?1 ORDER BY target")?;
    let targets = stmt
        .query_map([hash], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(targets)
}

fn with_targets(conn: &Connection, file: Option<File>) -> rusqlite::Result<Option<File>> {
    match file {
        Some(mut f) => {
            f.targets = load_targets(conn, &f.hash)?;
            Ok(Some(f))
        }
        None => Ok(None),
    }
}

/// Index a file
pub fn add_file(conn: &Connection, file: &File) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO files ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            FILE_COLUMNS
        ),
        params![
            file.hash,
            file.mill,
            file.checksum,
            file.source,
            file.opts,
            file.media,
            file.name,
            file.size,
            file.added,
            file.meta,
            file.key,
        ],
    )?;
    Ok(())
}

/// Get a file by hash
pub fn get_file(conn: &Connection, hash: &str) -> rusqlite::Result<Option<File>> {
    let file = conn
        .query_row(
            &format!("SELECT {} FROM files WHERE hash = ?1", FILE_COLUMNS),
            [hash],
            parse_file_row,
        )
        .optional()?;
    with_targets(conn, file)
}

/// Look up by the primary dedup key `(mill, checksum)`
pub fn get_file_by_primary(
    conn: &Connection,
    mill: &str,
    checksum: &str,
) -> rusqlite::Result<Option<File>> {
    let file = conn
        .query_row(
            &format!(
                "SELECT {} FROM files WHERE mill = ?1 AND checksum = ?2",
                FILE_COLUMNS
            ),
            params![mill, checksum],
            parse_file_row,
        )
        .optional()?;
    with_targets(conn, file)
}

/// Look up by the source dedup key `(mill, source, opts)`
pub fn get_file_by_source(
    conn: &Connection,
    mill: &str,
    source: &str,
    opts: &str,
) -> rusqlite::Result<Option<File>> {
    let file = conn
        .query_row(
            &format!(
                "SELECT {} FROM files WHERE mill = ?1 AND source = ?2 AND opts = ?3",
                FILE_COLUMNS
            ),
            params![mill, source, opts],
            parse_file_row,
        )
        .optional()?;
    with_targets(conn, file)
}

/// Record a block reference to a file
pub fn add_file_target(conn: &Connection, hash: &str, target: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO file_targets (hash, target) VALUES (?1, ?2)",
        params![hash, target],
    )?;
    Ok(())
}

/// Drop a block reference. Returns the number of remaining targets.
pub fn remove_file_target(conn: &Connection, hash: &str, target: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "DELETE FROM file_targets WHERE hash = ?1 AND target = ?2",
        params![hash, target],
    )?;
    conn.query_row(
        "SELECT COUNT(*) FROM file_targets WHERE hash = ?1",
        [hash],
        |row| row.get(0),
    )
}

/// Hashes of files referenced by a block
pub fn list_files_by_target(conn: &Connection, target: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT hash FROM file_targets WHERE target = ?1")?;
    let hashes = stmt
        .query_map([target], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hashes)
}

/// Count indexed files
pub fn count_files(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
}

/// Delete a file row (cascades to targets)
pub fn delete_file(conn: &Connection, hash: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute("DELETE FROM files WHERE hash = ?1", [hash])?;
    Ok(rows > 0)
}
