//! File ingest pipeline
//!
//! `add_file` runs a payload through a mill, dedups against the index at
//! both the source and primary level, encrypts when asked to, inserts the
//! payload into the object store, and records the file row.

use rusqlite::Connection;
use tracing::debug;

use crate::data::{self, File};
use crate::node::NodeError;
use crate::object::ObjectStore;
use crate::security::{checksum, encrypt_aes, generate_aes_key};

use super::mill::{Mill, MillOpts};

/// Input to [`add_file`]
#[derive(Debug, Clone, Default)]
pub struct AddFileConfig {
    pub input: Vec<u8>,
    /// Reuse an existing source checksum instead of hashing `input`
    pub use_source: String,
    pub media: String,
    pub name: String,
    /// Store plaintext even when the mill encrypts by default
    pub plaintext: bool,
}

/// Run a payload through a mill and index the result.
///
/// Idempotent: the same source input (or the same milled output) returns the
/// already-indexed row. The returned row is always re-read from the store so
/// downstream directory hashing sees the canonical persisted representation.
pub fn add_file(
    conn: &Connection,
    object: &dyn ObjectStore,
    mill: &dyn Mill,
    cfg: &AddFileConfig,
) -> Result<File, NodeError> {
    mill.accept_media(&cfg.media)?;

    let source = if cfg.use_source.is_empty() {
        checksum(&cfg.input, !cfg.plaintext)
    } else {
        cfg.use_source.clone()
    };

    let opts = mill.options(&MillOpts::plaintext(cfg.plaintext));

    // Source-level dedup: identical input through identical options
    if let Some(existing) = data::get_file_by_source(conn, mill.id(), &source, &opts)? {
        debug!(mill = mill.id(), source = %source, "file dedup hit (source)");
        return Ok(existing);
    }

    let res = mill.mill(&cfg.input, &cfg.name)?;

    // Primary-level dedup: identical milled output
    let check = checksum(&res.bytes, !cfg.plaintext);
    if let Some(existing) = data::get_file_by_primary(conn, mill.id(), &check)? {
        debug!(mill = mill.id(), checksum = %check, "file dedup hit (primary)");
        return Ok(existing);
    }

    let mut key = String::new();
    let payload = if mill.encrypt() && !cfg.plaintext {
        let aes_key = generate_aes_key();
        let ciphertext = encrypt_aes(&res.bytes, &aes_key)?;
        key = bs58::encode(aes_key).into_string();
        ciphertext
    } else {
        res.bytes.clone()
    };

    let hash = object.add_bytes(&payload, mill.pin())?;

    let row = File {
        hash: hash.clone(),
        mill: mill.id().to_string(),
        checksum: check,
        source,
        opts,
        media: cfg.media.clone(),
        name: cfg.name.clone(),
        size: res.bytes.len() as i64,
        added: data::current_timestamp(),
        meta: res
            .meta
            .map(|m| m.to_string())
            .unwrap_or_default(),
        key,
        targets: Vec::new(),
    };
    data::add_file(conn, &row)?;

    debug!(mill = mill.id(), hash = %hash, size = row.size, "file added");

    data::get_file(conn, &hash)?
        .ok_or_else(|| NodeError::NotFound(format!("file {}", hash)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;
    use crate::files::mill::{BlobMill, SchemaMill};
    use crate::object::MemoryStore;
    use crate::security::decrypt_aes;

    fn cfg(input: &[u8]) -> AddFileConfig {
        AddFileConfig {
            input: input.to_vec(),
            media: "application/octet-stream".to_string(),
            name: "file.bin".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_file_encrypts_by_default() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let file = add_file(&conn, object.as_ref(), &BlobMill, &cfg(b"hello")).unwrap();
        assert!(!file.key.is_empty());

        // Stored payload is ciphertext that decrypts back to the input
        let stored = object.data_at_path(&file.hash).unwrap();
        assert_ne!(stored, b"hello");
        let key = bs58::decode(&file.key).into_vec().unwrap();
        assert_eq!(decrypt_aes(&stored, &key).unwrap(), b"hello");
    }

    #[test]
    fn test_add_file_plaintext() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let mut config = cfg(b"hello");
        config.plaintext = true;
        let file = add_file(&conn, object.as_ref(), &BlobMill, &config).unwrap();
        assert!(file.key.is_empty());
        assert_eq!(object.data_at_path(&file.hash).unwrap(), b"hello");
    }

    #[test]
    fn test_add_file_idempotent() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let first = add_file(&conn, object.as_ref(), &BlobMill, &cfg(b"hello")).unwrap();
        let second = add_file(&conn, object.as_ref(), &BlobMill, &cfg(b"hello")).unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(crate::data::count_files(&conn).unwrap(), 1);
    }

    #[test]
    fn test_source_dedup_distinguishes_opts() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let encrypted = add_file(&conn, object.as_ref(), &BlobMill, &cfg(b"hello")).unwrap();
        let mut plain_cfg = cfg(b"hello");
        plain_cfg.plaintext = true;
        let plain = add_file(&conn, object.as_ref(), &BlobMill, &plain_cfg).unwrap();

        assert_ne!(encrypted.hash, plain.hash);
        assert_eq!(crate::data::count_files(&conn).unwrap(), 2);
    }

    #[test]
    fn test_primary_dedup_via_use_source() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let mut config = cfg(b"{\"a\":1}");
        config.media = "application/json".to_string();
        config.plaintext = true;
        let first = add_file(&conn, object.as_ref(), &SchemaMill, &config).unwrap();

        // Different declared source, identical milled output
        let mut aliased = config.clone();
        aliased.use_source = "some-external-source".to_string();
        let second = add_file(&conn, object.as_ref(), &SchemaMill, &aliased).unwrap();
        assert_eq!(first.hash, second.hash);
        assert_eq!(crate::data::count_files(&conn).unwrap(), 1);
    }

    #[test]
    fn test_schema_mill_pins() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let mut config = cfg(b"{\"fields\": []}");
        config.media = "application/json".to_string();
        let file = add_file(&conn, object.as_ref(), &SchemaMill, &config).unwrap();
        assert!(object.is_pinned(&file.hash));
        // Schema mill never encrypts
        assert!(file.key.is_empty());
    }

    #[test]
    fn test_rejected_media() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let config = cfg(b"raw"); // octet-stream against the schema mill
        let err = add_file(&conn, object.as_ref(), &SchemaMill, &config).unwrap_err();
        assert!(matches!(err, NodeError::InvalidInput(_)));
    }

    #[test]
    fn test_returned_row_is_persisted_row() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let file = add_file(&conn, object.as_ref(), &BlobMill, &cfg(b"data")).unwrap();
        let persisted = crate::data::get_file(&conn, &file.hash).unwrap().unwrap();
        assert_eq!(file, persisted);
    }
}
