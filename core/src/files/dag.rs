//! Encrypted file DAG assembly
//!
//! Files compose into a two-level directory layout shared through FILE
//! blocks. The outer directory carries numeric link names; each link points
//! at a *pair node* with exactly two links: `f` (the encrypted JSON file
//! record) and `d` (the content payload). Directory entries nest one level
//! deeper with named links.
//!
//! A `Keys` map travels with the block (inside the encrypted payload) so
//! recipients holding the thread key can decrypt every file without further
//! key exchange.

use std::collections::BTreeMap;

use rusqlite::Connection;

use crate::data::{self, File};
use crate::node::NodeError;
use crate::object::{Directory, ObjectNode, ObjectStore};
use crate::security::{decrypt_aes, encrypt_aes};

/// Link name of the metadata blob inside a pair node
pub const FILE_LINK: &str = "f";

/// Link name of the content payload inside a pair node
pub const DATA_LINK: &str = "d";

/// Decryption keys keyed by path inside a target node (`/0/`, `/1/photo/`, ...)
pub type Keys = BTreeMap<String, String>;

/// A named set of files forming one directory entry
pub type FileDir = BTreeMap<String, File>;

/// Build the single-file layout: outer directory with numeric links, each to
/// a pair node. Returns the pinned node and the key map (`/i/`).
pub fn add_node_from_files(
    conn: &Connection,
    object: &dyn ObjectStore,
    files: &[File],
) -> Result<(ObjectNode, Keys), NodeError> {
    let mut keys = Keys::new();
    let mut outer = object.new_directory();

    for (i, file) in files.iter().enumerate() {
        let link = i.to_string();
        file_node(conn, object, file, &mut outer, &link)?;
        keys.insert(format!("/{}/", link), file.key.clone());
    }

    let node = object.finalize_dir(outer, false)?;
    object.pin(&node.id, false)?;
    Ok((node, keys))
}

/// Build the directory layout: outer numeric links point at inner directories
/// of named pair nodes. Key paths are `/i/name/`.
pub fn add_node_from_dirs(
    conn: &Connection,
    object: &dyn ObjectStore,
    dirs: &[FileDir],
) -> Result<(ObjectNode, Keys), NodeError> {
    let mut keys = Keys::new();
    let mut outer = object.new_directory();

    for (i, dir) in dirs.iter().enumerate() {
        let olink = i.to_string();
        let mut inner = object.new_directory();

        for (link, file) in dir {
            file_node(conn, object, file, &mut inner, link)?;
            keys.insert(format!("/{}/{}/", olink, link), file.key.clone());
        }

        let inner_node = object.finalize_dir(inner, false)?;
        object.pin(&inner_node.id, false)?;
        object.add_link_to_dir(&mut outer, &olink, &inner_node.id)?;
    }

    let node = object.finalize_dir(outer, false)?;
    object.pin(&node.id, false)?;
    Ok((node, keys))
}

/// Rebuild the key map of a previously shared target node.
///
/// The inverse of the builders above: walk the two-level layout, classify
/// each child as a pair node or an inner directory, and look the keys up in
/// the local file index.
pub fn target_node_keys(
    conn: &Connection,
    object: &dyn ObjectStore,
    node: &ObjectNode,
) -> Result<Keys, NodeError> {
    let mut keys = Keys::new();

    for link in &node.links {
        let child = object.node_at_link(link)?;
        if looks_like_file_node(&child) {
            let key = file_link_key(conn, object, &child)?;
            keys.insert(format!("/{}/", link.name), key);
        } else {
            for inner_link in &child.links {
                let pair = object.node_at_link(inner_link)?;
                let key = file_link_key(conn, object, &pair)?;
                keys.insert(format!("/{}/{}/", link.name, inner_link.name), key);
            }
        }
    }

    Ok(keys)
}

/// Fetch and decrypt a file's content payload
pub fn file_data(
    conn: &Connection,
    object: &dyn ObjectStore,
    hash: &str,
) -> Result<(Vec<u8>, File), NodeError> {
    let file = data::get_file(conn, hash)?
        .ok_or_else(|| NodeError::NotFound(format!("file {}", hash)))?;
    let stored = object.data_at_path(&file.hash)?;

    let plaintext = if file.key.is_empty() {
        stored
    } else {
        let key = bs58::decode(&file.key)
            .into_vec()
            .map_err(|e| NodeError::InvalidInput(format!("bad file key: {}", e)))?;
        decrypt_aes(&stored, &key)?
    };
    Ok((plaintext, file))
}

/// Whether a node has the shape of a pair node: exactly the `f` and `d` links.
/// Shape only - the data behind the links is not inspected.
pub fn looks_like_file_node(node: &ObjectNode) -> bool {
    node.links.len() == 2
        && node.links.iter().any(|l| l.name == FILE_LINK)
        && node.links.iter().any(|l| l.name == DATA_LINK)
}

/// Build one pair node for a file and link it into `dir` under `link`.
fn file_node(
    conn: &Connection,
    object: &dyn ObjectStore,
    file: &File,
    dir: &mut Directory,
    link: &str,
) -> Result<(), NodeError> {
    if data::get_file(conn, &file.hash)?.is_none() {
        return Err(NodeError::NotFound(format!("file {}", file.hash)));
    }

    // Local-only state must not leak into the hashed DAG
    let mut shared = file.clone();
    shared.targets = Vec::new();

    let plaintext = serde_json::to_vec(&shared)
        .map_err(|e| NodeError::InvalidInput(e.to_string()))?;

    let payload = if file.key.is_empty() {
        plaintext
    } else {
        let key = bs58::decode(&file.key)
            .into_vec()
            .map_err(|e| NodeError::InvalidInput(format!("bad file key: {}", e)))?;
        encrypt_aes(&plaintext, &key)?
    };

    let mut pair = object.new_directory();
    object.add_bytes_to_dir(&mut pair, FILE_LINK, &payload)?;
    object.add_link_to_dir(&mut pair, DATA_LINK, &file.hash)?;

    let pair_node = object.finalize_dir(pair, false)?;
    object.pin(&pair_node.id, false)?;
    object.add_link_to_dir(dir, link, &pair_node.id)?;
    Ok(())
}

/// Key of the file behind a pair node's `d` link
fn file_link_key(
    conn: &Connection,
    object: &dyn ObjectStore,
    pair: &ObjectNode,
) -> Result<String, NodeError> {
    let d = object
        .resolve_link(pair, DATA_LINK)
        .ok_or_else(|| NodeError::InvalidThreadBlock("data link not in node".to_string()))?;
    let file = data::get_file(conn, &d.id)?
        .ok_or_else(|| NodeError::NotFound(format!("file {}", d.id)))?;
    Ok(file.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;
    use crate::files::mill::BlobMill;
    use crate::files::pipeline::{add_file, AddFileConfig};
    use crate::object::MemoryStore;

    fn add_test_file(
        conn: &Connection,
        object: &dyn ObjectStore,
        data: &[u8],
        plaintext: bool,
    ) -> File {
        add_file(
            conn,
            object,
            &BlobMill,
            &AddFileConfig {
                input: data.to_vec(),
                media: "application/octet-stream".to_string(),
                name: "f".to_string(),
                plaintext,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_single_file_layout_round_trip() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let a = add_test_file(&conn, object.as_ref(), b"first", false);
        let b = add_test_file(&conn, object.as_ref(), b"second", true);

        let (node, keys) = add_node_from_files(&conn, object.as_ref(), &[a.clone(), b.clone()]).unwrap();

        assert_eq!(node.links.len(), 2);
        assert_eq!(keys.get("/0/").unwrap(), &a.key);
        assert_eq!(keys.get("/1/").unwrap(), "");

        // The inverse walk reproduces exactly the inserted keys
        let recovered = target_node_keys(&conn, object.as_ref(), &node).unwrap();
        assert_eq!(recovered, keys);
    }

    #[test]
    fn test_directory_layout_round_trip() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let photo = add_test_file(&conn, object.as_ref(), b"jpeg bits", false);
        let thumb = add_test_file(&conn, object.as_ref(), b"small bits", false);

        let mut dir = FileDir::new();
        dir.insert("photo".to_string(), photo.clone());
        dir.insert("thumb".to_string(), thumb.clone());

        let (node, keys) = add_node_from_dirs(&conn, object.as_ref(), &[dir]).unwrap();
        assert_eq!(keys.get("/0/photo/").unwrap(), &photo.key);
        assert_eq!(keys.get("/0/thumb/").unwrap(), &thumb.key);

        let recovered = target_node_keys(&conn, object.as_ref(), &node).unwrap();
        assert_eq!(recovered, keys);
    }

    #[test]
    fn test_pair_metadata_clears_targets() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let file = add_test_file(&conn, object.as_ref(), b"content", true);
        data::add_file_target(&conn, &file.hash, "some-block").unwrap();
        let file = data::get_file(&conn, &file.hash).unwrap().unwrap();
        assert!(!file.targets.is_empty());

        let (node, _) = add_node_from_files(&conn, object.as_ref(), &[file]).unwrap();

        // The pair's f payload is plaintext JSON here; targets must be gone
        let pair = object.node_at_link(&node.links[0]).unwrap();
        let f = object.resolve_link(&pair, FILE_LINK).unwrap();
        let meta_json = object.data_at_path(&f.id).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&meta_json).unwrap();
        assert!(parsed.get("targets").is_none());
    }

    #[test]
    fn test_pair_metadata_encrypted_with_file_key() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let file = add_test_file(&conn, object.as_ref(), b"content", false);
        let (node, _) = add_node_from_files(&conn, object.as_ref(), &[file.clone()]).unwrap();

        let pair = object.node_at_link(&node.links[0]).unwrap();
        let f = object.resolve_link(&pair, FILE_LINK).unwrap();
        let payload = object.data_at_path(&f.id).unwrap();

        // Not plaintext JSON
        assert!(serde_json::from_slice::<serde_json::Value>(&payload).is_err());

        // Decrypts under the file key to the file record
        let key = bs58::decode(&file.key).into_vec().unwrap();
        let plain = decrypt_aes(&payload, &key).unwrap();
        let parsed: File = serde_json::from_slice(&plain).unwrap();
        assert_eq!(parsed.hash, file.hash);
    }

    #[test]
    fn test_unknown_file_rejected() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let ghost = File {
            hash: "missing".to_string(),
            mill: "/blob".to_string(),
            checksum: "c".to_string(),
            source: "s".to_string(),
            opts: String::new(),
            media: String::new(),
            name: String::new(),
            size: 0,
            added: 0,
            meta: String::new(),
            key: String::new(),
            targets: Vec::new(),
        };
        let err = add_node_from_files(&conn, object.as_ref(), &[ghost]).unwrap_err();
        assert!(matches!(err, NodeError::NotFound(_)));
    }

    #[test]
    fn test_file_data_decrypts() {
        let conn = start_memory_db().unwrap();
        let object = MemoryStore::standalone("n1");

        let encrypted = add_test_file(&conn, object.as_ref(), b"secret payload", false);
        let (plain, row) = file_data(&conn, object.as_ref(), &encrypted.hash).unwrap();
        assert_eq!(plain, b"secret payload");
        assert_eq!(row.hash, encrypted.hash);

        let public = add_test_file(&conn, object.as_ref(), b"open payload", true);
        let (plain, _) = file_data(&conn, object.as_ref(), &public.hash).unwrap();
        assert_eq!(plain, b"open payload");
    }

    #[test]
    fn test_looks_like_file_node_shape() {
        let object = MemoryStore::standalone("n1");
        let blob = object.add_bytes(b"x", false).unwrap();

        let mut pair = object.new_directory();
        object.add_link_to_dir(&mut pair, "f", &blob).unwrap();
        object.add_link_to_dir(&mut pair, "d", &blob).unwrap();
        let pair = object.finalize_dir(pair, false).unwrap();
        assert!(looks_like_file_node(&pair));

        let mut wrong = object.new_directory();
        object.add_link_to_dir(&mut wrong, "f", &blob).unwrap();
        object.add_link_to_dir(&mut wrong, "x", &blob).unwrap();
        let wrong = object.finalize_dir(wrong, false).unwrap();
        assert!(!looks_like_file_node(&wrong));
    }
}
