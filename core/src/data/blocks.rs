//! Block index storage
//!
//! Blocks are immutable once indexed; the only delete path is whole-thread
//! removal. Parents live in a junction table so the current heads of a
//! thread's DAG fall out of a single NOT EXISTS query.

use rusqlite::{Connection, OptionalExtension, params};

/// Block type discriminants (stable, stored in the database)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlockType {
    Merge = 0,
    Ignore = 1,
    Flag = 2,
    Join = 3,
    Announce = 4,
    Leave = 5,
    File = 6,
    Text = 7,
    Comment = 8,
    Like = 9,
    Invite = 10,
}

impl BlockType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(BlockType::Merge),
            1 => Some(BlockType::Ignore),
            2 => Some(BlockType::Flag),
            3 => Some(BlockType::Join),
            4 => Some(BlockType::Announce),
            5 => Some(BlockType::Leave),
            6 => Some(BlockType::File),
            7 => Some(BlockType::Text),
            8 => Some(BlockType::Comment),
            9 => Some(BlockType::Like),
            10 => Some(BlockType::Invite),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Merge => "MERGE",
            BlockType::Ignore => "IGNORE",
            BlockType::Flag => "FLAG",
            BlockType::Join => "JOIN",
            BlockType::Announce => "ANNOUNCE",
            BlockType::Leave => "LEAVE",
            BlockType::File => "FILE",
            BlockType::Text => "TEXT",
            BlockType::Comment => "COMMENT",
            BlockType::Like => "LIKE",
            BlockType::Invite => "INVITE",
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexed block
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// Content-addressed multihash of the encrypted envelope
    pub id: String,
    pub thread_id: String,
    pub author_id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub date: i64,
    /// Heads this block extends; empty on an initial JOIN
    pub parents: Vec<String>,
    /// Referenced data (file node, target block, ...)
    pub data_id: String,
    /// Base58 AES key for the referenced data, if any
    pub data_key: String,
    pub data_caption: String,
}

fn parse_block_row(row: &rusqlite::Row) -> rusqlite::Result<Block> {
    let type_raw: i64 = row.get(3)?;
    let block_type = BlockType::from_i64(type_raw).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, "type".to_string(), rusqlite::types::Type::Integer)
    })?;
    Ok(Block {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        author_id: row.get(2)?,
        block_type,
        date: row.get(4)?,
        parents: Vec::new(),
        data_id: row.get(5)?,
        data_key: row.get(6)?,
        data_caption: row.get(7)?,
    })
}

fn load_parents(conn: &Connection, block_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT parent_id FROM block_parents WHERE block_id = ?1 ORDER BY parent_id",
    )?;
    let parents = stmt
        .query_map([block_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parents)
}

/// Index a block with its parents.
///
/// Atomic: the block row and all parent rows land together or not at all.
pub fn add_block(conn: &mut Connection, block: &Block) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO blocks (id, thread_id, author_id, type, date, data_id, data_key, data_caption)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            block.id,
            block.thread_id,
            block.author_id,
            block.block_type as i64,
            block.date,
            block.data_id,
            block.data_key,
            block.data_caption,
        ],
    )?;
    for parent in &block.parents {
        tx.execute(
            "INSERT OR IGNORE INTO block_parents (block_id, parent_id) VALUES (?1, ?2)",
            params![block.id, parent],
        )?;
    }
    tx.commit()
}

/// Get a block with its parents
pub fn get_block(conn: &Connection, id: &str) -> rusqlite::Result<Option<Block>> {
    let block = conn
        .query_row(
            "SELECT id, thread_id, author_id, type, date, data_id, data_key, data_caption
             FROM blocks WHERE id = ?1",
            [id],
            parse_block_row,
        )
        .optional()?;
    match block {
        Some(mut b) => {
            b.parents = load_parents(conn, id)?;
            Ok(Some(b))
        }
        None => Ok(None),
    }
}

/// Whether a block is already indexed
pub fn block_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM blocks WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Current heads of a thread: blocks no other block lists as a parent.
///
/// Sorted ascending on the raw decoded hash bytes so MERGE construction is
/// deterministic across nodes.
pub fn thread_heads(conn: &Connection, thread_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT b.id FROM blocks b
         WHERE b.thread_id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM block_parents p
               JOIN blocks c ON c.id = p.block_id
               WHERE p.parent_id = b.id AND c.thread_id = ?1
           )",
    )?;
    let mut heads: Vec<String> = stmt
        .query_map([thread_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    heads.sort_by(|a, b| {
        let ab = bs58::decode(a).into_vec().unwrap_or_default();
        let bb = bs58::decode(b).into_vec().unwrap_or_default();
        ab.cmp(&bb)
    });
    Ok(heads)
}

/// Whether a block has been tombstoned by an IGNORE block in its thread
pub fn block_ignored(conn: &Connection, thread_id: &str, block_id: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM blocks
         WHERE thread_id = ?1 AND type = ?2 AND data_id = ?3",
        params![thread_id, BlockType::Ignore as i64, block_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// List a thread's blocks, newest first, excluding tombstoned rows.
///
/// `types` filters to the given block types when non-empty.
pub fn list_blocks(
    conn: &Connection,
    thread_id: &str,
    types: &[BlockType],
    offset: i64,
    limit: i64,
) -> rusqlite::Result<Vec<Block>> {
    let type_filter = if types.is_empty() {
        String::new()
    } else {
        let ids: Vec<String> = types.iter().map(|t| (*t as i64).to_string()).collect();
        format!("AND b.type IN ({})", ids.join(","))
    };
    let query = format!(
        "SELECT b.id, b.thread_id, b.author_id, b.type, b.date, b.data_id, b.data_key, b.data_caption
         FROM blocks b
         WHERE b.thread_id = ?1 {}
           AND NOT EXISTS (
               SELECT 1 FROM blocks i
               WHERE i.thread_id = b.thread_id AND i.type = {} AND i.data_id = b.id
           )
         ORDER BY b.date DESC LIMIT ?2 OFFSET ?3",
        type_filter,
        BlockType::Ignore as i64,
    );
    let mut stmt = conn.prepare(&query)?;
    let mut blocks = stmt
        .query_map(params![thread_id, limit, offset], parse_block_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for block in &mut blocks {
        block.parents = load_parents(conn, &block.id)?;
    }
    Ok(blocks)
}

/// Count a thread's blocks (tombstoned rows excluded)
pub fn count_blocks(conn: &Connection, thread_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM blocks b
         WHERE b.thread_id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM blocks i
               WHERE i.thread_id = b.thread_id AND i.type = ?2 AND i.data_id = b.id
           )",
        params![thread_id, BlockType::Ignore as i64],
        |row| row.get(0),
    )
}

/// Delete every block of a thread (cascades to parents)
pub fn delete_blocks_by_thread(conn: &Connection, thread_id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM blocks WHERE thread_id = ?1", [thread_id])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;

    fn test_block(id: &str, thread: &str, parents: &[&str], block_type: BlockType) -> Block {
        Block {
            id: id.to_string(),
            thread_id: thread.to_string(),
            author_id: "author".to_string(),
            block_type,
            date: 1000,
            parents: parents.iter().map(|p| p.to_string()).collect(),
            data_id: String::new(),
            data_key: String::new(),
            data_caption: String::new(),
        }
    }

    #[test]
    fn test_add_get_round_trip() {
        let mut conn = start_memory_db().unwrap();
        let mut block = test_block("b1", "t1", &[], BlockType::Join);
        block.data_caption = "hi".to_string();
        add_block(&mut conn, &block).unwrap();

        let loaded = get_block(&conn, "b1").unwrap().unwrap();
        assert_eq!(loaded, block);
        assert!(block_exists(&conn, "b1").unwrap());
        assert!(!block_exists(&conn, "b2").unwrap());
    }

    #[test]
    fn test_duplicate_block_conflicts() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        let err = add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap_err();
        assert!(crate::data::is_conflict(&err));
    }

    #[test]
    fn test_heads_linear_chain() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        add_block(&mut conn, &test_block("b2", "t1", &["b1"], BlockType::Text)).unwrap();
        add_block(&mut conn, &test_block("b3", "t1", &["b2"], BlockType::Text)).unwrap();

        assert_eq!(thread_heads(&conn, "t1").unwrap(), vec!["b3".to_string()]);
    }

    #[test]
    fn test_heads_fork() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        add_block(&mut conn, &test_block("x2", "t1", &["b1"], BlockType::Text)).unwrap();
        add_block(&mut conn, &test_block("y2", "t1", &["b1"], BlockType::Text)).unwrap();

        let heads = thread_heads(&conn, "t1").unwrap();
        assert_eq!(heads.len(), 2);

        // Merge closes the fork
        add_block(&mut conn, &test_block("m", "t1", &["x2", "y2"], BlockType::Merge)).unwrap();
        assert_eq!(thread_heads(&conn, "t1").unwrap(), vec!["m".to_string()]);
    }

    #[test]
    fn test_heads_sorted_on_raw_bytes() {
        let mut conn = start_memory_db().unwrap();
        // base58: "2" decodes to [1], "z" to [57]
        add_block(&mut conn, &test_block("z", "t1", &[], BlockType::Text)).unwrap();
        add_block(&mut conn, &test_block("2", "t1", &[], BlockType::Text)).unwrap();
        assert_eq!(
            thread_heads(&conn, "t1").unwrap(),
            vec!["2".to_string(), "z".to_string()]
        );
    }

    #[test]
    fn test_heads_scoped_to_thread() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        add_block(&mut conn, &test_block("c1", "t2", &[], BlockType::Join)).unwrap();
        assert_eq!(thread_heads(&conn, "t1").unwrap(), vec!["b1".to_string()]);
    }

    #[test]
    fn test_ignore_tombstones_listing() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        add_block(&mut conn, &test_block("b2", "t1", &["b1"], BlockType::Text)).unwrap();

        let mut ignore = test_block("b3", "t1", &["b2"], BlockType::Ignore);
        ignore.data_id = "b2".to_string();
        add_block(&mut conn, &ignore).unwrap();

        assert!(block_ignored(&conn, "t1", "b2").unwrap());
        assert!(!block_ignored(&conn, "t1", "b1").unwrap());

        let listed = list_blocks(&conn, "t1", &[], 0, 10).unwrap();
        let ids: Vec<&str> = listed.iter().map(|b| b.id.as_str()).collect();
        assert!(!ids.contains(&"b2"), "tombstoned block should be hidden");
        assert!(ids.contains(&"b1"));

        // The block row itself still exists (blocks are never deleted)
        assert!(block_exists(&conn, "b2").unwrap());
        assert_eq!(count_blocks(&conn, "t1").unwrap(), 2);
    }

    #[test]
    fn test_list_filters_by_type() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        add_block(&mut conn, &test_block("b2", "t1", &["b1"], BlockType::Text)).unwrap();
        add_block(&mut conn, &test_block("b3", "t1", &["b2"], BlockType::File)).unwrap();

        let texts = list_blocks(&conn, "t1", &[BlockType::Text], 0, 10).unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].id, "b2");
    }

    #[test]
    fn test_delete_by_thread_cascades_parents() {
        let mut conn = start_memory_db().unwrap();
        add_block(&mut conn, &test_block("b1", "t1", &[], BlockType::Join)).unwrap();
        add_block(&mut conn, &test_block("b2", "t1", &["b1"], BlockType::Text)).unwrap();

        assert_eq!(delete_blocks_by_thread(&conn, "t1").unwrap(), 2);
        let parent_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM block_parents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(parent_rows, 0);
    }

    #[test]
    fn test_block_type_round_trip() {
        for i in 0..=10 {
            let t = BlockType::from_i64(i).unwrap();
            assert_eq!(t as i64, i);
        }
        assert!(BlockType::from_i64(11).is_none());
        assert_eq!(BlockType::Merge.as_str(), "MERGE");
        assert_eq!(BlockType::Invite.to_string(), "INVITE");
    }
}
