//! Account and profile configuration
//!
//! Single-row-per-key storage for the account identity, the repo creation
//! date, and the local profile username announced to threads.

use rusqlite::{Connection, OptionalExtension, params};

use crate::security::Account;

const ACCOUNT_SECRET_KEY: &str = "account_secret";
const ACCOUNT_ADDRESS_KEY: &str = "account_address";
const CREATED_KEY: &str = "created";
const USERNAME_KEY: &str = "username";

fn set(conn: &Connection, key: &str, value: &[u8]) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn get(conn: &Connection, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        [key],
        |row| row.get(0),
    )
    .optional()
}

/// Store the account identity and creation date.
pub fn configure_account(
    conn: &Connection,
    account: &Account,
    created: i64,
) -> rusqlite::Result<()> {
    set(conn, ACCOUNT_SECRET_KEY, &account.secret_key())?;
    set(conn, ACCOUNT_ADDRESS_KEY, account.address().as_bytes())?;
    set(conn, CREATED_KEY, &created.to_le_bytes())?;
    Ok(())
}

/// Load the stored account, if the repo has been initialised.
pub fn get_account(conn: &Connection) -> rusqlite::Result<Option<Account>> {
    let secret = match get(conn, ACCOUNT_SECRET_KEY)? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let address = get(conn, ACCOUNT_ADDRESS_KEY)?.unwrap_or_default();

    let secret: [u8; 32] = match secret.try_into() {
        Ok(s) => s,
        Err(_) => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                "account_secret".to_string(),
                rusqlite::types::Type::Blob,
            ))
        }
    };
    Ok(Some(Account::from_parts(
        secret,
        String::from_utf8_lossy(&address).to_string(),
    )))
}

/// Repo creation date (unix seconds), 0 if unset.
pub fn get_created(conn: &Connection) -> rusqlite::Result<i64> {
    Ok(get(conn, CREATED_KEY)?
        .and_then(|v| v.try_into().ok().map(i64::from_le_bytes))
        .unwrap_or(0))
}

/// Set the profile username.
pub fn set_username(conn: &Connection, username: &str) -> rusqlite::Result<()> {
    set(conn, USERNAME_KEY, username.as_bytes())
}

/// Get the profile username, if set.
pub fn get_username(conn: &Connection) -> rusqlite::Result<Option<String>> {
    Ok(get(conn, USERNAME_KEY)?.map(|v| String::from_utf8_lossy(&v).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::start_memory_db;

    #[test]
    fn test_account_round_trip() {
        let conn = start_memory_db().unwrap();
        let account = Account::from_seed(&[9u8; 64]).unwrap();

        assert!(get_account(&conn).unwrap().is_none());

        configure_account(&conn, &account, 1700000000).unwrap();
        let loaded = get_account(&conn).unwrap().unwrap();
        assert_eq!(loaded.peer_id(), account.peer_id());
        assert_eq!(loaded.address(), account.address());
        assert_eq!(get_created(&conn).unwrap(), 1700000000);
    }

    #[test]
    fn test_username() {
        let conn = start_memory_db().unwrap();
        assert!(get_username(&conn).unwrap().is_none());
        set_username(&conn, "mick").unwrap();
        assert_eq!(get_username(&conn).unwrap().unwrap(), "mick");
        set_username(&conn, "keith").unwrap();
        assert_eq!(get_username(&conn).unwrap().unwrap(), "keith");
    }
}
