//! Durable store backed by SQLite.

use crate::{IdbError, Key, KeyValueStore};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const KIND_NUMBER: i64 = 0;
const KIND_STRING: i64 = 1;

/// Object store persisted in a SQLite database file.
///
/// One database file per database name; one table per object store.
/// Every operation runs in its own transaction on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    db_name: String,
    store_name: String,
    table: String,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) `store_name` inside the database at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        db_name: &str,
        store_name: &str,
    ) -> Result<Self, IdbError> {
        let path = path.as_ref();
        info!(path = ?path, db = db_name, store = store_name, "Opening durable store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IdbError::unavailable(format!("Failed to create {:?}: {}", parent, e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| IdbError::unavailable(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn, db_name, store_name)
    }

    /// Open a private in-memory database. Nothing survives the handle.
    pub fn open_in_memory(db_name: &str, store_name: &str) -> Result<Self, IdbError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| IdbError::unavailable(format!("Failed to open database: {}", e)))?;
        Self::with_connection(conn, db_name, store_name)
    }

    fn with_connection(
        conn: Connection,
        db_name: &str,
        store_name: &str,
    ) -> Result<Self, IdbError> {
        let table = quote_ident(store_name);

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key_kind INTEGER NOT NULL,
                    key_num INTEGER NOT NULL DEFAULT 0,
                    key_text TEXT NOT NULL DEFAULT '',
                    value TEXT NOT NULL,
                    PRIMARY KEY (key_kind, key_num, key_text)
                )",
                table
            ),
            [],
        )
        .map_err(|e| IdbError::unavailable(format!("Failed to create store: {}", e)))?;

        Ok(Self {
            db_name: db_name.to_string(),
            store_name: store_name.to_string(),
            table,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` inside a fresh transaction on the blocking pool.
    async fn transact<T, F>(&self, op: &'static str, f: F) -> Result<T, IdbError>
    where
        F: FnOnce(&Transaction<'_>, &str) -> Result<T, IdbError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();

        let result = tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| IdbError::unavailable("connection lock poisoned"))?;
            let tx = conn
                .transaction()
                .map_err(|e| IdbError::unavailable(format!("Failed to begin {}: {}", op, e)))?;
            let value = f(&tx, &table)?;
            tx.commit()
                .map_err(|e| IdbError::unavailable(format!("Failed to commit {}: {}", op, e)))?;
            Ok(value)
        })
        .await
        .map_err(|e| IdbError::unavailable(format!("{} task failed: {}", op, e)))?;

        debug!(store = %self.store_name, op, ok = result.is_ok(), "Store operation");
        result
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn db_name(&self) -> &str {
        &self.db_name
    }

    fn store_name(&self) -> &str {
        &self.store_name
    }

    async fn get(&self, key: &Key) -> Result<Option<JsonValue>, IdbError> {
        let (kind, num, text) = key_columns(key);
        self.transact("get", move |tx, table| {
            let raw: Option<String> = tx
                .query_row(
                    &format!(
                        "SELECT value FROM {} WHERE key_kind = ?1 AND key_num = ?2 AND key_text = ?3",
                        table
                    ),
                    params![kind, num, text],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| IdbError::unavailable(format!("Failed to read record: {}", e)))?;

            raw.map(|s| serde_json::from_str(&s).map_err(|e| IdbError::DataError(e.to_string())))
                .transpose()
        })
        .await
    }

    async fn set(&self, key: Key, value: JsonValue) -> Result<(), IdbError> {
        let (kind, num, text) = key_columns(&key);
        let encoded =
            serde_json::to_string(&value).map_err(|e| IdbError::DataError(e.to_string()))?;
        self.transact("set", move |tx, table| {
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} (key_kind, key_num, key_text, value)
                     VALUES (?1, ?2, ?3, ?4)",
                    table
                ),
                params![kind, num, text, encoded],
            )
            .map_err(|e| IdbError::unavailable(format!("Failed to write record: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &Key) -> Result<(), IdbError> {
        let (kind, num, text) = key_columns(key);
        self.transact("delete", move |tx, table| {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE key_kind = ?1 AND key_num = ?2 AND key_text = ?3",
                    table
                ),
                params![kind, num, text],
            )
            .map_err(|e| IdbError::unavailable(format!("Failed to delete record: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), IdbError> {
        self.transact("clear", |tx, table| {
            tx.execute(&format!("DELETE FROM {}", table), [])
                .map_err(|e| IdbError::unavailable(format!("Failed to clear store: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<Key>, IdbError> {
        self.transact("keys", |tx, table| {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT key_kind, key_num, key_text FROM {} ORDER BY key_kind, key_num, key_text",
                    table
                ))
                .map_err(|e| IdbError::unavailable(format!("Failed to prepare query: {}", e)))?;

            let rows = stmt
                .query_map([], |row| {
                    let kind: i64 = row.get(0)?;
                    let num: i64 = row.get(1)?;
                    let text: String = row.get(2)?;
                    Ok(if kind == KIND_NUMBER {
                        Key::Number(num)
                    } else {
                        Key::String(text)
                    })
                })
                .map_err(|e| IdbError::unavailable(format!("Failed to query keys: {}", e)))?;

            let keys = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| IdbError::unavailable(format!("Failed to read key row: {}", e)))?;
            Ok(keys)
        })
        .await
    }
}

fn key_columns(key: &Key) -> (i64, i64, String) {
    match key {
        Key::Number(n) => (KIND_NUMBER, *n, String::new()),
        Key::String(s) => (KIND_STRING, 0, s.clone()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip() {
        let store = SqliteStore::open_in_memory("my-db", "my-store").unwrap();

        store.set(Key::from("bar"), json!("banana")).await.unwrap();
        assert_eq!(store.get(&Key::from("bar")).await.unwrap(), Some(json!("banana")));

        store.delete(&Key::from("bar")).await.unwrap();
        assert_eq!(store.get(&Key::from("bar")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_then_keys_empty() {
        let store = SqliteStore::open_in_memory("my-db", "my-store").unwrap();
        store.set(Key::from(1i64), json!({"method": "POST", "body": "1"})).await.unwrap();
        store.set(Key::from("quz"), json!("strawberry")).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_natural_order() {
        let store = SqliteStore::open_in_memory("my-db", "my-store").unwrap();
        store.set(Key::from("b"), json!(0)).await.unwrap();
        store.set(Key::from(1_700_000_000_500i64), json!(0)).await.unwrap();
        store.set(Key::from("a"), json!(0)).await.unwrap();
        store.set(Key::from(1_700_000_000_100i64), json!(0)).await.unwrap();

        assert_eq!(
            store.keys().await.unwrap(),
            vec![
                Key::Number(1_700_000_000_100),
                Key::Number(1_700_000_000_500),
                Key::from("a"),
                Key::from("b"),
            ]
        );
    }

    #[tokio::test]
    async fn test_number_and_string_keys_do_not_collide() {
        let store = SqliteStore::open_in_memory("my-db", "my-store").unwrap();
        store.set(Key::from(5i64), json!("number")).await.unwrap();
        store.set(Key::from("5"), json!("string")).await.unwrap();

        assert_eq!(store.get(&Key::from(5i64)).await.unwrap(), Some(json!("number")));
        assert_eq!(store.get(&Key::from("5")).await.unwrap(), Some(json!("string")));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = SqliteStore::open_in_memory("my-db", "my-store").unwrap();
        assert!(store.delete(&Key::from(99i64)).await.is_ok());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("my-db.sqlite3");

        {
            let store = SqliteStore::open(&path, "my-db", "my-store").unwrap();
            store.set(Key::from(1i64), json!({"method": "POST", "body": "5"})).await.unwrap();
        }

        let reopened = SqliteStore::open(&path, "my-db", "my-store").unwrap();
        assert_eq!(reopened.keys().await.unwrap(), vec![Key::Number(1)]);
        assert_eq!(
            reopened.get(&Key::from(1i64)).await.unwrap(),
            Some(json!({"method": "POST", "body": "5"}))
        );
    }

    #[tokio::test]
    async fn test_stores_are_isolated_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my-db.sqlite3");

        let a = SqliteStore::open(&path, "my-db", "queue").unwrap();
        let b = SqliteStore::open(&path, "my-db", "other \"store\"").unwrap();
        a.set(Key::from("k"), json!(1)).await.unwrap();

        assert!(b.keys().await.unwrap().is_empty());
        assert_eq!(b.store_name(), "other \"store\"");
    }

    #[test]
    fn test_open_unwritable_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file.
        let result = SqliteStore::open(dir.path(), "my-db", "my-store");
        assert!(matches!(result, Err(IdbError::StoreUnavailable(_))));
    }
}
