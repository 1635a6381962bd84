use super::{CacheBackend, DatabaseError};
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), DatabaseError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), DatabaseError> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DatabaseError> {
        self.entries.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, DatabaseError> {
        Ok(self.entries.len())
    }

    fn keys(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

// Stored keys carry a one-byte prefix so the empty photo id is still a
// non-empty sled key.
const SLED_KEY_PREFIX: u8 = b'k';
const SLED_TREE: &str = "analysis_cache";

pub struct SledBackend {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(SLED_TREE)?;
        Ok(Self { db, tree })
    }

    /// Throwaway database that is deleted on drop.
    pub fn temporary() -> Result<Self, DatabaseError> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree(SLED_TREE)?;
        Ok(Self { db, tree })
    }

    fn encode_key(key: &str) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(key.len() + 1);
        encoded.push(SLED_KEY_PREFIX);
        encoded.extend_from_slice(key.as_bytes());
        encoded
    }

    fn decode_key(raw: &[u8]) -> Option<String> {
        raw.strip_prefix(&[SLED_KEY_PREFIX])
            .and_then(|k| String::from_utf8(k.to_vec()).ok())
    }
}

impl CacheBackend for SledBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(self.tree.get(Self::encode_key(key))?.map(|v| v.to_vec()))
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), DatabaseError> {
        self.tree.insert(Self::encode_key(key), value)?;
        Ok(())
    }

    fn put_many(&mut self, entries: &[(String, Vec<u8>)]) -> Result<(), DatabaseError> {
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            batch.insert(Self::encode_key(key), value.as_slice());
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), DatabaseError> {
        self.tree.remove(Self::encode_key(key))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DatabaseError> {
        self.tree.clear()?;
        Ok(())
    }

    fn len(&self) -> Result<usize, DatabaseError> {
        Ok(self.tree.len())
    }

    fn keys(&self) -> Result<Vec<String>, DatabaseError> {
        let mut keys = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter().keys() {
            let raw = entry?;
            match Self::decode_key(&raw) {
                Some(key) => keys.push(key),
                None => log::warn!("Ignoring malformed cache key ({} bytes)", raw.len()),
            }
        }
        Ok(keys)
    }

    fn flush(&mut self) -> Result<(), DatabaseError> {
        self.db.flush()?;
        Ok(())
    }
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let backend = Self { conn };
        backend.initialize_schema()?;
        Ok(backend)
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS analysis_cache (
                photo_id TEXT PRIMARY KEY NOT NULL,
                payload BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl CacheBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM analysis_cache WHERE photo_id = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get::<_, Vec<u8>>(0)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO analysis_cache (photo_id, payload, updated_at)
             VALUES (?1, ?2, ?3)",
            params![key, value, Self::now()],
        )?;
        Ok(())
    }

    fn put_many(&mut self, entries: &[(String, Vec<u8>)]) -> Result<(), DatabaseError> {
        let now = Self::now();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO analysis_cache (photo_id, payload, updated_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (key, value) in entries {
                stmt.execute(params![key, value, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute("DELETE FROM analysis_cache WHERE photo_id = ?1", params![key])?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DatabaseError> {
        self.conn.execute("DELETE FROM analysis_cache", [])?;
        Ok(())
    }

    fn len(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM analysis_cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn keys(&self) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT photo_id FROM analysis_cache ORDER BY photo_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}
