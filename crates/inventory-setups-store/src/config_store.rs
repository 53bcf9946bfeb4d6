use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

const CREATE_CONFIG_SQL: &str = r"
CREATE TABLE IF NOT EXISTS config (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
";

/// Compose the whole key a store uses for `key` inside `group`.
#[must_use]
pub fn whole_key(group: &str, key: &str) -> String {
    format!("{group}.{key}")
}

/// Flat string key-value configuration store scoped by group.
///
/// Single-key writes are atomic; nothing spans keys.
pub trait ConfigStore {
    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn get(&self, group: &str, key: &str) -> Result<Option<String>>;

    /// # Errors
    /// Returns an error when the backing store cannot be written.
    fn set(&mut self, group: &str, key: &str, value: &str) -> Result<()>;

    /// # Errors
    /// Returns an error when the backing store cannot be written.
    fn unset(&mut self, group: &str, key: &str) -> Result<()>;

    /// Whole keys starting with `whole_prefix`, in ascending key order.
    ///
    /// # Errors
    /// Returns an error when the backing store cannot be read.
    fn list_keys(&self, whole_prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryConfigStore {
    entries: BTreeMap<String, String>,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn raw_get(&self, whole_key: &str) -> Option<&str> {
        self.entries.get(whole_key).map(String::as_str)
    }

    pub fn raw_set(&mut self, whole_key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(whole_key.into(), value.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, group: &str, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(&whole_key(group, key)).cloned())
    }

    fn set(&mut self, group: &str, key: &str, value: &str) -> Result<()> {
        self.entries.insert(whole_key(group, key), value.to_string());
        Ok(())
    }

    fn unset(&mut self, group: &str, key: &str) -> Result<()> {
        self.entries.remove(&whole_key(group, key));
        Ok(())
    }

    fn list_keys(&self, whole_prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .range(whole_prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(whole_prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

pub struct SqliteConfigStore {
    conn: Connection,
}

impl SqliteConfigStore {
    /// Open a SQLite-backed config store and create the config table if needed.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or initialized.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;
        conn.execute_batch(CREATE_CONFIG_SQL).context("failed to create config table")?;

        Ok(Self { conn })
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, group: &str, key: &str) -> Result<Option<String>> {
        let whole = whole_key(group, key);
        self.conn
            .query_row("SELECT value FROM config WHERE key = ?1", params![whole], |row| row.get(0))
            .optional()
            .with_context(|| format!("failed to read config key {whole}"))
    }

    fn set(&mut self, group: &str, key: &str, value: &str) -> Result<()> {
        let whole = whole_key(group, key);
        self.conn
            .execute(
                "INSERT INTO config(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![whole, value],
            )
            .with_context(|| format!("failed to write config key {whole}"))?;
        Ok(())
    }

    fn unset(&mut self, group: &str, key: &str) -> Result<()> {
        let whole = whole_key(group, key);
        self.conn
            .execute("DELETE FROM config WHERE key = ?1", params![whole])
            .with_context(|| format!("failed to delete config key {whole}"))?;
        Ok(())
    }

    fn list_keys(&self, whole_prefix: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT key FROM config
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
            )
            .context("failed to prepare config key listing")?;
        let rows = stmt.query_map(params![whole_prefix], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.with_context(|| format!("failed to list keys under {whole_prefix}"))?);
        }
        Ok(keys)
    }
}
