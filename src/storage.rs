use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Preference key for the shared mute flag.
pub const MUTED_KEY: &str = "videoMuted";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Non-persistent store, used by demo mode.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("storage: open in-memory database")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn get_preference<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("storage: query preference {key}"))?;
        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .with_context(|| format!("storage: decode preference {key}")),
            None => Ok(None),
        }
    }

    pub fn set_preference<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        if key.trim().is_empty() {
            bail!("storage: preference key required");
        }
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("storage: encode preference {key}"))?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO preferences (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, encoded, unix_now()],
        )
        .with_context(|| format!("storage: write preference {key}"))?;
        Ok(())
    }

    /// Stored mute flag. Absent means muted.
    pub fn muted(&self) -> Result<bool> {
        Ok(self.get_preference::<bool>(MUTED_KEY)?.unwrap_or(true))
    }

    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.set_preference(MUTED_KEY, &muted)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, unix_now()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS preferences (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("reelfeed").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mute_defaults_on_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(store.muted().unwrap());
        store.set_muted(false).unwrap();
        drop(store);

        let reopened = Store::open(Options { path: Some(path) }).unwrap();
        assert!(!reopened.muted().unwrap());
    }

    #[test]
    fn preference_is_stored_as_json() {
        let store = Store::open_in_memory().unwrap();
        store.set_muted(true).unwrap();
        let raw: String = store
            .conn
            .lock()
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![MUTED_KEY],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, "true");
    }

    #[test]
    fn undecodable_preference_is_an_error() {
        let store = Store::open_in_memory().unwrap();
        store.set_preference("videoMuted", &"loud").unwrap();
        assert!(store.muted().is_err());
    }
}
