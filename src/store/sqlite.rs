use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::{DogearError, Result};
use crate::queue::{JobQueue, QueuedMessage};
use crate::store::{KvStore, Versioned};

/// SQLite-backed key-value store and message queue.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| DogearError::Other(format!("Migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            DogearError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let conn = self.conn()?;
        let result = conn
            .query_row(
                "SELECT value, version FROM kv WHERE key = ?1",
                params![key],
                |row| {
                    Ok(Versioned {
                        value: row.get(0)?,
                        version: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    fn put(&self, key: &str, value: &str) -> Result<i64> {
        let conn = self.conn()?;
        let version = conn.query_row(
            "INSERT INTO kv (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                version = kv.version + 1,
                updated_at = excluded.updated_at
             RETURNING version",
            params![key, value, Utc::now().to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    fn put_if_version(&self, key: &str, value: &str, expected: Option<i64>) -> Result<bool> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let changed = match expected {
            Some(version) => conn.execute(
                "UPDATE kv SET value = ?2, version = version + 1, updated_at = ?3
                 WHERE key = ?1 AND version = ?4",
                params![key, value, now, version],
            )?,
            None => conn.execute(
                "INSERT OR IGNORE INTO kv (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)",
                params![key, value, now],
            )?,
        };
        Ok(changed == 1)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }
}

impl JobQueue for SqliteStore {
    fn send(&self, queue: &str, body: &serde_json::Value, delay: Option<Duration>) -> Result<()> {
        let conn = self.conn()?;
        let delay_ms = delay.map(|d| d.as_millis() as i64).unwrap_or(0);
        conn.execute(
            "INSERT INTO queue_messages (queue, body, visible_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                queue,
                serde_json::to_string(body)?,
                Self::now_millis() + delay_ms,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn receive(&self, queue: &str, limit: usize, lease: Duration) -> Result<Vec<QueuedMessage>> {
        let mut conn = self.conn()?;
        let now = Self::now_millis();
        let tx = conn.transaction()?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT id, body, deliveries FROM queue_messages
                 WHERE queue = ?1 AND visible_at <= ?2
                 ORDER BY visible_at, id LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![queue, now, limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let visible_at = now + lease.as_millis() as i64;
        let mut messages = Vec::with_capacity(rows.len());
        for (id, body, deliveries) in rows {
            tx.execute(
                "UPDATE queue_messages SET visible_at = ?2, deliveries = deliveries + 1 WHERE id = ?1",
                params![id, visible_at],
            )?;
            let body = match serde_json::from_str(&body) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("Dropping unreadable queue message {}: {}", id, e);
                    tx.execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
                    continue;
                }
            };
            messages.push(QueuedMessage {
                id,
                queue: queue.to_string(),
                body,
                deliveries: deliveries + 1,
            });
        }

        tx.commit()?;
        Ok(messages)
    }

    fn ack(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
        Ok(())
    }
}
