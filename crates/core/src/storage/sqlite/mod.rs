//! Relational backend on SQLite with async access via tokio-rusqlite.
//!
//! All statements run on the connection's single background thread, so
//! multi-statement operations such as queue pops are serialized without
//! extra locking.

pub mod migrations;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, params};

use super::{ByteStore, ConnectionPool, QueueStore};
use crate::Error;
use crate::visits::VisitStore;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// SQLite-backed store implementing all three storage shapes.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Arc<Connection>,
}

impl SqliteStore {
    /// Open the database at `path` through `pool`.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations. Stores opened on the same path
    /// share one connection.
    pub async fn open(pool: &ConnectionPool<Connection>, path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = pool
            .acquire(path, |p| async move {
                let conn = Connection::open(p).await.map_err(|e| Error::Database(e.into()))?;
                Self::prepare(&conn).await?;
                Ok(conn)
            })
            .await?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(&conn).await?;
        Ok(Self { conn: Arc::new(conn) })
    }

    async fn prepare(conn: &Connection) -> Result<(), Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(conn).await
    }
}

#[async_trait]
impl ByteStore for SqliteStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let key = key.to_string();
        let stored_at = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO cache (key, value, stored_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        stored_at = excluded.stored_at",
                    params![key, value, stored_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let value = conn
                    .query_row("SELECT value FROM cache WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Error::from)
    }

    async fn has(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM cache WHERE key = ?1)",
                    params![key],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn clear(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                conn.execute("DELETE FROM cache", [])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn len(&self) -> Result<usize, Error> {
        self.conn
            .call(|conn| -> Result<usize, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl VisitStore for SqliteStore {
    async fn add_visit(&self, key: &str) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO visits (key, count) VALUES (?1, 1)
                     ON CONFLICT(key) DO UPDATE SET count = count + 1",
                    params![key],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn add_visit_within(&self, key: &str, max: u64) -> Result<bool, Error> {
        if key.is_empty() {
            return Err(Error::BlankPath);
        }
        let key = key.to_string();
        let max = i64::try_from(max).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let changed = conn.execute(
                    "INSERT INTO visits (key, count) VALUES (?1, 1)
                     ON CONFLICT(key) DO UPDATE SET count = count + 1 WHERE count <= ?2",
                    params![key, max],
                )?;
                Ok(changed > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn retract_visit(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("UPDATE visits SET count = count - 1 WHERE key = ?1", params![key])?;
                conn.execute("DELETE FROM visits WHERE key = ?1 AND count <= 0", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn past_visits(&self, key: &str) -> Result<u64, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: Option<i64> = conn
                    .query_row("SELECT count FROM visits WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()?;
                Ok(count.unwrap_or(0) as u64)
            })
            .await
            .map_err(Error::from)
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM visits WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn clear(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                conn.execute("DELETE FROM visits", [])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl QueueStore for SqliteStore {
    async fn push(&self, lane: u64, item: Vec<u8>) -> Result<(), Error> {
        let lane = lane as i64;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("INSERT INTO queue (lane, item) VALUES (?1, ?2)", params![lane, item])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn pop(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        let lane = lane as i64;
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let head: Option<(i64, Vec<u8>)> = conn
                    .query_row(
                        "SELECT id, item FROM queue WHERE lane = ?1 ORDER BY id ASC LIMIT 1",
                        params![lane],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((id, item)) = head else {
                    return Ok(None);
                };
                conn.execute("DELETE FROM queue WHERE id = ?1", params![id])?;
                Ok(Some(item))
            })
            .await
            .map_err(Error::from)
    }

    async fn peek(&self, lane: u64) -> Result<Option<Vec<u8>>, Error> {
        let lane = lane as i64;
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let item = conn
                    .query_row(
                        "SELECT item FROM queue WHERE lane = ?1 ORDER BY id ASC LIMIT 1",
                        params![lane],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(item)
            })
            .await
            .map_err(Error::from)
    }

    async fn len(&self, lane: u64) -> Result<usize, Error> {
        let lane = lane as i64;
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM queue WHERE lane = ?1", params![lane], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }

    async fn clear(&self, lane: u64) -> Result<(), Error> {
        let lane = lane as i64;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM queue WHERE lane = ?1", params![lane])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}
